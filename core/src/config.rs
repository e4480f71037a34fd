//! Resampling configuration.
//!
//! [ResamplingConfig] gathers the knobs of the resampling stage: the base strategy, whether KLD-sampling bounds the
//! output size, the KLD parameters, the recovery averaging rates, the resampling trigger and an optional seed. Every
//! field has a serde default so partial configuration files are accepted. Configurations can be read from and
//! written to JSON, YAML and TOML; [ResamplingConfig::from_file] and [ResamplingConfig::to_file] pick the format
//! from the file extension.
//!
//! ```
//! use mcl::ResamplingConfig;
//! use mcl::resampling::ResamplingStrategy;
//!
//! let cfg = ResamplingConfig {
//!     strategy: ResamplingStrategy::Residual,
//!     adaptive: true,
//!     max_samples: 2000,
//!     ..Default::default()
//! };
//! assert!(cfg.validate().is_ok());
//! ```
use crate::error::ResamplingError;
use crate::kld::{BinResolution, KldConfig};
use crate::resampler::ResamplingTrigger;
use crate::resampling::ResamplingStrategy;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

fn default_kld_error() -> f64 {
    0.01
}
/// Upper 0.99 quantile of the standard normal distribution.
fn default_kld_z() -> f64 {
    2.326
}
fn default_min_samples() -> usize {
    100
}
fn default_max_samples() -> usize {
    5000
}
fn default_alpha_slow() -> f64 {
    0.001
}
fn default_alpha_fast() -> f64 {
    0.1
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResamplingConfig {
    /// Base resampling strategy.
    #[serde(default)]
    pub strategy: ResamplingStrategy,
    /// Bound the output size with KLD-sampling instead of keeping it fixed.
    #[serde(default)]
    pub adaptive: bool,
    /// Allowed KL divergence between the sample-based and the true posterior.
    #[serde(default = "default_kld_error")]
    pub kld_error: f64,
    /// Standard normal quantile for the KLD bound.
    #[serde(default = "default_kld_z")]
    pub kld_z: f64,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    /// Averaging rate of the slow recovery estimate.
    #[serde(default = "default_alpha_slow")]
    pub recovery_alpha_slow: f64,
    /// Averaging rate of the fast recovery estimate.
    #[serde(default = "default_alpha_fast")]
    pub recovery_alpha_fast: f64,
    /// Seed for the resampling random streams. OS entropy is used when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Histogram resolution used by KLD-sampling.
    #[serde(default)]
    pub kld_bin_size: BinResolution,
    #[serde(default)]
    pub trigger: ResamplingTrigger,
}

impl Default for ResamplingConfig {
    fn default() -> Self {
        ResamplingConfig {
            strategy: ResamplingStrategy::default(),
            adaptive: false,
            kld_error: default_kld_error(),
            kld_z: default_kld_z(),
            min_samples: default_min_samples(),
            max_samples: default_max_samples(),
            recovery_alpha_slow: default_alpha_slow(),
            recovery_alpha_fast: default_alpha_fast(),
            seed: None,
            kld_bin_size: BinResolution::default(),
            trigger: ResamplingTrigger::default(),
        }
    }
}

impl ResamplingConfig {
    /// Check parameter ranges. Errors name the offending field.
    pub fn validate(&self) -> Result<(), ResamplingError> {
        let invalid = |msg: String| Err(ResamplingError::InvalidConfig(msg));
        if !(self.kld_error.is_finite() && self.kld_error > 0.0) {
            return invalid(format!("kld_error must be positive, got {}", self.kld_error));
        }
        if !self.kld_z.is_finite() {
            return invalid(format!("kld_z must be finite, got {}", self.kld_z));
        }
        let bins = &self.kld_bin_size;
        if !(bins.linear.is_finite() && bins.linear > 0.0 && bins.angular.is_finite() && bins.angular > 0.0) {
            return invalid(format!("kld_bin_size must be positive, got {:?}", bins));
        }
        if self.min_samples == 0 {
            return invalid("min_samples must be at least 1".to_string());
        }
        if self.max_samples < self.min_samples {
            return invalid(format!(
                "max_samples ({}) must not be smaller than min_samples ({})",
                self.max_samples, self.min_samples
            ));
        }
        for (name, alpha) in [
            ("recovery_alpha_slow", self.recovery_alpha_slow),
            ("recovery_alpha_fast", self.recovery_alpha_fast),
        ] {
            if !(0.0..=1.0).contains(&alpha) {
                return invalid(format!("{} must lie in [0, 1], got {}", name, alpha));
            }
        }
        self.trigger.validate()
    }
    /// Parameters of the KLD bound.
    pub fn kld_config(&self) -> KldConfig {
        KldConfig {
            error: self.kld_error,
            z: self.kld_z,
            bin_size: self.kld_bin_size,
            min_samples: self.min_samples,
            max_samples: self.max_samples,
        }
    }

    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        write_json(self, path)
    }
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        read_json(path)
    }
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        write_yaml(self, path)
    }
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        read_yaml(path)
    }
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        write_toml(self, path)
    }
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        read_toml(path)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        write_file(self, path)
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        read_file(path)
    }
}

/// Write `value` as pretty-printed JSON.
pub(crate) fn write_json<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> io::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, value).map_err(io::Error::other)
}
pub(crate) fn read_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> io::Result<T> {
    let file = File::open(path)?;
    serde_json::from_reader(file).map_err(io::Error::other)
}
pub(crate) fn write_yaml<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> io::Result<()> {
    let mut file = File::create(path)?;
    let s = serde_yaml::to_string(value).map_err(io::Error::other)?;
    file.write_all(s.as_bytes())
}
pub(crate) fn read_yaml<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> io::Result<T> {
    let file = File::open(path)?;
    serde_yaml::from_reader(file).map_err(io::Error::other)
}
pub(crate) fn write_toml<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> io::Result<()> {
    let mut file = File::create(path)?;
    let s = toml::to_string(value).map_err(io::Error::other)?;
    file.write_all(s.as_bytes())
}
pub(crate) fn read_toml<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> io::Result<T> {
    let mut s = String::new();
    let mut file = File::open(path)?;
    file.read_to_string(&mut s)?;
    toml::from_str(&s).map_err(io::Error::other)
}
/// Write `value` in the format named by the file extension.
pub(crate) fn write_file<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> io::Result<()> {
    let p = path.as_ref();
    match extension(p).as_deref() {
        Some("json") => write_json(value, p),
        Some("yaml") | Some("yml") => write_yaml(value, p),
        Some("toml") => write_toml(value, p),
        _ => Err(unsupported_extension()),
    }
}
/// Read a value in the format named by the file extension.
pub(crate) fn read_file<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> io::Result<T> {
    let p = path.as_ref();
    match extension(p).as_deref() {
        Some("json") => read_json(p),
        Some("yaml") | Some("yml") => read_yaml(p),
        Some("toml") => read_toml(p),
        _ => Err(unsupported_extension()),
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}
fn unsupported_extension() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "unsupported file extension")
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("mcl_config_{}_{}", std::process::id(), name))
    }

    #[test]
    fn test_defaults() {
        let cfg = ResamplingConfig::default();
        assert_eq!(cfg.strategy, ResamplingStrategy::Stratified);
        assert!(!cfg.adaptive);
        assert_eq!(cfg.min_samples, 100);
        assert_eq!(cfg.max_samples, 5000);
        assert_approx_eq!(cfg.kld_bin_size.angular, 10.0_f64.to_radians(), 1e-12);
        assert!(cfg.seed.is_none());
        assert!(cfg.validate().is_ok());
    }
    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: ResamplingConfig =
            serde_json::from_str(r#"{"strategy": "residual", "adaptive": true, "seed": 7}"#).unwrap();
        assert_eq!(cfg.strategy, ResamplingStrategy::Residual);
        assert!(cfg.adaptive);
        assert_eq!(cfg.seed, Some(7));
        assert_eq!(cfg.max_samples, 5000);
        assert_approx_eq!(cfg.recovery_alpha_fast, 0.1, 1e-12);
    }
    #[test]
    fn test_validate_rejects_bad_ranges() {
        let bad = [
            ResamplingConfig {
                kld_error: 0.0,
                ..Default::default()
            },
            ResamplingConfig {
                min_samples: 0,
                ..Default::default()
            },
            ResamplingConfig {
                min_samples: 500,
                max_samples: 100,
                ..Default::default()
            },
            ResamplingConfig {
                recovery_alpha_fast: 1.5,
                ..Default::default()
            },
            ResamplingConfig {
                kld_bin_size: BinResolution {
                    linear: 0.0,
                    angular: 0.1,
                },
                ..Default::default()
            },
        ];
        for cfg in bad {
            assert!(matches!(
                cfg.validate(),
                Err(ResamplingError::InvalidConfig(_))
            ));
        }
    }
    #[test]
    fn test_file_round_trip() {
        let cfg = ResamplingConfig {
            strategy: ResamplingStrategy::Multinomial,
            adaptive: true,
            seed: Some(42),
            min_samples: 50,
            ..Default::default()
        };
        for ext in ["json", "yaml", "toml"] {
            let path = temp_path(&format!("round_trip.{}", ext));
            cfg.to_file(&path).unwrap();
            let read = ResamplingConfig::from_file(&path).unwrap();
            assert_eq!(read, cfg, "round trip through {} failed", ext);
            let _ = std::fs::remove_file(&path);
        }
        assert!(cfg.to_file(temp_path("config.txt")).is_err());
    }
    #[test]
    fn test_kld_config() {
        let kld = ResamplingConfig::default().kld_config();
        assert_approx_eq!(kld.error, 0.01, 1e-12);
        assert_eq!(kld.min_samples, 100);
        assert_eq!(kld.max_samples, 5000);
    }
}
