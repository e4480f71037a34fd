//! Host-facing resampling facade.
//!
//! [Resampler] owns the validated configuration and the two random streams of a filter instance: one drives the
//! resampling draws, the other the recovery draws. Each call to [Resampler::resample] runs exactly one pass:
//! fixed-size or KLD-bounded, with or without recovery injection. The report and all recoverable warnings go to
//! the caller's [ResamplingSink].
//!
//! [ResamplingTrigger] decides *whether* a cycle should resample at all.
use crate::config::ResamplingConfig;
use crate::error::ResamplingError;
use crate::kld::{KldResampling, PoseBinning};
use crate::recovery::{RecoveryResampling, UniformPoseSampler};
use crate::resampling::{Resampling, ResamplingReport};
use crate::sample::SampleSet;
use crate::sink::ResamplingSink;

use log::debug;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Offset applied to the configured seed for the recovery stream.
const RECOVERY_STREAM: u64 = 0x9E37_79B9_7F4A_7C15;

fn default_min_effective_ratio() -> f64 {
    0.5
}
fn default_linear_threshold() -> f64 {
    0.1
}
fn default_angular_threshold() -> f64 {
    0.1
}

/// Resample only after sufficient motion and when the weights have degenerated.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResamplingTrigger {
    /// Resample when the effective sample size falls below this fraction of the set size. Values above one
    /// resample after every sufficient motion.
    #[serde(default = "default_min_effective_ratio")]
    pub min_effective_ratio: f64,
    /// Translation since the last resampling (meters) that enables resampling.
    #[serde(default = "default_linear_threshold")]
    pub linear_threshold: f64,
    /// Rotation since the last resampling (radians) that enables resampling.
    #[serde(default = "default_angular_threshold")]
    pub angular_threshold: f64,
}
impl Default for ResamplingTrigger {
    fn default() -> Self {
        ResamplingTrigger {
            min_effective_ratio: default_min_effective_ratio(),
            linear_threshold: default_linear_threshold(),
            angular_threshold: default_angular_threshold(),
        }
    }
}
impl ResamplingTrigger {
    pub fn should_resample<P>(&self, set: &SampleSet<P>, moved_linear: f64, moved_angular: f64) -> bool {
        if set.is_empty() {
            return false;
        }
        self.moved(moved_linear, moved_angular)
            && set.effective_sample_size() / (set.len() as f64) < self.min_effective_ratio
    }
    /// Whether the motion since the last resampling passes either threshold.
    pub fn moved(&self, moved_linear: f64, moved_angular: f64) -> bool {
        moved_linear.abs() >= self.linear_threshold || moved_angular.abs() >= self.angular_threshold
    }
    pub fn validate(&self) -> Result<(), ResamplingError> {
        let fields = [
            ("min_effective_ratio", self.min_effective_ratio),
            ("linear_threshold", self.linear_threshold),
            ("angular_threshold", self.angular_threshold),
        ];
        for (name, value) in fields {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ResamplingError::InvalidConfig(format!(
                    "trigger.{} must be non-negative, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Resampling stage of one filter instance.
#[derive(Debug)]
pub struct Resampler {
    config: ResamplingConfig,
    rng: StdRng,
    recovery_rng: StdRng,
    cycles: usize,
}
impl Resampler {
    /// Validates `config` and seeds both random streams.
    pub fn new(config: ResamplingConfig) -> Result<Resampler, ResamplingError> {
        config.validate()?;
        let (rng, recovery_rng) = match config.seed {
            Some(seed) => (
                StdRng::seed_from_u64(seed),
                StdRng::seed_from_u64(seed ^ RECOVERY_STREAM),
            ),
            None => (StdRng::from_os_rng(), StdRng::from_os_rng()),
        };
        Ok(Resampler {
            config,
            rng,
            recovery_rng,
            cycles: 0,
        })
    }
    pub fn config(&self) -> &ResamplingConfig {
        &self.config
    }
    /// Completed resampling passes.
    pub fn cycles(&self) -> usize {
        self.cycles
    }
    pub fn trigger(&self) -> &ResamplingTrigger {
        &self.config.trigger
    }

    /// Replace the current generation of `set` with the next one.
    ///
    /// With a `sampler`, every draw is replaced by a uniformly drawn pose with probability `recovery_probability`.
    /// Only [ResamplingError::EmptySet] is returned as an error; recoverable problems are passed to
    /// [ResamplingSink::warn] and listed in the report.
    pub fn resample<P>(
        &mut self,
        set: &mut SampleSet<P>,
        recovery_probability: f64,
        sampler: Option<&mut dyn UniformPoseSampler<P>>,
        sink: &mut dyn ResamplingSink,
    ) -> Result<ResamplingReport, ResamplingError>
    where
        P: PoseBinning + Clone,
    {
        if set.is_empty() {
            return Err(ResamplingError::EmptySet);
        }
        let strategy = self.config.strategy;
        let report = match (self.config.adaptive, sampler) {
            (true, Some(sampler)) => KldResampling::new(strategy, self.config.kld_config()).apply_with_recovery(
                set,
                sampler,
                recovery_probability,
                &mut self.rng,
                &mut self.recovery_rng,
            )?,
            (true, None) => KldResampling::new(strategy, self.config.kld_config()).apply(set, &mut self.rng)?,
            (false, Some(sampler)) => RecoveryResampling::new(strategy).apply(
                set,
                sampler,
                recovery_probability,
                &mut self.rng,
                &mut self.recovery_rng,
            )?,
            (false, None) => strategy.apply(set, &mut self.rng)?,
        };
        for warning in &report.warnings {
            sink.warn(warning);
        }
        sink.record(&report);
        self.cycles += 1;
        debug!(
            "resampling cycle {} complete: {} samples ({} recovered)",
            self.cycles, report.output_size, report.recovered
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pose2D;
    use crate::kld::BinResolution;
    use crate::recovery::{Bounds2D, UniformPoseSampler2D};
    use crate::resampling::ResamplingStrategy;
    use crate::sample::Sample;
    use crate::sink::LogSink;

    fn line_set(n: usize) -> SampleSet<Pose2D> {
        SampleSet::new(
            "map",
            (0..n)
                .map(|i| Sample::new(Pose2D::new(i as f64, 0.0, 0.0), (i + 1) as f64))
                .collect(),
        )
    }
    fn seeded(adaptive: bool) -> ResamplingConfig {
        ResamplingConfig {
            adaptive,
            seed: Some(11),
            min_samples: 10,
            max_samples: 60,
            kld_bin_size: BinResolution {
                linear: 1.0,
                angular: 1.0,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let cfg = ResamplingConfig {
            max_samples: 1,
            ..Default::default()
        };
        assert!(matches!(
            Resampler::new(cfg),
            Err(ResamplingError::InvalidConfig(_))
        ));
    }
    #[test]
    fn test_fixed_size_resampling_counts_cycles() {
        let mut resampler = Resampler::new(seeded(false)).unwrap();
        let mut set = line_set(40);
        for _ in 0..3 {
            let report = resampler.resample(&mut set, 0.0, None, &mut LogSink).unwrap();
            assert_eq!(report.output_size, 40);
            assert_eq!(report.strategy, ResamplingStrategy::Stratified);
        }
        assert_eq!(resampler.cycles(), 3);
    }
    #[test]
    fn test_adaptive_resampling_with_recovery() {
        let mut resampler = Resampler::new(seeded(true)).unwrap();
        let mut sampler = UniformPoseSampler2D::new(5).with_region("map", Bounds2D::new(-50.0, -50.0, 50.0, 50.0));
        let mut set = line_set(40);
        let report = resampler
            .resample(&mut set, 0.5, Some(&mut sampler), &mut LogSink)
            .unwrap();
        assert!(report.output_size >= 10 && report.output_size <= 60);
        assert!(report.recovered > 0);
        assert!(report.occupied_bins.is_some());
        assert!(report.warnings.is_empty());
    }
    #[test]
    fn test_same_seed_is_reproducible() {
        let mut a = line_set(25);
        let mut b = line_set(25);
        Resampler::new(seeded(false))
            .unwrap()
            .resample(&mut a, 0.0, None, &mut LogSink)
            .unwrap();
        Resampler::new(seeded(false))
            .unwrap()
            .resample(&mut b, 0.0, None, &mut LogSink)
            .unwrap();
        assert_eq!(a.samples(), b.samples());
    }
    #[test]
    fn test_empty_set_is_rejected() {
        let mut resampler = Resampler::new(seeded(false)).unwrap();
        let mut set = SampleSet::<Pose2D>::new("map", vec![]);
        assert!(matches!(
            resampler.resample(&mut set, 0.0, None, &mut LogSink),
            Err(ResamplingError::EmptySet)
        ));
        assert_eq!(resampler.cycles(), 0);
    }
    #[test]
    fn test_trigger() {
        let trigger = ResamplingTrigger::default();
        let uniform = SampleSet::from_poses("map", (0..10).map(|i| Pose2D::new(i as f64, 0.0, 0.0)));
        let mut peaked = uniform.clone();
        let mut weights = vec![1e-6; 10];
        weights[3] = 1.0;
        assert!(peaked.set_weights(&weights));
        // no motion
        assert!(!trigger.should_resample(&peaked, 0.0, 0.0));
        // healthy weights
        assert!(!trigger.should_resample(&uniform, 1.0, 0.0));
        assert!(trigger.should_resample(&peaked, 1.0, 0.0));
        assert!(trigger.should_resample(&peaked, 0.0, -0.5));
    }
}
