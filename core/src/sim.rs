//! Synthetic localisation scenarios for exercising the resampling stage.
//!
//! This module provides:
//! - [ScenarioConfig], the parameters of a closed-loop 2-D localisation run
//! - [run_scenario], which drives a sample set through motion, weighting and resampling cycles
//! - [CycleSummary], one row of per-cycle results with CSV export
//!
//! The simulated robot drives a circle inside a square world and observes its own position and heading with
//! Gaussian noise. Each cycle propagates the samples with noisy odometry, weights them with the Gaussian
//! likelihood of the observation, folds the mean weight into the [RecoveryState] and resamples when the
//! [crate::ResamplingTrigger] fires. A pending recovery request forces resampling once the motion threshold is met.
//! Optionally the robot is *kidnapped* (teleported to the opposite side of the circle) to exercise recovery.
use crate::config::{read_file, write_file};
use crate::error::ResamplingError;
use crate::recovery::{Bounds2D, RecoveryState, UniformPoseSampler, UniformPoseSampler2D};
use crate::resampler::Resampler;
use crate::sample::{Sample, SampleSet};
use crate::sink::ResamplingSink;
use crate::{Pose2D, ResamplingConfig, wrap_to_pi};

use log::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use std::io;
use std::path::Path;

/// Frame the simulated map lives in.
pub const MAP_FRAME: &str = "map";

fn default_particles() -> usize {
    500
}
fn default_cycles() -> usize {
    100
}
fn default_step_length() -> f64 {
    0.5
}
fn default_turn_rate() -> f64 {
    0.05
}
fn default_motion_noise() -> f64 {
    0.05
}
fn default_heading_noise() -> f64 {
    0.02
}
fn default_position_noise() -> f64 {
    0.5
}
fn default_heading_measurement_noise() -> f64 {
    0.3
}
fn default_initial_spread() -> f64 {
    0.5
}
fn default_world_size() -> f64 {
    30.0
}
fn default_seed() -> u64 {
    42
}

/// Parameters of a simulated localisation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Initial number of samples.
    #[serde(default = "default_particles")]
    pub particles: usize,
    #[serde(default = "default_cycles")]
    pub cycles: usize,
    /// Distance driven per cycle (meters).
    #[serde(default = "default_step_length")]
    pub step_length: f64,
    /// Heading change per cycle (radians).
    #[serde(default = "default_turn_rate")]
    pub turn_rate: f64,
    /// Standard deviation of the per-sample odometry noise along the step (meters).
    #[serde(default = "default_motion_noise")]
    pub motion_noise: f64,
    /// Standard deviation of the per-sample heading noise (radians).
    #[serde(default = "default_heading_noise")]
    pub heading_noise: f64,
    /// Standard deviation of the position observation (meters).
    #[serde(default = "default_position_noise")]
    pub position_noise: f64,
    /// Standard deviation of the heading observation (radians).
    #[serde(default = "default_heading_measurement_noise")]
    pub heading_measurement_noise: f64,
    /// Spread of the initial samples around the true start pose (meters).
    #[serde(default = "default_initial_spread")]
    pub initial_spread: f64,
    /// Start with samples spread over the whole world instead of around the true pose.
    #[serde(default)]
    pub global_localization: bool,
    /// Edge length of the square world centered at the origin (meters).
    #[serde(default = "default_world_size")]
    pub world_size: f64,
    /// Cycle at which the robot is teleported to the opposite side of its circle.
    #[serde(default)]
    pub kidnap_at: Option<usize>,
    /// Seed of the simulated noise. Also seeds resampling when its own seed is absent.
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub resampling: ResamplingConfig,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            particles: default_particles(),
            cycles: default_cycles(),
            step_length: default_step_length(),
            turn_rate: default_turn_rate(),
            motion_noise: default_motion_noise(),
            heading_noise: default_heading_noise(),
            position_noise: default_position_noise(),
            heading_measurement_noise: default_heading_measurement_noise(),
            initial_spread: default_initial_spread(),
            global_localization: false,
            world_size: default_world_size(),
            kidnap_at: None,
            seed: default_seed(),
            resampling: ResamplingConfig::default(),
        }
    }
}

impl ScenarioConfig {
    pub fn validate(&self) -> Result<(), ResamplingError> {
        if self.particles == 0 {
            return Err(ResamplingError::InvalidConfig(
                "particles must be at least 1".to_string(),
            ));
        }
        let positive = [
            ("position_noise", self.position_noise),
            ("heading_measurement_noise", self.heading_measurement_noise),
            ("world_size", self.world_size),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ResamplingError::InvalidConfig(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        self.resampling.validate()
    }
    /// Read a scenario from a .json/.yaml/.yml/.toml file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        read_file(path)
    }
    /// Write the scenario as .json/.yaml/.yml/.toml, chosen by extension.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        write_file(self, path)
    }
    /// Radius of the circle driven by the robot, limited to the world.
    fn circle_radius(&self) -> f64 {
        let limit = 0.4 * self.world_size;
        if self.turn_rate.abs() > f64::EPSILON {
            (self.step_length / self.turn_rate).abs().min(limit)
        } else {
            limit
        }
    }
    fn bounds(&self) -> Bounds2D {
        let half = self.world_size / 2.0;
        Bounds2D::new(-half, -half, half, half)
    }
}

/// Results of one simulated cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub cycle: usize,
    pub true_x: f64,
    pub true_y: f64,
    pub true_yaw: f64,
    pub estimate_x: f64,
    pub estimate_y: f64,
    pub estimate_yaw: f64,
    /// Distance between estimated and true position (meters).
    pub position_error: f64,
    /// Effective sample size after weighting.
    pub effective_samples: f64,
    /// Sample count at the end of the cycle.
    pub samples: usize,
    pub resampled: bool,
    pub recovered: usize,
    pub occupied_bins: Option<usize>,
    pub recovery_probability: f64,
    pub kidnapped: bool,
}
impl CycleSummary {
    /// Write summaries to a CSV file, one row per cycle.
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
    /// Read summaries written by [CycleSummary::to_csv].
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>, Box<dyn std::error::Error>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in rdr.deserialize() {
            records.push(result?);
        }
        Ok(records)
    }
}

fn normal(std_dev: f64, name: &str) -> Result<Normal<f64>, ResamplingError> {
    Normal::new(0.0, std_dev)
        .map_err(|e| ResamplingError::InvalidConfig(format!("{}: {}", name, e)))
}

/// Advance `pose` by `step` meters after turning by `turn` radians.
fn drive(pose: &Pose2D, step: f64, turn: f64) -> Pose2D {
    let yaw = wrap_to_pi(pose.yaw + turn);
    Pose2D::new(
        pose.x() + step * yaw.cos(),
        pose.y() + step * yaw.sin(),
        yaw,
    )
}

/// Run a closed-loop localisation scenario and report every cycle to `sink`.
pub fn run_scenario(
    config: &ScenarioConfig,
    sink: &mut dyn ResamplingSink,
) -> Result<Vec<CycleSummary>, ResamplingError> {
    config.validate()?;
    let mut resampling = config.resampling.clone();
    if resampling.seed.is_none() {
        resampling.seed = Some(config.seed);
    }
    let mut resampler = Resampler::new(resampling)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut sampler = UniformPoseSampler2D::new(config.seed.wrapping_add(1)).with_region(MAP_FRAME, config.bounds());
    let mut recovery = RecoveryState::new(
        config.resampling.recovery_alpha_slow,
        config.resampling.recovery_alpha_fast,
    );

    let step_noise = normal(config.motion_noise, "motion_noise")?;
    let turn_noise = normal(config.heading_noise, "heading_noise")?;
    let position_noise = normal(config.position_noise, "position_noise")?;
    let heading_noise = normal(config.heading_measurement_noise, "heading_measurement_noise")?;
    let spread = normal(config.initial_spread, "initial_spread")?;

    let radius = config.circle_radius();
    let mut truth = Pose2D::new(0.0, -radius, 0.0);
    let mut set = if config.global_localization {
        sampler
            .update(MAP_FRAME)
            .map_err(|source| ResamplingError::RecoverySamplerUnavailable {
                frame: MAP_FRAME.to_string(),
                source,
            })?;
        SampleSet::from_poses(MAP_FRAME, (0..config.particles).map(|_| sampler.draw()))
    } else {
        let poses: Vec<Pose2D> = (0..config.particles)
            .map(|_| {
                Pose2D::new(
                    truth.x() + spread.sample(&mut rng),
                    truth.y() + spread.sample(&mut rng),
                    truth.yaw + 0.2 * spread.sample(&mut rng),
                )
            })
            .collect();
        SampleSet::from_poses(MAP_FRAME, poses)
    };
    info!(
        "Starting scenario: {} samples, {} cycles, {} resampling",
        set.len(),
        config.cycles,
        config.resampling.strategy
    );

    let two_var_pos = 2.0 * config.position_noise.powi(2);
    let two_var_yaw = 2.0 * config.heading_measurement_noise.powi(2);
    let (mut moved_linear, mut moved_angular) = (0.0, 0.0);
    let mut summaries = Vec::with_capacity(config.cycles);
    for cycle in 0..config.cycles {
        let kidnapped = config.kidnap_at == Some(cycle);
        if kidnapped {
            truth = Pose2D::new(-truth.x(), -truth.y(), truth.yaw + std::f64::consts::PI);
            info!("Cycle {}: robot kidnapped to {}", cycle, truth);
        }
        // motion
        truth = drive(&truth, config.step_length, config.turn_rate);
        moved_linear += config.step_length;
        moved_angular += config.turn_rate;
        let propagated: Vec<_> = set
            .iter()
            .map(|s| {
                let pose = drive(
                    &s.pose,
                    config.step_length + step_noise.sample(&mut rng),
                    config.turn_rate + turn_noise.sample(&mut rng),
                );
                Sample::new(pose, s.weight)
            })
            .collect();
        set = SampleSet::new(MAP_FRAME, propagated);

        // weighting
        let observed = Pose2D::new(
            truth.x() + position_noise.sample(&mut rng),
            truth.y() + position_noise.sample(&mut rng),
            truth.yaw + heading_noise.sample(&mut rng),
        );
        let weights: Vec<f64> = set
            .iter()
            .map(|s| {
                let d2 = (s.pose.position - observed.position).norm_squared();
                let dyaw = s.pose.heading_difference(&observed);
                s.weight * (-d2 / two_var_pos - dyaw * dyaw / two_var_yaw).exp()
            })
            .collect();
        set.set_weights(&weights);
        // prior weights sum to one, so the total is the average likelihood
        recovery.update(set.total_weight());
        set.normalize_weights();
        let effective_samples = set.effective_sample_size();
        let estimate = set.weighted_mean().unwrap_or_default();

        // resampling
        let recovery_probability = recovery.probability();
        let trigger = resampler.trigger();
        let resample = trigger.should_resample(&set, moved_linear, moved_angular)
            || (recovery_probability > 0.0 && trigger.moved(moved_linear, moved_angular));
        let (mut recovered, mut occupied_bins) = (0, None);
        if resample {
            let report = resampler.resample(&mut set, recovery_probability, Some(&mut sampler), sink)?;
            recovered = report.recovered;
            occupied_bins = report.occupied_bins;
            // recovery samples carry their draw as weight
            set.normalize_weights();
            moved_linear = 0.0;
            moved_angular = 0.0;
        }

        let position_error = estimate.distance(&truth);
        debug!(
            "Cycle {}: error {:.3} m, ESS {:.1}, p_recovery {:.3}, resampled {}",
            cycle, position_error, effective_samples, recovery_probability, resample
        );
        summaries.push(CycleSummary {
            cycle,
            true_x: truth.x(),
            true_y: truth.y(),
            true_yaw: truth.yaw,
            estimate_x: estimate.x(),
            estimate_y: estimate.y(),
            estimate_yaw: estimate.yaw,
            position_error,
            effective_samples,
            samples: set.len(),
            resampled: resample,
            recovered,
            occupied_bins,
            recovery_probability,
            kidnapped,
        });
    }
    info!(
        "Scenario complete: {} cycles, {} resampling passes",
        summaries.len(),
        resampler.cycles()
    );
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::LogSink;

    #[test]
    fn test_drive_follows_circle() {
        let config = ScenarioConfig::default();
        let radius = config.circle_radius();
        assert!((radius - 10.0).abs() < 1e-12);
        let mut pose = Pose2D::new(0.0, -radius, 0.0);
        for _ in 0..200 {
            pose = drive(&pose, config.step_length, config.turn_rate);
            let r = pose.position.norm();
            assert!((r - radius).abs() < 0.5, "left the circle: r = {}", r);
        }
    }
    #[test]
    fn test_scenario_validation() {
        let config = ScenarioConfig {
            particles: 0,
            ..Default::default()
        };
        assert!(run_scenario(&config, &mut LogSink).is_err());
    }
    #[test]
    fn test_scenario_file_round_trip() {
        let config = ScenarioConfig {
            kidnap_at: Some(12),
            cycles: 30,
            ..Default::default()
        };
        let path = std::env::temp_dir().join(format!("mcl_scenario_{}.yaml", std::process::id()));
        config.to_file(&path).unwrap();
        assert_eq!(ScenarioConfig::from_file(&path).unwrap(), config);
        let _ = std::fs::remove_file(&path);
    }
    #[test]
    fn test_cycle_summaries_csv_round_trip() {
        let config = ScenarioConfig {
            particles: 50,
            cycles: 5,
            ..Default::default()
        };
        let rows = run_scenario(&config, &mut LogSink).unwrap();
        let path = std::env::temp_dir().join(format!("mcl_cycles_{}.csv", std::process::id()));
        CycleSummary::to_csv(&rows, &path).unwrap();
        let back = CycleSummary::from_csv(&path).unwrap();
        assert_eq!(back, rows);
        let _ = std::fs::remove_file(&path);
    }
}
