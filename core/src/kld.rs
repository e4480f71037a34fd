//! KLD-sampling: adaptive sample counts.
//!
//! While output samples are emitted, [KldSizeController] counts the distinct histogram bins they occupy and
//! evaluates the Wilson-Hilferty approximation of the chi-square quantile to decide how many samples are enough:
//!
//! $$
//! n = \frac{k - 1}{2 \epsilon} \left( 1 - \frac{2}{9 (k - 1)} + \sqrt{\frac{2}{9 (k - 1)}} z \right)^3
//! $$
//!
//! The bound is applied in a fixed order: with fewer than two occupied bins $n$ is zero, the result is then raised
//! to `min_samples`, and finally capped at `max_samples`.
//!
//! [KldResampling] draws a pool of `max_samples` indices from the base strategy in one ascending CDF merge and then
//! takes samples from that pool in random order until the controller is satisfied. Taking them in random order keeps
//! an early stop from truncating the upper part of the weight curve.
use crate::error::ResamplingError;
use crate::recovery::{RecoveryInjector, UniformPoseSampler};
use crate::resampling::{Resampling, ResamplingReport, ResamplingStrategy, SourceWeights};
use crate::sample::SampleSet;
use crate::{Pose2D, wrap_to_pi};

use log::trace;
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use std::collections::HashSet;
use std::hash::Hash;

/// Histogram resolution: bin width for positions (meters) and headings (radians).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BinResolution {
    pub linear: f64,
    pub angular: f64,
}
impl Default for BinResolution {
    fn default() -> Self {
        BinResolution {
            linear: 0.5,
            angular: 10.0_f64.to_radians(),
        }
    }
}

/// Poses that can be discretized into KLD histogram bins.
pub trait PoseBinning {
    type Bin: Hash + Eq;
    fn bin(&self, resolution: &BinResolution) -> Self::Bin;
}
impl PoseBinning for Pose2D {
    type Bin = [i64; 3];
    fn bin(&self, resolution: &BinResolution) -> [i64; 3] {
        [
            (self.x() / resolution.linear).floor() as i64,
            (self.y() / resolution.linear).floor() as i64,
            (wrap_to_pi(self.yaw) / resolution.angular).floor() as i64,
        ]
    }
}

/// Parameters of the KLD bound.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KldConfig {
    /// Allowed KL divergence $\epsilon$.
    pub error: f64,
    /// Upper standard normal quantile $z_{1-\delta}$.
    pub z: f64,
    pub bin_size: BinResolution,
    pub min_samples: usize,
    pub max_samples: usize,
}

/// Number of samples required for `occupied_bins` distinct bins; zero for fewer than two bins.
pub fn required_samples(occupied_bins: usize, error: f64, z: f64) -> f64 {
    if occupied_bins <= 1 {
        return 0.0;
    }
    let k = (occupied_bins - 1) as f64;
    let a = 2.0 / (9.0 * k);
    k / (2.0 * error) * (1.0 - a + a.sqrt() * z).powi(3)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KldState {
    Accumulating,
    Satisfied,
}

/// Tracks occupied bins while samples are inserted and decides when to stop.
#[derive(Debug)]
pub struct KldSizeController<B> {
    config: KldConfig,
    bins: HashSet<B>,
    inserted: usize,
    state: KldState,
}
impl<B: Hash + Eq> KldSizeController<B> {
    pub fn new(config: KldConfig) -> KldSizeController<B> {
        KldSizeController {
            config,
            bins: HashSet::new(),
            inserted: 0,
            state: KldState::Accumulating,
        }
    }
    /// Register one inserted sample falling into `bin`. Once satisfied, further samples are ignored.
    pub fn observe(&mut self, bin: B) -> KldState {
        if self.state == KldState::Satisfied {
            return self.state;
        }
        self.bins.insert(bin);
        self.inserted += 1;
        if self.inserted >= self.target() {
            self.state = KldState::Satisfied;
        }
        self.state
    }
    /// Sample count that satisfies the bound for the bins seen so far.
    pub fn target(&self) -> usize {
        let required = required_samples(self.bins.len(), self.config.error, self.config.z).ceil();
        (required as usize)
            .max(self.config.min_samples)
            .min(self.config.max_samples)
    }
    pub fn occupied_bins(&self) -> usize {
        self.bins.len()
    }
    pub fn inserted(&self) -> usize {
        self.inserted
    }
    pub fn state(&self) -> KldState {
        self.state
    }
}

/// Bounds a base strategy with KLD-sampling.
///
/// Each pass draws and stores a pool of `max_samples` indices from the base strategy before taking samples from it
/// in random order, so its cost is $O(max\_samples)$ per pass even when it stops at `min_samples`.
#[derive(Clone, Copy, Debug)]
pub struct KldResampling<S> {
    base: S,
    config: KldConfig,
}
impl<S: Resampling> KldResampling<S> {
    pub fn new(base: S, config: KldConfig) -> KldResampling<S> {
        KldResampling { base, config }
    }
    pub fn config(&self) -> &KldConfig {
        &self.config
    }
    pub fn strategy(&self) -> ResamplingStrategy {
        self.base.strategy()
    }
    /// Resample `set` into between `min_samples` and `max_samples` samples of uniform weight.
    pub fn apply<P, R>(
        &self,
        set: &mut SampleSet<P>,
        rng: &mut R,
    ) -> Result<ResamplingReport, ResamplingError>
    where
        P: PoseBinning + Clone,
        R: Rng + ?Sized,
    {
        self.run(set, rng, None::<&mut RecoveryInjector<'_, P, StdRng>>)
    }
    /// As [KldResampling::apply], additionally replacing draws by uniformly drawn poses with probability
    /// `recovery_probability`. Falls back to [KldResampling::apply] with a warning if the sampler cannot be
    /// refreshed.
    pub fn apply_with_recovery<P, R, Q>(
        &self,
        set: &mut SampleSet<P>,
        sampler: &mut dyn UniformPoseSampler<P>,
        recovery_probability: f64,
        rng: &mut R,
        recovery_rng: &mut Q,
    ) -> Result<ResamplingReport, ResamplingError>
    where
        P: PoseBinning + Clone,
        R: Rng + ?Sized,
        Q: Rng + ?Sized,
    {
        if set.is_empty() {
            return Err(ResamplingError::EmptySet);
        }
        let frame = set.frame().to_string();
        match RecoveryInjector::prepare(sampler, &frame, recovery_probability, recovery_rng) {
            Ok(mut injector) => self.run(set, rng, Some(&mut injector)),
            Err(warning) => {
                let mut report = self.apply(set, rng)?;
                report.warnings.push(warning);
                Ok(report)
            }
        }
    }

    fn run<P, R, Q>(
        &self,
        set: &mut SampleSet<P>,
        rng: &mut R,
        mut injector: Option<&mut RecoveryInjector<'_, P, Q>>,
    ) -> Result<ResamplingReport, ResamplingError>
    where
        P: PoseBinning + Clone,
        R: Rng + ?Sized,
        Q: Rng + ?Sized,
    {
        let mut source = SourceWeights::from_set(set)?;
        let mut report = ResamplingReport::new(self.base.strategy(), set.len());
        report.absorb(&mut source);

        let pool_size = self.config.max_samples.max(1);
        let mut pool = Vec::with_capacity(pool_size);
        self.base
            .draw(&source.weights, pool_size, rng, |i| pool.push(i));

        let mut controller = KldSizeController::new(self.config);
        let mut insertion = set.insertion(pool_size);
        let mut injected = Vec::with_capacity(pool_size);
        let samples = set.samples();
        for slot in 0..pool.len() {
            let pick = rng.random_range(slot..pool.len());
            pool.swap(slot, pick);
            let sample = match injector.as_mut().and_then(|inj| inj.try_inject()) {
                Some(recovered) => {
                    injected.push(true);
                    recovered
                }
                None => {
                    injected.push(false);
                    samples[pool[slot]].with_weight(0.0)
                }
            };
            let state = controller.observe(sample.pose.bin(&self.config.bin_size));
            insertion.insert(sample);
            if state == KldState::Satisfied {
                break;
            }
        }

        let uniform = 1.0 / insertion.len().max(1) as f64;
        for (index, _) in injected.iter().enumerate().filter(|(_, was)| !**was) {
            insertion.set_weight(index, uniform);
        }
        trace!(
            "KLD-sampling stopped after {} of {} draws with {} occupied bins",
            insertion.len(),
            pool.len(),
            controller.occupied_bins()
        );
        report.recovered = injected.iter().filter(|was| **was).count();
        report.occupied_bins = Some(controller.occupied_bins());
        report.output_size = set.publish(insertion);
        Ok(report)
    }
}
