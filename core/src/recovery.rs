//! Recovery (augmented) resampling.
//!
//! When the filter loses track of the robot the average sample likelihood drops. [RecoveryState] tracks a slow and
//! a fast exponential moving average of that likelihood; their ratio yields the probability with which each
//! resampling draw is replaced by a uniformly drawn valid pose:
//!
//! $$
//! p_{recovery} = \max\left(0, 1 - \frac{\bar{w}_{fast}}{\bar{w}_{slow}}\right)
//! $$
//!
//! [RecoveryResampling] decorates any [Resampling] strategy with that substitution. Recovery samples keep their own
//! recovery draw as weight, so the output must be renormalized by the host before the next weighting cycle.
use crate::Pose2D;
use crate::error::{BoxError, ResamplingError};
use crate::resampling::{Resampling, ResamplingReport, ResamplingStrategy, SourceWeights};
use crate::sample::{Sample, SampleSet};

use log::warn;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Uniform};

use std::collections::HashMap;
use std::fmt::{self, Debug};

/// Slow and fast moving averages of the mean sample weight.
///
/// Owned and updated by the host filter after every weighting step; resampling only consumes
/// [RecoveryState::probability]. Resampling never resets it.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RecoveryState {
    pub alpha_slow: f64,
    pub alpha_fast: f64,
    pub w_slow: f64,
    pub w_fast: f64,
}
impl RecoveryState {
    pub fn new(alpha_slow: f64, alpha_fast: f64) -> RecoveryState {
        RecoveryState {
            alpha_slow,
            alpha_fast,
            w_slow: 0.0,
            w_fast: 0.0,
        }
    }
    /// Fold the mean weight of the latest weighting step into both averages.
    pub fn update(&mut self, mean_weight: f64) {
        if !mean_weight.is_finite() {
            return;
        }
        if self.w_slow == 0.0 {
            self.w_slow = mean_weight;
        } else {
            self.w_slow += self.alpha_slow * (mean_weight - self.w_slow);
        }
        if self.w_fast == 0.0 {
            self.w_fast = mean_weight;
        } else {
            self.w_fast += self.alpha_fast * (mean_weight - self.w_fast);
        }
    }
    /// Probability that a resampling draw is replaced by a uniformly drawn pose, in $[0, 1]$.
    pub fn probability(&self) -> f64 {
        if self.w_slow > 0.0 {
            (1.0 - self.w_fast / self.w_slow).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
    pub fn reset(&mut self) {
        self.w_slow = 0.0;
        self.w_fast = 0.0;
    }
}

/// Source of uniformly distributed, valid poses.
pub trait UniformPoseSampler<P> {
    /// Refresh the sampler for the coordinate frame the samples live in.
    ///
    /// May perform blocking lookups (maps, transforms) and may fail; it is called at most once per resampling pass.
    fn update(&mut self, frame: &str) -> Result<(), BoxError>;
    /// Draw a valid pose. Must succeed after a successful [UniformPoseSampler::update].
    fn draw(&mut self) -> P;
}

/// Axis-aligned region poses are drawn from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds2D {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}
impl Bounds2D {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Bounds2D {
        Bounds2D {
            min_x: min_x.min(max_x),
            min_y: min_y.min(max_y),
            max_x: min_x.max(max_x),
            max_y: min_y.max(max_y),
        }
    }
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
    fn is_valid(&self) -> bool {
        self.min_x.is_finite()
            && self.min_y.is_finite()
            && self.max_x.is_finite()
            && self.max_y.is_finite()
            && self.max_x > self.min_x
            && self.max_y > self.min_y
    }
}

type FreeSpace = Box<dyn Fn(&Pose2D) -> bool + Send>;

/// Uniform sampler over the bounds registered for a frame, optionally restricted to free space.
///
/// Frames are registered by the host (typically one per map). Free-space restriction uses rejection sampling with
/// a bounded number of attempts. When every attempt is rejected the last candidate is returned with a warning: it
/// lies inside the bounds but not necessarily in free space.
pub struct UniformPoseSampler2D {
    regions: HashMap<String, Bounds2D>,
    free_space: Option<FreeSpace>,
    max_attempts: usize,
    active: Option<(Uniform<f64>, Uniform<f64>)>,
    rng: StdRng,
}
impl Debug for UniformPoseSampler2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniformPoseSampler2D")
            .field("regions", &self.regions)
            .field("free_space", &self.free_space.is_some())
            .field("max_attempts", &self.max_attempts)
            .field("active", &self.active.is_some())
            .finish()
    }
}
impl UniformPoseSampler2D {
    pub fn new(seed: u64) -> UniformPoseSampler2D {
        UniformPoseSampler2D {
            regions: HashMap::new(),
            free_space: None,
            max_attempts: 100,
            active: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }
    /// Register (or replace) the region poses are drawn from in `frame`.
    pub fn with_region(mut self, frame: impl Into<String>, bounds: Bounds2D) -> Self {
        self.regions.insert(frame.into(), bounds);
        self
    }
    /// Restrict drawn poses to those accepted by `free_space`.
    pub fn with_free_space<F>(mut self, free_space: F, max_attempts: usize) -> Self
    where
        F: Fn(&Pose2D) -> bool + Send + 'static,
    {
        self.free_space = Some(Box::new(free_space));
        self.max_attempts = max_attempts.max(1);
        self
    }
}
impl UniformPoseSampler<Pose2D> for UniformPoseSampler2D {
    fn update(&mut self, frame: &str) -> Result<(), BoxError> {
        self.active = None;
        let bounds = self
            .regions
            .get(frame)
            .ok_or_else(|| format!("no region registered for frame '{}'", frame))?;
        if !bounds.is_valid() {
            return Err(format!("region for frame '{}' is empty: {:?}", frame, bounds).into());
        }
        let xs = Uniform::new_inclusive(bounds.min_x, bounds.max_x)?;
        let ys = Uniform::new_inclusive(bounds.min_y, bounds.max_y)?;
        self.active = Some((xs, ys));
        Ok(())
    }
    fn draw(&mut self) -> Pose2D {
        let Some((xs, ys)) = self.active.as_ref() else {
            return Pose2D::default();
        };
        let mut candidate = Pose2D::default();
        for _ in 0..self.max_attempts {
            candidate = Pose2D::new(
                xs.sample(&mut self.rng),
                ys.sample(&mut self.rng),
                self.rng
                    .random_range(-std::f64::consts::PI..std::f64::consts::PI),
            );
            match &self.free_space {
                Some(is_free) if !is_free(&candidate) => continue,
                _ => return candidate,
            }
        }
        warn!(
            "free-space rejection exhausted {} attempts; returning a pose that is only inside the region",
            self.max_attempts
        );
        candidate
    }
}

/// Per-draw recovery substitution, shared by [RecoveryResampling] and the KLD-bounded path.
pub struct RecoveryInjector<'a, P, R: ?Sized> {
    sampler: &'a mut dyn UniformPoseSampler<P>,
    probability: f64,
    rng: &'a mut R,
    injected: usize,
}
impl<'a, P, R: Rng + ?Sized> RecoveryInjector<'a, P, R> {
    /// Refresh `sampler` for `frame`. On failure returns
    /// [ResamplingError::RecoverySamplerUnavailable]; callers fall back to plain resampling.
    pub fn prepare(
        sampler: &'a mut dyn UniformPoseSampler<P>,
        frame: &str,
        probability: f64,
        rng: &'a mut R,
    ) -> Result<RecoveryInjector<'a, P, R>, ResamplingError> {
        sampler
            .update(frame)
            .map_err(|source| ResamplingError::RecoverySamplerUnavailable {
                frame: frame.to_string(),
                source,
            })?;
        Ok(RecoveryInjector {
            sampler,
            probability: sanitize_probability(probability),
            rng,
            injected: 0,
        })
    }
    /// Draw the recovery variate for one output slot; returns a uniformly drawn sample, weighted with that
    /// variate, when it falls below the recovery probability.
    pub fn try_inject(&mut self) -> Option<Sample<P>> {
        let draw: f64 = self.rng.random();
        if draw < self.probability {
            self.injected += 1;
            Some(Sample::new(self.sampler.draw(), draw))
        } else {
            None
        }
    }
    /// Samples injected so far.
    pub fn injected(&self) -> usize {
        self.injected
    }
}

fn sanitize_probability(probability: f64) -> f64 {
    if probability.is_nan() {
        0.0
    } else {
        probability.clamp(0.0, 1.0)
    }
}

/// Decorates a base strategy with recovery injection.
#[derive(Clone, Copy, Debug, Default)]
pub struct RecoveryResampling<S> {
    base: S,
}
impl<S: Resampling> RecoveryResampling<S> {
    pub fn new(base: S) -> RecoveryResampling<S> {
        RecoveryResampling { base }
    }
    pub fn base(&self) -> &S {
        &self.base
    }
    pub fn strategy(&self) -> ResamplingStrategy {
        self.base.strategy()
    }
    /// Resample `set`, replacing each of the `N` draws by a uniformly drawn pose with probability
    /// `recovery_probability`.
    ///
    /// `rng` drives the resampling draws and `recovery_rng` the independent recovery draws. If the sampler cannot
    /// be refreshed for the set's frame the base strategy is applied unmodified and the failure is returned as a
    /// warning in the report.
    pub fn apply<P, R, Q>(
        &self,
        set: &mut SampleSet<P>,
        sampler: &mut dyn UniformPoseSampler<P>,
        recovery_probability: f64,
        rng: &mut R,
        recovery_rng: &mut Q,
    ) -> Result<ResamplingReport, ResamplingError>
    where
        P: Clone,
        R: Rng + ?Sized,
        Q: Rng + ?Sized,
    {
        if set.is_empty() {
            return Err(ResamplingError::EmptySet);
        }
        let frame = set.frame().to_string();
        match RecoveryInjector::prepare(sampler, &frame, recovery_probability, recovery_rng) {
            Ok(injector) => self.apply_prepared(set, injector, rng),
            Err(warning) => {
                let mut report = self.base.apply(set, rng)?;
                report.warnings.push(warning);
                Ok(report)
            }
        }
    }

    fn apply_prepared<P, R, Q>(
        &self,
        set: &mut SampleSet<P>,
        mut injector: RecoveryInjector<'_, P, Q>,
        rng: &mut R,
    ) -> Result<ResamplingReport, ResamplingError>
    where
        P: Clone,
        R: Rng + ?Sized,
        Q: Rng + ?Sized,
    {
        let mut source = SourceWeights::from_set(set)?;
        let n = set.len();
        let mut report = ResamplingReport::new(self.base.strategy(), n);
        report.absorb(&mut source);

        let uniform = 1.0 / n as f64;
        let mut insertion = set.insertion(n);
        let samples = set.samples();
        self.base.draw(&source.weights, n, rng, |i| {
            let sample = injector
                .try_inject()
                .unwrap_or_else(|| samples[i].with_weight(uniform));
            insertion.insert(sample);
        });
        report.recovered = injector.injected();
        report.output_size = set.publish(insertion);
        Ok(report)
    }
}
