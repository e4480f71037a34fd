//! Resampling strategies built on a shared CDF-inversion merge.
//!
//! Multinomial and stratified resampling differ only in the ordered sequence they walk the cumulative weight curve
//! with (see [crate::sequence]). Residual resampling first inserts $\lfloor N w_i \rfloor$ deterministic copies of
//! every sample and then fills the remaining slots by walking the *residual* weights with a systematic sequence.
//!
//! Every strategy is expressed as a stream of selected source indices ([Resampling::draw]). Turning that stream
//! into samples is left to [Resampling::apply], to the recovery decorator in [crate::recovery] and to the KLD bound
//! in [crate::kld], so each of them works with any strategy.
use crate::error::ResamplingError;
use crate::sample::SampleSet;
use crate::sequence::{self, OrderedSequence};

use rand::Rng;
use serde::{Deserialize, Serialize};

use std::fmt::{self, Display};
use std::str::FromStr;

/// Guards the floor in the residual deterministic phase against products like `2.9999999999999996`.
const COPY_EPSILON: f64 = 1e-9;

/// Forward-only cursor over a cumulative weight curve.
///
/// The cursor starts at the first sample and only ever advances. [CdfCursor::advance_to] moves it to the first
/// sample whose cumulative weight exceeds the query value; queries must be non-decreasing. A query beyond the total
/// weight (floating-point overrun) clamps to the last sample.
#[derive(Debug)]
pub struct CdfCursor<'a> {
    weights: &'a [f64],
    index: usize,
    cumulative: f64,
}
impl<'a> CdfCursor<'a> {
    /// Returns `None` for an empty weight slice.
    pub fn new(weights: &'a [f64]) -> Option<CdfCursor<'a>> {
        let first = *weights.first()?;
        Some(CdfCursor {
            weights,
            index: 0,
            cumulative: first,
        })
    }
    /// Advance to the sample covering `u` (in units of total weight) and return its index.
    pub fn advance_to(&mut self, u: f64) -> usize {
        let last = self.weights.len() - 1;
        while u >= self.cumulative && self.index < last {
            self.index += 1;
            self.cumulative += self.weights[self.index];
        }
        self.index
    }
    /// Index the cursor currently points at.
    pub fn position(&self) -> usize {
        self.index
    }
}

/// Walk `weights` with the ascending unit-interval sequence `u`, calling `visit` with each selected index.
///
/// `total` scales the sequence to the weight curve so unnormalized weights can be used directly.
pub fn invert_cdf<F>(weights: &[f64], total: f64, u: &[f64], mut visit: F)
where
    F: FnMut(usize),
{
    let Some(mut cursor) = CdfCursor::new(weights) else {
        return;
    };
    for &value in u {
        visit(cursor.advance_to(value * total));
    }
}

/// Number of deterministic copies $\lfloor M \hat{w}_i \rfloor$ per sample for an output of `count` samples.
///
/// The total never exceeds `count`.
pub fn deterministic_copies(weights: &[f64], count: usize) -> Vec<usize> {
    let total: f64 = weights.iter().map(|&w| sanitize(w)).sum();
    let mut copies = vec![0usize; weights.len()];
    if !(total > 0.0 && total.is_finite()) {
        return copies;
    }
    let mut assigned = 0usize;
    for (c, &w) in copies.iter_mut().zip(weights.iter()) {
        let expected = count as f64 * sanitize(w) / total;
        let n = ((expected + COPY_EPSILON).floor() as usize).min(count - assigned);
        *c = n;
        assigned += n;
    }
    copies
}

/// Clamp a raw weight to a usable non-negative finite value.
fn sanitize(weight: f64) -> f64 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

/// Weights of a source generation prepared for CDF inversion.
#[derive(Debug)]
pub(crate) struct SourceWeights {
    pub weights: Vec<f64>,
    /// Set when the raw weights summed to zero and uniform weights were substituted.
    pub degenerate: Option<ResamplingError>,
}
impl SourceWeights {
    /// Fails with [ResamplingError::EmptySet] for an empty set.
    pub fn from_set<P>(set: &SampleSet<P>) -> Result<SourceWeights, ResamplingError> {
        if set.is_empty() {
            return Err(ResamplingError::EmptySet);
        }
        let weights: Vec<f64> = set.iter().map(|s| sanitize(s.weight)).collect();
        let total: f64 = weights.iter().sum();
        if total > 0.0 && total.is_finite() {
            Ok(SourceWeights {
                weights,
                degenerate: None,
            })
        } else {
            Ok(SourceWeights {
                weights: vec![1.0; weights.len()],
                degenerate: Some(ResamplingError::DegenerateWeights {
                    total: set.total_weight(),
                }),
            })
        }
    }
}

/// Summary of one resampling pass.
#[derive(Debug)]
pub struct ResamplingReport {
    pub strategy: ResamplingStrategy,
    /// Size of the generation that was read.
    pub source_size: usize,
    /// Size of the generation that was published.
    pub output_size: usize,
    /// Samples replaced by uniformly drawn recovery poses.
    pub recovered: usize,
    /// Distinct histogram bins occupied by the output (KLD-sampling only).
    pub occupied_bins: Option<usize>,
    /// Whether uniform weights were substituted for a degenerate source generation.
    pub degenerate_weights: bool,
    /// Recoverable problems encountered during the pass.
    pub warnings: Vec<ResamplingError>,
}
impl ResamplingReport {
    pub(crate) fn new(strategy: ResamplingStrategy, source_size: usize) -> ResamplingReport {
        ResamplingReport {
            strategy,
            source_size,
            output_size: 0,
            recovered: 0,
            occupied_bins: None,
            degenerate_weights: false,
            warnings: Vec::new(),
        }
    }
    pub(crate) fn absorb(&mut self, source: &mut SourceWeights) {
        if let Some(warning) = source.degenerate.take() {
            self.degenerate_weights = true;
            self.warnings.push(warning);
        }
    }
}

/// A resampling scheme: selects source indices by inverting the weight CDF.
pub trait Resampling {
    /// Strategy tag reported in [ResamplingReport].
    fn strategy(&self) -> ResamplingStrategy;

    /// Draw `count` source indices from `weights` (non-negative, positive total), calling `visit` for each one.
    ///
    /// Within one CDF-inversion merge the visited indices never decrease.
    fn draw<R, F>(&self, weights: &[f64], count: usize, rng: &mut R, visit: F)
    where
        R: Rng + ?Sized,
        F: FnMut(usize);

    /// Replace the current generation of `set` with `set.len()` resampled copies of weight `1/N`.
    fn apply<P, R>(
        &self,
        set: &mut SampleSet<P>,
        rng: &mut R,
    ) -> Result<ResamplingReport, ResamplingError>
    where
        P: Clone,
        R: Rng + ?Sized,
    {
        let mut source = SourceWeights::from_set(set)?;
        let n = set.len();
        let mut report = ResamplingReport::new(self.strategy(), n);
        report.absorb(&mut source);

        let uniform = 1.0 / n as f64;
        let mut insertion = set.insertion(n);
        let samples = set.samples();
        self.draw(&source.weights, n, rng, |i| {
            insertion.insert(samples[i].with_weight(uniform))
        });
        report.output_size = set.publish(insertion);
        Ok(report)
    }
}

/// The built-in resampling strategies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplingStrategy {
    /// Independent draws, generated as sorted order statistics.
    Multinomial,
    /// One draw per stratum of width `1/N`.
    #[default]
    Stratified,
    /// Deterministic copies plus a systematically resampled remainder.
    Residual,
}
impl Display for ResamplingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResamplingStrategy::Multinomial => "multinomial",
            ResamplingStrategy::Stratified => "stratified",
            ResamplingStrategy::Residual => "residual",
        };
        f.write_str(name)
    }
}
impl FromStr for ResamplingStrategy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "multinomial" => Ok(ResamplingStrategy::Multinomial),
            "stratified" => Ok(ResamplingStrategy::Stratified),
            "residual" => Ok(ResamplingStrategy::Residual),
            other => Err(format!("unknown resampling strategy '{}'", other)),
        }
    }
}
impl Resampling for ResamplingStrategy {
    fn strategy(&self) -> ResamplingStrategy {
        *self
    }
    fn draw<R, F>(&self, weights: &[f64], count: usize, rng: &mut R, visit: F)
    where
        R: Rng + ?Sized,
        F: FnMut(usize),
    {
        let total: f64 = weights.iter().sum();
        match self {
            ResamplingStrategy::Multinomial => {
                let u = OrderedSequence::Multinomial.generate(count, rng);
                invert_cdf(weights, total, &u, visit);
            }
            ResamplingStrategy::Stratified => {
                let u = OrderedSequence::Stratified.generate(count, rng);
                invert_cdf(weights, total, &u, visit);
            }
            ResamplingStrategy::Residual => residual_draw(weights, total, count, rng, visit),
        }
    }
}

fn residual_draw<R, F>(weights: &[f64], total: f64, count: usize, rng: &mut R, mut visit: F)
where
    R: Rng + ?Sized,
    F: FnMut(usize),
{
    let copies = deterministic_copies(weights, count);
    let mut emitted = 0usize;
    for (i, &c) in copies.iter().enumerate() {
        for _ in 0..c {
            visit(i);
        }
        emitted += c;
    }
    let remaining = count - emitted;
    if remaining == 0 {
        return;
    }
    let residuals: Vec<f64> = weights
        .iter()
        .zip(copies.iter())
        .map(|(&w, &c)| (count as f64 * w / total - c as f64).max(0.0))
        .collect();
    let residual_total: f64 = residuals.iter().sum();
    let u = sequence::systematic(remaining, rng);
    if residual_total > 0.0 && residual_total.is_finite() {
        invert_cdf(&residuals, residual_total, &u, visit);
    } else {
        // every residual was absorbed by the epsilon guard; fall back to the raw weights
        invert_cdf(weights, total, &u, visit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Sample;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const STRATEGIES: [ResamplingStrategy; 3] = [
        ResamplingStrategy::Multinomial,
        ResamplingStrategy::Stratified,
        ResamplingStrategy::Residual,
    ];

    fn indexed_set(weights: &[f64]) -> SampleSet<usize> {
        SampleSet::new(
            "map",
            weights
                .iter()
                .enumerate()
                .map(|(i, &w)| Sample::new(i, w))
                .collect(),
        )
    }

    #[test]
    fn test_cursor_advances_and_clamps() {
        let weights = [0.25, 0.0, 0.5, 0.25];
        let mut cursor = CdfCursor::new(&weights).unwrap();
        assert_eq!(cursor.advance_to(0.1), 0);
        // zero-weight sample is skipped
        assert_eq!(cursor.advance_to(0.25), 2);
        assert_eq!(cursor.advance_to(0.74), 2);
        assert_eq!(cursor.advance_to(0.75), 3);
        // overrun past the total clamps to the last sample
        assert_eq!(cursor.advance_to(1.0 + 1e-12), 3);
        assert_eq!(cursor.position(), 3);
        assert!(CdfCursor::new(&[]).is_none());
    }
    #[test]
    fn test_invert_cdf_unnormalized_weights() {
        let weights = [2.0, 6.0];
        let mut visited = Vec::new();
        invert_cdf(&weights, 8.0, &[0.1, 0.2, 0.3, 0.9], |i| visited.push(i));
        assert_eq!(visited, vec![0, 0, 1, 1]);
    }
    #[test]
    fn test_residual_deterministic_copies() {
        assert_eq!(deterministic_copies(&[0.5, 0.3, 0.2], 10), vec![5, 3, 2]);
        assert_eq!(deterministic_copies(&[0.45, 0.35, 0.2], 10), vec![4, 3, 2]);
        assert_eq!(deterministic_copies(&[0.0, 0.0], 10), vec![0, 0]);
        assert_eq!(deterministic_copies(&[f64::NAN, 1.0], 4), vec![0, 4]);
    }
    #[test]
    fn test_residual_fills_remainder() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut visited = Vec::new();
        ResamplingStrategy::Residual.draw(&[0.45, 0.35, 0.2], 10, &mut rng, |i| visited.push(i));
        assert_eq!(visited.len(), 10);
        // deterministic phase first
        assert_eq!(&visited[..9], &[0, 0, 0, 0, 1, 1, 1, 2, 2]);
        // remainder drawn from residuals [0.5, 0.5, 0.0]
        assert!(visited[9] == 0 || visited[9] == 1);
    }
    #[test]
    fn test_draw_indices_are_monotone() {
        let mut rng = StdRng::seed_from_u64(99);
        let weights: Vec<f64> = (0..200).map(|i| ((i * 37) % 11) as f64).collect();
        for strategy in [ResamplingStrategy::Multinomial, ResamplingStrategy::Stratified] {
            let mut visited = Vec::new();
            strategy.draw(&weights, 500, &mut rng, |i| visited.push(i));
            assert_eq!(visited.len(), 500);
            assert!(visited.windows(2).all(|p| p[0] <= p[1]));
            assert!(visited.iter().all(|&i| weights[i] > 0.0));
        }
    }
    #[test]
    fn test_apply_preserves_size_and_uniform_weights() {
        let mut rng = StdRng::seed_from_u64(17);
        for strategy in STRATEGIES {
            let mut set = indexed_set(&[0.1, 0.4, 0.05, 0.3, 0.15]);
            let report = strategy.apply(&mut set, &mut rng).unwrap();
            assert_eq!(report.output_size, 5);
            assert_eq!(report.source_size, 5);
            assert_eq!(set.len(), 5);
            assert!(!report.degenerate_weights);
            for sample in &set {
                assert_eq!(sample.weight, 0.2);
            }
            assert_approx_eq!(set.total_weight(), 1.0, 1e-12);
        }
    }
    #[test]
    fn test_apply_rejects_empty_set() {
        let mut rng = StdRng::seed_from_u64(17);
        for strategy in STRATEGIES {
            let mut set = indexed_set(&[]);
            assert!(matches!(
                strategy.apply(&mut set, &mut rng),
                Err(ResamplingError::EmptySet)
            ));
        }
    }
    #[test]
    fn test_single_sample_is_copied() {
        let mut rng = StdRng::seed_from_u64(17);
        for strategy in STRATEGIES {
            let mut set = indexed_set(&[0.0]);
            let report = strategy.apply(&mut set, &mut rng).unwrap();
            assert!(report.degenerate_weights);
            assert_eq!(set.len(), 1);
            assert_eq!(set.samples()[0].pose, 0);
            assert_eq!(set.samples()[0].weight, 1.0);
        }
    }
    #[test]
    fn test_degenerate_weights_fall_back_to_uniform() {
        let mut rng = StdRng::seed_from_u64(23);
        for strategy in STRATEGIES {
            let mut set = indexed_set(&[0.0; 8]);
            let report = strategy.apply(&mut set, &mut rng).unwrap();
            assert!(report.degenerate_weights);
            assert!(matches!(
                report.warnings.as_slice(),
                [ResamplingError::DegenerateWeights { .. }]
            ));
            assert_eq!(set.len(), 8);
        }
    }
    #[test]
    fn test_source_weights_sanitize_or_substitute_uniform() {
        let source = SourceWeights::from_set(&indexed_set(&[0.5, -1.0, f64::NAN, 1.5])).unwrap();
        assert_eq!(source.weights, vec![0.5, 0.0, 0.0, 1.5]);
        assert!(source.degenerate.is_none());

        let source = SourceWeights::from_set(&indexed_set(&[0.0, -2.0, 0.0])).unwrap();
        assert_eq!(source.weights, vec![1.0; 3]);
        assert!(matches!(
            source.degenerate,
            Some(ResamplingError::DegenerateWeights { .. })
        ));
    }
    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "Stratified".parse::<ResamplingStrategy>().unwrap(),
            ResamplingStrategy::Stratified
        );
        assert_eq!(
            ResamplingStrategy::Residual.to_string().parse::<ResamplingStrategy>(),
            Ok(ResamplingStrategy::Residual)
        );
        assert!("systematic".parse::<ResamplingStrategy>().is_err());
    }
}
