//! Ascending pseudo-random sequences in $[0, 1)$.
//!
//! Each generator returns `count` values sorted in non-decreasing order *by construction*, in $O(N)$ time and
//! without an explicit sort. The CDF-inversion merge in [crate::resampling] relies on that ordering to select every
//! sample with a single forward sweep over the cumulative weights.
use rand::Rng;

/// Largest `f64` strictly below one; generated values are clamped to it so rounding never produces `1.0`.
const BELOW_ONE: f64 = 1.0 - f64::EPSILON / 2.0;

/// Variant of ordered uniform sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderedSequence {
    /// Sorted i.i.d. uniforms generated as order statistics.
    Multinomial,
    /// One independent draw inside each of the `count` strata of width `1/count`.
    Stratified,
    /// One shared offset for all strata (used for the residual remainder).
    Systematic,
}
impl OrderedSequence {
    pub fn generate<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<f64> {
        match self {
            OrderedSequence::Multinomial => multinomial(count, rng),
            OrderedSequence::Stratified => stratified(count, rng),
            OrderedSequence::Systematic => systematic(count, rng),
        }
    }
}

/// Sorted sequence of `count` uniforms with the joint distribution of sorted i.i.d. draws.
///
/// The largest order statistic of $N$ uniforms is distributed as $U^{1/N}$, and given $u_k$ the next smaller one is
/// $u_{k-1} = u_k U_k^{1/k}$. Walking down from the maximum yields the whole sorted sample in one pass.
pub fn multinomial<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<f64> {
    if count == 0 {
        return Vec::new();
    }
    let mut u = vec![0.0; count];
    u[count - 1] = rng.random::<f64>().powf(1.0 / count as f64).min(BELOW_ONE);
    for k in (1..count).rev() {
        u[k - 1] = u[k] * rng.random::<f64>().powf(1.0 / k as f64);
    }
    u
}

/// $u_i = (i + U_i) / N$: exactly one draw per stratum $[i/N, (i+1)/N)$.
pub fn stratified<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<f64> {
    let n = count as f64;
    (0..count)
        .map(|i| ((i as f64 + rng.random::<f64>()) / n).min(BELOW_ONE))
        .collect()
}

/// $u_i = (i + U) / M$ with a single offset $U$ shared by all strata.
pub fn systematic<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<f64> {
    let m = count as f64;
    let offset: f64 = rng.random();
    (0..count)
        .map(|i| ((i as f64 + offset) / m).min(BELOW_ONE))
        .collect()
}

/// Whether `values` is sorted in non-decreasing order.
pub fn is_ascending(values: &[f64]) -> bool {
    values.windows(2).all(|pair| pair[0] <= pair[1])
}
