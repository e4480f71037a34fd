//! Weighted sample container shared by every resampling strategy.
//!
//! A [SampleSet] holds the *current* generation of samples. Resampling reads that generation through
//! [SampleSet::samples] and writes the *next* generation into a separately owned [Insertion] buffer, which is
//! published with [SampleSet::publish] once the pass has completed. The insertion buffer is write-only: nothing
//! that is inserted can be read back during the pass, and it never aliases the generation being read.
use crate::Pose2D;

use std::fmt::{self, Debug, Display};

/// A single weighted pose hypothesis.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sample<P> {
    pub pose: P,
    pub weight: f64,
}
impl<P> Sample<P> {
    pub fn new(pose: P, weight: f64) -> Sample<P> {
        Sample { pose, weight }
    }
}
impl<P: Clone> Sample<P> {
    /// Copy of this sample carrying a different weight. The pose is untouched.
    pub fn with_weight(&self, weight: f64) -> Sample<P> {
        Sample {
            pose: self.pose.clone(),
            weight,
        }
    }
}
impl<P: Display> Display for Sample<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} w={:.4e}", self.pose, self.weight)
    }
}

/// Write-only buffer the next generation is built in.
#[derive(Debug)]
pub struct Insertion<P> {
    samples: Vec<Sample<P>>,
}
impl<P> Insertion<P> {
    pub fn with_capacity(capacity: usize) -> Insertion<P> {
        Insertion {
            samples: Vec::with_capacity(capacity),
        }
    }
    /// Append a sample to the next generation.
    pub fn insert(&mut self, sample: Sample<P>) {
        self.samples.push(sample);
    }
    /// Number of samples inserted so far.
    pub fn len(&self) -> usize {
        self.samples.len()
    }
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
    /// Overwrite the weight of the sample at `index`. Used to assign the uniform weight once the final size of an
    /// adaptive pass is known.
    pub(crate) fn set_weight(&mut self, index: usize, weight: f64) {
        if let Some(sample) = self.samples.get_mut(index) {
            sample.weight = weight;
        }
    }
    fn into_samples(self) -> Vec<Sample<P>> {
        self.samples
    }
}

/// Ordered, weighted set of samples tagged with the coordinate frame the poses live in.
#[derive(Clone)]
pub struct SampleSet<P> {
    frame: String,
    samples: Vec<Sample<P>>,
}
impl<P> Debug for SampleSet<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let min_weight = self
            .samples
            .iter()
            .map(|s| s.weight)
            .fold(f64::INFINITY, f64::min);
        f.debug_struct("SampleSet")
            .field("frame", &self.frame)
            .field("num_samples", &self.samples.len())
            .field("total_weight", &self.total_weight())
            .field(
                "weight_range",
                &format_args!("[{:.4e}, {:.4e}]", min_weight, self.max_weight()),
            )
            .field("effective_samples", &self.effective_sample_size())
            .finish()
    }
}
impl<P> SampleSet<P> {
    pub fn new(frame: impl Into<String>, samples: Vec<Sample<P>>) -> SampleSet<P> {
        SampleSet {
            frame: frame.into(),
            samples,
        }
    }
    /// Build a set from bare poses with uniform weights `1/N`.
    pub fn from_poses(frame: impl Into<String>, poses: impl IntoIterator<Item = P>) -> SampleSet<P> {
        let mut samples: Vec<Sample<P>> = poses.into_iter().map(|p| Sample::new(p, 1.0)).collect();
        let uniform = 1.0 / samples.len().max(1) as f64;
        for sample in &mut samples {
            sample.weight = uniform;
        }
        SampleSet::new(frame, samples)
    }
    pub fn frame(&self) -> &str {
        &self.frame
    }
    pub fn len(&self) -> usize {
        self.samples.len()
    }
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
    /// Read-only view of the current generation in insertion order.
    pub fn samples(&self) -> &[Sample<P>] {
        &self.samples
    }
    pub fn iter(&self) -> std::slice::Iter<'_, Sample<P>> {
        self.samples.iter()
    }
    pub fn weights(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.weight).collect()
    }
    pub fn total_weight(&self) -> f64 {
        self.samples.iter().map(|s| s.weight).sum()
    }
    pub fn mean_weight(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.total_weight() / self.samples.len() as f64
        }
    }
    pub fn max_weight(&self) -> f64 {
        self.samples.iter().map(|s| s.weight).fold(0.0, f64::max)
    }
    /// Replace the weights of the current generation, e.g. after a sensor update.
    ///
    /// Returns `false` (leaving the set untouched) when the number of weights does not match the number of samples.
    pub fn set_weights(&mut self, weights: &[f64]) -> bool {
        if weights.len() != self.samples.len() {
            return false;
        }
        for (sample, &w) in self.samples.iter_mut().zip(weights.iter()) {
            sample.weight = w;
        }
        true
    }
    /// Normalize the weights to sum to one.
    ///
    /// A zero, negative or non-finite total falls back to uniform weights. Returns the total before normalization.
    pub fn normalize_weights(&mut self) -> f64 {
        let sum = self.total_weight();
        if sum > 0.0 && sum.is_finite() {
            for sample in &mut self.samples {
                sample.weight /= sum;
            }
        } else if !self.samples.is_empty() {
            let uniform = 1.0 / self.samples.len() as f64;
            for sample in &mut self.samples {
                sample.weight = uniform;
            }
        }
        sum
    }
    /// Effective sample size $1 / \sum \hat{w}_i^2$ of the normalized weights.
    pub fn effective_sample_size(&self) -> f64 {
        let total = self.total_weight();
        if !(total > 0.0 && total.is_finite()) {
            return 0.0;
        }
        let sum_of_squares: f64 = self
            .samples
            .iter()
            .map(|s| (s.weight / total).powi(2))
            .sum();
        if sum_of_squares > 0.0 {
            1.0 / sum_of_squares
        } else {
            0.0
        }
    }
    /// Fresh insertion buffer sized for `capacity` samples of the next generation.
    pub fn insertion(&self, capacity: usize) -> Insertion<P> {
        Insertion::with_capacity(capacity)
    }
    /// Replace the current generation with the contents of `insertion`. Returns the new size.
    pub fn publish(&mut self, insertion: Insertion<P>) -> usize {
        self.samples = insertion.into_samples();
        self.samples.len()
    }
}
impl<'a, P> IntoIterator for &'a SampleSet<P> {
    type Item = &'a Sample<P>;
    type IntoIter = std::slice::Iter<'a, Sample<P>>;
    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

impl SampleSet<Pose2D> {
    /// Weighted mean pose. The heading is averaged on the unit circle.
    ///
    /// Returns `None` for an empty set. Degenerate weights fall back to an unweighted mean.
    pub fn weighted_mean(&self) -> Option<Pose2D> {
        if self.samples.is_empty() {
            return None;
        }
        let total = self.total_weight();
        let uniform = !(total > 0.0 && total.is_finite());
        let n = self.samples.len() as f64;
        let (mut x, mut y, mut sin, mut cos) = (0.0, 0.0, 0.0, 0.0);
        for sample in &self.samples {
            let w = if uniform { 1.0 / n } else { sample.weight / total };
            x += w * sample.pose.x();
            y += w * sample.pose.y();
            sin += w * sample.pose.yaw.sin();
            cos += w * sample.pose.yaw.cos();
        }
        Some(Pose2D::new(x, y, sin.atan2(cos)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn three_sample_set() -> SampleSet<Pose2D> {
        SampleSet::new(
            "map",
            vec![
                Sample::new(Pose2D::new(0.0, 0.0, 0.0), 2.0),
                Sample::new(Pose2D::new(1.0, 0.0, 0.0), 1.0),
                Sample::new(Pose2D::new(2.0, 0.0, 0.0), 1.0),
            ],
        )
    }

    #[test]
    fn test_from_poses_is_uniform() {
        let set = SampleSet::from_poses("map", (0..4).map(|i| Pose2D::new(i as f64, 0.0, 0.0)));
        assert_eq!(set.len(), 4);
        assert_eq!(set.frame(), "map");
        for sample in &set {
            assert_approx_eq!(sample.weight, 0.25, 1e-12);
        }
        assert_approx_eq!(set.effective_sample_size(), 4.0, 1e-9);
    }
    #[test]
    fn test_normalize_weights() {
        let mut set = three_sample_set();
        let total = set.normalize_weights();
        assert_approx_eq!(total, 4.0, 1e-12);
        assert_approx_eq!(set.total_weight(), 1.0, 1e-12);
        assert_approx_eq!(set.samples()[0].weight, 0.5, 1e-12);
        assert_approx_eq!(set.max_weight(), 0.5, 1e-12);
    }
    #[test]
    fn test_normalize_degenerate_weights_falls_back_to_uniform() {
        let mut set = three_sample_set();
        assert!(set.set_weights(&[0.0, 0.0, 0.0]));
        set.normalize_weights();
        for sample in &set {
            assert_approx_eq!(sample.weight, 1.0 / 3.0, 1e-12);
        }
    }
    #[test]
    fn test_set_weights_rejects_length_mismatch() {
        let mut set = three_sample_set();
        assert!(!set.set_weights(&[1.0, 2.0]));
        assert_approx_eq!(set.total_weight(), 4.0, 1e-12);
    }
    #[test]
    fn test_effective_sample_size() {
        let set = three_sample_set();
        // normalized weights [0.5, 0.25, 0.25]
        assert_approx_eq!(set.effective_sample_size(), 1.0 / 0.375, 1e-9);
    }
    #[test]
    fn test_publish_replaces_generation() {
        let mut set = three_sample_set();
        let mut insertion = set.insertion(2);
        {
            let source = set.samples();
            insertion.insert(source[2].with_weight(0.5));
            insertion.insert(source[2].with_weight(0.5));
        }
        assert_eq!(insertion.len(), 2);
        assert_eq!(set.len(), 3);
        assert_eq!(set.publish(insertion), 2);
        assert!(set.iter().all(|s| s.pose.x() == 2.0 && s.weight == 0.5));
    }
    #[test]
    fn test_weighted_mean_wraps_heading() {
        let set = SampleSet::new(
            "map",
            vec![
                Sample::new(Pose2D::new(0.0, 0.0, std::f64::consts::PI - 0.1), 1.0),
                Sample::new(Pose2D::new(2.0, 2.0, -std::f64::consts::PI + 0.1), 1.0),
            ],
        );
        let mean = set.weighted_mean().unwrap();
        assert_approx_eq!(mean.x(), 1.0, 1e-12);
        assert_approx_eq!(mean.y(), 1.0, 1e-12);
        assert_approx_eq!(mean.yaw.abs(), std::f64::consts::PI, 1e-9);
        assert!(SampleSet::<Pose2D>::new("map", vec![]).weighted_mean().is_none());
    }
}
