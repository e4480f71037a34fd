//! Resampling toolbox for Monte Carlo localization
//!
//! This crate implements the resampling half of a particle filter used for Monte Carlo localization (MCL). A robot's
//! pose is tracked as a weighted set of discrete hypotheses (samples) that the surrounding filter propagates with a
//! motion model and re-weights with a sensor model. Periodically the weighted set degenerates: a handful of samples
//! carry almost all of the probability mass while the rest contribute nothing. Resampling turns the weighted set into
//! a new set that approximates the same posterior with (mostly) uniform weights, concentrating samples where the
//! probability mass is.
//!
//! The motion model, the sensor model, maps and frame lookups are not part of this crate. They are consumed through
//! narrow interfaces: a [sample::SampleSet] produced by the host filter, a scalar recovery probability and a
//! [recovery::UniformPoseSampler] that can synthesize valid random poses.
//!
//! ## Crate overview
//!
//! - [sample]: The weighted sample container and its write-only insertion buffer.
//! - [sequence]: Ascending pseudo-random sequences in $[0, 1)$ used to walk the cumulative weight curve.
//! - [resampling]: Multinomial, stratified and residual resampling sharing one CDF-inversion cursor.
//! - [recovery]: Recovery (augmented) resampling that injects uniformly drawn poses on localization failure.
//! - [kld]: KLD-sampling, adapting the number of samples to the spread of the posterior.
//! - [resampler]: The host-facing facade tying strategy, recovery, KLD bound, random streams and sinks together.
//! - [sink]: Logging and filter-state sinks passed into every resampling call.
//! - [config]: Serializable resampling configuration.
//! - [sim]: A synthetic 2D localization loop used by the `mcl` binary and the integration tests.
//!
//! ## Resampling by CDF inversion
//!
//! Given normalized weights $w_i$, the cumulative weight curve is $C_j = \sum_{i \le j} w_i$. Drawing a sample
//! means drawing $u \sim U(0, 1)$ and selecting the first index $j$ with $u < C_j$. Drawing $N$ samples independently
//! and then sorting them would cost $O(N \log N)$. Instead the [sequence] module produces $N$ values that are
//! *already ascending*, so a single forward cursor over the cumulative weights selects every sample in one $O(N)$
//! merge:
//!
//! - Multinomial: the order statistics of $N$ uniforms, $u_N = U^{1/N}$ and $u_{k-1} = u_k U_k^{1/k}$.
//! - Stratified: one draw per stratum, $u_i = (i + U_i) / N$.
//! - Systematic (residual remainder): one shared offset, $u_i = (i + U) / M$.
//!
//! ## KLD-sampling
//!
//! With $k$ distinct occupied histogram bins, the number of samples needed so that the Kullback-Leibler divergence
//! between the sample-based and the true posterior stays below $\epsilon$ with probability $1 - \delta$ is
//!
//! $$
//! n = \frac{k - 1}{2 \epsilon} \left( 1 - \frac{2}{9 (k - 1)} + \sqrt{\frac{2}{9 (k - 1)}} z_{1 - \delta} \right)^3
//! $$
//!
//! The [kld] module evaluates this bound while samples are emitted and stops as soon as enough samples exist.
pub mod config;
pub mod error;
pub mod kld;
pub mod recovery;
pub mod resampler;
pub mod resampling;
pub mod sample;
pub mod sequence;
pub mod sim;
pub mod sink;

use nalgebra::{Isometry2, Vector2};

use std::fmt::{self, Debug, Display};

pub use config::ResamplingConfig;
pub use error::ResamplingError;
pub use resampler::{Resampler, ResamplingTrigger};
pub use resampling::{Resampling, ResamplingReport, ResamplingStrategy};
pub use sample::{Insertion, Sample, SampleSet};

/// Planar robot pose: position in meters and heading (yaw) in radians.
///
/// This is the state-space type the localization host uses for its samples. The resampling machinery itself is
/// generic over the pose type and never modifies a pose; it only copies poses and assigns weights.
#[derive(Clone, Copy, Default, PartialEq)]
pub struct Pose2D {
    pub position: Vector2<f64>,
    pub yaw: f64,
}
impl Debug for Pose2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pose2D")
            .field("x", &self.position.x)
            .field("y", &self.position.y)
            .field("yaw (deg)", &self.yaw.to_degrees())
            .finish()
    }
}
impl Display for Pose2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.3} m, {:.3} m, {:.2}°)",
            self.position.x,
            self.position.y,
            self.yaw.to_degrees()
        )
    }
}
impl Pose2D {
    /// Create a new pose, wrapping the heading to $[-\pi, \pi]$.
    pub fn new(x: f64, y: f64, yaw: f64) -> Pose2D {
        Pose2D {
            position: Vector2::new(x, y),
            yaw: wrap_to_pi(yaw),
        }
    }
    pub fn x(&self) -> f64 {
        self.position.x
    }
    pub fn y(&self) -> f64 {
        self.position.y
    }
    /// Euclidean distance between the positions of two poses (meters).
    pub fn distance(&self, other: &Pose2D) -> f64 {
        (self.position - other.position).norm()
    }
    /// Absolute heading difference between two poses (radians, in $[0, \pi]$).
    pub fn heading_difference(&self, other: &Pose2D) -> f64 {
        wrap_to_pi(self.yaw - other.yaw).abs()
    }
    /// Convert to a rigid-body transform.
    pub fn to_isometry(&self) -> Isometry2<f64> {
        Isometry2::new(self.position, self.yaw)
    }
}
impl From<Isometry2<f64>> for Pose2D {
    fn from(iso: Isometry2<f64>) -> Self {
        Pose2D::new(iso.translation.x, iso.translation.y, iso.rotation.angle())
    }
}

/// Wrap an angle to the range $\pm\pi$ radians
///
/// This function is generic and can be used with any type that implements the necessary traits.
///
/// # Arguments
/// * `angle` - The angle to be wrapped.
/// # Returns
/// * The wrapped angle, which will be in the range -π to π radians.
/// # Example
/// ```rust
/// use mcl::wrap_to_pi;
/// use std::f64::consts::PI;
/// let angle = 3.0 * PI / 2.0; // radians
/// let wrapped_angle = wrap_to_pi(angle);
/// assert_eq!(wrapped_angle, -PI / 2.0);
/// ```
pub fn wrap_to_pi<T>(angle: T) -> T
where
    T: PartialOrd + Copy + std::ops::SubAssign + std::ops::AddAssign + From<f64>,
{
    let mut wrapped: T = angle;
    while wrapped > T::from(std::f64::consts::PI) {
        wrapped -= T::from(2.0 * std::f64::consts::PI);
    }
    while wrapped < T::from(-std::f64::consts::PI) {
        wrapped += T::from(2.0 * std::f64::consts::PI);
    }
    wrapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_wrap_to_pi() {
        assert_eq!(wrap_to_pi(3.0 * PI), PI);
        assert_eq!(wrap_to_pi(-3.0 * PI), -PI);
        assert_eq!(wrap_to_pi(0.0), 0.0);
        assert_eq!(wrap_to_pi(PI), PI);
        assert_eq!(wrap_to_pi(-PI), -PI);
    }
    #[test]
    fn test_pose_new_wraps_heading() {
        let pose = Pose2D::new(1.0, -2.0, 3.0 * PI / 2.0);
        assert_approx_eq!(pose.x(), 1.0, 1e-12);
        assert_approx_eq!(pose.y(), -2.0, 1e-12);
        assert_approx_eq!(pose.yaw, -PI / 2.0, 1e-12);
    }
    #[test]
    fn test_pose_isometry_round_trip() {
        let pose = Pose2D::new(3.0, 4.0, 0.25);
        let back = Pose2D::from(pose.to_isometry());
        assert_approx_eq!(back.x(), 3.0, 1e-12);
        assert_approx_eq!(back.y(), 4.0, 1e-12);
        assert_approx_eq!(back.yaw, 0.25, 1e-12);
    }
    #[test]
    fn test_pose_distance_and_heading() {
        let a = Pose2D::new(0.0, 0.0, PI - 0.1);
        let b = Pose2D::new(3.0, 4.0, -PI + 0.1);
        assert_approx_eq!(a.distance(&b), 5.0, 1e-12);
        assert_approx_eq!(a.heading_difference(&b), 0.2, 1e-9);
    }
}
