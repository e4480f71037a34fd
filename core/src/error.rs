//! Error taxonomy for the resampling core.
//!
//! Only [ResamplingError::EmptySet] and [ResamplingError::InvalidConfig] abort a call. The remaining variants are
//! recoverable: the resampling pass still completes and the error is handed to the caller (and its sink) as a
//! warning.
use thiserror::Error;

/// Boxed error type returned by collaborators such as a [crate::recovery::UniformPoseSampler].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum ResamplingError {
    /// Resampling was invoked on a sample set without samples.
    #[error("cannot resample an empty sample set")]
    EmptySet,
    /// The uniform pose sampler could not be refreshed for the set's frame; the base strategy was used instead.
    #[error("uniform pose sampler unavailable for frame '{frame}', falling back to plain resampling: {source}")]
    RecoverySamplerUnavailable {
        frame: String,
        #[source]
        source: BoxError,
    },
    /// All weights were zero (or non-finite); samples were drawn as if uniformly weighted.
    #[error("degenerate sample weights (total = {total}), resampling with uniform weights")]
    DegenerateWeights { total: f64 },
    /// The resampling configuration violates one of its constraints.
    #[error("invalid resampling configuration: {0}")]
    InvalidConfig(String),
}

impl ResamplingError {
    /// Whether the error is a warning that still allowed resampling to complete.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ResamplingError::RecoverySamplerUnavailable { .. }
                | ResamplingError::DegenerateWeights { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(!ResamplingError::EmptySet.is_recoverable());
        assert!(!ResamplingError::InvalidConfig("min > max".into()).is_recoverable());
        assert!(ResamplingError::DegenerateWeights { total: 0.0 }.is_recoverable());
        let unavailable = ResamplingError::RecoverySamplerUnavailable {
            frame: "map".into(),
            source: "transform lookup timed out".into(),
        };
        assert!(unavailable.is_recoverable());
    }
    #[test]
    fn test_messages_name_the_frame() {
        let unavailable = ResamplingError::RecoverySamplerUnavailable {
            frame: "map".into(),
            source: "transform lookup timed out".into(),
        };
        let message = unavailable.to_string();
        assert!(message.contains("'map'"));
        assert!(message.contains("transform lookup timed out"));
    }
}
