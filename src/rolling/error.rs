//! Error types.
//!
//! Configuration errors surface once, when an aggregate is built, and the
//! aggregate is never partially constructed. Usage errors surface on the
//! offending call, which then has no effect.

use thiserror::Error;

/// Invalid parameters passed to a builder or a retention policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A periodic reset interval of zero.
    #[error("reset interval must be greater than zero")]
    ZeroInterval,

    /// Fewer chunks than a rolling window can rotate with.
    #[error("number of chunks {chunks} is below the minimum of {min}")]
    TooFewChunks { chunks: usize, min: usize },

    /// More chunks than the engine allows.
    #[error("number of chunks {chunks} exceeds the maximum of {max}")]
    TooManyChunks { chunks: usize, max: usize },

    /// The per-chunk interval is so short that rotation checks would dominate.
    #[error("interval between chunk rotations is {interval_ms}ms, minimum is {min_ms}ms")]
    ChunkIntervalTooShort { interval_ms: u64, min_ms: u64 },

    /// A reset interval or rolling window longer than the engine supports.
    #[error("retention window of {window_ms}ms exceeds the maximum of {max_ms}ms")]
    WindowTooLong { window_ms: u128, max_ms: u64 },

    /// Ranking capacity outside `[1, max]`.
    #[error("ranking capacity {capacity} must be between 1 and {max}")]
    InvalidCapacity { capacity: usize, max: usize },

    /// Buffered actor pool or batch size of zero.
    #[error("buffered actor {what} must be greater than zero")]
    InvalidActorSizing { what: &'static str },

    /// Histogram bounds the recording backend refuses.
    #[error("invalid histogram bounds: {reason}")]
    InvalidHistogram { reason: String },
}

/// A call rejected because its arguments are inconsistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UsageError {
    /// More hits than total attempts.
    #[error("hit count {hits} exceeds total count {total}")]
    HitsExceedTotal { hits: u32, total: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::TooFewChunks { chunks: 1, min: 2 };
        assert_eq!(err.to_string(), "number of chunks 1 is below the minimum of 2");

        let err = ConfigError::ChunkIntervalTooShort {
            interval_ms: 50,
            min_ms: 100,
        };
        assert!(err.to_string().contains("50ms"));
    }

    #[test]
    fn test_usage_error_message() {
        let err = UsageError::HitsExceedTotal { hits: 5, total: 3 };
        assert_eq!(err.to_string(), "hit count 5 exceeds total count 3");
    }
}
