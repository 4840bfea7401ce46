//! # Retention configuration
//!
//! A [`RetentionPolicy`] decides what an aggregate remembers:
//!
//! ```text
//!     Uniform ──────────────────► everything since creation
//!        │
//!     ResetOnSnapshot ──────────► everything since the previous read
//!        │
//!     ResetPeriodically ────────► everything since the last fixed reset
//!        │
//!     ResetPeriodicallyByChunks ► a rolling window split into N chunks,
//!                                 the oldest chunk fading out linearly
//! ```
//!
//! The policy also carries the collaborators an aggregate needs at runtime:
//! the [`Ticker`] that drives rotation, the [`BackgroundExecutor`] that runs
//! phase retirement, and an optional snapshot caching duration.
//!
//! Policies are validated by the builders before anything is allocated.

use super::{
    error::ConfigError,
    executor::{BackgroundExecutor, InlineExecutor},
    ticker::{SystemTicker, Ticker},
};
use std::sync::Arc;
use std::time::Duration;

/// Smallest number of chunks a rolling window can be split into.
pub const MIN_CHUNKS: usize = 2;

/// Largest number of chunks a rolling window can be split into.
pub const MAX_CHUNKS: usize = 1000;

/// Floor for the interval between two chunk rotations, in milliseconds.
///
/// Shorter intervals make writers spend their time checking and performing
/// rotations instead of recording.
pub const MIN_CHUNK_INTERVAL_MS: u64 = 100;

/// Longest reset interval or rolling window, in milliseconds (366 days).
///
/// Keeps every chunk boundary computed from the ticker well inside `u64`.
pub const MAX_RETENTION_WINDOW_MS: u64 = 366 * 24 * 60 * 60 * 1000;

/// Largest supported ranking capacity.
pub const MAX_RANKING_CAPACITY: usize = 1000;

/// Pre-allocated actions per concurrent ranking.
pub const DEFAULT_ACTOR_POOL_SIZE: usize = 64;

/// Actions one thread runs before handing the ranking lock back.
pub const DEFAULT_ACTOR_BATCH_SIZE: usize = 256;

/// Retention strategy of an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Never forgets anything.
    Uniform,

    /// Forgets everything each time it is read.
    ResetOnSnapshot,

    /// Forgets everything once per `interval`.
    ResetPeriodically {
        /// Time between resets.
        interval: Duration,
    },

    /// Remembers roughly the last `window`, split into `chunks` independently
    /// rotating chunks. The oldest chunk decays linearly instead of vanishing
    /// at once.
    ResetPeriodicallyByChunks {
        /// Length of the rolling window.
        window: Duration,
        /// Number of chunks the window is split into.
        chunks: usize,
    },
}

/// Complete retention configuration handed to the builders.
///
/// # Example
///
/// ```rust
/// use rollmetrics::{MockTicker, RetentionPolicy};
/// use std::time::Duration;
///
/// let policy = RetentionPolicy::reset_periodically_by_chunks(Duration::from_secs(60), 6)
///     .with_snapshot_caching_duration(Duration::from_secs(1))
///     .with_ticker(MockTicker::new(0));
///
/// assert!(policy.validate().is_ok());
/// assert_eq!(policy.interval_between_rotations_ms(), Some(10_000));
/// ```
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    retention: Retention,
    snapshot_caching_duration: Option<Duration>,
    ticker: Arc<dyn Ticker>,
    executor: Arc<dyn BackgroundExecutor>,
}

impl RetentionPolicy {
    fn with_retention(retention: Retention) -> Self {
        Self {
            retention,
            snapshot_caching_duration: None,
            ticker: Arc::new(SystemTicker),
            executor: Arc::new(InlineExecutor),
        }
    }

    /// Keeps everything ever recorded.
    pub fn uniform() -> Self {
        Self::with_retention(Retention::Uniform)
    }

    /// Clears the aggregate each time a snapshot is taken.
    pub fn reset_on_snapshot() -> Self {
        Self::with_retention(Retention::ResetOnSnapshot)
    }

    /// Clears the aggregate once per `interval`.
    pub fn reset_periodically(interval: Duration) -> Self {
        Self::with_retention(Retention::ResetPeriodically { interval })
    }

    /// Keeps a rolling `window` split into `chunks` rotating chunks.
    pub fn reset_periodically_by_chunks(window: Duration, chunks: usize) -> Self {
        Self::with_retention(Retention::ResetPeriodicallyByChunks { window, chunks })
    }

    /// Serves reads from a memoized snapshot for `duration`.
    ///
    /// A zero duration disables caching.
    pub fn with_snapshot_caching_duration(mut self, duration: Duration) -> Self {
        self.snapshot_caching_duration = if duration.is_zero() {
            None
        } else {
            Some(duration)
        };
        self
    }

    /// Replaces the time source, mostly for tests.
    pub fn with_ticker<T: Ticker + 'static>(mut self, ticker: T) -> Self {
        self.ticker = Arc::new(ticker);
        self
    }

    /// Replaces the time source with an already shared one.
    pub fn with_shared_ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
        self.ticker = ticker;
        self
    }

    /// Sets the executor that runs phase retirement for rolling rankings.
    pub fn with_executor(mut self, executor: Arc<dyn BackgroundExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// The retention strategy.
    #[inline]
    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// The snapshot caching duration, if caching is enabled.
    #[inline]
    pub fn snapshot_caching_duration(&self) -> Option<Duration> {
        self.snapshot_caching_duration
    }

    /// The time source.
    #[inline]
    pub fn ticker(&self) -> &Arc<dyn Ticker> {
        &self.ticker
    }

    /// The background executor.
    #[inline]
    pub fn executor(&self) -> &Arc<dyn BackgroundExecutor> {
        &self.executor
    }

    /// Milliseconds between two rotations for the periodic strategies.
    ///
    /// `None` for `Uniform` and `ResetOnSnapshot`.
    pub fn interval_between_rotations_ms(&self) -> Option<u64> {
        match self.retention {
            Retention::Uniform | Retention::ResetOnSnapshot => None,
            Retention::ResetPeriodically { interval } => Some(duration_ms(interval)),
            Retention::ResetPeriodicallyByChunks { window, chunks } => {
                Some(duration_ms(window) / chunks.max(1) as u64)
            }
        }
    }

    /// Checks the policy for counters and hit ratios.
    ///
    /// # Errors
    ///
    /// - `ZeroInterval` for a periodic reset every zero milliseconds
    /// - `WindowTooLong` for an interval or window above
    ///   [`MAX_RETENTION_WINDOW_MS`]
    /// - `TooFewChunks` / `TooManyChunks` outside `[MIN_CHUNKS, MAX_CHUNKS]`
    /// - `ChunkIntervalTooShort` when `window / chunks` is under
    ///   [`MIN_CHUNK_INTERVAL_MS`]
    ///
    /// ```rust
    /// use rollmetrics::{ConfigError, RetentionPolicy};
    /// use std::time::Duration;
    ///
    /// let policy = RetentionPolicy::reset_periodically_by_chunks(Duration::from_secs(1), 1);
    /// assert_eq!(
    ///     policy.validate(),
    ///     Err(ConfigError::TooFewChunks { chunks: 1, min: 2 })
    /// );
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.retention {
            Retention::Uniform | Retention::ResetOnSnapshot => Ok(()),
            Retention::ResetPeriodically { interval } => {
                if interval.as_millis() == 0 {
                    return Err(ConfigError::ZeroInterval);
                }
                check_window(interval)
            }
            Retention::ResetPeriodicallyByChunks { window, chunks } => {
                if chunks < MIN_CHUNKS {
                    return Err(ConfigError::TooFewChunks {
                        chunks,
                        min: MIN_CHUNKS,
                    });
                }
                if chunks > MAX_CHUNKS {
                    return Err(ConfigError::TooManyChunks {
                        chunks,
                        max: MAX_CHUNKS,
                    });
                }
                check_window(window)?;
                let interval_ms = duration_ms(window) / chunks as u64;
                if interval_ms < MIN_CHUNK_INTERVAL_MS {
                    return Err(ConfigError::ChunkIntervalTooShort {
                        interval_ms,
                        min_ms: MIN_CHUNK_INTERVAL_MS,
                    });
                }
                Ok(())
            }
        }
    }

    /// Checks the policy for rankings.
    ///
    /// On top of [`validate`](Self::validate), a periodically reset ranking
    /// rotates two recorder phases, so its interval obeys the chunk floor.
    ///
    /// # Errors
    ///
    /// Same as [`validate`](Self::validate), plus `ChunkIntervalTooShort` for
    /// a `ResetPeriodically` interval under [`MIN_CHUNK_INTERVAL_MS`].
    pub fn validate_for_ranking(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if let Retention::ResetPeriodically { interval } = self.retention {
            let interval_ms = duration_ms(interval);
            if interval_ms < MIN_CHUNK_INTERVAL_MS {
                return Err(ConfigError::ChunkIntervalTooShort {
                    interval_ms,
                    min_ms: MIN_CHUNK_INTERVAL_MS,
                });
            }
        }
        Ok(())
    }
}

/// Whole milliseconds of `duration`, saturating at `u64::MAX`.
#[inline]
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn check_window(window: Duration) -> Result<(), ConfigError> {
    let window_ms = window.as_millis();
    if window_ms > u128::from(MAX_RETENTION_WINDOW_MS) {
        return Err(ConfigError::WindowTooLong {
            window_ms,
            max_ms: MAX_RETENTION_WINDOW_MS,
        });
    }
    Ok(())
}

impl Default for RetentionPolicy {
    /// Uniform retention, system ticker, inline executor, no caching.
    fn default() -> Self {
        Self::uniform()
    }
}
