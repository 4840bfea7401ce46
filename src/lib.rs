//! # Rollmetrics - Rolling-Window Aggregates for Hot Paths
//!
//! Counters, hit ratios and top-K rankings that many threads can update at
//! once, each remembering data according to a [`RetentionPolicy`]: forever,
//! until the next read, until a periodic reset, or over a rolling window.
//!
//! ## Rolling Windows
//!
//! A rolling window is split into chunks that rotate independently. When a
//! chunk is about to be reused, its contribution fades out linearly instead
//! of vanishing all at once:
//!
//! ```text
//!     window = 2 chunks × 1000ms, add(100) at t=0
//!
//!     t=0     [100][   ][   ]  sum = 100
//!     t=2600  [100][   ][   ]  sum =  40   (fading: 400ms left of 1000)
//!     t=2980  [100][   ][   ]  sum =   2
//!     t=3000  [   ][   ][   ]  sum =   0   (slot reused)
//! ```
//!
//! ## Features
//!
//! - **Lock-free counters and hit ratios** - writers never block
//! - **Lock-minimal rankings** - writers hand updates to whoever holds the
//!   ranking lock instead of waiting for it
//! - **Four retention strategies** - uniform, reset on snapshot, periodic
//!   reset, rolling window by chunks
//! - **Snapshot caching** - memoize expensive reads for a fixed duration
//! - **Deterministic time** - inject a [`MockTicker`] in tests
//! - **Self-monitoring** - [`ActorStats`] tells when rankings are overloaded
//!
//! ## Quick Start
//!
//! ### Counting over the last minute
//!
//! ```rust
//! use rollmetrics::{CounterBuilder, RetentionPolicy};
//! use std::time::Duration;
//!
//! let errors = CounterBuilder::new(
//!     RetentionPolicy::reset_periodically_by_chunks(Duration::from_secs(60), 6),
//! )
//! .build();
//!
//! errors.add(1);
//! errors.add(2);
//! assert_eq!(errors.get_sum(), 3);
//! ```
//!
//! ### Cache hit ratio
//!
//! ```rust
//! use rollmetrics::{HitRatioBuilder, RetentionPolicy};
//!
//! let ratio = HitRatioBuilder::new(RetentionPolicy::reset_on_snapshot()).build();
//!
//! ratio.update(3, 4).unwrap();
//! assert_eq!(ratio.get_ratio(), 0.75);
//! assert!(ratio.get_ratio().is_nan()); // nothing since the previous read
//! ```
//!
//! ### Slowest queries
//!
//! ```rust
//! use rollmetrics::{RankingBuilder, RetentionPolicy};
//!
//! let slowest = RankingBuilder::<String>::new(RetentionPolicy::uniform(), 3).build();
//!
//! slowest.update(120, "SELECT * FROM orders".to_string());
//! slowest.update(15, "SELECT 1".to_string());
//! slowest.update(480, "SELECT * FROM events".to_string());
//!
//! let top = slowest.get_positions_descending();
//! assert_eq!(top[0].weight, 480);
//! assert_eq!(top.len(), 3);
//! ```
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │    RetentionPolicy      │
//!                    └──────────┬──────────────┘
//!                               │ builders
//!          ┌────────────────────┼──────────────────────┐
//!          │                    │                      │
//!     ┌────▼─────────┐   ┌──────▼───────┐   ┌──────────▼───────────┐
//!     │ WindowCounter│   │  HitRatio    │   │  Ranking             │
//!     ├──────────────┤   ├──────────────┤   ├──────────────────────┤
//!     │ atomic sum   │   │ packed u64   │   │ BufferedActor        │
//!     │ chunk phases │   │ chunk phases │   │ WriterReaderPhaser   │
//!     └──────────────┘   └──────────────┘   │ archive ring         │
//!                                           └──────────────────────┘
//! ```
//!
//! ## Thread Safety
//!
//! Every aggregate is `Send + Sync`; share it through an [`Arc`](std::sync::Arc).
//! Writes never wait for reads. Reads of rankings briefly take the ranking
//! lock and may run queued updates on behalf of writers.
//!
//! ## Safety
//!
//! `unsafe` is confined to the [`BufferedActor`] slot arena, whose slots are
//! handed out exclusively through an atomic free list.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rust_2018_idioms, unreachable_pub, missing_debug_implementations)]
#![forbid(unsafe_op_in_unsafe_fn)]

// Internal module
mod rolling;

// Public re-exports
pub use rolling::{
    cpu_relax, Action, ActorStats, BackgroundExecutor, BufferedActor, CachingCounter,
    CachingHitRatio, CachingRanking, CachingSupplier, ConcurrentRanking, ConfigError,
    HdrReservoir, HealthStatus, Histogram, HistogramSnapshot, HitRatio, Identity, InlineExecutor,
    IntervalRanking, MockTicker, PooledAction, Position, Ranking, RankingRecorder,
    RankingSettings, ReaderGuard, ResetByChunksRanking, ResetOnSnapshotCounter,
    ResetOnSnapshotHitRatio, ResetOnSnapshotRanking, ResetPeriodicallyCounter,
    ResetPeriodicallyHitRatio, Retention, RetentionPolicy, SingleThreadedRanking,
    SmoothlyDecayingRollingCounter, SmoothlyDecayingRollingHitRatio, SystemTicker, Task,
    ThreadExecutor, Ticker, UniformCounter, UniformHitRatio, UpdateResult, UsageError,
    WindowCounter, WriterCriticalSection, WriterReaderPhaser, CACHE_LINE_SIZE,
    DEFAULT_ACTOR_BATCH_SIZE, DEFAULT_ACTOR_POOL_SIZE, MAX_CHUNKS, MAX_RANKING_CAPACITY,
    MAX_RETENTION_WINDOW_MS, MIN_CHUNKS, MIN_CHUNK_INTERVAL_MS,
};

use rolling::duration_ms;
use std::sync::Arc;

/// A counter shared across threads.
pub type SharedCounter = Arc<dyn WindowCounter>;

/// A hit ratio shared across threads.
pub type SharedHitRatio = Arc<dyn HitRatio>;

/// A ranking shared across threads.
///
/// # Example
/// ```rust
/// use rollmetrics::{RankingBuilder, RetentionPolicy, SharedRanking};
/// use std::sync::Arc;
///
/// let ranking: SharedRanking<u32> =
///     Arc::from(RankingBuilder::<u32>::new(RetentionPolicy::uniform(), 10).build());
///
/// let writer = ranking.clone();
/// std::thread::spawn(move || writer.update(5, 1)).join().unwrap();
/// assert_eq!(ranking.get_positions_descending().len(), 1);
/// ```
pub type SharedRanking<I> = Arc<dyn Ranking<I>>;

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum supported Rust version.
///
/// `std::sync::OnceLock` needs 1.70.
pub const MSRV: &str = "1.70.0";

/// Prelude module for convenient imports.
///
/// ```rust
/// use rollmetrics::prelude::*;
/// ```
pub mod prelude {
    //! Common imports for building and using aggregates.
    //!
    //! # Example
    //! ```rust
    //! use rollmetrics::prelude::*;
    //!
    //! let counter = CounterBuilder::new(RetentionPolicy::uniform()).build();
    //! counter.add(1);
    //! let status = HealthStatus::Healthy;
    //! ```

    pub use crate::{
        ActorStats, ConfigError, CounterBuilder, HealthStatus, HitRatio, HitRatioBuilder,
        Position, Ranking, RankingBuilder, RetentionPolicy, SharedCounter, SharedHitRatio,
        SharedRanking, Ticker, UsageError, WindowCounter,
    };
}

/// Builds a [`WindowCounter`] for a retention policy.
///
/// ```rust
/// use rollmetrics::{CounterBuilder, ConfigError, RetentionPolicy};
/// use std::time::Duration;
///
/// let counter = CounterBuilder::new(RetentionPolicy::reset_on_snapshot()).build();
/// counter.add(5);
/// assert_eq!(counter.get_sum(), 5);
/// assert_eq!(counter.get_sum(), 0);
///
/// // Or use try_build() for error handling
/// let result = CounterBuilder::new(RetentionPolicy::reset_periodically_by_chunks(
///     Duration::from_millis(100),
///     2,
/// ))
/// .try_build();
/// assert!(matches!(result, Err(ConfigError::ChunkIntervalTooShort { .. })));
/// ```
#[derive(Debug, Clone)]
pub struct CounterBuilder {
    policy: RetentionPolicy,
}

impl CounterBuilder {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self { policy }
    }

    /// Builds the counter.
    ///
    /// # Panics
    ///
    /// Panics if the policy is invalid. Use `try_build()` to handle errors.
    pub fn build(self) -> Box<dyn WindowCounter> {
        match self.try_build() {
            Ok(counter) => counter,
            Err(e) => panic!("invalid counter configuration: {}", e),
        }
    }

    /// # Errors
    ///
    /// See [`RetentionPolicy::validate`].
    pub fn try_build(self) -> Result<Box<dyn WindowCounter>, ConfigError> {
        let policy = self.policy;
        policy.validate()?;

        let ticker = Arc::clone(policy.ticker());
        let counter: Box<dyn WindowCounter> = match policy.retention() {
            Retention::Uniform => Box::new(UniformCounter::new()),
            Retention::ResetOnSnapshot => Box::new(ResetOnSnapshotCounter::new()),
            Retention::ResetPeriodically { interval } => Box::new(ResetPeriodicallyCounter::new(
                duration_ms(interval),
                Arc::clone(&ticker),
            )),
            Retention::ResetPeriodicallyByChunks { chunks, .. } => {
                Box::new(SmoothlyDecayingRollingCounter::new(
                    chunks,
                    rotation_interval_ms(&policy),
                    Arc::clone(&ticker),
                ))
            }
        };

        Ok(match policy.snapshot_caching_duration() {
            Some(duration) => Box::new(CachingCounter::new(counter, duration, ticker)),
            None => counter,
        })
    }
}

/// Builds a [`HitRatio`] for a retention policy.
///
/// ```rust
/// use rollmetrics::{HitRatioBuilder, MockTicker, RetentionPolicy};
/// use std::time::Duration;
///
/// let ticker = MockTicker::new(0);
/// let ratio = HitRatioBuilder::new(
///     RetentionPolicy::reset_periodically(Duration::from_secs(1)).with_ticker(ticker.clone()),
/// )
/// .build();
///
/// ratio.increment_hit_count();
/// ratio.increment_miss_count();
/// assert_eq!(ratio.get_ratio(), 0.5);
///
/// ticker.advance(Duration::from_secs(1));
/// assert!(ratio.get_ratio().is_nan());
/// ```
#[derive(Debug, Clone)]
pub struct HitRatioBuilder {
    policy: RetentionPolicy,
}

impl HitRatioBuilder {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self { policy }
    }

    /// Builds the hit ratio.
    ///
    /// # Panics
    ///
    /// Panics if the policy is invalid. Use `try_build()` to handle errors.
    pub fn build(self) -> Box<dyn HitRatio> {
        match self.try_build() {
            Ok(ratio) => ratio,
            Err(e) => panic!("invalid hit ratio configuration: {}", e),
        }
    }

    /// # Errors
    ///
    /// See [`RetentionPolicy::validate`].
    pub fn try_build(self) -> Result<Box<dyn HitRatio>, ConfigError> {
        let policy = self.policy;
        policy.validate()?;

        let ticker = Arc::clone(policy.ticker());
        let ratio: Box<dyn HitRatio> = match policy.retention() {
            Retention::Uniform => Box::new(UniformHitRatio::new()),
            Retention::ResetOnSnapshot => Box::new(ResetOnSnapshotHitRatio::new()),
            Retention::ResetPeriodically { interval } => Box::new(
                ResetPeriodicallyHitRatio::new(duration_ms(interval), Arc::clone(&ticker)),
            ),
            Retention::ResetPeriodicallyByChunks { chunks, .. } => {
                Box::new(SmoothlyDecayingRollingHitRatio::new(
                    chunks,
                    rotation_interval_ms(&policy),
                    Arc::clone(&ticker),
                ))
            }
        };

        Ok(match policy.snapshot_caching_duration() {
            Some(duration) => Box::new(CachingHitRatio::new(ratio, duration, ticker)),
            None => ratio,
        })
    }
}

/// Builds a top-K [`Ranking`] for a retention policy.
///
/// | Retention | Ranking |
/// |-----------|---------|
/// | `Uniform` | [`ConcurrentRanking`] |
/// | `ResetOnSnapshot` | [`ResetOnSnapshotRanking`] |
/// | `ResetPeriodically` | [`ResetByChunksRanking`] without archive |
/// | `ResetPeriodicallyByChunks` | [`ResetByChunksRanking`] with one archive slot per chunk |
///
/// ```rust
/// use rollmetrics::{Position, RankingBuilder, RetentionPolicy};
///
/// let ranking = RankingBuilder::<&str>::new(RetentionPolicy::uniform(), 2)
///     .with_threshold(10)
///     .build();
///
/// ranking.update(5, "too light");
/// ranking.update(30, "a");
/// ranking.update(20, "b");
/// ranking.update(25, "c");
///
/// assert_eq!(
///     ranking.get_positions_descending(),
///     vec![Position::new(30, "a"), Position::new(25, "c")]
/// );
/// ```
#[derive(Debug, Clone)]
pub struct RankingBuilder<I> {
    policy: RetentionPolicy,
    settings: RankingSettings,
    _identity: std::marker::PhantomData<fn() -> I>,
}

impl<I: Identity> RankingBuilder<I> {
    /// A builder for rankings keeping the `capacity` heaviest positions.
    pub fn new(policy: RetentionPolicy, capacity: usize) -> Self {
        Self {
            policy,
            settings: RankingSettings::new(capacity),
            _identity: std::marker::PhantomData,
        }
    }

    /// Drops positions lighter than `threshold`. Defaults to 0.
    pub fn with_threshold(mut self, threshold: i64) -> Self {
        self.settings.threshold = threshold;
        self
    }

    /// Pre-allocated update slots per buffered actor.
    ///
    /// Updates beyond the pool are heap allocated and counted in
    /// [`ActorStats::overflow_allocations`].
    pub fn with_actor_pool_size(mut self, size: usize) -> Self {
        self.settings.actor_pool_size = size;
        self
    }

    /// Queued updates one thread applies before releasing the ranking lock.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.settings.actor_batch_size = size;
        self
    }

    /// Builds the ranking.
    ///
    /// # Panics
    ///
    /// Panics if the policy or sizing is invalid. Use `try_build()` to handle
    /// errors.
    pub fn build(self) -> Box<dyn Ranking<I>> {
        match self.try_build() {
            Ok(ranking) => ranking,
            Err(e) => panic!("invalid ranking configuration: {}", e),
        }
    }

    /// # Errors
    ///
    /// See [`RetentionPolicy::validate_for_ranking`] and
    /// [`RankingSettings::validate`].
    pub fn try_build(self) -> Result<Box<dyn Ranking<I>>, ConfigError> {
        let policy = self.policy;
        let settings = self.settings;
        policy.validate_for_ranking()?;
        settings.validate()?;

        let ticker = Arc::clone(policy.ticker());
        let executor = Arc::clone(policy.executor());
        let ranking: Box<dyn Ranking<I>> = match policy.retention() {
            Retention::Uniform => Box::new(ConcurrentRanking::new(settings)?),
            Retention::ResetOnSnapshot => Box::new(ResetOnSnapshotRanking::new(settings)?),
            Retention::ResetPeriodically { .. } => Box::new(ResetByChunksRanking::new(
                settings,
                rotation_interval_ms(&policy),
                0,
                Arc::clone(&ticker),
                executor,
            )?),
            Retention::ResetPeriodicallyByChunks { chunks, .. } => {
                Box::new(ResetByChunksRanking::new(
                    settings,
                    rotation_interval_ms(&policy),
                    chunks,
                    Arc::clone(&ticker),
                    executor,
                )?)
            }
        };

        Ok(match policy.snapshot_caching_duration() {
            Some(duration) => Box::new(CachingRanking::new(ranking, duration, ticker)),
            None => ranking,
        })
    }
}

// Only called for validated periodic policies.
fn rotation_interval_ms(policy: &RetentionPolicy) -> u64 {
    policy.interval_between_rotations_ms().unwrap_or(MIN_CHUNK_INTERVAL_MS)
}
