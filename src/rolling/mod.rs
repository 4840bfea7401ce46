//! # Rolling aggregation engine
//!
//! Internal implementation of the counters, hit ratios and rankings.
//!
//! ## Module Structure
//!
//! ```text
//!     rolling/
//!     ├── mod.rs                 (Module organization)
//!     ├── config.rs              (RetentionPolicy and limits)
//!     ├── error.rs               (ConfigError, UsageError)
//!     ├── ticker.rs              (Time sources)
//!     ├── executor.rs            (Background task execution)
//!     ├── chunks.rs              (Phase rotation shared by rolling aggregates)
//!     ├── counter.rs             (WindowCounter variants)
//!     ├── hit_ratio.rs           (HitRatio variants)
//!     ├── actor.rs               (BufferedActor)
//!     ├── ranking.rs             (SingleThreadedRanking, Ranking trait)
//!     ├── concurrent_ranking.rs  (ConcurrentRanking)
//!     ├── phaser.rs              (WriterReaderPhaser)
//!     ├── recorder.rs            (RankingRecorder, ResetOnSnapshotRanking)
//!     ├── by_chunks.rs           (ResetByChunksRanking)
//!     ├── caching.rs             (CachingSupplier and caching decorators)
//!     ├── histogram.rs           (Histogram boundary, HdrReservoir)
//!     ├── metrics.rs             (ActorStats, HealthStatus)
//!     └── utils.rs               (Cache alignment, spinning)
//! ```
//!
//! ## Layering
//!
//! ```text
//!     counter / hit_ratio ──► chunks ──► ticker
//!
//!     by_chunks ──► recorder ──► phaser
//!         │             │
//!         │             ▼
//!         │     concurrent_ranking ──► actor ──► metrics
//!         │             │
//!         ▼             ▼
//!      executor      ranking
//! ```

mod actor;
mod by_chunks;
mod caching;
mod chunks;
mod concurrent_ranking;
mod config;
mod counter;
mod error;
mod executor;
mod histogram;
mod hit_ratio;
mod metrics;
mod phaser;
mod ranking;
mod recorder;
mod ticker;
mod utils;

/// Retention configuration and engine limits
pub use config::{
    Retention, RetentionPolicy, DEFAULT_ACTOR_BATCH_SIZE, DEFAULT_ACTOR_POOL_SIZE, MAX_CHUNKS,
    MAX_RANKING_CAPACITY, MAX_RETENTION_WINDOW_MS, MIN_CHUNKS, MIN_CHUNK_INTERVAL_MS,
};

pub(crate) use config::duration_ms;

/// Error types
pub use error::{ConfigError, UsageError};

/// Time sources
pub use ticker::{MockTicker, SystemTicker, Ticker};

/// Background execution of phase retirement
pub use executor::{BackgroundExecutor, InlineExecutor, Task, ThreadExecutor};

/// Rolling counters
pub use counter::{
    ResetOnSnapshotCounter, ResetPeriodicallyCounter, SmoothlyDecayingRollingCounter,
    UniformCounter, WindowCounter,
};

/// Hit ratios
pub use hit_ratio::{
    HitRatio, ResetOnSnapshotHitRatio, ResetPeriodicallyHitRatio, SmoothlyDecayingRollingHitRatio,
    UniformHitRatio,
};

/// Lock-minimal state ownership
pub use actor::{Action, BufferedActor, PooledAction};

/// Rankings
pub use by_chunks::ResetByChunksRanking;
pub use concurrent_ranking::{ConcurrentRanking, RankingSettings};
pub use phaser::{ReaderGuard, WriterCriticalSection, WriterReaderPhaser};
pub use ranking::{Identity, Position, Ranking, SingleThreadedRanking, UpdateResult};
pub use recorder::{IntervalRanking, RankingRecorder, ResetOnSnapshotRanking};

/// Snapshot caching
pub use caching::{CachingCounter, CachingHitRatio, CachingRanking, CachingSupplier};

/// Histogram boundary
pub use histogram::{HdrReservoir, Histogram, HistogramSnapshot};

/// Engine health
pub use metrics::{ActorStats, HealthStatus};

/// CPU helpers
pub use utils::{cpu_relax, CACHE_LINE_SIZE};
