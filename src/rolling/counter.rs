//! # Window counters
//!
//! A [`WindowCounter`] sums `i64` deltas under one of four retention
//! strategies:
//!
//! | Type | Remembers | Write cost |
//! |------|-----------|------------|
//! | [`UniformCounter`] | everything | one `fetch_add` |
//! | [`ResetOnSnapshotCounter`] | since the last read | one `fetch_add` |
//! | [`ResetPeriodicallyCounter`] | since the last reset | load + `fetch_add`, one CAS per period |
//! | [`SmoothlyDecayingRollingCounter`] | rolling window | load + `fetch_add`, one CAS per chunk rotation |

use super::{
    chunks::{PeriodicReset, PhaseAccumulator, RollingChunks},
    ticker::Ticker,
    utils::CacheAligned,
};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Sum of deltas over a retention window.
///
/// # Example
///
/// ```rust
/// use rollmetrics::{CounterBuilder, RetentionPolicy};
///
/// let counter = CounterBuilder::new(RetentionPolicy::reset_on_snapshot()).build();
/// counter.add(3);
/// counter.add(4);
/// assert_eq!(counter.get_sum(), 7);
/// assert_eq!(counter.get_sum(), 0);
/// ```
pub trait WindowCounter: Send + Sync + fmt::Debug {
    /// Adds `delta` to the current window.
    fn add(&self, delta: i64);

    /// Sum of everything the retention policy still remembers.
    fn get_sum(&self) -> i64;
}

impl<C: WindowCounter + ?Sized> WindowCounter for Box<C> {
    #[inline]
    fn add(&self, delta: i64) {
        (**self).add(delta)
    }

    #[inline]
    fn get_sum(&self) -> i64 {
        (**self).get_sum()
    }
}

impl<C: WindowCounter + ?Sized> WindowCounter for Arc<C> {
    #[inline]
    fn add(&self, delta: i64) {
        (**self).add(delta)
    }

    #[inline]
    fn get_sum(&self) -> i64 {
        (**self).get_sum()
    }
}

/// Counter that never forgets.
#[derive(Debug, Default)]
pub struct UniformCounter {
    sum: CacheAligned<AtomicI64>,
}

impl UniformCounter {
    /// Creates a zeroed counter.
    pub fn new() -> Self {
        Self::default()
    }
}

impl WindowCounter for UniformCounter {
    #[inline(always)]
    fn add(&self, delta: i64) {
        self.sum.fetch_add(delta, Ordering::Relaxed);
    }

    #[inline]
    fn get_sum(&self) -> i64 {
        self.sum.load(Ordering::Acquire)
    }
}

/// Counter that hands out its sum and starts over on every read.
#[derive(Debug, Default)]
pub struct ResetOnSnapshotCounter {
    sum: CacheAligned<AtomicI64>,
}

impl ResetOnSnapshotCounter {
    /// Creates a zeroed counter.
    pub fn new() -> Self {
        Self::default()
    }
}

impl WindowCounter for ResetOnSnapshotCounter {
    #[inline(always)]
    fn add(&self, delta: i64) {
        self.sum.fetch_add(delta, Ordering::Relaxed);
    }

    #[inline]
    fn get_sum(&self) -> i64 {
        self.sum.swap(0, Ordering::AcqRel)
    }
}

/// Counter zeroed once per fixed interval.
///
/// Consistency around the reset instant is weak: a thread racing the one
/// that performs the reset may add to or read the previous period's value.
pub struct ResetPeriodicallyCounter {
    sum: CacheAligned<AtomicI64>,
    reset: PeriodicReset,
    ticker: Arc<dyn Ticker>,
}

impl ResetPeriodicallyCounter {
    /// Creates a counter reset every `interval_ms` starting now.
    pub fn new(interval_ms: u64, ticker: Arc<dyn Ticker>) -> Self {
        Self {
            sum: CacheAligned::new(AtomicI64::new(0)),
            reset: PeriodicReset::new(interval_ms, ticker.now_millis()),
            ticker,
        }
    }

    #[inline]
    fn reset_if_needed(&self) {
        self.reset.reset_if_due(self.ticker.now_millis(), || {
            self.sum.store(0, Ordering::Release);
        });
    }
}

impl WindowCounter for ResetPeriodicallyCounter {
    #[inline]
    fn add(&self, delta: i64) {
        self.reset_if_needed();
        self.sum.fetch_add(delta, Ordering::Relaxed);
    }

    #[inline]
    fn get_sum(&self) -> i64 {
        self.reset_if_needed();
        self.sum.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ResetPeriodicallyCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResetPeriodicallyCounter")
            .field("interval_ms", &self.reset.interval_ms())
            .field("sum", &self.sum.load(Ordering::Relaxed))
            .finish()
    }
}

#[derive(Default)]
pub(crate) struct SumPhase(AtomicI64);

impl PhaseAccumulator for SumPhase {
    type Delta = i64;
    type Value = i64;

    #[inline(always)]
    fn add(&self, delta: i64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    #[inline]
    fn value(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }
}

/// Rolling-window counter whose oldest chunk fades out linearly.
///
/// ```text
///     window = 2 chunks × 1000ms, add(100) at t=0
///
///     t:      0 ─────── 2000 ──── 2600 ── 2980 ─ 3000
///     sum:    100       100       40      2      0
/// ```
pub struct SmoothlyDecayingRollingCounter {
    chunks: RollingChunks<SumPhase>,
    interval_ms: u64,
    ticker: Arc<dyn Ticker>,
}

impl SmoothlyDecayingRollingCounter {
    /// Creates a counter over `chunk_count` chunks of `interval_ms` each.
    pub fn new(chunk_count: usize, interval_ms: u64, ticker: Arc<dyn Ticker>) -> Self {
        let creation_ms = ticker.now_millis();
        Self {
            chunks: RollingChunks::new(chunk_count, interval_ms, creation_ms),
            interval_ms,
            ticker,
        }
    }
}

impl WindowCounter for SmoothlyDecayingRollingCounter {
    #[inline]
    fn add(&self, delta: i64) {
        self.chunks.add(delta, self.ticker.now_millis());
    }

    fn get_sum(&self) -> i64 {
        let mut sum = 0i64;
        self.chunks
            .for_each_live(self.ticker.now_millis(), |value, weight| {
                sum = sum.saturating_add(weight.scale(value));
            });
        sum
    }
}

impl fmt::Debug for SmoothlyDecayingRollingCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmoothlyDecayingRollingCounter")
            .field("interval_ms", &self.interval_ms)
            .field("sum", &self.get_sum())
            .finish()
    }
}
