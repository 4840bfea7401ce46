//! # Hit ratios
//!
//! Hits and total attempts share one `u64` so a single atomic operation
//! updates both:
//!
//! ```text
//!     63                    32 31                     0
//!     ┌───────────────────────┬───────────────────────┐
//!     │         hits          │         total         │
//!     └───────────────────────┴───────────────────────┘
//! ```
//!
//! When `total` would overflow `u32`, both halves are halved until the new
//! values fit. The ratio survives, only its precision suffers.

use super::{
    chunks::{PeriodicReset, PhaseAccumulator, RollingChunks},
    error::UsageError,
    ticker::Ticker,
    utils::{cpu_relax, CacheAligned},
};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Share of successful attempts over a retention window.
///
/// # Example
///
/// ```rust
/// use rollmetrics::{HitRatioBuilder, RetentionPolicy};
///
/// let ratio = HitRatioBuilder::new(RetentionPolicy::uniform()).build();
/// ratio.increment_hit_count();
/// ratio.increment_miss_count();
/// assert_eq!(ratio.get_ratio(), 0.5);
/// assert!(ratio.update(3, 2).is_err());
/// ```
pub trait HitRatio: Send + Sync + fmt::Debug {
    /// Records `hits` successes out of `total` attempts.
    ///
    /// # Errors
    ///
    /// [`UsageError::HitsExceedTotal`] if `hits > total`. Nothing is recorded.
    fn update(&self, hits: u32, total: u32) -> Result<(), UsageError>;

    /// `hits / total` over what the retention policy remembers, `NaN` when
    /// the retained total is zero.
    fn get_ratio(&self) -> f64;

    /// Records one successful attempt.
    #[inline]
    fn increment_hit_count(&self) {
        let _ = self.update(1, 1);
    }

    /// Records one failed attempt.
    #[inline]
    fn increment_miss_count(&self) {
        let _ = self.update(0, 1);
    }
}

impl<H: HitRatio + ?Sized> HitRatio for Box<H> {
    #[inline]
    fn update(&self, hits: u32, total: u32) -> Result<(), UsageError> {
        (**self).update(hits, total)
    }

    #[inline]
    fn get_ratio(&self) -> f64 {
        (**self).get_ratio()
    }
}

impl<H: HitRatio + ?Sized> HitRatio for Arc<H> {
    #[inline]
    fn update(&self, hits: u32, total: u32) -> Result<(), UsageError> {
        (**self).update(hits, total)
    }

    #[inline]
    fn get_ratio(&self) -> f64 {
        (**self).get_ratio()
    }
}

#[inline(always)]
pub(crate) const fn pack(hits: u32, total: u32) -> u64 {
    ((hits as u64) << 32) | total as u64
}

#[inline(always)]
pub(crate) const fn unpack(packed: u64) -> (u32, u32) {
    ((packed >> 32) as u32, packed as u32)
}

#[inline]
fn check(hits: u32, total: u32) -> Result<(), UsageError> {
    if hits > total {
        return Err(UsageError::HitsExceedTotal { hits, total });
    }
    Ok(())
}

#[inline]
fn ratio(hits: f64, total: f64) -> f64 {
    if total == 0.0 {
        f64::NAN
    } else {
        hits / total
    }
}

/// Packed pair behind every hit ratio variant.
#[derive(Debug, Default)]
pub(crate) struct PackedCounts(AtomicU64);

impl PackedCounts {
    /// Adds a validated `(hits, total)` pair, halving on overflow.
    #[inline]
    fn add(&self, hits: u32, total: u32) {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let (mut cur_hits, mut cur_total) = unpack(current);
            while cur_total.checked_add(total).is_none() {
                cur_hits /= 2;
                cur_total /= 2;
            }
            // hits <= total and cur_hits <= cur_total, so hits cannot overflow
            let next = pack(cur_hits + hits, cur_total + total);

            match self.0.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => {
                    current = actual;
                    cpu_relax();
                }
            }
        }
    }

    #[inline]
    fn load(&self) -> (u32, u32) {
        unpack(self.0.load(Ordering::Acquire))
    }

    #[inline]
    fn take(&self) -> (u32, u32) {
        unpack(self.0.swap(0, Ordering::AcqRel))
    }

    #[inline]
    fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }
}

impl PhaseAccumulator for PackedCounts {
    type Delta = (u32, u32);
    type Value = (u32, u32);

    #[inline]
    fn add(&self, (hits, total): (u32, u32)) {
        PackedCounts::add(self, hits, total);
    }

    #[inline]
    fn value(&self) -> (u32, u32) {
        self.load()
    }

    #[inline]
    fn reset(&self) {
        self.clear();
    }
}

/// Hit ratio over everything ever recorded.
#[derive(Debug, Default)]
pub struct UniformHitRatio {
    counts: CacheAligned<PackedCounts>,
}

impl UniformHitRatio {
    /// Creates an empty ratio.
    pub fn new() -> Self {
        Self::default()
    }
}

impl HitRatio for UniformHitRatio {
    #[inline]
    fn update(&self, hits: u32, total: u32) -> Result<(), UsageError> {
        check(hits, total)?;
        self.counts.add(hits, total);
        Ok(())
    }

    fn get_ratio(&self) -> f64 {
        let (hits, total) = self.counts.load();
        ratio(hits as f64, total as f64)
    }
}

/// Hit ratio over what was recorded since the previous read.
#[derive(Debug, Default)]
pub struct ResetOnSnapshotHitRatio {
    counts: CacheAligned<PackedCounts>,
}

impl ResetOnSnapshotHitRatio {
    /// Creates an empty ratio.
    pub fn new() -> Self {
        Self::default()
    }
}

impl HitRatio for ResetOnSnapshotHitRatio {
    #[inline]
    fn update(&self, hits: u32, total: u32) -> Result<(), UsageError> {
        check(hits, total)?;
        self.counts.add(hits, total);
        Ok(())
    }

    fn get_ratio(&self) -> f64 {
        let (hits, total) = self.counts.take();
        ratio(hits as f64, total as f64)
    }
}

/// Hit ratio zeroed once per fixed interval.
///
/// Reads right after a reset return `NaN` until something is recorded.
pub struct ResetPeriodicallyHitRatio {
    counts: CacheAligned<PackedCounts>,
    reset: PeriodicReset,
    ticker: Arc<dyn Ticker>,
}

impl ResetPeriodicallyHitRatio {
    /// Creates a ratio reset every `interval_ms` starting now.
    pub fn new(interval_ms: u64, ticker: Arc<dyn Ticker>) -> Self {
        Self {
            counts: CacheAligned::new(PackedCounts::default()),
            reset: PeriodicReset::new(interval_ms, ticker.now_millis()),
            ticker,
        }
    }

    #[inline]
    fn reset_if_needed(&self) {
        self.reset
            .reset_if_due(self.ticker.now_millis(), || self.counts.clear());
    }
}

impl HitRatio for ResetPeriodicallyHitRatio {
    #[inline]
    fn update(&self, hits: u32, total: u32) -> Result<(), UsageError> {
        check(hits, total)?;
        self.reset_if_needed();
        self.counts.add(hits, total);
        Ok(())
    }

    fn get_ratio(&self) -> f64 {
        self.reset_if_needed();
        let (hits, total) = self.counts.load();
        ratio(hits as f64, total as f64)
    }
}

impl fmt::Debug for ResetPeriodicallyHitRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (hits, total) = self.counts.load();
        f.debug_struct("ResetPeriodicallyHitRatio")
            .field("interval_ms", &self.reset.interval_ms())
            .field("hits", &hits)
            .field("total", &total)
            .finish()
    }
}

/// Rolling-window hit ratio. Hits and totals of the oldest chunk fade out
/// together, so a decaying chunk keeps its own ratio while losing influence.
pub struct SmoothlyDecayingRollingHitRatio {
    chunks: RollingChunks<PackedCounts>,
    interval_ms: u64,
    ticker: Arc<dyn Ticker>,
}

impl SmoothlyDecayingRollingHitRatio {
    /// Creates a ratio over `chunk_count` chunks of `interval_ms` each.
    pub fn new(chunk_count: usize, interval_ms: u64, ticker: Arc<dyn Ticker>) -> Self {
        let creation_ms = ticker.now_millis();
        Self {
            chunks: RollingChunks::new(chunk_count, interval_ms, creation_ms),
            interval_ms,
            ticker,
        }
    }
}

impl HitRatio for SmoothlyDecayingRollingHitRatio {
    #[inline]
    fn update(&self, hits: u32, total: u32) -> Result<(), UsageError> {
        check(hits, total)?;
        self.chunks.add((hits, total), self.ticker.now_millis());
        Ok(())
    }

    fn get_ratio(&self) -> f64 {
        let mut hits_sum = 0.0;
        let mut total_sum = 0.0;
        self.chunks
            .for_each_live(self.ticker.now_millis(), |(hits, total), weight| {
                let coefficient = weight.coefficient();
                hits_sum += hits as f64 * coefficient;
                total_sum += total as f64 * coefficient;
            });
        ratio(hits_sum, total_sum)
    }
}

impl fmt::Debug for SmoothlyDecayingRollingHitRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmoothlyDecayingRollingHitRatio")
            .field("interval_ms", &self.interval_ms)
            .field("ratio", &self.get_ratio())
            .finish()
    }
}
