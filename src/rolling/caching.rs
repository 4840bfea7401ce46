//! # Snapshot caching
//!
//! Reading a rolling aggregate walks every chunk; reading a ranking merges
//! archives under a lock. When many readers poll the same aggregate, a
//! [`CachingSupplier`] serves a memoized value for a fixed duration of
//! ticker time instead.
//!
//! ```text
//!     t:      0 ──────── 999 ─ 1000 ────────►
//!     read:   compute    cached  compute
//! ```
//!
//! The caching decorators pass writes straight through.

use super::{
    config::duration_ms,
    counter::WindowCounter,
    hit_ratio::HitRatio,
    metrics::ActorStats,
    ranking::{Position, Ranking},
    ticker::Ticker,
};
use crate::rolling::error::UsageError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Memoizes a value for `duration` of ticker time.
///
/// ```rust
/// use rollmetrics::{CachingSupplier, MockTicker};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let ticker = MockTicker::new(0);
/// let cache = CachingSupplier::new(Duration::from_millis(100), Arc::new(ticker.clone()));
///
/// assert_eq!(cache.get_or_compute(|| 1), 1);
/// assert_eq!(cache.get_or_compute(|| 2), 1);
///
/// ticker.set(100);
/// assert_eq!(cache.get_or_compute(|| 3), 3);
/// ```
pub struct CachingSupplier<T> {
    // (value, computed at)
    cached: Mutex<Option<(T, u64)>>,
    duration_ms: u64,
    ticker: Arc<dyn Ticker>,
}

impl<T: Clone> CachingSupplier<T> {
    pub fn new(duration: Duration, ticker: Arc<dyn Ticker>) -> Self {
        Self {
            cached: Mutex::new(None),
            duration_ms: duration_ms(duration),
            ticker,
        }
    }

    /// Returns the cached value, or runs `compute` if it is missing or
    /// stale. Concurrent callers wait for one computation.
    pub fn get_or_compute<F>(&self, compute: F) -> T
    where
        F: FnOnce() -> T,
    {
        let now_ms = self.ticker.now_millis();
        let mut cached = self.cached.lock();

        if let Some((value, computed_at)) = cached.as_ref() {
            if now_ms < computed_at.saturating_add(self.duration_ms) {
                return value.clone();
            }
        }

        let value = compute();
        *cached = Some((value.clone(), now_ms));
        value
    }

    /// Drops the cached value.
    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }
}

impl<T> fmt::Debug for CachingSupplier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingSupplier")
            .field("duration_ms", &self.duration_ms)
            .field("cached", &self.cached.lock().is_some())
            .finish()
    }
}

/// Counter whose sum is cached.
#[derive(Debug)]
pub struct CachingCounter<C> {
    counter: C,
    cache: CachingSupplier<i64>,
}

impl<C: WindowCounter> CachingCounter<C> {
    pub fn new(counter: C, duration: Duration, ticker: Arc<dyn Ticker>) -> Self {
        Self {
            counter,
            cache: CachingSupplier::new(duration, ticker),
        }
    }
}

impl<C: WindowCounter> WindowCounter for CachingCounter<C> {
    #[inline]
    fn add(&self, delta: i64) {
        self.counter.add(delta);
    }

    fn get_sum(&self) -> i64 {
        self.cache.get_or_compute(|| self.counter.get_sum())
    }
}

/// Hit ratio whose ratio is cached.
#[derive(Debug)]
pub struct CachingHitRatio<H> {
    ratio: H,
    cache: CachingSupplier<f64>,
}

impl<H: HitRatio> CachingHitRatio<H> {
    pub fn new(ratio: H, duration: Duration, ticker: Arc<dyn Ticker>) -> Self {
        Self {
            ratio,
            cache: CachingSupplier::new(duration, ticker),
        }
    }
}

impl<H: HitRatio> HitRatio for CachingHitRatio<H> {
    #[inline]
    fn update(&self, hits: u32, total: u32) -> Result<(), UsageError> {
        self.ratio.update(hits, total)
    }

    fn get_ratio(&self) -> f64 {
        self.cache.get_or_compute(|| self.ratio.get_ratio())
    }
}

/// Ranking whose positions are cached.
pub struct CachingRanking<I, R> {
    ranking: R,
    cache: CachingSupplier<Vec<Position<I>>>,
}

impl<I: Clone, R: Ranking<I>> CachingRanking<I, R> {
    pub fn new(ranking: R, duration: Duration, ticker: Arc<dyn Ticker>) -> Self {
        Self {
            ranking,
            cache: CachingSupplier::new(duration, ticker),
        }
    }
}

impl<I, R> Ranking<I> for CachingRanking<I, R>
where
    I: Clone + Send + 'static,
    R: Ranking<I>,
{
    #[inline]
    fn update(&self, weight: i64, identity: I) {
        self.ranking.update(weight, identity);
    }

    fn get_positions_descending(&self) -> Vec<Position<I>> {
        self.cache
            .get_or_compute(|| self.ranking.get_positions_descending())
    }

    fn capacity(&self) -> usize {
        self.ranking.capacity()
    }

    fn actor_stats(&self) -> ActorStats {
        self.ranking.actor_stats()
    }
}

impl<I, R: fmt::Debug> fmt::Debug for CachingRanking<I, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingRanking")
            .field("ranking", &self.ranking)
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rolling::concurrent_ranking::{ConcurrentRanking, RankingSettings};
    use crate::rolling::counter::{ResetOnSnapshotCounter, UniformCounter};
    use crate::rolling::hit_ratio::UniformHitRatio;
    use crate::rolling::ticker::MockTicker;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_supplier_memoizes_for_duration() {
        let ticker = MockTicker::new(0);
        let cache = CachingSupplier::new(Duration::from_millis(1000), Arc::new(ticker.clone()));
        let calls = AtomicUsize::new(0);
        let compute = || calls.fetch_add(1, Ordering::SeqCst) + 1;

        assert_eq!(cache.get_or_compute(compute), 1);
        ticker.set(999);
        assert_eq!(cache.get_or_compute(compute), 1);
        ticker.set(1000);
        assert_eq!(cache.get_or_compute(compute), 2);

        cache.invalidate();
        assert_eq!(cache.get_or_compute(compute), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_caching_counter() {
        let ticker = MockTicker::new(0);
        let counter = CachingCounter::new(
            UniformCounter::new(),
            Duration::from_millis(500),
            Arc::new(ticker.clone()),
        );

        counter.add(2);
        assert_eq!(counter.get_sum(), 2);
        counter.add(3);
        assert_eq!(counter.get_sum(), 2);

        ticker.set(500);
        assert_eq!(counter.get_sum(), 5);
    }

    #[test]
    fn test_caching_reset_on_snapshot_counter_resets_per_refresh() {
        let ticker = MockTicker::new(0);
        let counter = CachingCounter::new(
            ResetOnSnapshotCounter::new(),
            Duration::from_millis(100),
            Arc::new(ticker.clone()),
        );

        counter.add(4);
        assert_eq!(counter.get_sum(), 4);
        assert_eq!(counter.get_sum(), 4);

        ticker.set(100);
        assert_eq!(counter.get_sum(), 0);
    }

    #[test]
    fn test_caching_hit_ratio() {
        let ticker = MockTicker::new(0);
        let ratio = CachingHitRatio::new(
            UniformHitRatio::new(),
            Duration::from_millis(100),
            Arc::new(ticker.clone()),
        );

        assert!(ratio.get_ratio().is_nan());
        ratio.increment_hit_count();
        assert!(ratio.get_ratio().is_nan());

        ticker.set(100);
        assert_eq!(ratio.get_ratio(), 1.0);
        assert!(ratio.update(2, 1).is_err());
    }

    #[test]
    fn test_caching_ranking() {
        let ticker = MockTicker::new(0);
        let ranking = CachingRanking::new(
            ConcurrentRanking::new(RankingSettings::new(3)).unwrap(),
            Duration::from_millis(100),
            Arc::new(ticker.clone()),
        );

        ranking.update(1, "a");
        assert_eq!(ranking.get_positions_descending().len(), 1);
        ranking.update(2, "b");
        assert_eq!(ranking.get_positions_descending().len(), 1);

        ticker.set(100);
        assert_eq!(
            ranking.get_positions_descending(),
            vec![Position::new(2, "b"), Position::new(1, "a")]
        );
        assert_eq!(ranking.capacity(), 3);
    }
}
