//! # Rolling ranking
//!
//! Two-phase rotation over [`RankingRecorder`]s, plus a ring of archived
//! rankings that keeps retired phases visible for the rest of the window.
//!
//! ```text
//!     window = 2 chunks × 3000ms
//!
//!     t:        0 ─────────── 3000 ─────────── 6000 ─────────── 9000
//!     phase:    [ interval 0 ] [ interval 1  ] [ interval 2   ]
//!     archive:                 [ interval 0  ]
//!                                              [ interval 1   ]
//!
//!     a position recorded at t=1000 is read from the live phase until 3000,
//!     from archive slot 0 until 6000, and is gone afterwards
//! ```
//!
//! ## Retirement
//!
//! The writer that wins the rotation CAS hands the retired phase to the
//! background executor, which, under the snapshot lock:
//!
//! 1. drains the phase's recorder into the phase totals,
//! 2. swaps the totals into archive slot `interval mod archive_len`, stamped
//!    to expire `archive_len - 1` intervals after the phase did,
//! 3. clears the totals and marks the phase dormant.
//!
//! A reader, or a writer about to reuse a phase, retires it inline if the
//! executor has not got to it yet. With no archive (periodic reset) step 2
//! is skipped and retired positions are simply forgotten.

use super::{
    chunks::{boundary_ms, DORMANT},
    concurrent_ranking::RankingSettings,
    error::ConfigError,
    executor::BackgroundExecutor,
    metrics::ActorStats,
    ranking::{Identity, Position, Ranking, SingleThreadedRanking},
    recorder::{IntervalRanking, RankingRecorder},
    ticker::Ticker,
    utils::CacheAligned,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A retired phase kept for the rest of the window.
struct ArchivedRanking<I> {
    ranking: SingleThreadedRanking<I>,
    // 0 while the slot has never been filled
    expiry_ms: u64,
}

struct RankingPhase<I: Identity> {
    recorder: RankingRecorder<I>,
    invalidation_ms: AtomicU64,
    interval: AtomicU64,
}

struct SnapshotState<I> {
    totals: [SingleThreadedRanking<I>; 2],
    archive: Box<[ArchivedRanking<I>]>,
    collector: SingleThreadedRanking<I>,
    // Last interval taken from a phase recorder, reused by the next one
    spare: Option<IntervalRanking<I>>,
}

struct Inner<I: Identity> {
    phases: [RankingPhase<I>; 2],
    current: CacheAligned<AtomicUsize>,
    snapshot: Mutex<SnapshotState<I>>,
    creation_ms: u64,
    interval_ms: u64,
    capacity: usize,
    ticker: Arc<dyn Ticker>,
    executor: Arc<dyn BackgroundExecutor>,
}

/// Top-K ranking over a rolling window split into rotating chunks.
pub struct ResetByChunksRanking<I: Identity> {
    inner: Arc<Inner<I>>,
}

impl<I: Identity> ResetByChunksRanking<I> {
    /// Creates a ranking whose phases rotate every `interval_ms` and whose
    /// retired phases stay visible in `archive_len` archive slots.
    ///
    /// `archive_len` is the chunk count for a rolling window and zero for a
    /// periodically reset ranking.
    ///
    /// # Errors
    ///
    /// See [`RankingSettings::validate`]; [`ConfigError::ZeroInterval`] for
    /// `interval_ms == 0`.
    pub fn new(
        settings: RankingSettings,
        interval_ms: u64,
        archive_len: usize,
        ticker: Arc<dyn Ticker>,
        executor: Arc<dyn BackgroundExecutor>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        if interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }

        let creation_ms = ticker.now_millis();
        let blank = || SingleThreadedRanking::new(settings.capacity, settings.threshold);

        let phases = [
            RankingPhase {
                recorder: RankingRecorder::new(settings)?,
                invalidation_ms: AtomicU64::new(boundary_ms(creation_ms, 1, interval_ms)),
                interval: AtomicU64::new(0),
            },
            RankingPhase {
                recorder: RankingRecorder::new(settings)?,
                invalidation_ms: AtomicU64::new(DORMANT),
                interval: AtomicU64::new(0),
            },
        ];

        let archive = (0..archive_len)
            .map(|_| ArchivedRanking {
                ranking: blank(),
                expiry_ms: 0,
            })
            .collect();

        Ok(Self {
            inner: Arc::new(Inner {
                phases,
                current: CacheAligned::new(AtomicUsize::new(0)),
                snapshot: Mutex::new(SnapshotState {
                    totals: [blank(), blank()],
                    archive,
                    collector: blank(),
                    spare: None,
                }),
                creation_ms,
                interval_ms,
                capacity: settings.capacity,
                ticker,
                executor,
            }),
        })
    }
}

impl<I: Identity> Inner<I> {
    #[inline]
    fn interval_of(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.creation_ms) / self.interval_ms
    }

    #[inline]
    fn invalidation_of(&self, interval: u64) -> u64 {
        boundary_ms(self.creation_ms, interval + 1, self.interval_ms)
    }

    fn update(self: &Arc<Self>, weight: i64, identity: I, now_ms: u64) {
        loop {
            let current = self.current.load(Ordering::Acquire);
            let phase = &self.phases[current];
            let invalidation = phase.invalidation_ms.load(Ordering::Acquire);

            if now_ms < invalidation {
                if invalidation == DORMANT && self.current.load(Ordering::Acquire) != current {
                    continue;
                }
                phase.recorder.update(weight, identity);
                return;
            }

            let next_index = current ^ 1;
            let next = &self.phases[next_index];
            if next.invalidation_ms.load(Ordering::Acquire) != DORMANT {
                // Still holds the phase before the expired one
                self.retire(next_index);
            }
            next.recorder.update(weight, identity);

            if self
                .current
                .compare_exchange(current, next_index, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.activate(next_index, now_ms);

                let inner = Arc::clone(self);
                self.executor
                    .execute(Box::new(move || inner.retire(current)));
            }
            return;
        }
    }

    /// Schedules a freshly published phase.
    fn activate(&self, index: usize, now_ms: u64) {
        let interval = self.interval_of(now_ms);
        let phase = &self.phases[index];
        phase.interval.store(interval, Ordering::Release);
        phase
            .invalidation_ms
            .store(self.invalidation_of(interval), Ordering::Release);

        debug!(
            "Rotated ranking phase at {}ms, interval {}, next invalidation {}ms",
            now_ms,
            interval,
            self.invalidation_of(interval)
        );
    }

    fn retire(&self, index: usize) {
        let mut state = self.snapshot.lock();
        self.retire_locked(&mut state, index);
    }

    fn retire_locked(&self, state: &mut SnapshotState<I>, index: usize) {
        let phase = &self.phases[index];
        let invalidation = phase.invalidation_ms.load(Ordering::Acquire);
        if invalidation == DORMANT || self.current.load(Ordering::Acquire) == index {
            return;
        }

        let SnapshotState {
            totals,
            archive,
            spare,
            ..
        } = state;
        let totals = &mut totals[index];
        let interval_ranking = phase.recorder.get_interval_recorder(spare.take());
        interval_ranking.add_into(totals);
        *spare = Some(interval_ranking);

        let interval = phase.interval.load(Ordering::Acquire);
        if archive.is_empty() {
            totals.reset();
        } else {
            let archive_len = archive.len();
            let slot = &mut archive[(interval % archive_len as u64) as usize];
            std::mem::swap(&mut slot.ranking, totals);
            slot.expiry_ms = boundary_ms(invalidation, archive_len as u64 - 1, self.interval_ms);
            totals.reset();

            debug!(
                "Archived ranking interval {} with {} positions until {}ms",
                interval,
                slot.ranking.len(),
                slot.expiry_ms
            );
        }

        phase.invalidation_ms.store(DORMANT, Ordering::Release);
    }

    fn get_positions_descending(&self, now_ms: u64) -> Vec<Position<I>> {
        let mut guard = self.snapshot.lock();
        let state = &mut *guard;

        // Readers rotate an expired phase themselves rather than wait for a
        // writer to do it
        let current = self.current.load(Ordering::Acquire);
        let invalidation = self.phases[current].invalidation_ms.load(Ordering::Acquire);
        if invalidation != DORMANT && now_ms >= invalidation {
            let next_index = current ^ 1;
            self.retire_locked(state, next_index);
            if self
                .current
                .compare_exchange(current, next_index, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.activate(next_index, now_ms);
            }
        }
        for index in 0..2 {
            self.retire_locked(state, index);
        }

        let SnapshotState {
            totals,
            archive,
            collector,
            spare,
        } = state;
        collector.reset();

        let current = self.current.load(Ordering::Acquire);
        let live_interval = self.phases[current].interval.load(Ordering::Acquire);

        // Oldest archived interval first
        let archive_len = archive.len() as u64;
        for step in 1..=archive_len {
            let slot = &archive[((live_interval + step) % archive_len) as usize];
            if slot.expiry_ms > now_ms {
                slot.ranking.add_into(collector);
            }
        }

        let phase = &self.phases[current];
        if now_ms < phase.invalidation_ms.load(Ordering::Acquire) {
            let interval_ranking = phase.recorder.get_interval_recorder(spare.take());
            interval_ranking.add_into(&mut totals[current]);
            *spare = Some(interval_ranking);
            totals[current].add_into(collector);
        }

        collector.get_positions_descending()
    }

    fn actor_stats(&self) -> ActorStats {
        self.phases[0]
            .recorder
            .actor_stats()
            .merge(&self.phases[1].recorder.actor_stats())
    }
}

impl<I: Identity> Ranking<I> for ResetByChunksRanking<I> {
    #[inline]
    fn update(&self, weight: i64, identity: I) {
        self.inner
            .update(weight, identity, self.inner.ticker.now_millis());
    }

    fn get_positions_descending(&self) -> Vec<Position<I>> {
        self.inner
            .get_positions_descending(self.inner.ticker.now_millis())
    }

    fn capacity(&self) -> usize {
        self.inner.capacity
    }

    fn actor_stats(&self) -> ActorStats {
        self.inner.actor_stats()
    }
}

impl<I: Identity> fmt::Debug for ResetByChunksRanking<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResetByChunksRanking")
            .field("capacity", &self.inner.capacity)
            .field("interval_ms", &self.inner.interval_ms)
            .field("archive_len", &self.inner.snapshot.lock().archive.len())
            .finish()
    }
}
