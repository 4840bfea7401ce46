//! # Double-buffered ranking recorder
//!
//! Two [`ConcurrentRanking`]s: writers update the active one, a reader swaps
//! them and moves everything the retired one collected into an
//! [`IntervalRanking`] it owns.
//!
//! ```text
//!                 active ─────────┐
//!                                 ▼
//!     writers ──► [ ranking 0 ]  [ ranking 1 ]     (inactive one is empty)
//!
//!     get_interval_recorder(recycle):
//!       1. reset the recycled interval, or allocate one
//!       2. reader lock
//!       3. make the empty ranking active
//!       4. flip the phaser: wait for writers still in the old active one
//!       5. swap the old active one's contents with the reset interval
//!       6. release the reader lock, hand out the interval
//! ```
//!
//! Handing the previous interval back avoids an allocation per call. Keeping
//! it is fine too: intervals are owned values and never alias the rankings
//! writers use.

use super::{
    concurrent_ranking::{ConcurrentRanking, RankingSettings},
    error::ConfigError,
    metrics::ActorStats,
    phaser::WriterReaderPhaser,
    ranking::{Identity, Position, Ranking, SingleThreadedRanking},
    utils::CacheAligned,
};
use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Ranking recorder handing out "everything since the previous interval".
pub struct RankingRecorder<I: Identity> {
    rankings: [ConcurrentRanking<I>; 2],
    active: CacheAligned<AtomicUsize>,
    phaser: WriterReaderPhaser,
    settings: RankingSettings,
}

impl<I: Identity> RankingRecorder<I> {
    /// # Errors
    ///
    /// See [`RankingSettings::validate`].
    pub fn new(settings: RankingSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            rankings: [
                ConcurrentRanking::new(settings)?,
                ConcurrentRanking::new(settings)?,
            ],
            active: CacheAligned::new(AtomicUsize::new(0)),
            phaser: WriterReaderPhaser::new(),
            settings,
        })
    }

    /// Offers a position to the active ranking.
    #[inline]
    pub fn update(&self, weight: i64, identity: I) {
        let _section = self.phaser.writer_critical_section();
        let active = self.active.load(Ordering::SeqCst);
        self.rankings[active].update(weight, identity);
    }

    /// Swaps the rankings and returns what was written since the previous
    /// call.
    ///
    /// `recycle` is reset and reused for the result when its capacity and
    /// threshold match this recorder's; otherwise a new interval is
    /// allocated.
    pub fn get_interval_recorder(
        &self,
        recycle: Option<IntervalRanking<I>>,
    ) -> IntervalRanking<I> {
        let mut contents = match recycle {
            Some(IntervalRanking { mut ranking })
                if ranking.capacity() == self.settings.capacity
                    && ranking.threshold() == self.settings.threshold =>
            {
                ranking.reset();
                ranking
            }
            _ => SingleThreadedRanking::new(self.settings.capacity, self.settings.threshold),
        };

        let reader = self.phaser.reader_lock();

        // Only the reader changes `active`, and we hold the reader lock
        let retired = self.active.load(Ordering::SeqCst);
        self.active.store(retired ^ 1, Ordering::SeqCst);
        self.phaser.flip_phase(&reader);

        // No writer can reach the retired ranking any more; queued actions
        // are applied before the swap.
        self.rankings[retired].swap_contents(&mut contents);
        drop(reader);

        IntervalRanking { ranking: contents }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.settings.capacity
    }

    /// Counters of both rankings' actors combined.
    pub fn actor_stats(&self) -> ActorStats {
        self.rankings[0]
            .actor_stats()
            .merge(&self.rankings[1].actor_stats())
    }
}

impl<I: Identity> fmt::Debug for RankingRecorder<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RankingRecorder")
            .field("capacity", &self.capacity())
            .field("active", &self.active.load(Ordering::Relaxed))
            .finish()
    }
}

/// Positions recorded during one interval, owned by the reader.
#[derive(Debug, Clone)]
pub struct IntervalRanking<I> {
    ranking: SingleThreadedRanking<I>,
}

impl<I> IntervalRanking<I> {
    /// Takes the underlying ranking.
    pub fn into_inner(self) -> SingleThreadedRanking<I> {
        self.ranking
    }
}

impl<I> Deref for IntervalRanking<I> {
    type Target = SingleThreadedRanking<I>;

    #[inline]
    fn deref(&self) -> &SingleThreadedRanking<I> {
        &self.ranking
    }
}

/// Ranking that returns what was offered since the previous read.
pub struct ResetOnSnapshotRanking<I: Identity> {
    recorder: RankingRecorder<I>,
    spare: Mutex<Option<IntervalRanking<I>>>,
}

impl<I: Identity> ResetOnSnapshotRanking<I> {
    /// # Errors
    ///
    /// See [`RankingSettings::validate`].
    pub fn new(settings: RankingSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            recorder: RankingRecorder::new(settings)?,
            spare: Mutex::new(None),
        })
    }
}

impl<I: Identity> Ranking<I> for ResetOnSnapshotRanking<I> {
    #[inline]
    fn update(&self, weight: i64, identity: I) {
        self.recorder.update(weight, identity);
    }

    fn get_positions_descending(&self) -> Vec<Position<I>> {
        let mut spare = self.spare.lock();
        let interval = self.recorder.get_interval_recorder(spare.take());
        let positions = interval.get_positions_descending();
        *spare = Some(interval);
        positions
    }

    fn capacity(&self) -> usize {
        self.recorder.capacity()
    }

    fn actor_stats(&self) -> ActorStats {
        self.recorder.actor_stats()
    }
}

impl<I: Identity> fmt::Debug for ResetOnSnapshotRanking<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResetOnSnapshotRanking")
            .field("recorder", &self.recorder)
            .finish()
    }
}
