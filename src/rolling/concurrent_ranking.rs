//! # Concurrent ranking
//!
//! A [`SingleThreadedRanking`] owned by a [`BufferedActor`]. Writers never
//! take the ranking lock themselves; they queue a [`RankingAction`] and
//! whoever holds the lock applies it.
//!
//! Most offered positions are too light to enter a full ranking. To keep
//! them off the actor entirely, the lock holder publishes the ranking's
//! admission floor after every change and writers compare against it first:
//!
//! ```text
//!     update(w, id)
//!          │
//!          ▼
//!     w < floor? ──yes──► return (no slot, no CAS)
//!          │ no
//!          ▼
//!     fill pooled action ──► submit_or_run_exclusively
//! ```
//!
//! The published floor may lag behind the ranking but is never above the
//! real one, so the shortcut only drops positions the ranking would drop.

use super::{
    actor::{Action, BufferedActor},
    config::{DEFAULT_ACTOR_BATCH_SIZE, DEFAULT_ACTOR_POOL_SIZE, MAX_RANKING_CAPACITY},
    error::ConfigError,
    metrics::ActorStats,
    ranking::{Identity, Position, Ranking, SingleThreadedRanking},
    utils::CacheAligned,
};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Sizing shared by every ranking a builder creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankingSettings {
    /// Positions kept.
    pub capacity: usize,
    /// Lightest admitted weight.
    pub threshold: i64,
    /// Pre-allocated actions per buffered actor.
    pub actor_pool_size: usize,
    /// Actions one drain runs before releasing the lock.
    pub actor_batch_size: usize,
}

impl RankingSettings {
    /// Default threshold and actor sizing for `capacity` positions.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            threshold: 0,
            actor_pool_size: DEFAULT_ACTOR_POOL_SIZE,
            actor_batch_size: DEFAULT_ACTOR_BATCH_SIZE,
        }
    }

    /// # Errors
    ///
    /// [`ConfigError::InvalidCapacity`] outside `[1, MAX_RANKING_CAPACITY]`,
    /// [`ConfigError::InvalidActorSizing`] for a zero pool or batch.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 || self.capacity > MAX_RANKING_CAPACITY {
            return Err(ConfigError::InvalidCapacity {
                capacity: self.capacity,
                max: MAX_RANKING_CAPACITY,
            });
        }
        if self.actor_pool_size == 0 {
            return Err(ConfigError::InvalidActorSizing { what: "pool size" });
        }
        if self.actor_batch_size == 0 {
            return Err(ConfigError::InvalidActorSizing { what: "batch size" });
        }
        Ok(())
    }
}

pub(crate) struct RankingState<I> {
    ranking: SingleThreadedRanking<I>,
    floor: Arc<CacheAligned<AtomicI64>>,
}

impl<I: Identity> RankingState<I> {
    #[inline]
    fn publish_floor(&self) {
        self.floor
            .store(self.ranking.admission_floor(), Ordering::Release);
    }
}

/// A queued [`SingleThreadedRanking::update`].
pub(crate) struct RankingAction<I> {
    weight: i64,
    identity: Option<I>,
}

impl<I> Default for RankingAction<I> {
    fn default() -> Self {
        Self {
            weight: 0,
            identity: None,
        }
    }
}

impl<I: Identity> Action<RankingState<I>> for RankingAction<I> {
    fn run(&mut self, state: &mut RankingState<I>) {
        if let Some(identity) = self.identity.take() {
            state.ranking.update(self.weight, identity);
            state.publish_floor();
        }
    }
}

/// Top-K ranking that many threads can update at once. Never forgets.
pub struct ConcurrentRanking<I: Identity> {
    actor: BufferedActor<RankingState<I>, RankingAction<I>>,
    floor: Arc<CacheAligned<AtomicI64>>,
    capacity: usize,
}

impl<I: Identity> ConcurrentRanking<I> {
    /// Creates an empty ranking.
    ///
    /// # Errors
    ///
    /// See [`RankingSettings::validate`].
    pub fn new(settings: RankingSettings) -> Result<Self, ConfigError> {
        settings.validate()?;

        let floor = Arc::new(CacheAligned::new(AtomicI64::new(settings.threshold)));
        let state = RankingState {
            ranking: SingleThreadedRanking::new(settings.capacity, settings.threshold),
            floor: Arc::clone(&floor),
        };

        Ok(Self {
            actor: BufferedActor::new(
                state,
                settings.actor_pool_size,
                settings.actor_batch_size,
            )?,
            floor,
            capacity: settings.capacity,
        })
    }

    /// Offers a position without waiting for the ranking lock.
    #[inline]
    pub fn update(&self, weight: i64, identity: I) {
        if weight < self.floor.load(Ordering::Acquire) {
            return;
        }

        let mut action = self.actor.get_action_from_pool();
        action.weight = weight;
        action.identity = Some(identity);
        self.actor.submit_or_run_exclusively(action);
    }

    /// Positions, heaviest first, including everything queued so far.
    pub fn get_positions_descending(&self) -> Vec<Position<I>> {
        self.actor
            .run_exclusively(|state| state.ranking.get_positions_descending())
    }

    /// Merges the positions into `other`, heaviest first.
    pub fn add_into(&self, other: &mut SingleThreadedRanking<I>) {
        self.actor
            .run_exclusively(|state| state.ranking.add_into(other));
    }

    /// Exchanges the positions with `other` after applying queued updates.
    pub(crate) fn swap_contents(&self, other: &mut SingleThreadedRanking<I>) {
        self.actor.run_exclusively(|state| {
            std::mem::swap(&mut state.ranking, other);
            state.publish_floor();
        });
    }

    /// Forgets every position. Queued updates are applied first and lost
    /// with the rest.
    pub fn reset(&self) {
        self.actor.run_exclusively(|state| {
            state.ranking.reset();
            state.publish_floor();
        });
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Counters of the buffered actor.
    pub fn actor_stats(&self) -> ActorStats {
        self.actor.stats()
    }
}

impl<I: Identity> Ranking<I> for ConcurrentRanking<I> {
    #[inline]
    fn update(&self, weight: i64, identity: I) {
        ConcurrentRanking::update(self, weight, identity)
    }

    fn get_positions_descending(&self) -> Vec<Position<I>> {
        ConcurrentRanking::get_positions_descending(self)
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn actor_stats(&self) -> ActorStats {
        self.actor.stats()
    }
}

impl<I: Identity> fmt::Debug for ConcurrentRanking<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentRanking")
            .field("capacity", &self.capacity)
            .field("floor", &self.floor.load(Ordering::Relaxed))
            .field("actor", &self.actor)
            .finish()
    }
}
