//! # Bounded top-K ranking
//!
//! [`SingleThreadedRanking`] keeps the `capacity` heaviest positions seen,
//! at most one per identity, in a pre-allocated vector sorted ascending by
//! weight:
//!
//! ```text
//!     capacity 4, threshold 0
//!
//!     index:    0        1        2        3
//!             ┌────────┬────────┬────────┬────────┐
//!             │ 12 "c" │ 30 "a" │ 30 "d" │ 95 "b" │
//!             └────────┴────────┴────────┴────────┘
//!               weakest, evicted first
//!
//!     update(40, "a")  → "a" moves from 30 to 40         Inserted
//!     update(20, "a")  → "a" is already heavier          SkippedDuplicate
//!     update(10, "e")  → not above the weakest (full)    SkippedTooSmall
//!     update(50, "e")  → "c" evicted                     Inserted
//! ```
//!
//! It is not thread-safe; concurrent rankings wrap it in a buffered actor.

use super::metrics::ActorStats;
use std::fmt;

/// Bounds every ranked identity type satisfies.
pub trait Identity: Clone + Eq + Send + fmt::Debug + 'static {}

impl<T: Clone + Eq + Send + fmt::Debug + 'static> Identity for T {}

/// One ranked entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position<I> {
    /// What the entry is ranked by.
    pub weight: i64,
    /// What the entry is.
    pub identity: I,
}

impl<I> Position<I> {
    /// Creates a position.
    pub fn new(weight: i64, identity: I) -> Self {
        Self { weight, identity }
    }
}

/// Outcome of [`SingleThreadedRanking::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
    /// The position is now in the ranking.
    Inserted,
    /// Under the threshold, or not heavier than the weakest of a full ranking.
    SkippedTooSmall,
    /// The identity is already ranked with a weight at least as large.
    SkippedDuplicate,
}

/// Concurrent top-K ranking over a retention window.
///
/// # Example
///
/// ```rust
/// use rollmetrics::{RankingBuilder, RetentionPolicy};
///
/// let ranking = RankingBuilder::<&str>::new(RetentionPolicy::uniform(), 2).build();
/// ranking.update(10, "select 1");
/// ranking.update(30, "select 2");
/// ranking.update(20, "select 3");
///
/// let top: Vec<_> = ranking
///     .get_positions_descending()
///     .into_iter()
///     .map(|p| p.identity)
///     .collect();
/// assert_eq!(top, vec!["select 2", "select 3"]);
/// ```
pub trait Ranking<I>: Send + Sync + fmt::Debug {
    /// Offers a position. Lighter positions and smaller duplicates are
    /// dropped.
    fn update(&self, weight: i64, identity: I);

    /// What the retention policy remembers, heaviest first.
    fn get_positions_descending(&self) -> Vec<Position<I>>;

    /// Largest number of positions returned.
    fn capacity(&self) -> usize;

    /// Counters of the buffered actors behind this ranking.
    fn actor_stats(&self) -> ActorStats;
}

impl<I, R: Ranking<I> + ?Sized> Ranking<I> for Box<R> {
    #[inline]
    fn update(&self, weight: i64, identity: I) {
        (**self).update(weight, identity)
    }

    #[inline]
    fn get_positions_descending(&self) -> Vec<Position<I>> {
        (**self).get_positions_descending()
    }

    #[inline]
    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    #[inline]
    fn actor_stats(&self) -> ActorStats {
        (**self).actor_stats()
    }
}

impl<I, R: Ranking<I> + ?Sized> Ranking<I> for std::sync::Arc<R> {
    #[inline]
    fn update(&self, weight: i64, identity: I) {
        (**self).update(weight, identity)
    }

    #[inline]
    fn get_positions_descending(&self) -> Vec<Position<I>> {
        (**self).get_positions_descending()
    }

    #[inline]
    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    #[inline]
    fn actor_stats(&self) -> ActorStats {
        (**self).actor_stats()
    }
}

/// Fixed-capacity top-K structure for a single writer.
#[derive(Clone)]
pub struct SingleThreadedRanking<I> {
    // Ascending by weight; equal weights keep insertion order
    positions: Vec<Position<I>>,
    capacity: usize,
    threshold: i64,
}

impl<I: Clone + Eq> SingleThreadedRanking<I> {
    /// Creates an empty ranking. Positions lighter than `threshold` are never
    /// admitted. All storage is allocated here.
    pub fn new(capacity: usize, threshold: i64) -> Self {
        Self {
            positions: Vec::with_capacity(capacity),
            capacity,
            threshold,
        }
    }

    /// Offers a position.
    pub fn update(&mut self, weight: i64, identity: I) -> UpdateResult {
        if weight < self.threshold || self.capacity == 0 {
            return UpdateResult::SkippedTooSmall;
        }

        if let Some(existing) = self.positions.iter().position(|p| p.identity == identity) {
            if weight <= self.positions[existing].weight {
                return UpdateResult::SkippedDuplicate;
            }
            // Frees a place, so no eviction below
            self.positions.remove(existing);
        } else if self.is_full() {
            if weight <= self.positions[0].weight {
                return UpdateResult::SkippedTooSmall;
            }
            self.positions.remove(0);
        }

        let at = self.positions.partition_point(|p| p.weight <= weight);
        self.positions.insert(at, Position { weight, identity });
        UpdateResult::Inserted
    }

    /// Offers every position to `other`, heaviest first, and stops at the
    /// first one `other` finds too small.
    pub fn add_into(&self, other: &mut SingleThreadedRanking<I>) {
        for position in self.positions.iter().rev() {
            if other.update(position.weight, position.identity.clone())
                == UpdateResult::SkippedTooSmall
            {
                break;
            }
        }
    }

    /// Copy of the positions, heaviest first.
    pub fn get_positions_descending(&self) -> Vec<Position<I>> {
        self.positions.iter().rev().cloned().collect()
    }

    /// Weight of the weakest position, if any.
    #[inline]
    pub fn min_weight(&self) -> Option<i64> {
        self.positions.first().map(|p| p.weight)
    }

    /// Lightest weight that can still be admitted. Anything lighter is
    /// rejected by [`update`](Self::update) without looking at its identity.
    #[inline]
    pub fn admission_floor(&self) -> i64 {
        match self.min_weight() {
            Some(min) if self.is_full() => min.saturating_add(1).max(self.threshold),
            _ => self.threshold,
        }
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.positions.len() >= self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    /// Removes every position, keeping the storage.
    pub fn reset(&mut self) {
        self.positions.clear();
    }
}

impl<I: fmt::Debug> fmt::Debug for SingleThreadedRanking<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleThreadedRanking")
            .field("capacity", &self.capacity)
            .field("threshold", &self.threshold)
            .field("positions", &self.positions)
            .finish()
    }
}
