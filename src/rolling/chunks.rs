//! # Chunked phase rotation
//!
//! The rolling counter and the rolling hit ratio share one state machine. A
//! window of `N` chunks is stored in `N + 1` slots, so one slot is always
//! being prepared for reuse while `N` are live:
//!
//! ```text
//!     interval:   0     1     2     3     4     5
//!     slot:       0     1     2     0     1     2
//!                 ├─────┼─────┼─────┤
//!                 │ data written in interval 0 is read at full weight
//!                 │ until 2, fades out linearly until 3, then slot 0
//!                 │ rotates and starts collecting interval 3
//! ```
//!
//! Each slot (a [`Chunk`]) owns two phases and an atomic index naming the
//! one that accepts writes:
//!
//! ```text
//!     Chunk
//!     ┌────────────────────────────────────────────┐
//!     │ current ──► phases[0] { acc, invalidation } │
//!     │             phases[1] { acc, u64::MAX     } │ ← dormant
//!     └────────────────────────────────────────────┘
//! ```
//!
//! A writer that finds the current phase expired records into the other
//! phase first and only then tries to publish it with a CAS. Losing the CAS
//! is fine: the write already landed in the phase the winner published. The
//! winner alone schedules the new phase and retires the old one.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

/// Invalidation time of a dormant phase.
pub(crate) const DORMANT: u64 = u64::MAX;

/// Additive, lock-free storage of one phase.
pub(crate) trait PhaseAccumulator: Default + Send + Sync {
    type Delta: Copy;
    type Value: Copy;

    fn add(&self, delta: Self::Delta);
    fn value(&self) -> Self::Value;
    fn reset(&self);
}

/// `creation_ms + intervals * interval_ms`, saturating just below [`DORMANT`].
#[inline]
pub(crate) fn boundary_ms(creation_ms: u64, intervals: u64, interval_ms: u64) -> u64 {
    intervals
        .saturating_mul(interval_ms)
        .saturating_add(creation_ms)
        .min(DORMANT - 1)
}

/// How much of a chunk's value a read counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Weight {
    Full,
    /// The chunk is inside its last interval before invalidation.
    Decaying { remaining_ms: u64, interval_ms: u64 },
}

impl Weight {
    /// Scales an integer sum, truncating toward zero.
    #[inline]
    pub(crate) fn scale(self, value: i64) -> i64 {
        match self {
            Weight::Full => value,
            Weight::Decaying {
                remaining_ms,
                interval_ms,
            } => (value as i128 * remaining_ms as i128 / interval_ms as i128) as i64,
        }
    }

    #[inline]
    pub(crate) fn coefficient(self) -> f64 {
        match self {
            Weight::Full => 1.0,
            Weight::Decaying {
                remaining_ms,
                interval_ms,
            } => remaining_ms as f64 / interval_ms as f64,
        }
    }
}

/// Single-phase variant of the rotation: one CAS-guarded reset time.
///
/// The thread that swaps the due time to [`DORMANT`] zeroes the state and
/// schedules the next reset. Until it does, other threads see `DORMANT`,
/// treat the period as live and may touch the previous period's value.
#[derive(Debug)]
pub(crate) struct PeriodicReset {
    next_reset_ms: AtomicU64,
    interval_ms: u64,
}

impl PeriodicReset {
    pub(crate) fn new(interval_ms: u64, creation_ms: u64) -> Self {
        Self {
            next_reset_ms: AtomicU64::new(creation_ms.saturating_add(interval_ms)),
            interval_ms,
        }
    }

    #[inline]
    pub(crate) fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Runs `zero` if a reset is due at `now_ms` and this thread claimed it.
    #[inline]
    pub(crate) fn reset_if_due<F: FnOnce()>(&self, now_ms: u64, zero: F) {
        let next_reset = self.next_reset_ms.load(Ordering::Acquire);
        if now_ms < next_reset {
            return;
        }

        if self
            .next_reset_ms
            .compare_exchange(next_reset, DORMANT, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            zero();
            self.next_reset_ms
                .store(now_ms.saturating_add(self.interval_ms), Ordering::Release);
            debug!("Periodic reset at {}ms", now_ms);
        }
    }
}

struct Phase<A> {
    acc: A,
    invalidation_ms: AtomicU64,
}

impl<A: PhaseAccumulator> Phase<A> {
    fn new(invalidation_ms: u64) -> Self {
        Self {
            acc: A::default(),
            invalidation_ms: AtomicU64::new(invalidation_ms),
        }
    }
}

struct Chunk<A> {
    phases: [Phase<A>; 2],
    current: AtomicUsize,
}

/// `chunk_count + 1` pre-allocated chunks rotating over a shared timeline.
pub(crate) struct RollingChunks<A> {
    chunks: Box<[Chunk<A>]>,
    creation_ms: u64,
    interval_ms: u64,
}

impl<A: PhaseAccumulator> RollingChunks<A> {
    /// Builds the slots. `interval_ms` must be non-zero (validated upstream).
    pub(crate) fn new(chunk_count: usize, interval_ms: u64, creation_ms: u64) -> Self {
        debug_assert!(interval_ms > 0);
        let slots = chunk_count + 1;

        let chunks = (0..slots)
            .map(|i| Chunk {
                phases: [
                    Phase::new(boundary_ms(creation_ms, (i + slots) as u64, interval_ms)),
                    Phase::new(DORMANT),
                ],
                current: AtomicUsize::new(0),
            })
            .collect();

        Self {
            chunks,
            creation_ms,
            interval_ms,
        }
    }

    #[inline]
    fn interval_index(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.creation_ms) / self.interval_ms
    }

    #[inline]
    fn slot_of(&self, now_ms: u64) -> usize {
        (self.interval_index(now_ms) % self.chunks.len() as u64) as usize
    }

    /// Records `delta` into the chunk owning `now_ms`.
    pub(crate) fn add(&self, delta: A::Delta, now_ms: u64) {
        let chunk = &self.chunks[self.slot_of(now_ms)];

        loop {
            let current = chunk.current.load(Ordering::Acquire);
            let phase = &chunk.phases[current];
            let invalidation = phase.invalidation_ms.load(Ordering::Acquire);

            if now_ms < invalidation {
                // A dormant phase that is no longer current was retired
                // between our two loads; writing there would resurrect it.
                if invalidation == DORMANT && chunk.current.load(Ordering::Acquire) != current {
                    continue;
                }
                phase.acc.add(delta);
                return;
            }

            let next_index = current ^ 1;
            let next = &chunk.phases[next_index];
            next.acc.add(delta);

            if chunk
                .current
                .compare_exchange(current, next_index, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let next_invalidation = boundary_ms(
                    self.creation_ms,
                    self.interval_index(now_ms) + self.chunks.len() as u64,
                    self.interval_ms,
                );
                next.invalidation_ms
                    .store(next_invalidation, Ordering::Release);

                phase.acc.reset();
                phase.invalidation_ms.store(DORMANT, Ordering::Release);

                debug!(
                    "Rotated chunk phase at {}ms (expired at {}ms, next invalidation {}ms)",
                    now_ms, invalidation, next_invalidation
                );
            }
            return;
        }
    }

    /// Visits every live phase from oldest to newest with its read weight.
    pub(crate) fn for_each_live<F>(&self, now_ms: u64, mut visit: F)
    where
        F: FnMut(A::Value, Weight),
    {
        let slots = self.chunks.len();
        let newest = self.slot_of(now_ms);

        for step in 1..=slots {
            let chunk = &self.chunks[(newest + step) % slots];
            let phase = &chunk.phases[chunk.current.load(Ordering::Acquire)];
            let invalidation = phase.invalidation_ms.load(Ordering::Acquire);

            if now_ms >= invalidation {
                // Nobody wrote to this chunk for a whole rotation.
                continue;
            }

            let remaining_ms = invalidation - now_ms;
            let weight = if remaining_ms < self.interval_ms {
                Weight::Decaying {
                    remaining_ms,
                    interval_ms: self.interval_ms,
                }
            } else {
                Weight::Full
            };
            visit(phase.acc.value(), weight);
        }
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.chunks.len()
    }
}
