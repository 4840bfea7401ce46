//! Health statistics of the buffered actors behind concurrent rankings.
//!
//! A [`BufferedActor`](super::actor::BufferedActor) normally serves every
//! submission from its pre-allocated pool. Two things show it is undersized
//! or overloaded: overflow allocations (the pool ran dry) and batch cap hits
//! (a drainer stopped while writers were still refilling the queue).
//!
//! ```text
//!     ActorStats
//!     ┌─────────────────────────────────────┐
//!     │  Overflow Rate: 0.20%               │
//!     │  Batch Cap Hits: 3                  │
//!     │  Pool: 64 slots, batch 256          │
//!     │                                     │
//!     │  Health: ✅ Healthy                 │
//!     └─────────────────────────────────────┘
//! ```

use std::fmt;

/// Overflow rate above which an actor is considered under pressure.
const PRESSURE_OVERFLOW_RATE: f64 = 0.01;

/// Overflow rate above which the pressure is considered sustained.
const SUSTAINED_OVERFLOW_RATE: f64 = 0.10;

/// Snapshot of a buffered actor's counters.
///
/// # Example
///
/// ```rust
/// use rollmetrics::{HealthStatus, RankingBuilder, RetentionPolicy};
///
/// let ranking = RankingBuilder::<&str>::new(RetentionPolicy::uniform(), 5).build();
/// ranking.update(10, "a");
///
/// let stats = ranking.actor_stats();
/// assert_eq!(stats.total_submitted, 1);
/// assert_eq!(stats.health_status(), HealthStatus::Healthy);
/// println!("{}", stats.summary());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActorStats {
    /// Pre-allocated action slots.
    pub pool_size: usize,

    /// Largest number of actions one drain runs before releasing the lock.
    pub batch_size: usize,

    /// Actions handed to `submit_or_run_exclusively`.
    pub total_submitted: u64,

    /// Actions that have been run against the state.
    pub total_executed: u64,

    /// Submissions that found the pool empty and allocated on the heap.
    pub overflow_allocations: u64,

    /// Drains that stopped at the batch cap with work still queued.
    pub batch_limit_hits: u64,
}

impl ActorStats {
    /// Share of submissions that needed an overflow allocation.
    #[inline]
    pub fn overflow_rate(&self) -> f64 {
        if self.total_submitted == 0 {
            0.0
        } else {
            self.overflow_allocations as f64 / self.total_submitted as f64
        }
    }

    /// Submitted actions not yet run. Approximate while writers are active.
    #[inline]
    pub fn pending(&self) -> u64 {
        self.total_submitted.saturating_sub(self.total_executed)
    }

    /// The pool ran dry noticeably often, or a drain hit its cap.
    #[inline]
    pub fn is_under_pressure(&self) -> bool {
        self.overflow_rate() > PRESSURE_OVERFLOW_RATE || self.batch_limit_hits > 0
    }

    /// Overflow allocations are a significant share of the traffic.
    #[inline]
    pub fn is_under_sustained_pressure(&self) -> bool {
        self.overflow_rate() > SUSTAINED_OVERFLOW_RATE
    }

    /// Three-level verdict.
    pub fn health_status(&self) -> HealthStatus {
        if self.is_under_sustained_pressure() {
            HealthStatus::Critical
        } else if self.is_under_pressure() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Human-readable report.
    ///
    /// ```text
    /// BufferedActor Stats:
    /// ├─ Sizing:
    /// │  ├─ Pool Size: 64
    /// │  └─ Batch Size: 256
    /// ├─ Counters:
    /// │  ├─ Submitted: 1000
    /// │  ├─ Executed: 1000
    /// │  ├─ Overflow Allocations: 2
    /// │  └─ Batch Cap Hits: 0
    /// └─ Health:
    ///    ├─ Overflow Rate: 0.20%
    ///    └─ Status: Healthy
    /// ```
    pub fn summary(&self) -> String {
        format!(
            "BufferedActor Stats:\n\
             ├─ Sizing:\n\
             │  ├─ Pool Size: {}\n\
             │  └─ Batch Size: {}\n\
             ├─ Counters:\n\
             │  ├─ Submitted: {}\n\
             │  ├─ Executed: {}\n\
             │  ├─ Overflow Allocations: {}\n\
             │  └─ Batch Cap Hits: {}\n\
             └─ Health:\n\
                ├─ Overflow Rate: {:.2}%\n\
                └─ Status: {:?}",
            self.pool_size,
            self.batch_size,
            self.total_submitted,
            self.total_executed,
            self.overflow_allocations,
            self.batch_limit_hits,
            self.overflow_rate() * 100.0,
            self.health_status(),
        )
    }

    /// Adds another actor's counters to these. Sizing is summed as well.
    pub(crate) fn merge(mut self, other: &ActorStats) -> Self {
        self.pool_size += other.pool_size;
        self.batch_size = self.batch_size.max(other.batch_size);
        self.total_submitted += other.total_submitted;
        self.total_executed += other.total_executed;
        self.overflow_allocations += other.overflow_allocations;
        self.batch_limit_hits += other.batch_limit_hits;
        self
    }
}

impl fmt::Display for ActorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

/// Health verdict for a buffered actor.
///
/// ```text
///     Healthy ──────► pool serves every submission
///        │
///     Degraded ─────► occasional overflow or capped drains
///        │
///     Critical ─────► overflow on a large share of writes
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Nothing to do.
    Healthy,

    /// Worth watching.
    Degraded,

    /// The pool is far too small for the write rate.
    Critical,
}

impl HealthStatus {
    /// Returns true for anything but [`HealthStatus::Healthy`].
    pub fn is_unhealthy(&self) -> bool {
        !matches!(self, Self::Healthy)
    }

    /// Operator guidance.
    pub fn suggested_action(&self) -> &'static str {
        match self {
            Self::Healthy => "No action needed",
            Self::Degraded => "Monitor closely, consider a larger action pool",
            Self::Critical => "Immediate action required: increase the action pool size",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "✅ Healthy"),
            Self::Degraded => write!(f, "⚠️ Degraded"),
            Self::Critical => write!(f, "🔴 Critical"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(submitted: u64, overflow: u64, cap_hits: u64) -> ActorStats {
        ActorStats {
            pool_size: 64,
            batch_size: 256,
            total_submitted: submitted,
            total_executed: submitted,
            overflow_allocations: overflow,
            batch_limit_hits: cap_hits,
        }
    }

    #[test]
    fn test_healthy_actor() {
        let stats = stats(1000, 5, 0);
        assert_eq!(stats.overflow_rate(), 0.005);
        assert!(!stats.is_under_pressure());
        assert_eq!(stats.health_status(), HealthStatus::Healthy);
        assert_eq!(stats.pending(), 0);
    }

    #[test]
    fn test_degraded_and_critical() {
        assert_eq!(stats(1000, 50, 0).health_status(), HealthStatus::Degraded);
        assert_eq!(stats(1000, 0, 1).health_status(), HealthStatus::Degraded);
        assert_eq!(stats(1000, 500, 0).health_status(), HealthStatus::Critical);
    }

    #[test]
    fn test_edge_cases() {
        let empty = ActorStats::default();
        assert_eq!(empty.overflow_rate(), 0.0);
        assert_eq!(empty.health_status(), HealthStatus::Healthy);

        let lagging = ActorStats {
            total_submitted: 10,
            total_executed: 7,
            ..ActorStats::default()
        };
        assert_eq!(lagging.pending(), 3);
    }

    #[test]
    fn test_merge() {
        let merged = stats(100, 1, 0).merge(&stats(300, 3, 2));
        assert_eq!(merged.pool_size, 128);
        assert_eq!(merged.batch_size, 256);
        assert_eq!(merged.total_submitted, 400);
        assert_eq!(merged.overflow_allocations, 4);
        assert_eq!(merged.batch_limit_hits, 2);
    }

    #[test]
    fn test_health_status_methods() {
        assert!(!HealthStatus::Healthy.is_unhealthy());
        assert!(HealthStatus::Degraded.is_unhealthy());
        assert!(HealthStatus::Critical.is_unhealthy());

        assert_eq!(HealthStatus::Healthy.suggested_action(), "No action needed");
        assert!(HealthStatus::Critical
            .suggested_action()
            .contains("Immediate"));
        assert!(format!("{}", HealthStatus::Degraded).contains("Degraded"));
    }

    #[test]
    fn test_summary_display() {
        let display = format!("{}", stats(1000, 2, 0));
        assert!(display.contains("BufferedActor Stats"));
        assert!(display.contains("Overflow Rate: 0.20%"));
        assert!(display.contains("Status: Healthy"));
    }
}
