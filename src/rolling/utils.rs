//! # Low-level helpers (utils.rs)
//!
//! Spin-loop and cache-layout helpers shared by the lock-free parts of the
//! engine: the phase rotation CAS, the buffered actor stacks and the
//! writer/reader phaser.
//!
//! ```text
//!     Platform-Specific Features:
//!
//!     x86_64 (Intel/AMD):
//!     ├─ Cache line: 64 bytes
//!     └─ PAUSE instruction for spin loops
//!
//!     AArch64 (ARM):
//!     ├─ Cache line: 128 bytes
//!     └─ YIELD instruction for spin loops
//!
//!     Generic (Fallback):
//!     └─ Cache line: 64 bytes (assumed)
//! ```

use std::ops::Deref;

/// Cache line size for x86_64 processors.
#[cfg(target_arch = "x86_64")]
pub const CACHE_LINE_SIZE: usize = 64;

/// Cache line size for ARM64 processors.
#[cfg(target_arch = "aarch64")]
pub const CACHE_LINE_SIZE: usize = 128;

/// Default cache line size for other architectures.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub const CACHE_LINE_SIZE: usize = 64;

/// CPU-specific relaxation hint for spin loops.
///
/// Compiles to PAUSE on x86_64, YIELD on ARM64 and the closest equivalent
/// elsewhere.
///
/// ```rust
/// use rollmetrics::cpu_relax;
///
/// for _ in 0..4 {
///     cpu_relax();
/// }
/// ```
#[inline(always)]
pub fn cpu_relax() {
    std::hint::spin_loop();
}

/// Cache-aligned wrapper to keep hot atomics on their own cache line.
///
/// ```text
///     Without alignment:
///     ┌──────────────────────────────┐
///     │ scheduled_top │ free_top     │ ← same line, writers bounce it
///     └──────────────────────────────┘
///
///     With alignment:
///     ┌──────────────────────────────┐
///     │ scheduled_top                │
///     └──────────────────────────────┘
///     ┌──────────────────────────────┐
///     │ free_top                     │
///     └──────────────────────────────┘
/// ```
#[cfg(target_arch = "aarch64")]
#[repr(C, align(128))]
pub(crate) struct CacheAligned<T>(pub(crate) T);
#[cfg(not(target_arch = "aarch64"))]
#[repr(C, align(64))]
pub(crate) struct CacheAligned<T>(pub(crate) T);

impl<T> CacheAligned<T> {
    #[inline(always)]
    pub(crate) const fn new(value: T) -> Self {
        Self(value)
    }
}

impl<T> Deref for CacheAligned<T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: Default> Default for CacheAligned<T> {
    fn default() -> Self {
        Self(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for CacheAligned<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Exponential backoff for spin-waits.
///
/// ```text
///     Attempt 1: spin 1 time
///     Attempt 2: spin 2 times
///     Attempt 3: spin 4 times
///     Attempt 4: spin 8 times
///     Attempt 5+: yield to scheduler
/// ```
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    step: u32,
    max_step: u32,
}

impl Backoff {
    pub(crate) fn new(max_step: u32) -> Self {
        Self { step: 0, max_step }
    }

    /// Spins for `2^step` relax hints, or yields once the spin budget is spent.
    #[inline]
    pub(crate) fn backoff(&mut self) {
        if self.step < 4 {
            for _ in 0..(1 << self.step) {
                cpu_relax();
            }
        } else {
            std::thread::yield_now();
        }
        self.step = (self.step + 1).min(self.max_step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_cache_line_size() {
        assert!(CACHE_LINE_SIZE >= 32);
        assert!(CACHE_LINE_SIZE <= 256);
        assert!(CACHE_LINE_SIZE.is_power_of_two());
    }

    #[test]
    fn test_cache_aligned_layout() {
        assert!(std::mem::align_of::<CacheAligned<AtomicU64>>() >= 64);

        let aligned = CacheAligned::new(AtomicU64::new(42));
        assert_eq!(aligned.load(Ordering::Relaxed), 42);
        assert_eq!(format!("{:?}", CacheAligned::new(7u64)), "7");
    }

    #[test]
    fn test_cpu_relax() {
        for _ in 0..100 {
            cpu_relax();
        }
    }

    #[test]
    fn test_backoff_progression() {
        let mut backoff = Backoff::new(3);

        assert_eq!(backoff.step, 0);
        backoff.backoff();
        backoff.backoff();
        backoff.backoff();
        assert_eq!(backoff.step, 3);

        // Should stay at max
        backoff.backoff();
        assert_eq!(backoff.step, 3);
    }
}
