//! # Time source
//!
//! Every aggregate reads time through a [`Ticker`] so that rotation
//! boundaries can be driven deterministically in tests. The production
//! ticker is monotonic: it counts milliseconds from the first time any
//! ticker in the process is queried, so wall-clock jumps never move a chunk
//! boundary backwards.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

// Anchor shared by every SystemTicker in the process.
static PROCESS_START: OnceLock<Instant> = OnceLock::new();

/// Monotonic millisecond time source.
pub trait Ticker: Send + Sync + fmt::Debug {
    /// Milliseconds elapsed since an arbitrary, process-wide origin.
    fn now_millis(&self) -> u64;
}

/// Production ticker backed by [`Instant`].
///
/// ```rust
/// use rollmetrics::{SystemTicker, Ticker};
///
/// let ticker = SystemTicker;
/// let a = ticker.now_millis();
/// let b = ticker.now_millis();
/// assert!(b >= a);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTicker;

impl Ticker for SystemTicker {
    #[inline(always)]
    fn now_millis(&self) -> u64 {
        let start = PROCESS_START.get_or_init(Instant::now);
        start.elapsed().as_millis() as u64
    }
}

/// Hand-driven ticker for tests and simulations.
///
/// Clones share the same clock, so a test can keep one handle and give
/// another to the aggregate under test.
///
/// ```rust
/// use rollmetrics::{MockTicker, Ticker};
/// use std::time::Duration;
///
/// let ticker = MockTicker::new(0);
/// let handle = ticker.clone();
///
/// handle.advance(Duration::from_millis(1500));
/// assert_eq!(ticker.now_millis(), 1500);
/// ```
#[derive(Clone, Default)]
pub struct MockTicker {
    millis: Arc<AtomicU64>,
}

impl MockTicker {
    /// Creates a mock clock starting at `start_millis`.
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(start_millis)),
        }
    }

    /// Jumps the clock to an absolute value.
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Ticker for MockTicker {
    #[inline]
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for MockTicker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTicker")
            .field("millis", &self.now_millis())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_ticker_monotonicity() {
        let ticker = SystemTicker;
        let mut last = 0;

        for _ in 0..10 {
            let now = ticker.now_millis();
            assert!(now >= last);
            last = now;
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_system_ticker_advances() {
        let ticker = SystemTicker;
        let before = ticker.now_millis();
        std::thread::sleep(Duration::from_millis(20));
        assert!(ticker.now_millis() >= before + 10);
    }

    #[test]
    fn test_mock_ticker_shared_between_clones() {
        let ticker = MockTicker::new(100);
        let clone = ticker.clone();

        clone.advance(Duration::from_millis(50));
        assert_eq!(ticker.now_millis(), 150);

        ticker.set(7);
        assert_eq!(clone.now_millis(), 7);
    }

    #[test]
    fn test_mock_ticker_debug() {
        let ticker = MockTicker::new(42);
        assert!(format!("{:?}", ticker).contains("42"));
    }
}
