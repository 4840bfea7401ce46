//! # Writer/reader phaser
//!
//! Lets a single reader wait until every writer that might still be using a
//! structure has left it, without writers ever waiting for anything.
//!
//! ```text
//!     start_epoch   ──fetch_add──► writer enters (sign tells the phase)
//!     even_end      ◄─fetch_add─── writer that entered in the even phase exits
//!     odd_end       ◄─fetch_add─── writer that entered in the odd phase exits
//!
//!     flip_phase:
//!       1. reset the end counter of the phase being entered
//!       2. swap start_epoch to that phase's base (0 or i64::MIN)
//!       3. spin until the other phase's end counter reaches the swapped-out
//!          start value, i.e. every writer of the old phase has exited
//! ```
//!
//! The reader publishes whatever it wants writers to use next *before*
//! flipping; after the flip returns, nobody is still inside the old one.

use super::utils::Backoff;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Writer critical sections plus a reader lock.
pub struct WriterReaderPhaser {
    start_epoch: AtomicI64,
    even_end_epoch: AtomicI64,
    odd_end_epoch: AtomicI64,
    reader_lock: Mutex<()>,
}

impl Default for WriterReaderPhaser {
    fn default() -> Self {
        Self::new()
    }
}

impl WriterReaderPhaser {
    pub fn new() -> Self {
        Self {
            start_epoch: AtomicI64::new(0),
            even_end_epoch: AtomicI64::new(0),
            odd_end_epoch: AtomicI64::new(i64::MIN),
            reader_lock: Mutex::new(()),
        }
    }

    /// Enters a writer critical section. Wait-free.
    #[inline]
    pub fn writer_critical_section(&self) -> WriterCriticalSection<'_> {
        let epoch = self.start_epoch.fetch_add(1, Ordering::SeqCst);
        WriterCriticalSection {
            phaser: self,
            epoch,
        }
    }

    /// Takes the reader lock. Only one reader may flip at a time.
    pub fn reader_lock(&self) -> ReaderGuard<'_> {
        ReaderGuard {
            _guard: self.reader_lock.lock(),
        }
    }

    /// Waits until every writer that entered before this call has exited.
    ///
    /// Requires the reader lock, which `_reader` proves.
    pub fn flip_phase(&self, _reader: &ReaderGuard<'_>) {
        let next_phase_is_even = self.start_epoch.load(Ordering::SeqCst) < 0;

        let initial_start_value = if next_phase_is_even { 0 } else { i64::MIN };
        if next_phase_is_even {
            self.even_end_epoch
                .store(initial_start_value, Ordering::SeqCst);
        } else {
            self.odd_end_epoch
                .store(initial_start_value, Ordering::SeqCst);
        }

        let start_value_at_flip = self
            .start_epoch
            .swap(initial_start_value, Ordering::SeqCst);

        let mut backoff = Backoff::new(8);
        loop {
            let caught_up = if next_phase_is_even {
                self.odd_end_epoch.load(Ordering::SeqCst) == start_value_at_flip
            } else {
                self.even_end_epoch.load(Ordering::SeqCst) == start_value_at_flip
            };
            if caught_up {
                return;
            }
            backoff.backoff();
        }
    }
}

impl fmt::Debug for WriterReaderPhaser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterReaderPhaser")
            .field("start_epoch", &self.start_epoch.load(Ordering::Relaxed))
            .finish()
    }
}

/// Exits the writer critical section on drop.
#[must_use = "the critical section ends when this guard is dropped"]
pub struct WriterCriticalSection<'a> {
    phaser: &'a WriterReaderPhaser,
    epoch: i64,
}

impl fmt::Debug for WriterCriticalSection<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterCriticalSection")
            .field("epoch", &self.epoch)
            .finish()
    }
}

impl Drop for WriterCriticalSection<'_> {
    #[inline]
    fn drop(&mut self) {
        if self.epoch < 0 {
            self.phaser.odd_end_epoch.fetch_add(1, Ordering::SeqCst);
        } else {
            self.phaser.even_end_epoch.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Holds the phaser's reader lock.
pub struct ReaderGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl fmt::Debug for ReaderGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReaderGuard")
    }
}
