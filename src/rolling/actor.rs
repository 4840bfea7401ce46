//! # Buffered actor
//!
//! Many writers mutate one piece of state without waiting for each other.
//! Instead of locking, a writer fills a pre-allocated action slot, pushes it
//! onto a lock-free stack and tries to become the executor. Whoever holds the
//! state lock drains the stack and runs every queued action in submission
//! order.
//!
//! ```text
//!      writer A        writer B        writer C
//!         │               │               │
//!         │ pop free slot │               │
//!         ▼               ▼               ▼
//!     ┌──────────────────────────────────────┐
//!     │  scheduled stack (CAS push)          │ ◄── C ─ B ─ A
//!     └──────────────────┬───────────────────┘
//!                        │ swap(NIL), reverse
//!                        ▼
//!                 A ─► B ─► C        run under the state lock,
//!                                    slots go back to the free list
//! ```
//!
//! ## Slot ownership
//!
//! A slot index is owned by exactly one party at a time:
//!
//! 1. the free list,
//! 2. the [`PooledAction`] handed to a writer,
//! 3. the scheduled stack,
//! 4. the drainer holding the state lock.
//!
//! Only (2) and (4) touch the action itself, so the `UnsafeCell` inside a
//! slot is never aliased.
//!
//! ## Overflow
//!
//! When the pool is empty the writer gets a heap-allocated overflow action
//! instead. Overflow actions cannot go on the index stack, so their writer
//! blocks on the state lock, drains the queue and runs its action directly.
//! This is the only blocking write path.

use super::{error::ConfigError, metrics::ActorStats, utils::CacheAligned};
use parking_lot::{Mutex, MutexGuard};
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};
use tracing::{debug, warn};

const NIL: u32 = u32::MAX;

/// A small mutation applied to an actor's state.
///
/// Actions are reused: the same value is filled in, run and returned to the
/// pool over and over, so `run` should leave nothing behind that a later use
/// could mistake for its own input.
pub trait Action<S>: Default + Send {
    /// Applies the action. Runs under the actor's state lock.
    fn run(&mut self, state: &mut S);
}

struct Slot<A> {
    action: UnsafeCell<A>,
    next: AtomicU32,
}

#[inline(always)]
const fn pack_free(tag: u32, index: u32) -> u64 {
    ((tag as u64) << 32) | index as u64
}

#[inline(always)]
const fn unpack_free(packed: u64) -> (u32, u32) {
    ((packed >> 32) as u32, packed as u32)
}

/// State owned by many writers through queued actions.
pub struct BufferedActor<S, A> {
    state: Mutex<S>,
    slots: Box<[Slot<A>]>,
    // Tagged Treiber stack: (ABA tag << 32) | slot index
    free_top: CacheAligned<AtomicU64>,
    scheduled_top: CacheAligned<AtomicU32>,
    batch_size: usize,

    total_submitted: AtomicU64,
    total_executed: AtomicU64,
    overflow_allocations: AtomicU64,
    batch_limit_hits: AtomicU64,
}

// SAFETY: the actions inside `slots` are only accessed by the unique owner
// of their index (see "Slot ownership"), and they move between threads,
// which `A: Send` permits. The state is behind a mutex.
unsafe impl<S: Send, A: Send> Sync for BufferedActor<S, A> {}

impl<S, A: Action<S>> BufferedActor<S, A> {
    /// Creates an actor with `pool_size` pre-allocated actions that runs at
    /// most about `batch_size` actions per drain.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidActorSizing`] if either size is zero or the pool
    /// does not fit 32-bit slot indices.
    pub fn new(state: S, pool_size: usize, batch_size: usize) -> Result<Self, ConfigError> {
        if pool_size == 0 || pool_size >= NIL as usize {
            return Err(ConfigError::InvalidActorSizing { what: "pool size" });
        }
        if batch_size == 0 {
            return Err(ConfigError::InvalidActorSizing { what: "batch size" });
        }

        // Every slot starts on the free list, chained in index order
        let slots: Box<[Slot<A>]> = (0..pool_size)
            .map(|i| Slot {
                action: UnsafeCell::new(A::default()),
                next: AtomicU32::new(if i + 1 < pool_size { i as u32 + 1 } else { NIL }),
            })
            .collect();

        Ok(Self {
            state: Mutex::new(state),
            slots,
            free_top: CacheAligned::new(AtomicU64::new(pack_free(0, 0))),
            scheduled_top: CacheAligned::new(AtomicU32::new(NIL)),
            batch_size,
            total_submitted: AtomicU64::new(0),
            total_executed: AtomicU64::new(0),
            overflow_allocations: AtomicU64::new(0),
            batch_limit_hits: AtomicU64::new(0),
        })
    }

    /// Takes an action from the pool, or allocates an overflow action if the
    /// pool is empty.
    pub fn get_action_from_pool(&self) -> PooledAction<'_, S, A> {
        let kind = match self.pop_free() {
            Some(index) => Kind::Slot(index),
            None => {
                let previous = self.overflow_allocations.fetch_add(1, Ordering::Relaxed);
                if previous == 0 {
                    warn!(
                        "Buffered actor pool of {} actions exhausted, allocating overflow action",
                        self.slots.len()
                    );
                } else {
                    debug!("Buffered actor overflow allocation #{}", previous + 1);
                }
                Kind::Overflow(Box::default())
            }
        };
        PooledAction { actor: self, kind }
    }

    /// Queues `action` and runs queued actions if the state lock is free.
    ///
    /// Pooled actions never wait: if another thread holds the lock, that
    /// thread (or the next one to take it) runs the action. Overflow actions
    /// wait for the lock.
    pub fn submit_or_run_exclusively(&self, action: PooledAction<'_, S, A>) {
        self.total_submitted.fetch_add(1, Ordering::Relaxed);

        match action.detach() {
            Kind::Slot(index) => {
                self.push_scheduled(index);
                // Pairs with the fence after unlocking in `drain_and_release`
                fence(Ordering::SeqCst);
                if let Some(guard) = self.state.try_lock() {
                    self.drain_and_release(guard);
                }
            }
            Kind::Overflow(mut boxed) => {
                let mut guard = self.state.lock();
                self.drain(&mut *guard, usize::MAX);
                boxed.run(&mut *guard);
                self.total_executed.fetch_add(1, Ordering::Relaxed);
                self.drain_and_release(guard);
            }
            Kind::Detached => {}
        }
    }

    /// Runs every queued action, then `f`, under the state lock.
    ///
    /// Blocks while another thread is draining.
    pub fn run_exclusively<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut S) -> R,
    {
        let mut guard = self.state.lock();
        self.drain(&mut *guard, usize::MAX);
        f(&mut *guard)
    }

    /// Counters since creation.
    pub fn stats(&self) -> ActorStats {
        ActorStats {
            pool_size: self.slots.len(),
            batch_size: self.batch_size,
            total_submitted: self.total_submitted.load(Ordering::Relaxed),
            total_executed: self.total_executed.load(Ordering::Relaxed),
            overflow_allocations: self.overflow_allocations.load(Ordering::Relaxed),
            batch_limit_hits: self.batch_limit_hits.load(Ordering::Relaxed),
        }
    }

    /// Drains with the batch cap, releases the lock and takes it again while
    /// work keeps arriving.
    fn drain_and_release<'a>(&'a self, mut guard: MutexGuard<'a, S>) {
        loop {
            let capped = self.drain(&mut *guard, self.batch_size);
            drop(guard);

            if capped {
                self.batch_limit_hits.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Buffered actor drain stopped at batch cap of {}",
                    self.batch_size
                );
                return;
            }

            // A writer whose try_lock failed before we unlocked has already
            // pushed; it is visible here.
            fence(Ordering::SeqCst);
            if self.scheduled_top.load(Ordering::Acquire) == NIL {
                return;
            }
            match self.state.try_lock() {
                Some(next) => guard = next,
                None => return,
            }
        }
    }

    /// Runs queued actions in submission order. Stops between two takes of
    /// the queue once `limit` actions ran; returns whether work was left.
    fn drain(&self, state: &mut S, limit: usize) -> bool {
        let mut executed = 0usize;

        loop {
            let top = self.scheduled_top.swap(NIL, Ordering::AcqRel);
            if top == NIL {
                break;
            }

            // Reverse the LIFO chain into submission order
            let mut oldest = NIL;
            let mut cursor = top;
            while cursor != NIL {
                let slot = &self.slots[cursor as usize];
                let next = slot.next.load(Ordering::Relaxed);
                slot.next.store(oldest, Ordering::Relaxed);
                oldest = cursor;
                cursor = next;
            }

            cursor = oldest;
            while cursor != NIL {
                let slot = &self.slots[cursor as usize];
                let next = slot.next.load(Ordering::Relaxed);
                // SAFETY: the index came off the scheduled stack and we hold
                // the state lock, so we are the slot's only owner.
                unsafe { (*slot.action.get()).run(state) };
                self.push_free(cursor);
                executed += 1;
                cursor = next;
            }

            if executed >= limit {
                break;
            }
        }

        if executed > 0 {
            self.total_executed
                .fetch_add(executed as u64, Ordering::Relaxed);
        }
        executed >= limit && self.scheduled_top.load(Ordering::Acquire) != NIL
    }

    fn push_scheduled(&self, index: u32) {
        let slot = &self.slots[index as usize];
        let mut top = self.scheduled_top.load(Ordering::Relaxed);
        loop {
            slot.next.store(top, Ordering::Relaxed);
            match self.scheduled_top.compare_exchange_weak(
                top,
                index,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => top = actual,
            }
        }
    }

    fn pop_free(&self) -> Option<u32> {
        let mut current = self.free_top.load(Ordering::Acquire);
        loop {
            let (tag, index) = unpack_free(current);
            if index == NIL {
                return None;
            }
            // May read a stale link if the slot was popped concurrently;
            // the tag makes the CAS below fail in that case.
            let next = self.slots[index as usize].next.load(Ordering::Relaxed);
            match self.free_top.compare_exchange_weak(
                current,
                pack_free(tag.wrapping_add(1), next),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(index),
                Err(actual) => current = actual,
            }
        }
    }

    fn push_free(&self, index: u32) {
        let slot = &self.slots[index as usize];
        let mut current = self.free_top.load(Ordering::Relaxed);
        loop {
            let (tag, top) = unpack_free(current);
            slot.next.store(top, Ordering::Relaxed);
            match self.free_top.compare_exchange_weak(
                current,
                pack_free(tag.wrapping_add(1), index),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    #[inline]
    fn slot_action(&self, index: u32) -> *mut A {
        self.slots[index as usize].action.get()
    }
}

impl<S, A> fmt::Debug for BufferedActor<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedActor")
            .field("pool_size", &self.slots.len())
            .field("batch_size", &self.batch_size)
            .field(
                "total_submitted",
                &self.total_submitted.load(Ordering::Relaxed),
            )
            .field(
                "overflow_allocations",
                &self.overflow_allocations.load(Ordering::Relaxed),
            )
            .finish()
    }
}

enum Kind<A> {
    Slot(u32),
    Overflow(Box<A>),
    Detached,
}

/// An action taken from a [`BufferedActor`]'s pool, ready to be filled in.
///
/// Dropping it without submitting returns the slot to the pool.
pub struct PooledAction<'a, S, A: Action<S>> {
    actor: &'a BufferedActor<S, A>,
    kind: Kind<A>,
}

impl<S, A: Action<S>> PooledAction<'_, S, A> {
    /// Whether the pool was empty and this action lives on the heap.
    pub fn is_overflow(&self) -> bool {
        matches!(self.kind, Kind::Overflow(_))
    }

    fn detach(mut self) -> Kind<A> {
        std::mem::replace(&mut self.kind, Kind::Detached)
    }
}

impl<S, A: Action<S>> Deref for PooledAction<'_, S, A> {
    type Target = A;

    fn deref(&self) -> &A {
        match &self.kind {
            // SAFETY: this handle owns the slot until it is submitted.
            Kind::Slot(index) => unsafe { &*self.actor.slot_action(*index) },
            Kind::Overflow(boxed) => boxed,
            Kind::Detached => unreachable!("pooled action used after submission"),
        }
    }
}

impl<S, A: Action<S>> DerefMut for PooledAction<'_, S, A> {
    fn deref_mut(&mut self) -> &mut A {
        match &mut self.kind {
            // SAFETY: this handle owns the slot until it is submitted.
            Kind::Slot(index) => unsafe { &mut *self.actor.slot_action(*index) },
            Kind::Overflow(boxed) => boxed,
            Kind::Detached => unreachable!("pooled action used after submission"),
        }
    }
}

impl<S, A: Action<S>> fmt::Debug for PooledAction<'_, S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            Kind::Slot(index) => format!("slot {}", index),
            Kind::Overflow(_) => "overflow".to_string(),
            Kind::Detached => "detached".to_string(),
        };
        f.debug_struct("PooledAction").field("kind", &kind).finish()
    }
}

impl<S, A: Action<S>> Drop for PooledAction<'_, S, A> {
    fn drop(&mut self) {
        if let Kind::Slot(index) = self.kind {
            self.actor.push_free(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[derive(Default)]
    struct Add(i64);

    impl Action<i64> for Add {
        fn run(&mut self, state: &mut i64) {
            *state += self.0;
        }
    }

    #[derive(Default)]
    struct Record(u32);

    impl Action<Vec<u32>> for Record {
        fn run(&mut self, state: &mut Vec<u32>) {
            state.push(self.0);
        }
    }

    fn submit(actor: &BufferedActor<i64, Add>, delta: i64) {
        let mut action = actor.get_action_from_pool();
        action.0 = delta;
        actor.submit_or_run_exclusively(action);
    }

    #[test]
    fn test_invalid_sizing() {
        assert_eq!(
            BufferedActor::<i64, Add>::new(0, 0, 10).err(),
            Some(ConfigError::InvalidActorSizing { what: "pool size" })
        );
        assert_eq!(
            BufferedActor::<i64, Add>::new(0, 4, 0).err(),
            Some(ConfigError::InvalidActorSizing { what: "batch size" })
        );
    }

    #[test]
    fn test_uncontended_submit_runs_immediately() {
        let actor = BufferedActor::<i64, Add>::new(0, 4, 16).unwrap();
        submit(&actor, 5);
        submit(&actor, 7);

        // Nothing left queued, the state already holds both
        assert_eq!(*actor.state.lock(), 12);
        let stats = actor.stats();
        assert_eq!(stats.total_submitted, 2);
        assert_eq!(stats.total_executed, 2);
        assert_eq!(stats.overflow_allocations, 0);
    }

    #[test]
    fn test_fifo_order_while_lock_is_held() {
        let actor = BufferedActor::<Vec<u32>, Record>::new(Vec::new(), 8, 16).unwrap();

        let guard = actor.state.lock();
        for i in 1..=5 {
            let mut action = actor.get_action_from_pool();
            action.0 = i;
            // try_lock fails, the action stays queued
            actor.submit_or_run_exclusively(action);
        }
        assert_eq!(actor.stats().total_executed, 0);
        drop(guard);

        let seen = actor.run_exclusively(|state| state.clone());
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_pool_exhaustion_falls_back_to_overflow() {
        let actor = BufferedActor::<i64, Add>::new(0, 2, 16).unwrap();

        let mut a = actor.get_action_from_pool();
        let mut b = actor.get_action_from_pool();
        let mut c = actor.get_action_from_pool();
        assert!(!a.is_overflow());
        assert!(!b.is_overflow());
        assert!(c.is_overflow());

        a.0 = 1;
        b.0 = 10;
        c.0 = 100;
        actor.submit_or_run_exclusively(a);
        actor.submit_or_run_exclusively(b);
        actor.submit_or_run_exclusively(c);

        assert_eq!(actor.run_exclusively(|state| *state), 111);
        assert_eq!(actor.stats().overflow_allocations, 1);

        // Slots were returned
        assert!(!actor.get_action_from_pool().is_overflow());
    }

    #[test]
    fn test_overflow_drains_queue_first() {
        let actor = BufferedActor::<Vec<u32>, Record>::new(Vec::new(), 1, 16).unwrap();

        let guard = actor.state.lock();
        let mut queued = actor.get_action_from_pool();
        queued.0 = 1;
        actor.submit_or_run_exclusively(queued);
        drop(guard);

        // Queued action is back in the pool only after the drain, so the pool
        // is empty here and the next action overflows
        let mut overflow = actor.get_action_from_pool();
        assert!(overflow.is_overflow());
        overflow.0 = 2;
        actor.submit_or_run_exclusively(overflow);

        assert_eq!(actor.run_exclusively(|state| state.clone()), vec![1, 2]);
    }

    #[test]
    fn test_dropped_action_returns_to_pool() {
        let actor = BufferedActor::<i64, Add>::new(0, 1, 16).unwrap();
        {
            let _unused = actor.get_action_from_pool();
        }
        assert!(!actor.get_action_from_pool().is_overflow());
        assert_eq!(actor.stats().overflow_allocations, 0);
    }

    #[test]
    fn test_concurrent_submissions_all_applied_once() {
        let actor = Arc::new(BufferedActor::<i64, Add>::new(0, 16, 64).unwrap());
        let mut handles = vec![];

        for _ in 0..8 {
            let actor = actor.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..10_000 {
                    submit(&actor, 1);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(actor.run_exclusively(|state| *state), 80_000);
        let stats = actor.stats();
        assert_eq!(stats.total_submitted, 80_000);
        assert_eq!(stats.total_executed, 80_000);
        assert_eq!(stats.pending(), 0);
    }

    #[test]
    fn test_drain_reports_remaining_work() {
        let actor = BufferedActor::<i64, Add>::new(0, 4, 1).unwrap();
        let mut guard = actor.state.lock();
        for _ in 0..3 {
            submit(&actor, 2);
        }

        // One take grabs everything queued, nothing is left over
        assert!(!actor.drain(&mut *guard, 1));
        assert_eq!(*guard, 6);
    }

    #[test]
    fn test_submit_drains_backlog_and_releases_lock() {
        let actor = BufferedActor::<i64, Add>::new(0, 8, 2).unwrap();

        let guard = actor.state.lock();
        for _ in 0..5 {
            submit(&actor, 3);
        }
        drop(guard);

        // The next writer finds the lock free and runs the whole backlog
        submit(&actor, 1);
        assert!(actor.state.try_lock().is_some());
        assert_eq!(*actor.state.lock(), 16);
        assert_eq!(actor.stats().pending(), 0);
    }

    #[test]
    fn test_pooled_action_debug() {
        let actor = BufferedActor::<i64, Add>::new(0, 1, 4).unwrap();
        let pooled = actor.get_action_from_pool();
        let overflow = actor.get_action_from_pool();
        assert_eq!(format!("{:?}", pooled), "PooledAction { kind: \"slot 0\" }");
        assert!(format!("{:?}", overflow).contains("overflow"));
    }

    #[test]
    fn test_free_list_packing() {
        assert_eq!(unpack_free(pack_free(3, 7)), (3, 7));
        assert_eq!(unpack_free(pack_free(u32::MAX, NIL)), (u32::MAX, NIL));
    }
}
