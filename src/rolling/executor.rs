//! # Background executors
//!
//! Phase retirement of rolling rankings (draining a recorder, folding its
//! totals into the history archive) is heavier than a normal write. The
//! writer that wins the rotation hands that work to a [`BackgroundExecutor`]
//! injected through the retention policy.
//!
//! ```text
//!     writer wins rotation CAS
//!            │
//!            ▼
//!     executor.execute(task)
//!            │
//!     ┌──────┴─────────────┐
//!     │                    │
//!     ▼                    ▼
//!  InlineExecutor     ThreadExecutor
//!  (runs now, on      (queued to a dedicated
//!   the writer)        worker thread)
//! ```
//!
//! Both executors run each task under `catch_unwind`: a failing retirement
//! is logged and never takes down the thread that happened to run it.

use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;
use tracing::{debug, error, info, warn};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs deferred rotation work.
pub trait BackgroundExecutor: Send + Sync + fmt::Debug {
    /// Runs `task` now or later. Must never panic because of the task.
    fn execute(&self, task: Task);
}

/// Runs every task immediately on the calling thread. This is the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl BackgroundExecutor for InlineExecutor {
    #[inline]
    fn execute(&self, task: Task) {
        run_guarded(task);
    }
}

/// Executes tasks on one dedicated, named worker thread.
///
/// Dropping the executor closes the queue, lets the worker finish what is
/// already queued and joins it.
///
/// ```rust
/// use rollmetrics::{BackgroundExecutor, ThreadExecutor};
/// use std::sync::mpsc;
///
/// let executor = ThreadExecutor::spawn("rotation").unwrap();
/// let (tx, rx) = mpsc::channel();
/// executor.execute(Box::new(move || tx.send(42).unwrap()));
/// assert_eq!(rx.recv().unwrap(), 42);
/// ```
pub struct ThreadExecutor {
    name: String,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ThreadExecutor {
    /// Starts the worker thread.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<Task>();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                info!("Background executor thread started");
                // Ends when every sender is gone.
                for task in rx {
                    run_guarded(task);
                }
                info!("Background executor thread stopping");
            })?;

        Ok(Self {
            name,
            sender: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stops accepting tasks, drains the queue and joins the worker.
    ///
    /// Tasks submitted afterwards run inline on the caller.
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());
        if let Some(handle) = self.handle.lock().take() {
            // The last owner may be a task running on the worker itself.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("Background executor '{}' exited abnormally", self.name);
            }
        }
    }
}

impl BackgroundExecutor for ThreadExecutor {
    fn execute(&self, task: Task) {
        let rejected = {
            let sender = self.sender.lock();
            match sender.as_ref() {
                Some(tx) => tx.send(task).err().map(|e| e.0),
                None => Some(task),
            }
        };

        if let Some(task) = rejected {
            debug!(
                "Background executor '{}' is stopped, running task inline",
                self.name
            );
            run_guarded(task);
        }
    }
}

impl fmt::Debug for ThreadExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadExecutor")
            .field("name", &self.name)
            .field("running", &self.sender.lock().is_some())
            .finish()
    }
}

impl Drop for ThreadExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs a task, catching and logging a panic instead of propagating it.
pub(crate) fn run_guarded(task: Task) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        error!("Background task panicked: {}", panic_message(&*payload));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_inline_executor_runs_immediately() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();

        InlineExecutor.execute(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_inline_executor_survives_panic() {
        InlineExecutor.execute(Box::new(|| panic!("boom")));

        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        InlineExecutor.execute(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_thread_executor_survives_panic() {
        let executor = ThreadExecutor::spawn("test-executor").unwrap();
        let (tx, rx) = mpsc::channel();

        executor.execute(Box::new(|| panic!("retirement failed")));
        executor.execute(Box::new(move || {
            tx.send(thread::current().name().map(String::from)).unwrap();
        }));

        let name = rx.recv().unwrap();
        assert_eq!(name.as_deref(), Some("test-executor"));
    }

    #[test]
    fn test_thread_executor_drains_on_shutdown() {
        let executor = ThreadExecutor::spawn("drain").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let c = counter.clone();
            executor.execute(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }
        executor.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 100);

        // After shutdown tasks run inline
        let c = counter.clone();
        executor.execute(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 101);
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*payload), "static");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*payload), "owned");

        let payload: Box<dyn Any + Send> = Box::new(5u8);
        assert_eq!(panic_message(&*payload), "<non-string panic payload>");
    }
}
