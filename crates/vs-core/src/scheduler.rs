//! Debounce scheduler
//!
//! One scheduler per controller instance. Scheduling replaces any pending
//! invocation, so a burst of calls leaves exactly one timer behind.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

pub struct Scheduler {
    runtime: Handle,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler spawning its timers on `runtime`
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            pending: Mutex::new(None),
        }
    }

    /// Run `task` after `delay`, cancelling whatever was pending.
    ///
    /// `task` runs synchronously once the timer fires; long-running work
    /// should be spawned from inside it so later calls cannot abort it.
    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let timer = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });

        if let Some(previous) = self.pending.lock().replace(timer) {
            if !previous.is_finished() {
                trace!("Coalescing pending invocation");
                previous.abort();
            }
        }
    }

    /// Cancel the pending invocation; returns whether one was waiting
    pub fn cancel_pending(&self) -> bool {
        match self.pending.lock().take() {
            Some(timer) if !timer.is_finished() => {
                timer.abort();
                true
            }
            _ => false,
        }
    }

    /// Whether an invocation is waiting for its timer
    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    /// Runtime the scheduler spawns on
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
