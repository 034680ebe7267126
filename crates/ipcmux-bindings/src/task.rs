//! Where endpoint clients run.
//!
//! Each endpoint client is pinned to one [`TaskRunner`]; the router posts
//! dispatch work to it and never calls the client from another thread.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{BindingsError, Result};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A sequence of tasks bound to one thread.
pub trait TaskRunner: Send + Sync {
    /// Whether the calling thread is the one this runner executes on.
    fn runs_tasks_on_current_thread(&self) -> bool;

    /// Queue `task`. Returns `false` if the runner has shut down.
    fn post_task(&self, task: Task) -> bool;
}

/// A dedicated worker thread fed through a channel.
pub struct ThreadTaskRunner {
    name: String,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadTaskRunner {
    /// Spawn the worker thread.
    pub fn new(name: impl Into<String>) -> Result<Arc<Self>> {
        let name = name.into();
        let (sender, receiver) = mpsc::channel::<Task>();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    task();
                }
            })
            .map_err(|err| BindingsError::Transport(err.into()))?;
        debug!(runner = %name, "task runner started");

        Ok(Arc::new(Self {
            name,
            sender: Mutex::new(Some(sender)),
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `f` on the worker and wait for its result.
    ///
    /// # Panics
    ///
    /// Panics when called from the worker itself, which would never return.
    pub fn run_blocking<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        assert!(
            !self.runs_tasks_on_current_thread(),
            "run_blocking called on its own runner {}",
            self.name
        );
        let (tx, rx) = mpsc::sync_channel(1);
        let posted = self.post_task(Box::new(move || {
            let _ = tx.send(f());
        }));
        if !posted {
            return Err(BindingsError::TaskRunnerStopped);
        }
        rx.recv().map_err(|_| BindingsError::TaskRunnerStopped)
    }

    /// Stop accepting tasks, let queued ones finish and join the worker.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if self.runs_tasks_on_current_thread() {
                // Joining ourselves would deadlock; the loop ends on its own.
                return;
            }
            if handle.join().is_err() {
                warn!(runner = %self.name, "task runner panicked");
            }
        }
    }
}

impl TaskRunner for ThreadTaskRunner {
    fn runs_tasks_on_current_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    fn post_task(&self, task: Task) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(task).is_ok(),
            None => false,
        }
    }
}

impl Drop for ThreadTaskRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ThreadTaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadTaskRunner")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn tasks_run_in_order_on_the_worker() {
        let runner = ThreadTaskRunner::new("order").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let seen = Arc::clone(&seen);
            assert!(runner.post_task(Box::new(move || seen.lock().push(i))));
        }
        let probe = Arc::clone(&runner);
        let on_worker = runner
            .run_blocking(move || probe.runs_tasks_on_current_thread())
            .unwrap();
        assert!(on_worker);
        assert!(!runner.runs_tasks_on_current_thread());
        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn shutdown_drains_and_rejects() {
        let runner = ThreadTaskRunner::new("drain").unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let count = Arc::clone(&count);
            runner.post_task(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        runner.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 5);
        assert!(!runner.post_task(Box::new(|| {})));
        assert!(matches!(
            runner.run_blocking(|| ()),
            Err(BindingsError::TaskRunnerStopped)
        ));
    }
}
