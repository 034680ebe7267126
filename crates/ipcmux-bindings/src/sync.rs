//! Blocking waits that keep dispatching sync messages.
//!
//! Every thread has one [`SyncRegistry`]. Endpoints owned by the thread
//! register an event with it; the router signals the event when a sync
//! message for the endpoint is queued. A thread blocked in a sync call waits
//! on the registry, and each time an eligible event is signaled it runs that
//! event's handler inline, which dispatches one queued sync message. This is
//! what lets two peers make nested sync calls without deadlocking.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

/// Identifies one registered event within its registry.
pub type SyncKey = u64;

type Handler = Arc<dyn Fn() + Send + Sync>;

struct Registration {
    handler: Handler,
    /// Runs during any wait on this thread, not only waits that name it.
    wake_any: bool,
}

#[derive(Default)]
struct RegistryState {
    next_key: SyncKey,
    registrations: HashMap<SyncKey, Registration>,
    signaled: HashSet<SyncKey>,
}

/// Per-thread set of sync events.
#[derive(Default)]
pub struct SyncRegistry {
    state: Mutex<RegistryState>,
    cond: Condvar,
}

thread_local! {
    static CURRENT: Arc<SyncRegistry> = Arc::new(SyncRegistry::default());
}

impl SyncRegistry {
    /// The calling thread's registry.
    pub fn current() -> Arc<SyncRegistry> {
        CURRENT.with(Arc::clone)
    }

    /// Register `handler` and return the event that triggers it.
    pub fn register(
        self: &Arc<Self>,
        handler: impl Fn() + Send + Sync + 'static,
        wake_any: bool,
    ) -> SyncEvent {
        let mut state = self.state.lock();
        state.next_key += 1;
        let key = state.next_key;
        state.registrations.insert(
            key,
            Registration {
                handler: Arc::new(handler),
                wake_any,
            },
        );
        SyncEvent {
            registry: Arc::clone(self),
            key,
        }
    }

    fn unregister(&self, key: SyncKey) {
        let mut state = self.state.lock();
        state.registrations.remove(&key);
        state.signaled.remove(&key);
    }

    fn signal(&self, key: SyncKey) {
        let mut state = self.state.lock();
        if state.registrations.contains_key(&key) {
            state.signaled.insert(key);
            self.cond.notify_all();
        }
    }

    /// Wake waiters so they re-check their stop flags.
    pub fn notify(&self) {
        let _state = self.state.lock();
        self.cond.notify_all();
    }

    /// Block until any flag in `stop` is set, running handlers for signaled
    /// events in `own` or registered as `wake_any` meanwhile.
    ///
    /// Stop flags are checked before handlers, so a ready reply wins over a
    /// sync message that became ready at the same time. Whoever sets a stop
    /// flag must call [`SyncRegistry::notify`] afterwards.
    pub fn wait(&self, own: &[SyncKey], stop: &[&AtomicBool]) {
        let stopped = || stop.iter().any(|flag| flag.load(Ordering::Acquire));
        let mut state = self.state.lock();
        loop {
            if stopped() {
                return;
            }
            let ready = state.signaled.iter().copied().find(|key| {
                state
                    .registrations
                    .get(key)
                    .is_some_and(|reg| reg.wake_any || own.contains(key))
            });
            match ready {
                Some(key) => {
                    state.signaled.remove(&key);
                    let handler = state
                        .registrations
                        .get(&key)
                        .map(|reg| Arc::clone(&reg.handler));
                    drop(state);
                    if let Some(handler) = handler {
                        trace!(key, "running sync handler");
                        handler();
                    }
                    state = self.state.lock();
                }
                None => self.cond.wait(&mut state),
            }
        }
    }
}

/// A registered event. Dropping it unregisters the handler.
pub struct SyncEvent {
    registry: Arc<SyncRegistry>,
    key: SyncKey,
}

impl SyncEvent {
    pub fn key(&self) -> SyncKey {
        self.key
    }

    pub fn registry(&self) -> &Arc<SyncRegistry> {
        &self.registry
    }

    /// Mark the event ready. Safe from any thread.
    pub fn signal(&self) {
        self.registry.signal(self.key);
    }
}

impl Drop for SyncEvent {
    fn drop(&mut self) {
        self.registry.unregister(self.key);
    }
}

impl std::fmt::Debug for SyncEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEvent").field("key", &self.key).finish()
    }
}
