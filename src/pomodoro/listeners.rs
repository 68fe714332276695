use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::warn;

use super::pomodoro::Phase;

type Listener = Arc<dyn Fn(Phase) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: BTreeMap<u64, Listener>,
}

/// Callbacks fired once per completed phase.
///
/// Cloning yields another handle to the same registry, so collaborators can
/// subscribe without going through the engine.
#[derive(Clone, Default)]
pub struct FinishListeners {
    inner: Arc<Mutex<Registry>>,
}

/// Handle returned by [`FinishListeners::subscribe`].
#[derive(Debug)]
#[must_use = "dropping a Subscription keeps the listener registered"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    // Listeners never run under this lock, so a poisoned guard is still consistent.
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FinishListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Phase) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.inner);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.insert(id, Arc::new(listener));
        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Calls every listener with `finished`. A panicking listener is logged
    /// and skipped; the rest still run.
    pub fn emit(&self, finished: Phase) {
        let snapshot: Vec<Listener> = lock(&self.inner).listeners.values().cloned().collect();
        for listener in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(finished))).is_err() {
                warn!(phase = %finished, "finish listener panicked");
            }
        }
    }
}

impl Subscription {
    /// Returns false if the listener was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => lock(&registry).listeners.remove(&self.id).is_some(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_reaches_every_listener() {
        let listeners = FinishListeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let a = Arc::clone(&seen);
        let _sub_a = listeners.subscribe(move |p| a.lock().unwrap().push(("a", p)));
        let b = Arc::clone(&seen);
        let _sub_b = listeners.subscribe(move |p| b.lock().unwrap().push(("b", p)));

        listeners.emit(Phase::Work);

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec![("a", Phase::Work), ("b", Phase::Work)]);
    }

    #[test]
    fn unsubscribe_removes_only_that_listener() {
        let listeners = FinishListeners::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&count);
        let first = listeners.subscribe(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&count);
        let _second = listeners.subscribe(move |_| {
            c2.fetch_add(10, Ordering::SeqCst);
        });

        assert!(first.unsubscribe());
        listeners.emit(Phase::BreakShort);

        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let listeners = FinishListeners::new();
        let count = Arc::new(AtomicUsize::new(0));

        let _bad = listeners.subscribe(|_| panic!("boom"));
        let c = Arc::clone(&count);
        let _good = listeners.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        listeners.emit(Phase::Work);
        listeners.emit(Phase::Work);

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn listener_added_during_emit_waits_for_next_one() {
        let listeners = FinishListeners::new();
        let count = Arc::new(AtomicUsize::new(0));
        let handle = listeners.clone();
        let c = Arc::clone(&count);
        let _sub = listeners.subscribe(move |_| {
            let c = Arc::clone(&c);
            let _ = handle.subscribe(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        });

        listeners.emit(Phase::Work);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        listeners.emit(Phase::Work);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_after_registry_dropped() {
        let listeners = FinishListeners::new();
        let sub = listeners.subscribe(|_| {});
        drop(listeners);
        assert!(!sub.unsubscribe());
    }
}
