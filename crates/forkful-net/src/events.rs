//! Listener registries with explicit unsubscribe handles.
//!
//! Every `subscribe`-style call in this crate hands back a [`Subscription`].
//! Unsubscribing is idempotent and also happens when the handle is dropped,
//! so a handle stored in a struct field is released with its owner.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::warn;

/// Callback invoked with a reference to the emitted value.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

struct Registry<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// An ordered set of callbacks for one kind of event.
pub struct Listeners<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T: 'static> Listeners<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a callback. It stays registered until the returned handle is
    /// unsubscribed or dropped.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut registry = lock(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = weak.upgrade() {
                lock(&registry).entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Invoke every registered callback in registration order.
    ///
    /// Callbacks run outside the registry lock, so a callback may subscribe
    /// or unsubscribe without deadlocking. A panicking callback is logged and
    /// does not reach the emitter.
    pub fn emit(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = lock(&self.registry)
            .entries
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                warn!("Listener panicked; continuing with the remaining listeners");
            }
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.registry).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Clone for Listeners<T> {
    /// Clones share one registry.
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle returned by every subscribe call.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    remove: Mutex<Option<Box<dyn FnOnce() + Send + 'static>>>,
}

impl Subscription {
    pub(crate) fn new(remove: impl FnOnce() + Send + 'static) -> Self {
        Self {
            remove: Mutex::new(Some(Box::new(remove))),
        }
    }

    /// Stop receiving callbacks. Safe to call more than once.
    pub fn unsubscribe(&self) {
        let remove = lock(&self.remove).take();
        if let Some(remove) = remove {
            remove();
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.remove).is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_reaches_all_listeners() {
        let listeners = Listeners::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        let t1 = total.clone();
        let _a = listeners.subscribe(move |v| {
            t1.fetch_add(*v as usize, Ordering::SeqCst);
        });
        let t2 = total.clone();
        let _b = listeners.subscribe(move |v| {
            t2.fetch_add(*v as usize, Ordering::SeqCst);
        });

        listeners.emit(&3);
        assert_eq!(total.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let listeners = Listeners::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let sub = listeners.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        listeners.emit(&());
        sub.unsubscribe();
        sub.unsubscribe();
        listeners.emit(&());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!sub.is_active());
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let listeners = Listeners::<()>::new();
        {
            let _sub = listeners.subscribe(|_| {});
            assert_eq!(listeners.len(), 1);
        }
        assert_eq!(listeners.len(), 0);
    }

    #[test]
    fn test_unsubscribe_after_registry_dropped() {
        let listeners = Listeners::<()>::new();
        let sub = listeners.subscribe(|_| {});
        drop(listeners);
        sub.unsubscribe();
    }

    #[test]
    fn test_emission_order_preserved_per_listener() {
        let listeners = Listeners::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = listeners.subscribe(move |v| s.lock().unwrap().push(*v));

        for v in [1, 2, 3] {
            listeners.emit(&v);
        }
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_panicking_listener_does_not_reach_emitter() {
        let listeners: Listeners<u32> = Listeners::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let _bad = listeners.subscribe(|_| panic!("listener bug"));
        let h = hits.clone();
        let _good = listeners.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        listeners.emit(&1);
        listeners.emit(&2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
