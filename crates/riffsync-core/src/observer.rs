//! Token-based observer registry
//!
//! Used by the resource manager for its state-change and error observers.
//! Observers are stored in an id-keyed table so removal is stable while a
//! notification is in progress: `notify` snapshots the table, releases the
//! lock, then invokes each observer inside `catch_unwind`.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type ObserverFn<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Tokens are unique across every registry, so an owner of several
/// registries can route a single `unregister` call to whichever one holds it
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Handle returned by `register`; pass it back to `unregister`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverToken(u64);

pub struct ObserverRegistry<T> {
    /// Log tag for failures, e.g. "state-change"
    label: &'static str,
    observers: Mutex<Vec<(u64, ObserverFn<T>)>>,
}

impl<T> ObserverRegistry<T> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn register<F>(&self, observer: F) -> ObserverToken
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(observer)));
        ObserverToken(id)
    }

    /// Returns false if the token was already removed
    pub fn unregister(&self, token: ObserverToken) -> bool {
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(id, _)| *id != token.0);
        observers.len() != before
    }

    /// Invoke every observer with `value`; returns how many panicked
    pub fn notify(&self, value: &T) -> usize {
        let snapshot: Vec<ObserverFn<T>> = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, f)| Arc::clone(f))
            .collect();

        let mut failures = 0;
        for observer in snapshot {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| observer(value))) {
                failures += 1;
                log::error!(
                    "{} observer panicked: {}",
                    self.label,
                    panic_message(payload.as_ref())
                );
            }
        }
        failures
    }

    pub fn clear(&self) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_panicking_observer_does_not_stop_others() {
        let registry: ObserverRegistry<u32> = ObserverRegistry::new("test");
        let seen = Arc::new(AtomicUsize::new(0));

        registry.register(|_| panic!("boom"));
        let seen_clone = Arc::clone(&seen);
        registry.register(move |v| {
            seen_clone.fetch_add(*v as usize, Ordering::SeqCst);
        });

        assert_eq!(registry.notify(&3), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry: ObserverRegistry<()> = ObserverRegistry::new("test");
        let token = registry.register(|_| {});
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(token));
        assert!(!registry.unregister(token));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_tokens_are_unique_across_registries() {
        let a: ObserverRegistry<()> = ObserverRegistry::new("a");
        let b: ObserverRegistry<()> = ObserverRegistry::new("b");
        let token_a = a.register(|_| {});
        let token_b = b.register(|_| {});
        assert_ne!(token_a, token_b);
        assert!(!a.unregister(token_b));
        assert!(b.unregister(token_b));
    }

    #[test]
    fn test_observer_may_unregister_itself_during_notify() {
        let registry: Arc<ObserverRegistry<()>> = Arc::new(ObserverRegistry::new("test"));
        let token_slot: Arc<Mutex<Option<ObserverToken>>> = Arc::new(Mutex::new(None));

        let registry_clone = Arc::clone(&registry);
        let slot_clone = Arc::clone(&token_slot);
        let token = registry.register(move |_| {
            if let Some(token) = slot_clone.lock().unwrap().take() {
                registry_clone.unregister(token);
            }
        });
        *token_slot.lock().unwrap() = Some(token);

        registry.notify(&());
        assert!(registry.is_empty());
    }
}
