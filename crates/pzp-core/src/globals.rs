//! Puzzle-wide shared objects.
//!
//! Vendor SDK handles are loaded once and shared by every Piece that needs
//! them. Each entry has a user count so the last Piece to leave can dispose
//! of the SDK, and deletion listeners so Pieces learn when a handle they
//! depend on has gone away (APT cleanup disconnects every APT device).

use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

type Entry = Arc<dyn Any + Send + Sync>;
type DeletionListener = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct Inner {
    values: HashMap<String, Entry>,
    users: HashMap<String, usize>,
    listeners: Vec<DeletionListener>,
}

/// Shared name → object map with user reference counting.
#[derive(Clone, Default)]
pub struct Globals {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for Globals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Globals")
            .field("keys", &inner.values.keys().collect::<Vec<_>>())
            .field("users", &inner.users)
            .finish()
    }
}

impl Globals {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value. The user count is left alone.
    pub fn insert<V: Any + Send + Sync>(&self, key: impl Into<String>, value: V) {
        self.inner.lock().values.insert(key.into(), Arc::new(value));
    }

    /// Clone of the value stored under `key`, if present with type `V`.
    pub fn get<V: Any + Send + Sync + Clone>(&self, key: &str) -> Option<V> {
        let entry = self.inner.lock().values.get(key).cloned()?;
        entry.downcast_ref::<V>().cloned()
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().values.contains_key(key)
    }

    /// Register a user of `key`. Returns whether the value is already present,
    /// so the caller knows whether to load it.
    pub fn require(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        *inner.users.entry(key.to_string()).or_insert(0) += 1;
        inner.values.contains_key(key)
    }

    /// Drop a user of `key`. Returns true when no users remain, meaning the
    /// caller should dispose of the value.
    pub fn release(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.users.get_mut(key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                inner.users.remove(key);
                true
            }
            None => true,
        }
    }

    /// Current user count.
    pub fn users(&self, key: &str) -> usize {
        self.inner.lock().users.get(key).copied().unwrap_or(0)
    }

    /// Remove `key` and notify deletion listeners. Returns whether anything
    /// was removed.
    pub fn remove(&self, key: &str) -> bool {
        let (removed, listeners) = {
            let mut inner = self.inner.lock();
            let removed = inner.values.remove(key).is_some();
            inner.users.remove(key);
            (removed, inner.listeners.clone())
        };
        if removed {
            tracing::debug!(key, "global removed");
            for listener in &listeners {
                listener(key);
            }
        }
        removed
    }

    /// Register a listener called with the key of every removed entry.
    pub fn on_deleted(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        self.inner.lock().listeners.push(Arc::new(listener));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_insert_get_typed() {
        let globals = Globals::new();
        globals.insert("apt", Arc::new(5u32));
        assert_eq!(globals.get::<Arc<u32>>("apt").map(|v| *v), Some(5));
        assert!(globals.get::<Arc<String>>("apt").is_none());
        assert!(globals.get::<Arc<u32>>("tlpm").is_none());
    }

    #[test]
    fn test_user_counting() {
        let globals = Globals::new();
        assert!(!globals.require("tlc_sdk"));
        globals.insert("tlc_sdk", 1u8);
        assert!(globals.require("tlc_sdk"));
        assert_eq!(globals.users("tlc_sdk"), 2);

        assert!(!globals.release("tlc_sdk"));
        assert!(globals.release("tlc_sdk"));
        assert_eq!(globals.users("tlc_sdk"), 0);
    }

    #[test]
    fn test_remove_fires_listeners() {
        let globals = Globals::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let inner = globals.clone();
        globals.on_deleted(move |key| {
            assert_eq!(key, "apt");
            // listeners run outside the lock
            assert!(!inner.contains("apt"));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!globals.remove("apt"));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        globals.insert("apt", ());
        assert!(globals.remove("apt"));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
