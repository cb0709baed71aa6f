//! Copy-on-write map primitive.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;

/// A map whose readers get an immutable `Arc<HashMap>` snapshot.
///
/// Every mutation clones the current map, applies the change, and swaps the
/// `Arc` under a short write lock. Readers never block on writers beyond the
/// swap itself, and a snapshot taken before a mutation keeps observing the
/// pre-mutation map. Mutation cost is O(map), which is fine at human-session
/// scale; read and snapshot cost is what matters here.
#[derive(Debug)]
pub struct CowMap<K, V> {
    inner: RwLock<Arc<HashMap<K, V>>>,
}

impl<K, V> Default for CowMap<K, V> {
    fn default() -> Self {
        Self { inner: RwLock::new(Arc::new(HashMap::new())) }
    }
}

impl<K, V> CowMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Current map snapshot. Cheap (`Arc` clone).
    #[must_use]
    pub fn load(&self) -> Arc<HashMap<K, V>> {
        Arc::clone(&self.inner.read())
    }

    /// Clone of the value under `key`, if present.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.read().get(key).cloned()
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.read().contains_key(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Insert, replacing the whole map. Returns the previous value.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let mut guard = self.inner.write();
        let mut next = (**guard).clone();
        let previous = next.insert(key, value);
        *guard = Arc::new(next);
        previous
    }

    /// Remove, replacing the whole map. Returns the removed value.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.write();
        if !guard.contains_key(key) {
            return None;
        }
        let mut next = (**guard).clone();
        let removed = next.remove(key);
        *guard = Arc::new(next);
        removed
    }

    /// Keep only entries for which `keep` returns true. Returns the number
    /// of entries removed.
    pub fn retain(&self, keep: impl Fn(&K, &V) -> bool) -> usize {
        let mut guard = self.inner.write();
        let mut next = (**guard).clone();
        let before = next.len();
        next.retain(|k, v| keep(k, v));
        let removed = before - next.len();
        if removed > 0 {
            *guard = Arc::new(next);
        }
        removed
    }

    /// Read-modify-write on a single entry. `update` receives the current
    /// value (if any) and returns the value to store.
    pub fn upsert(&self, key: K, update: impl FnOnce(Option<&V>) -> V) {
        let mut guard = self.inner.write();
        let mut next = (**guard).clone();
        let value = update(next.get(&key));
        let _ = next.insert(key, value);
        *guard = Arc::new(next);
    }
}
