// ── Generic reactive entity collection ──
//
// Concurrent keyed storage with push-based change notification via
// `watch` channels.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

/// A reactive collection for a single entity type, keyed by the
/// bridge's external id.
///
/// Every mutation bumps a version counter and rebuilds the
/// key-ordered snapshot that subscribers receive.
pub(crate) struct EntityCollection<T: Clone + Send + Sync + 'static> {
    by_key: DashMap<String, Arc<T>>,

    /// Version counter, bumped on every mutation.
    version: watch::Sender<u64>,

    /// Full snapshot, ordered by key.
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> EntityCollection<T> {
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            by_key: DashMap::new(),
            version,
            snapshot,
        }
    }

    /// Insert or update an entity. Returns `true` if the key was new.
    pub(crate) fn upsert(&self, key: String, entity: T) -> bool {
        let is_new = self.by_key.insert(key, Arc::new(entity)).is_none();
        self.publish();
        is_new
    }

    /// Remove an entity by key. Returns the removed entity if it existed.
    pub(crate) fn remove(&self, key: &str) -> Option<Arc<T>> {
        let removed = self.by_key.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            self.publish();
        }
        removed
    }

    /// Remove every entity whose key matches `pred`, publishing once.
    pub(crate) fn remove_where(&self, pred: impl Fn(&str) -> bool) -> usize {
        let before = self.by_key.len();
        self.by_key.retain(|key, _| !pred(key));
        let removed = before - self.by_key.len();
        if removed > 0 {
            self.publish();
        }
        removed
    }

    /// Swap the whole content for `entries`, publishing once.
    pub(crate) fn replace_all(&self, entries: impl IntoIterator<Item = (String, T)>) {
        self.by_key.clear();
        for (key, entity) in entries {
            self.by_key.insert(key, Arc::new(entity));
        }
        self.publish();
    }

    pub(crate) fn get(&self, key: &str) -> Option<Arc<T>> {
        self.by_key.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes via a `watch::Receiver`.
    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn publish(&self) {
        let mut entries: Vec<(String, Arc<T>)> = self
            .by_key
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let values: Vec<Arc<T>> = entries.into_iter().map(|(_, v)| v).collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
        self.version.send_modify(|v| *v += 1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn upsert_reports_new_keys_and_bumps_version() {
        let col: EntityCollection<String> = EntityCollection::new();
        assert!(col.upsert("b".into(), "beta".into()));
        assert!(col.upsert("a".into(), "alpha".into()));
        assert!(!col.upsert("a".into(), "alpha2".into()));
        assert_eq!(col.version(), 3);
        assert_eq!(col.len(), 2);

        let snap: Vec<String> = col.snapshot().iter().map(|s| (**s).clone()).collect();
        assert_eq!(snap, vec!["alpha2".to_owned(), "beta".to_owned()]);
    }

    #[test]
    fn removing_missing_key_is_silent() {
        let col: EntityCollection<u32> = EntityCollection::new();
        col.upsert("x".into(), 1);
        let version = col.version();
        assert!(col.remove("nope").is_none());
        assert_eq!(col.version(), version);
        assert_eq!(*col.remove("x").unwrap(), 1);
        assert_eq!(col.len(), 0);
    }

    #[test]
    fn remove_where_publishes_once() {
        let col: EntityCollection<u32> = EntityCollection::new();
        col.upsert("d1/on".into(), 1);
        col.upsert("d1/bri".into(), 2);
        col.upsert("d2/on".into(), 3);
        let version = col.version();
        assert_eq!(col.remove_where(|k| k.starts_with("d1/")), 2);
        assert_eq!(col.version(), version + 1);
        assert!(col.get("d2/on").is_some());
    }

    #[test]
    fn replace_all_swaps_content() {
        let col: EntityCollection<u32> = EntityCollection::new();
        col.upsert("old".into(), 1);
        let mut rx = col.subscribe();
        col.replace_all(vec![("n1".to_owned(), 2), ("n2".to_owned(), 3)]);
        assert!(rx.has_changed().unwrap());
        let snap = rx.borrow_and_update().clone();
        assert_eq!(snap.len(), 2);
        assert!(col.get("old").is_none());
    }
}
