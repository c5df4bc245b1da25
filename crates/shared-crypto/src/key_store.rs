//! # Group Key Store
//!
//! Keys are shared across every chain and subscription of a stream, so the
//! store must support concurrent reads and inserts. Inserting an id that is
//! already present is an idempotent no-op.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::GroupKey;

/// `(stream id, key id) -> GroupKey` storage.
pub trait GroupKeyStore: Send + Sync {
    /// Look up a key.
    fn get(&self, stream_id: &str, key_id: &str) -> Option<GroupKey>;

    /// Insert a key. Returns `false` (and keeps the existing key) if the id is
    /// already stored for the stream.
    fn add(&self, stream_id: &str, key: GroupKey) -> bool;

    /// The key the local publisher currently encrypts `stream_id` with.
    fn current(&self, stream_id: &str) -> Option<GroupKey>;

    /// Store `key` (if new) and make it the current key of `stream_id`.
    fn set_current(&self, stream_id: &str, key: GroupKey);
}

/// Concurrent in-memory [`GroupKeyStore`].
#[derive(Debug, Default)]
pub struct InMemoryGroupKeyStore {
    keys: DashMap<(String, String), GroupKey>,
    current: DashMap<String, String>,
}

impl InMemoryGroupKeyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys across all streams.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no key is stored.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl GroupKeyStore for InMemoryGroupKeyStore {
    fn get(&self, stream_id: &str, key_id: &str) -> Option<GroupKey> {
        self.keys
            .get(&(stream_id.to_string(), key_id.to_string()))
            .map(|entry| entry.value().clone())
    }

    fn add(&self, stream_id: &str, key: GroupKey) -> bool {
        match self.keys.entry((stream_id.to_string(), key.id().to_string())) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(key);
                true
            }
        }
    }

    fn current(&self, stream_id: &str) -> Option<GroupKey> {
        let key_id = self.current.get(stream_id)?.value().clone();
        self.get(stream_id, &key_id)
    }

    fn set_current(&self, stream_id: &str, key: GroupKey) {
        let key_id = key.id().to_string();
        self.add(stream_id, key);
        self.current.insert(stream_id.to_string(), key_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get() {
        let store = InMemoryGroupKeyStore::new();
        let key = GroupKey::generate();

        assert!(store.add("stream", key.clone()));
        assert_eq!(store.get("stream", key.id()), Some(key.clone()));
        assert_eq!(store.get("other-stream", key.id()), None);
    }

    #[test]
    fn test_duplicate_add_is_noop() {
        let store = InMemoryGroupKeyStore::new();
        let first = GroupKey::new("k1", &[1u8; 32]).unwrap();
        let second = GroupKey::new("k1", &[2u8; 32]).unwrap();

        assert!(store.add("stream", first.clone()));
        assert!(!store.add("stream", second));
        assert_eq!(store.get("stream", "k1"), Some(first));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_current_key_tracking() {
        let store = InMemoryGroupKeyStore::new();
        assert!(store.current("stream").is_none());

        let k1 = GroupKey::generate();
        let k2 = GroupKey::generate();
        store.set_current("stream", k1.clone());
        store.set_current("stream", k2.clone());

        assert_eq!(store.current("stream"), Some(k2));
        assert_eq!(store.get("stream", k1.id()), Some(k1));
    }
}
