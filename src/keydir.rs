//! Concurrent, sharded in-memory index from key bytes to their most recent
//! on-disk location.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

/// Number of shards. Bounds reader contention to roughly 1/N of the map;
/// writers still serialize within a shard, which is fine since the engine
/// already serializes all writes globally.
const SHARDS: usize = 512;

/// Location of a key's most recent live value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Item {
    pub file_id: u32,
    pub value_size: u32,
    pub value_offset: u64,
    pub timestamp: u32,
}

#[derive(Default)]
struct Shard {
    map: RwLock<HashMap<Vec<u8>, Item>>,
}

/// Maps live keys to their [`Item`] locator. Safe for concurrent readers and
/// writers across distinct keys; writers to the same key are mutually
/// exclusive.
pub struct Keydir {
    shards: Vec<Shard>,
}

impl Keydir {
    pub fn new() -> Self {
        let mut shards = Vec::with_capacity(SHARDS);
        shards.resize_with(SHARDS, Shard::default);
        Self { shards }
    }

    fn shard(&self, key: &[u8]) -> &Shard {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARDS]
    }

    /// Looks up `key`, returning a copy of its locator. Items are small and
    /// value-typed, so they're copied out under the shard lock rather than
    /// exposing a reference that would outlive it.
    pub fn get(&self, key: &[u8]) -> Option<Item> {
        self.shard(key).map.read().unwrap().get(key).copied()
    }

    /// Inserts or replaces the locator for `key`.
    pub fn put(&self, key: &[u8], item: Item) {
        self.shard(key).map.write().unwrap().insert(key.to_vec(), item);
    }

    /// Removes `key` if present; a no-op otherwise.
    pub fn delete(&self, key: &[u8]) {
        self.shard(key).map.write().unwrap().remove(key);
    }

    /// Total number of live keys. Shards are visited serially under their
    /// own shared locks; the result is not required to be a single atomic
    /// snapshot across shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.map.read().unwrap().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Keydir {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(file_id: u32) -> Item {
        Item { file_id, value_size: 1, value_offset: 2, timestamp: 3 }
    }

    #[test]
    fn get_missing() {
        let kd = Keydir::new();
        assert_eq!(kd.len(), 0);
        assert!(kd.get(b"key").is_none());
    }

    #[test]
    fn put_then_get() {
        let kd = Keydir::new();
        kd.put(b"key", item(1));
        assert_eq!(kd.len(), 1);
        assert_eq!(kd.get(b"key"), Some(item(1)));
    }

    #[test]
    fn put_overwrites() {
        let kd = Keydir::new();
        kd.put(b"key", item(1));
        kd.put(b"key", item(2));
        assert_eq!(kd.len(), 1);
        assert_eq!(kd.get(b"key"), Some(item(2)));
    }

    #[test]
    fn delete_removes() {
        let kd = Keydir::new();
        kd.delete(b"key"); // deleting an absent key is a no-op
        kd.put(b"key", item(1));
        assert_eq!(kd.len(), 1);
        kd.delete(b"key");
        assert_eq!(kd.len(), 0);
        assert!(kd.get(b"key").is_none());
    }

    #[test]
    fn len_counts_across_shards() {
        let kd = Keydir::new();
        for i in 0..1000u32 {
            kd.put(i.to_string().as_bytes(), item(i));
        }
        assert_eq!(kd.len(), 1000);
    }

    #[test]
    fn concurrent_put_get_disjoint_keys() {
        use std::sync::Arc;
        let kd = Arc::new(Keydir::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let kd = Arc::clone(&kd);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("{t}-{i}");
                        kd.put(key.as_bytes(), item(i));
                        assert_eq!(kd.get(key.as_bytes()), Some(item(i)));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(kd.len(), 8 * 500);
    }
}
