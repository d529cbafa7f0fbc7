//! Object store abstraction used by the offload tier.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use derivforge_common::{Error, Result};
use parking_lot::RwLock;

/// The subset of an S3-compatible API the offload tier needs.
pub trait ObjectStore: Send + Sync {
    /// Whether an object exists under `key`.
    fn exists(&self, key: &str) -> Result<bool>;

    /// Upload a local file under `key`.
    fn put_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
        cache_control: &str,
    ) -> Result<()>;

    /// Time-limited GET URL for `key`.
    fn presigned_get(&self, key: &str, ttl: Duration) -> Result<String>;
}

/// A stored object in [`MemoryObjectStore`].
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
    pub cache_control: String,
}

/// In-memory object store for testing.
///
/// Counts existence checks and uploads so callers can assert on remote
/// traffic.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, StoredObject>>,
    exists_calls: AtomicUsize,
    put_calls: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly.
    pub fn insert(&self, key: &str, data: impl Into<Vec<u8>>) {
        self.objects.write().insert(
            key.to_string(),
            StoredObject {
                data: data.into(),
                content_type: "application/octet-stream".to_string(),
                cache_control: String::new(),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// Make every subsequent call fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::offload_failed("memory store unavailable"));
        }
        Ok(())
    }
}

impl ObjectStore for MemoryObjectStore {
    fn exists(&self, key: &str) -> Result<bool> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.objects.read().contains_key(key))
    }

    fn put_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
        cache_control: &str,
    ) -> Result<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let data = fs::read(path)?;
        self.objects.write().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
                cache_control: cache_control.to_string(),
            },
        );
        Ok(())
    }

    fn presigned_get(&self, key: &str, ttl: Duration) -> Result<String> {
        self.check()?;
        Ok(format!(
            "memory://localhost/{key}?expires={}&signature=mock",
            ttl.as_secs()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_memory_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.jpg");
        fs::write(&file, b"jpeg").unwrap();

        let store = MemoryObjectStore::new();
        assert!(!store.exists("p/thumbs/a.jpg").unwrap());
        store
            .put_file("p/thumbs/a.jpg", &file, "image/jpeg", "public, max-age=60")
            .unwrap();
        assert!(store.exists("p/thumbs/a.jpg").unwrap());

        let object = store.get("p/thumbs/a.jpg").unwrap();
        assert_eq!(object.data, b"jpeg");
        assert_eq!(object.content_type, "image/jpeg");
        assert_eq!(store.exists_calls(), 2);
        assert_eq!(store.put_calls(), 1);
    }

    #[test]
    fn test_presigned_url_mentions_key_and_expiry() {
        let store = MemoryObjectStore::new();
        let url = store.presigned_get("k.mp4", Duration::from_secs(3600)).unwrap();
        assert!(url.contains("k.mp4"));
        assert!(url.contains("expires=3600"));
    }

    #[test]
    fn test_failing_store() {
        let store = MemoryObjectStore::new();
        store.set_failing(true);
        assert_matches!(store.exists("x"), Err(Error::OffloadFailed(_)));
    }
}
