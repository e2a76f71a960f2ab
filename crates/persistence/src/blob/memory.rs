//! In-memory blob engine.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{BlobApi, BlobError};

/// In-memory implementation of [`BlobApi`].
#[derive(Default)]
pub struct InMemoryBlob {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBlob {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every stored key, in order. Test hook.
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    /// Returns the number of stored objects. Test hook.
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// Returns `true` if no objects are stored.
    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }
}

#[async_trait]
impl BlobApi for InMemoryBlob {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), BlobError> {
        self.objects.lock().insert(key.to_string(), body);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BlobError> {
        Ok(self.objects.lock().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.objects.lock().remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, BlobError> {
        let mut objects = self.objects.lock();
        let before = objects.len();
        objects.retain(|key, _| !key.starts_with(prefix));
        Ok(before - objects.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let blob = InMemoryBlob::new();
        blob.put("a/b", b"body".to_vec()).await.unwrap();
        assert_eq!(blob.get("a/b").await.unwrap().unwrap(), b"body");
        blob.delete("a/b").await.unwrap();
        assert!(blob.get("a/b").await.unwrap().is_none());
        // absent delete is a no-op
        blob.delete("a/b").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let blob = InMemoryBlob::new();
        blob.put("x/1", vec![1]).await.unwrap();
        blob.put("x/2", vec![2]).await.unwrap();
        blob.put("y/1", vec![3]).await.unwrap();
        assert_eq!(blob.delete_prefix("x/").await.unwrap(), 2);
        assert_eq!(blob.keys(), vec!["y/1".to_string()]);
    }
}
