//! In-memory object store for tests and local smoke runs.
//!
//! Presigned URLs are synthetic (`memory://` scheme); test clients "upload"
//! by calling [`MemoryObjectStore::put`] / [`MemoryObjectStore::put_part`]
//! directly, which mirrors what a real client does against a presigned URL.

use super::{CompletedPart, ObjectStat, ObjectStore, PresignedUrl};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct Inner {
    objects: HashMap<String, Vec<u8>>,
    /// upload_id -> (key, part_number -> bytes)
    multiparts: HashMap<String, (String, HashMap<i32, Vec<u8>>)>,
    next_upload_id: u64,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    inner: Mutex<Inner>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct write, standing in for a client PUT against a presigned URL.
    pub fn put(&self, key: &str, bytes: Vec<u8>) {
        let mut inner = self.lock();
        inner.objects.insert(key.to_string(), bytes);
    }

    /// Direct part write, standing in for a presigned part PUT.
    /// Returns the part's etag (hex sha256 of the part bytes).
    pub fn put_part(&self, upload_id: &str, part_number: i32, bytes: Vec<u8>) -> Result<String> {
        let etag = hex::encode(Sha256::digest(&bytes));
        let mut inner = self.lock();
        let (_, parts) = inner
            .multiparts
            .get_mut(upload_id)
            .ok_or_else(|| Error::ObjectStore(format!("unknown upload id {upload_id}")))?;
        parts.insert(part_number, bytes);
        Ok(etag)
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().objects.is_empty()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store mutex poisoned")
    }

    fn synthetic_url(kind: &str, key: &str) -> String {
        format!("memory://{kind}/{key}")
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn presign_put(
        &self,
        key: &str,
        ttl: Duration,
        _content_length: Option<u64>,
    ) -> Result<PresignedUrl> {
        Ok(PresignedUrl {
            url: Self::synthetic_url("put", key),
            expires_at: Utc::now() + ttl,
        })
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<PresignedUrl> {
        Ok(PresignedUrl {
            url: Self::synthetic_url("get", key),
            expires_at: Utc::now() + ttl,
        })
    }

    async fn initiate_multipart(&self, key: &str) -> Result<String> {
        let mut inner = self.lock();
        inner.next_upload_id += 1;
        let upload_id = format!("mem-upload-{}", inner.next_upload_id);
        inner
            .multiparts
            .insert(upload_id.clone(), (key.to_string(), HashMap::new()));
        Ok(upload_id)
    }

    async fn presign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        ttl: Duration,
    ) -> Result<PresignedUrl> {
        Ok(PresignedUrl {
            url: format!("memory://part/{key}?uploadId={upload_id}&partNumber={part_number}"),
            expires_at: Utc::now() + ttl,
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()> {
        let mut inner = self.lock();
        let (stored_key, uploaded) = inner
            .multiparts
            .remove(upload_id)
            .ok_or_else(|| Error::ObjectStore(format!("unknown upload id {upload_id}")))?;
        if stored_key != key {
            return Err(Error::ObjectStore("upload id does not match key".to_string()));
        }
        let mut assembled = Vec::new();
        for part in parts {
            let bytes = uploaded
                .get(&part.part_number)
                .ok_or_else(|| Error::ObjectStore(format!("missing part {}", part.part_number)))?;
            assembled.extend_from_slice(bytes);
        }
        inner.objects.insert(key.to_string(), assembled);
        Ok(())
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> Result<()> {
        self.lock().multiparts.remove(upload_id);
        Ok(())
    }

    async fn stat(&self, key: &str) -> Result<Option<ObjectStat>> {
        Ok(self.lock().objects.get(key).map(|bytes| ObjectStat {
            size: bytes.len() as u64,
            etag: Some(hex::encode(Sha256::digest(bytes))),
        }))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock().objects.remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_stat_delete() {
        let store = MemoryObjectStore::new();
        store.put("sha256/ab/cd/abcd", b"hello".to_vec());

        let stat = store.stat("sha256/ab/cd/abcd").await.unwrap().unwrap();
        assert_eq!(stat.size, 5);

        store.delete("sha256/ab/cd/abcd").await.unwrap();
        assert!(store.stat("sha256/ab/cd/abcd").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_multipart_assembles_in_order() {
        let store = MemoryObjectStore::new();
        let upload_id = store.initiate_multipart("k").await.unwrap();
        let e2 = store.put_part(&upload_id, 2, b"world".to_vec()).unwrap();
        let e1 = store.put_part(&upload_id, 1, b"hello ".to_vec()).unwrap();

        store
            .complete_multipart(
                "k",
                &upload_id,
                &[
                    CompletedPart {
                        part_number: 1,
                        etag: e1,
                    },
                    CompletedPart {
                        part_number: 2,
                        etag: e2,
                    },
                ],
            )
            .await
            .unwrap();

        assert_eq!(store.get("k").unwrap(), b"hello world");
    }
}
