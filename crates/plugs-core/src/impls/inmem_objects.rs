//! InMemoryObjectStore - 開発・テスト用の S3 互換ストレージ
//!
//! # presigned URL
//! `{base_url}/{bucket}/{key}?expires={unix}&signature={hex}` の形式で、
//! signature は secret・bucket・key・期限の SHA-256 です。
//! key は `/` 区切りの各セグメントを percent-encode して埋め込みます。
//! `fetch_presigned` で署名と期限を検証して読み出せます（読み取り専用）。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use super::link::ServerLink;
use crate::domain::{Backend, BackendError};
use crate::ports::{Connector, Liveness, ObjectStore};

/// A stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug)]
struct ObjectsInner {
    link: ServerLink,
    base_url: String,
    secret: String,
    objects: Mutex<HashMap<(String, String), StoredObject>>,
    removals: AtomicU64,
}

/// In-memory object store. Clones share the same buckets.
#[derive(Debug, Clone)]
pub struct InMemoryObjectStore {
    inner: Arc<ObjectsInner>,
}

impl InMemoryObjectStore {
    pub fn new(base_url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ObjectsInner {
                link: ServerLink::new(Backend::ObjectStore),
                base_url: base_url.into().trim_end_matches('/').to_string(),
                secret: secret.into(),
                objects: Mutex::new(HashMap::new()),
                removals: AtomicU64::new(0),
            }),
        }
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.inner
            .objects
            .lock()
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.inner.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of removals that actually deleted an object.
    pub fn removals(&self) -> u64 {
        self.inner.removals.load(Ordering::SeqCst)
    }

    /// Resolve a presigned URL the way the storage server would.
    pub fn fetch_presigned(
        &self,
        url: &str,
        now: DateTime<Utc>,
    ) -> Result<StoredObject, BackendError> {
        let denied = |why: &str| BackendError::Operation(format!("access denied: {why}"));

        let rest = url
            .strip_prefix(&self.inner.base_url)
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| denied("foreign host"))?;
        let (path, query) = rest.rsplit_once('?').ok_or_else(|| denied("unsigned"))?;
        let (bucket, key) = path.split_once('/').ok_or_else(|| denied("no bucket"))?;
        let key = urlencoding::decode(key).map_err(|_| denied("malformed key"))?;
        let key = key.as_ref();

        let mut expires = None;
        let mut signature = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", v)) => expires = v.parse::<i64>().ok(),
                Some(("signature", v)) => signature = Some(v),
                _ => {}
            }
        }
        let expires = expires.ok_or_else(|| denied("missing expiry"))?;
        let signature = signature.ok_or_else(|| denied("missing signature"))?;

        if sign(&self.inner.secret, bucket, key, expires) != signature {
            return Err(denied("bad signature"));
        }
        if now.timestamp() >= expires {
            return Err(denied("expired"));
        }
        self.inner
            .objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| BackendError::Operation(format!("no such key: {key}")))
    }

    pub fn drop_sessions(&self) {
        self.inner.link.drop_sessions();
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.inner.link.set_accepting(accepting);
    }

    pub fn connections(&self) -> u64 {
        self.inner.link.connections()
    }
}

/// Percent-encode each path segment of `key`, keeping `/` as the separator.
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/")
}

fn sign(secret: &str, bucket: &str, key: &str, expires: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b"\n");
    hasher.update(bucket.as_bytes());
    hasher.update(b"\n");
    hasher.update(key.as_bytes());
    hasher.update(b"\n");
    hasher.update(expires.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl Connector<dyn ObjectStore> for InMemoryObjectStore {
    fn backend(&self) -> Backend {
        Backend::ObjectStore
    }

    async fn connect(&self) -> Result<Arc<dyn ObjectStore>, BackendError> {
        let epoch = self.inner.link.open()?;
        Ok(Arc::new(ObjectSession {
            inner: Arc::clone(&self.inner),
            epoch,
        }))
    }
}

struct ObjectSession {
    inner: Arc<ObjectsInner>,
    epoch: u64,
}

#[async_trait]
impl Liveness for ObjectSession {
    async fn ping(&self) -> Result<(), BackendError> {
        self.inner.link.check(self.epoch)
    }
}

#[async_trait]
impl ObjectStore for ObjectSession {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), BackendError> {
        self.inner.link.check(self.epoch)?;
        let object = StoredObject {
            bytes,
            content_type: content_type.to_string(),
        };
        self.inner
            .objects
            .lock()
            .insert((bucket.to_string(), key.to_string()), object);
        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String, BackendError> {
        self.inner.link.check(self.epoch)?;
        let expires = expires_at.timestamp();
        Ok(format!(
            "{}/{}/{}?expires={}&signature={}",
            self.inner.base_url,
            bucket,
            encode_key(key),
            expires,
            sign(&self.inner.secret, bucket, key, expires)
        ))
    }

    async fn remove(&self, bucket: &str, key: &str) -> Result<bool, BackendError> {
        self.inner.link.check(self.epoch)?;
        let removed = self
            .inner
            .objects
            .lock()
            .remove(&(bucket.to_string(), key.to_string()))
            .is_some();
        if removed {
            self.inner.removals.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn presigned_url_grants_read_until_expiry() {
        let store = InMemoryObjectStore::new("https://s3.example.test/", "s3cret");
        let session = store.connect().await.unwrap();
        session
            .put("plugs", "2024/01/01/120000-alice-a.png", vec![1, 2, 3], "image/png")
            .await
            .unwrap();

        let url = session
            .presign_get("plugs", "2024/01/01/120000-alice-a.png", t0() + Duration::seconds(60))
            .await
            .unwrap();
        assert!(url.starts_with("https://s3.example.test/plugs/2024/01/01/120000-alice-a.png?"));

        let object = store.fetch_presigned(&url, t0()).unwrap();
        assert_eq!(object.bytes, vec![1, 2, 3]);
        assert_eq!(object.content_type, "image/png");

        assert!(store.fetch_presigned(&url, t0() + Duration::seconds(60)).is_err());
    }

    #[tokio::test]
    async fn keys_with_reserved_characters_survive_the_url() {
        let store = InMemoryObjectStore::new("https://s3.example.test", "s3cret");
        let session = store.connect().await.unwrap();
        let key = "2024/01/01/120000-alice-ad #1 final?.png";
        session.put("plugs", key, vec![7], "image/png").await.unwrap();

        let url = session
            .presign_get("plugs", key, t0() + Duration::seconds(60))
            .await
            .unwrap();
        let (path, _) = url.split_once('?').unwrap();
        assert_eq!(
            path,
            "https://s3.example.test/plugs/2024/01/01/120000-alice-ad%20%231%20final%3F.png"
        );
        assert_eq!(store.fetch_presigned(&url, t0()).unwrap().bytes, vec![7]);
    }

    #[tokio::test]
    async fn tampered_url_is_rejected() {
        let store = InMemoryObjectStore::new("https://s3.example.test", "s3cret");
        let session = store.connect().await.unwrap();
        session.put("plugs", "a", vec![1], "image/png").await.unwrap();
        session.put("plugs", "b", vec![2], "image/png").await.unwrap();

        let url = session
            .presign_get("plugs", "a", t0() + Duration::seconds(60))
            .await
            .unwrap();
        let forged = url.replacen("/plugs/a?", "/plugs/b?", 1);
        assert!(store.fetch_presigned(&forged, t0()).is_err());
    }

    #[tokio::test]
    async fn remove_counts_only_real_deletions() {
        let store = InMemoryObjectStore::new("https://s3.example.test", "s3cret");
        let session = store.connect().await.unwrap();
        session.put("plugs", "a", vec![1], "image/png").await.unwrap();

        assert!(session.remove("plugs", "a").await.unwrap());
        assert!(!session.remove("plugs", "a").await.unwrap());
        assert_eq!(store.removals(), 1);
        assert!(store.is_empty());
    }
}
