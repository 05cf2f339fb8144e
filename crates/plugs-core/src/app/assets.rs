//! AssetStore - 画像オブジェクトの保存・削除・署名付き URL
//!
//! バケットは 1 つ（既定 "plugs"）。URL の有効期限は短く固定です。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::guard::ConnectionGuard;
use crate::domain::{AssetRef, Backend, PlugError, Result};
use crate::ports::{Clock, ObjectStore};

/// Time-bounded, read-only URL. Do not cache past `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

pub struct AssetStore {
    objects: Arc<ConnectionGuard<dyn ObjectStore>>,
    bucket: String,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl AssetStore {
    pub fn new(
        objects: Arc<ConnectionGuard<dyn ObjectStore>>,
        bucket: impl Into<String>,
        ttl: std::time::Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            objects,
            bucket: bucket.into(),
            ttl: Duration::from_std(ttl).unwrap_or(Duration::seconds(60)),
            clock,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub async fn put(&self, asset: &AssetRef, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let objects = self.objects.ensure_alive().await?;
        let size = bytes.len();
        objects
            .put(&self.bucket, asset.as_str(), bytes, content_type)
            .await
            .map_err(PlugError::backend(Backend::ObjectStore))?;
        debug!(asset_ref = %asset, size, content_type, "asset stored");
        Ok(())
    }

    pub async fn presign(&self, asset: &AssetRef) -> Result<PresignedUrl> {
        let objects = self.objects.ensure_alive().await?;
        let expires_at = self.clock.now() + self.ttl;
        let url = objects
            .presign_get(&self.bucket, asset.as_str(), expires_at)
            .await
            .map_err(PlugError::backend(Backend::ObjectStore))?;
        Ok(PresignedUrl { url, expires_at })
    }

    /// Idempotent: a missing key is logged, not an error.
    pub async fn delete(&self, asset: &AssetRef) -> Result<()> {
        let objects = self.objects.ensure_alive().await?;
        let removed = objects
            .remove(&self.bucket, asset.as_str())
            .await
            .map_err(PlugError::backend(Backend::ObjectStore))?;
        if removed {
            debug!(asset_ref = %asset, "asset deleted");
        } else {
            warn!(asset_ref = %asset, "asset already missing");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryObjectStore;
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    async fn assets(store: &InMemoryObjectStore, clock: Arc<FixedClock>) -> AssetStore {
        let guard = ConnectionGuard::<dyn ObjectStore>::connect(Box::new(store.clone())).await.unwrap();
        AssetStore::new(Arc::new(guard), "plugs", std::time::Duration::from_secs(60), clock)
    }

    #[tokio::test]
    async fn presign_expires_after_ttl() {
        let store = InMemoryObjectStore::new("https://s3.test", "k");
        let clock = Arc::new(FixedClock::new(t0()));
        let assets = assets(&store, clock.clone()).await;
        let key = AssetRef::new("2024/01/01/120000-alice-a.png");

        assets.put(&key, b"png".to_vec(), "image/png").await.unwrap();
        let url = assets.presign(&key).await.unwrap();
        assert_eq!(url.expires_at, t0() + Duration::seconds(60));

        assert_eq!(store.fetch_presigned(&url.url, clock.now()).unwrap().bytes, b"png");
        clock.advance(Duration::seconds(60));
        assert!(store.fetch_presigned(&url.url, clock.now()).is_err());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryObjectStore::new("https://s3.test", "k");
        let assets = assets(&store, Arc::new(FixedClock::new(t0()))).await;
        let key = AssetRef::new("a");

        assets.put(&key, vec![0], "image/png").await.unwrap();
        assets.delete(&key).await.unwrap();
        assets.delete(&key).await.unwrap();
        assert!(!store.contains("plugs", "a"));
        assert_eq!(store.removals(), 1);
    }

    #[tokio::test]
    async fn put_reconnects_after_store_restart() {
        let store = InMemoryObjectStore::new("https://s3.test", "k");
        let assets = assets(&store, Arc::new(FixedClock::new(t0()))).await;
        store.drop_sessions();

        assets.put(&AssetRef::new("a"), vec![0], "image/png").await.unwrap();
        assert!(store.contains("plugs", "a"));
        assert_eq!(store.connections(), 2);
    }
}
