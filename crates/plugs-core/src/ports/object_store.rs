//! ObjectStore port - S3 互換ストレージ
//!
//! 画像本体を保存します。読み取りは presigned URL 経由のみ。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::Liveness;
use crate::domain::BackendError;

#[async_trait]
pub trait ObjectStore: Liveness {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), BackendError>;

    /// Read-only URL valid until `expires_at`.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String, BackendError>;

    /// Returns `false` when the key did not exist.
    async fn remove(&self, bucket: &str, key: &str) -> Result<bool, BackendError>;
}
