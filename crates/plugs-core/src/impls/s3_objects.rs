//! S3ObjectStore - S3 互換ストレージ実装（`s3` feature）
//!
//! MinIO などの S3 互換サーバーを path-style で使います。
//! 生存確認はバケットへの `HeadBucket`。presigned URL はクライアント側で署名するだけなので
//! 通信は発生しません。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Builder, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::domain::{Backend, BackendError};
use crate::ports::{Connector, Liveness, ObjectStore};

/// Builds clients for one endpoint. The secret key is never logged.
#[derive(Clone)]
pub struct S3Connector {
    endpoint: String,
    region: String,
    access_id: String,
    secret_key: String,
    /// Bucket used for the liveness check.
    bucket: String,
}

impl S3Connector {
    /// `host` may be a full URL or a bare host name, which implies `https://`.
    pub fn new(
        host: &str,
        region: impl Into<String>,
        access_id: impl Into<String>,
        secret_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint_url(host),
            region: region.into(),
            access_id: access_id.into(),
            secret_key: secret_key.into(),
            bucket: bucket.into(),
        }
    }
}

impl std::fmt::Debug for S3Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Connector")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_id", &self.access_id)
            .field("secret_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .finish()
    }
}

fn endpoint_url(host: &str) -> String {
    if host.contains("://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", host.trim_end_matches('/'))
    }
}

#[async_trait]
impl Connector<dyn ObjectStore> for S3Connector {
    fn backend(&self) -> Backend {
        Backend::ObjectStore
    }

    async fn connect(&self) -> Result<Arc<dyn ObjectStore>, BackendError> {
        let credentials = Credentials::new(
            self.access_id.clone(),
            self.secret_key.clone(),
            None,
            None,
            "plugs-config",
        );
        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .endpoint_url(self.endpoint.clone())
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        let store = S3ObjectStore {
            client: Client::from_conf(config),
            bucket: self.bucket.clone(),
        };
        store.ping().await?;
        info!(endpoint = %self.endpoint, bucket = %self.bucket, "connected to object store");
        Ok(Arc::new(store))
    }
}

/// `ObjectStore` over an S3 client.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

#[async_trait]
impl Liveness for S3ObjectStore {
    async fn ping(&self) -> Result<(), BackendError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(s3_error)?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), BackendError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(s3_error)?;
        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String, BackendError> {
        let ttl = presign_ttl(Utc::now(), expires_at)?;
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|e| BackendError::Operation(e.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(s3_error)?;
        Ok(request.uri().to_string())
    }

    async fn remove(&self, bucket: &str, key: &str) -> Result<bool, BackendError> {
        // DeleteObject succeeds for missing keys, so look first
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => {}
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {
                return Ok(false);
            }
            Err(e) => return Err(s3_error(e)),
        }
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(s3_error)?;
        Ok(true)
    }
}

fn presign_ttl(now: DateTime<Utc>, expires_at: DateTime<Utc>) -> Result<Duration, BackendError> {
    (expires_at - now)
        .to_std()
        .ok()
        .filter(|ttl| !ttl.is_zero())
        .ok_or_else(|| BackendError::Operation(format!("expiry {expires_at} is not in the future")))
}

fn s3_error<E, R>(e: SdkError<E, R>) -> BackendError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&e).to_string();
    match e {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
            BackendError::Unavailable(message)
        }
        _ => BackendError::Operation(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn bare_host_defaults_to_https() {
        assert_eq!(endpoint_url("s3.example.test"), "https://s3.example.test");
        assert_eq!(endpoint_url("http://localhost:9000/"), "http://localhost:9000");
    }

    #[test]
    fn presign_ttl_must_be_in_the_future() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(
            presign_ttl(now, now + chrono::Duration::seconds(60)).unwrap(),
            Duration::from_secs(60)
        );
        assert!(presign_ttl(now, now).is_err());
        assert!(presign_ttl(now, now - chrono::Duration::seconds(1)).is_err());
    }

    #[test]
    fn debug_output_hides_the_secret_key() {
        let connector = S3Connector::new("s3.example.test", "us-east-1", "AKIA", "s3cret", "plugs");
        assert!(!format!("{connector:?}").contains("s3cret"));
    }
}
