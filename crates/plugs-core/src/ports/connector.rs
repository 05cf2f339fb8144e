//! Connector port - バックエンド接続の確立と生存確認
//!
//! `Connector` は起動時に渡された資格情報・エンドポイントを保持し、
//! 何度でも新しいハンドルを作れるようにします。

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{Backend, BackendError};

/// Cheap, side-effect-free liveness probe on a backend handle.
#[async_trait]
pub trait Liveness: Send + Sync {
    async fn ping(&self) -> Result<(), BackendError>;
}

/// Opens fresh handles to one backend using the credentials it was built with.
///
/// `H` is usually a port trait object such as `dyn PlugStore`.
#[async_trait]
pub trait Connector<H: ?Sized + Send + Sync>: Send + Sync {
    fn backend(&self) -> Backend;

    async fn connect(&self) -> Result<Arc<H>, BackendError>;
}
