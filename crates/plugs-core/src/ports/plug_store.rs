//! PlugStore port - リレーショナルストア（plugs / logs テーブル）
//!
//! # スキーマ
//! - `plugs(id SERIAL PK, s3id VARCHAR(64), owner VARCHAR(32), views INTEGER, approved BOOLEAN)`
//! - `logs(time TIMESTAMP PK, severity INTEGER, message TEXT)`

use async_trait::async_trait;

use super::Liveness;
use crate::domain::{AuditEntry, BackendError, NewPlug, Plug, PlugId};

/// Row-level access to plug records.
///
/// Implementations do not interpret `views`; sign semantics live in the app layer.
#[async_trait]
pub trait PlugStore: Liveness {
    /// Insert with `approved = false` and return the stored row.
    async fn insert_unapproved(&self, plug: NewPlug) -> Result<Plug, BackendError>;

    async fn fetch_approved(&self) -> Result<Vec<Plug>, BackendError>;

    /// Every sponsored row (`views >= 0`), approved or not.
    async fn fetch_pending(&self) -> Result<Vec<Plug>, BackendError>;

    async fn fetch_by_id(&self, id: PlugId) -> Result<Option<Plug>, BackendError>;

    /// Overwrite the counter. Returns `false` when no such row exists.
    async fn set_views(&self, id: PlugId, views: i32) -> Result<bool, BackendError>;

    /// Write `new` only if the row still holds `expected`.
    async fn compare_and_set_views(
        &self,
        id: PlugId,
        expected: i32,
        new: i32,
    ) -> Result<bool, BackendError>;

    /// Unapprove every row, then approve exactly `ids`.
    async fn set_approval_set(&self, ids: &[PlugId]) -> Result<(), BackendError>;

    /// Returns `false` when the row was already gone.
    async fn delete(&self, id: PlugId) -> Result<bool, BackendError>;

    async fn append_log(&self, entry: &AuditEntry) -> Result<(), BackendError>;
}
