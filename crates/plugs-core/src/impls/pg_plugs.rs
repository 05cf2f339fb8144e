//! PgPlugStore - PostgreSQL 実装（`postgres` feature）
//!
//! sqlx の PgPool を 1 つのハンドルとして扱います。生存確認は `SELECT 1`。
//! テーブル作成は運用側の責務で、ここでは行いません。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};

use crate::domain::{AssetRef, AuditEntry, Backend, BackendError, NewPlug, Plug, PlugId, UserId};
use crate::ports::{Connector, Liveness, PlugStore};

const SELECT_COLUMNS: &str = "SELECT id, s3id, owner, views, approved FROM plugs";

/// Opens pools against `uri`. The URI carries credentials and is never logged.
#[derive(Clone)]
pub struct PgConnector {
    uri: String,
    max_connections: u32,
    acquire_timeout: Duration,
}

impl PgConnector {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            max_connections: 8,
            acquire_timeout: Duration::from_secs(5),
        }
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }
}

impl std::fmt::Debug for PgConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnector")
            .field("uri", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

#[async_trait]
impl Connector<dyn PlugStore> for PgConnector {
    fn backend(&self) -> Backend {
        Backend::Relational
    }

    async fn connect(&self) -> Result<Arc<dyn PlugStore>, BackendError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(&self.uri)
            .await
            .map_err(pg_error)?;
        tracing::info!(max_connections = self.max_connections, "connected to PostgreSQL");
        Ok(Arc::new(PgPlugStore { pool }))
    }
}

/// `PlugStore` over a sqlx pool.
pub struct PgPlugStore {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct PlugRow {
    id: i32,
    s3id: String,
    owner: String,
    views: i32,
    approved: bool,
}

impl From<PlugRow> for Plug {
    fn from(row: PlugRow) -> Self {
        Plug {
            id: PlugId::new(row.id),
            asset_ref: AssetRef::new(row.s3id),
            owner: UserId::new(row.owner),
            views_remaining: row.views,
            approved: row.approved,
        }
    }
}

fn pg_error(err: sqlx::Error) -> BackendError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Tls(_) => BackendError::Unavailable(err.to_string()),
        other => BackendError::Operation(other.to_string()),
    }
}

#[async_trait]
impl Liveness for PgPlugStore {
    async fn ping(&self) -> Result<(), BackendError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(pg_error)?;
        Ok(())
    }
}

#[async_trait]
impl PlugStore for PgPlugStore {
    async fn insert_unapproved(&self, plug: NewPlug) -> Result<Plug, BackendError> {
        let row = sqlx::query_as::<_, PlugRow>(
            "INSERT INTO plugs (s3id, owner, views, approved) VALUES ($1, $2, $3, false) \
             RETURNING id, s3id, owner, views, approved",
        )
        .bind(plug.asset_ref.as_str())
        .bind(plug.owner.as_str())
        .bind(plug.views_remaining)
        .fetch_one(&self.pool)
        .await
        .map_err(pg_error)?;
        Ok(row.into())
    }

    async fn fetch_approved(&self) -> Result<Vec<Plug>, BackendError> {
        let rows = sqlx::query_as::<_, PlugRow>(&format!("{SELECT_COLUMNS} WHERE approved = true"))
            .fetch_all(&self.pool)
            .await
            .map_err(pg_error)?;
        Ok(rows.into_iter().map(Plug::from).collect())
    }

    async fn fetch_pending(&self) -> Result<Vec<Plug>, BackendError> {
        let rows = sqlx::query_as::<_, PlugRow>(&format!(
            "{SELECT_COLUMNS} WHERE views >= 0 ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(pg_error)?;
        Ok(rows.into_iter().map(Plug::from).collect())
    }

    async fn fetch_by_id(&self, id: PlugId) -> Result<Option<Plug>, BackendError> {
        let row = sqlx::query_as::<_, PlugRow>(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(pg_error)?;
        Ok(row.map(Plug::from))
    }

    async fn set_views(&self, id: PlugId, views: i32) -> Result<bool, BackendError> {
        let result = sqlx::query("UPDATE plugs SET views = $2 WHERE id = $1")
            .bind(id.get())
            .bind(views)
            .execute(&self.pool)
            .await
            .map_err(pg_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn compare_and_set_views(
        &self,
        id: PlugId,
        expected: i32,
        new: i32,
    ) -> Result<bool, BackendError> {
        let result = sqlx::query("UPDATE plugs SET views = $3 WHERE id = $1 AND views = $2")
            .bind(id.get())
            .bind(expected)
            .bind(new)
            .execute(&self.pool)
            .await
            .map_err(pg_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_approval_set(&self, ids: &[PlugId]) -> Result<(), BackendError> {
        let ids: Vec<i32> = ids.iter().map(|id| id.get()).collect();
        let mut tx = self.pool.begin().await.map_err(pg_error)?;
        sqlx::query("UPDATE plugs SET approved = false")
            .execute(&mut *tx)
            .await
            .map_err(pg_error)?;
        sqlx::query("UPDATE plugs SET approved = true WHERE id = ANY($1)")
            .bind(&ids[..])
            .execute(&mut *tx)
            .await
            .map_err(pg_error)?;
        tx.commit().await.map_err(pg_error)
    }

    async fn delete(&self, id: PlugId) -> Result<bool, BackendError> {
        let result = sqlx::query("DELETE FROM plugs WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(pg_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn append_log(&self, entry: &AuditEntry) -> Result<(), BackendError> {
        sqlx::query("INSERT INTO logs (time, severity, message) VALUES ($1, $2, $3)")
            .bind(entry.time.naive_utc())
            .bind(entry.severity.code())
            .bind(entry.message.as_str())
            .execute(&self.pool)
            .await
            .map_err(pg_error)?;
        Ok(())
    }
}
