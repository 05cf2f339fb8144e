//! PlugRepository - plug レコードの CRUD
//!
//! 行の削除とアセットの削除はトランザクションではありません。
//! 行を先に消すので、途中で落ちた場合に残るのはアセットだけです。

use std::sync::Arc;

use tracing::{debug, info};

use super::assets::AssetStore;
use super::guard::ConnectionGuard;
use crate::domain::{AuditEntry, Backend, NewPlug, Plug, PlugError, PlugId, Result};
use crate::ports::PlugStore;

pub struct PlugRepository {
    store: Arc<ConnectionGuard<dyn PlugStore>>,
    assets: Arc<AssetStore>,
}

impl PlugRepository {
    pub fn new(store: Arc<ConnectionGuard<dyn PlugStore>>, assets: Arc<AssetStore>) -> Self {
        Self { store, assets }
    }

    async fn handle(&self) -> Result<Arc<dyn PlugStore>> {
        self.store.ensure_alive().await
    }

    pub async fn insert_unapproved(&self, plug: NewPlug) -> Result<Plug> {
        let row = self
            .handle()
            .await?
            .insert_unapproved(plug)
            .await
            .map_err(PlugError::backend(Backend::Relational))?;
        info!(plug_id = %row.id, asset_ref = %row.asset_ref, owner = %row.owner, views = row.views_remaining, "plug created");
        Ok(row)
    }

    /// Snapshot of approved plugs, in no particular order.
    pub async fn fetch_approved(&self) -> Result<Vec<Plug>> {
        self.handle()
            .await?
            .fetch_approved()
            .await
            .map_err(PlugError::backend(Backend::Relational))
    }

    /// Sponsored plugs, approved or awaiting review.
    pub async fn fetch_pending(&self) -> Result<Vec<Plug>> {
        self.handle()
            .await?
            .fetch_pending()
            .await
            .map_err(PlugError::backend(Backend::Relational))
    }

    pub async fn fetch_by_id(&self, id: PlugId) -> Result<Plug> {
        self.handle()
            .await?
            .fetch_by_id(id)
            .await
            .map_err(PlugError::backend(Backend::Relational))?
            .ok_or(PlugError::NotFound(id))
    }

    /// Overwrite the view counter.
    pub async fn update_views(&self, id: PlugId, views: i32) -> Result<()> {
        let found = self
            .handle()
            .await?
            .set_views(id, views)
            .await
            .map_err(PlugError::backend(Backend::Relational))?;
        if found { Ok(()) } else { Err(PlugError::NotFound(id)) }
    }

    /// Conditional counter update; `false` when the row moved on or vanished.
    pub async fn compare_and_set_views(&self, id: PlugId, expected: i32, new: i32) -> Result<bool> {
        self.handle()
            .await?
            .compare_and_set_views(id, expected, new)
            .await
            .map_err(PlugError::backend(Backend::Relational))
    }

    /// Full replace: exactly `ids` end up approved.
    pub async fn set_approval_set(&self, ids: &[PlugId]) -> Result<()> {
        self.handle()
            .await?
            .set_approval_set(ids)
            .await
            .map_err(PlugError::backend(Backend::Relational))?;
        info!(approved = ids.len(), "approval set replaced");
        Ok(())
    }

    /// Remove the row, then its asset. Returns `false` if the row was already gone,
    /// in which case the asset is left to whoever removed the row.
    pub async fn delete(&self, plug: &Plug) -> Result<bool> {
        let removed = self
            .handle()
            .await?
            .delete(plug.id)
            .await
            .map_err(PlugError::backend(Backend::Relational))?;
        if !removed {
            debug!(plug_id = %plug.id, "plug row already deleted");
            return Ok(false);
        }
        self.assets.delete(&plug.asset_ref).await?;
        info!(plug_id = %plug.id, asset_ref = %plug.asset_ref, "plug deleted");
        Ok(true)
    }

    pub async fn append_log(&self, entry: &AuditEntry) -> Result<()> {
        self.handle()
            .await?
            .append_log(entry)
            .await
            .map_err(PlugError::backend(Backend::Relational))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::fixtures::Fixture;
    use crate::domain::{AssetRef, ErrorKind, UserId};

    fn sponsored(key: &str, views: i32) -> NewPlug {
        NewPlug::new(AssetRef::new(key), UserId::new("alice"), views)
    }

    #[tokio::test]
    async fn approval_set_is_a_full_replace() {
        let fx = Fixture::new().await;
        let ids: Vec<PlugId> = (1..=5)
            .map(|n| fx.db.seed(sponsored(&format!("k{n}"), 10), n != 4).id)
            .collect();
        assert_eq!(ids, (1..=5).map(PlugId::new).collect::<Vec<_>>());

        fx.repository
            .set_approval_set(&[PlugId::new(2), PlugId::new(5)])
            .await
            .unwrap();

        let mut approved: Vec<i32> = fx
            .repository
            .fetch_approved()
            .await
            .unwrap()
            .iter()
            .map(|p| p.id.get())
            .collect();
        approved.sort();
        assert_eq!(approved, vec![2, 5]);
    }

    #[tokio::test]
    async fn missing_id_is_a_typed_not_found() {
        let fx = Fixture::new().await;
        let err = fx.repository.fetch_by_id(PlugId::new(9)).await.unwrap_err();
        assert!(matches!(err, PlugError::NotFound(id) if id == PlugId::new(9)));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = fx.repository.update_views(PlugId::new(9), 3).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn delete_removes_row_and_asset_exactly_once() {
        let fx = Fixture::new().await;
        let plug = fx.seed_with_asset(sponsored("a.png", 3), true).await;

        assert!(fx.repository.delete(&plug).await.unwrap());
        assert!(fx.db.plug(plug.id).is_none());
        assert!(!fx.objects.contains("plugs", "a.png"));

        assert!(!fx.repository.delete(&plug).await.unwrap());
        assert_eq!(fx.objects.removals(), 1);
    }

    #[tokio::test]
    async fn update_views_overwrites_counter() {
        let fx = Fixture::new().await;
        let plug = fx.db.seed(sponsored("a", 3), true);

        fx.repository.update_views(plug.id, 42).await.unwrap();
        assert_eq!(fx.repository.fetch_by_id(plug.id).await.unwrap().views_remaining, 42);
    }
}
