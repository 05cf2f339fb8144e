//! Test fixtures: every component wired over in-memory backends.

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use super::assets::AssetStore;
use super::guard::ConnectionGuard;
use super::ledger::Ledger;
use super::repository::PlugRepository;
use super::selection::{RotationPolicy, SelectionEngine};
use super::service::PlugService;
use crate::domain::{NewPlug, Plug};
use crate::impls::{InMemoryDatabase, InMemoryDirectory, InMemoryObjectStore};
use crate::ports::{CreditDirectory, Dice, FixedClock, ObjectStore, PlugStore};

pub(crate) struct Fixture {
    pub db: InMemoryDatabase,
    pub directory: InMemoryDirectory,
    pub objects: InMemoryObjectStore,
    pub clock: Arc<FixedClock>,
    pub assets: Arc<AssetStore>,
    pub repository: Arc<PlugRepository>,
}

impl Fixture {
    pub async fn new() -> Self {
        let db = InMemoryDatabase::new();
        let directory = InMemoryDirectory::new();
        let objects = InMemoryObjectStore::new("https://s3.test", "fixture-secret");
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));

        let object_guard = ConnectionGuard::<dyn ObjectStore>::connect(Box::new(objects.clone())).await.unwrap();
        let assets = Arc::new(AssetStore::new(
            Arc::new(object_guard),
            "plugs",
            std::time::Duration::from_secs(60),
            clock.clone(),
        ));
        let db_guard = ConnectionGuard::<dyn PlugStore>::connect(Box::new(db.clone())).await.unwrap();
        let repository = Arc::new(PlugRepository::new(Arc::new(db_guard), assets.clone()));

        Self {
            db,
            directory,
            objects,
            clock,
            assets,
            repository,
        }
    }

    /// Seed a row and store a matching asset.
    pub async fn seed_with_asset(&self, plug: NewPlug, approved: bool) -> Plug {
        self.assets
            .put(&plug.asset_ref, b"\x89PNG".to_vec(), "image/png")
            .await
            .unwrap();
        self.db.seed(plug, approved)
    }

    pub fn engine(&self, dice: Arc<dyn Dice>, house_percent: u8) -> SelectionEngine {
        SelectionEngine::new(
            self.repository.clone(),
            RotationPolicy::new(house_percent),
            dice,
            32,
        )
    }

    /// Service with admin groups `drink`/`rtp` and 1000 views per credit.
    pub async fn service(&self, dice: Arc<dyn Dice>, house_percent: u8) -> PlugService {
        let guard = ConnectionGuard::<dyn CreditDirectory>::connect(Box::new(self.directory.clone()))
            .await
            .unwrap();
        let ledger = Ledger::new(Arc::new(guard), vec!["drink".into(), "rtp".into()], 8);
        PlugService::new(
            Arc::new(ledger),
            self.repository.clone(),
            self.assets.clone(),
            self.engine(dice, house_percent),
            self.clock.clone(),
            1000,
        )
    }
}
