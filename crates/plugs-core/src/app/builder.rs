//! AppBuilder - バックエンドの接続とサービスの組み立て
//!
//! # 起動時検証（Fail-fast）
//! - 設定を `validate()` する
//! - 3 つのバックエンド（relational / directory / object-store）が揃っているか確認
//! - それぞれ最初の接続を張る。ここで失敗したら起動しない
//!
//! # 使用例
//! ```ignore
//! let service = AppBuilder::new(config)
//!     .database(Box::new(db))
//!     .directory(Box::new(directory))
//!     .object_store(Box::new(objects))
//!     .build()
//!     .await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::assets::AssetStore;
use super::guard::ConnectionGuard;
use super::ledger::Ledger;
use super::repository::PlugRepository;
use super::selection::{RotationPolicy, SelectionEngine};
use super::service::PlugService;
use crate::config::PlugsConfig;
use crate::domain::{Backend, PlugError};
use crate::ports::{
    Clock, Connector, CreditDirectory, Dice, ObjectStore, PlugStore, SystemClock, ThreadDice,
};

/// BuildError はサービス構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing backends: {0:?}. Every backend must be configured before build().")]
    MissingBackends(Vec<Backend>),

    #[error(transparent)]
    InvalidConfig(PlugError),

    #[error(transparent)]
    Connect(PlugError),
}

impl BuildError {
    /// The underlying domain error, if any.
    pub fn as_plug_error(&self) -> Option<&PlugError> {
        match self {
            BuildError::MissingBackends(_) => None,
            BuildError::InvalidConfig(e) | BuildError::Connect(e) => Some(e),
        }
    }
}

pub struct AppBuilder {
    config: PlugsConfig,
    database: Option<Box<dyn Connector<dyn PlugStore>>>,
    directory: Option<Box<dyn Connector<dyn CreditDirectory>>>,
    object_store: Option<Box<dyn Connector<dyn ObjectStore>>>,
    clock: Arc<dyn Clock>,
    dice: Arc<dyn Dice>,
}

impl AppBuilder {
    pub fn new(config: PlugsConfig) -> Self {
        Self {
            config,
            database: None,
            directory: None,
            object_store: None,
            clock: Arc::new(SystemClock),
            dice: Arc::new(ThreadDice),
        }
    }

    pub fn database(mut self, connector: Box<dyn Connector<dyn PlugStore>>) -> Self {
        self.database = Some(connector);
        self
    }

    pub fn directory(mut self, connector: Box<dyn Connector<dyn CreditDirectory>>) -> Self {
        self.directory = Some(connector);
        self
    }

    pub fn object_store(mut self, connector: Box<dyn Connector<dyn ObjectStore>>) -> Self {
        self.object_store = Some(connector);
        self
    }

    /// Replace the system clock (tests, demos).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the thread-local RNG used for rotation draws.
    pub fn dice(mut self, dice: Arc<dyn Dice>) -> Self {
        self.dice = dice;
        self
    }

    /// Validate, connect every backend, and wire the service.
    pub async fn build(self) -> Result<PlugService, BuildError> {
        self.config.validate().map_err(BuildError::InvalidConfig)?;

        let mut missing = Vec::new();
        if self.database.is_none() {
            missing.push(Backend::Relational);
        }
        if self.directory.is_none() {
            missing.push(Backend::Directory);
        }
        if self.object_store.is_none() {
            missing.push(Backend::ObjectStore);
        }
        let (Some(database), Some(directory), Some(object_store)) =
            (self.database, self.directory, self.object_store)
        else {
            return Err(BuildError::MissingBackends(missing));
        };

        let objects = ConnectionGuard::connect(object_store)
            .await
            .map_err(BuildError::Connect)?;
        let directory = ConnectionGuard::connect(directory)
            .await
            .map_err(BuildError::Connect)?;
        let database = ConnectionGuard::connect(database)
            .await
            .map_err(BuildError::Connect)?;

        let cfg = self.config;
        let assets = Arc::new(AssetStore::new(
            Arc::new(objects),
            cfg.assets.bucket.clone(),
            Duration::from_secs(cfg.assets.presign_ttl_secs),
            self.clock.clone(),
        ));
        let repository = Arc::new(PlugRepository::new(Arc::new(database), assets.clone()));
        let ledger = Arc::new(Ledger::new(
            Arc::new(directory),
            cfg.admin_groups.clone(),
            cfg.ledger.max_debit_attempts,
        ));
        let engine = SelectionEngine::new(
            repository.clone(),
            RotationPolicy::new(cfg.selection.house_percent),
            self.dice,
            cfg.selection.max_restarts,
        );

        info!(
            house_percent = cfg.selection.house_percent,
            bucket = %cfg.assets.bucket,
            "plug service ready"
        );
        Ok(PlugService::new(
            ledger,
            repository,
            assets,
            engine,
            self.clock,
            cfg.ledger.views_per_credit,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;
    use crate::impls::{InMemoryDatabase, InMemoryDirectory, InMemoryObjectStore};

    fn objects() -> InMemoryObjectStore {
        InMemoryObjectStore::new("https://s3.test", "k")
    }

    #[tokio::test]
    async fn build_success() {
        let service = AppBuilder::new(PlugsConfig::default())
            .database(Box::new(InMemoryDatabase::new()))
            .directory(Box::new(InMemoryDirectory::new()))
            .object_store(Box::new(objects()))
            .build()
            .await;
        assert!(service.is_ok());
    }

    #[tokio::test]
    async fn build_missing_backends() {
        let result = AppBuilder::new(PlugsConfig::default())
            .directory(Box::new(InMemoryDirectory::new()))
            .build()
            .await;
        assert!(matches!(
            result,
            Err(BuildError::MissingBackends(missing))
                if missing == vec![Backend::Relational, Backend::ObjectStore]
        ));
    }

    #[tokio::test]
    async fn build_rejects_invalid_config() {
        let mut config = PlugsConfig::default();
        config.selection.house_percent = 101;
        let result = AppBuilder::new(config)
            .database(Box::new(InMemoryDatabase::new()))
            .directory(Box::new(InMemoryDirectory::new()))
            .object_store(Box::new(objects()))
            .build()
            .await;
        assert!(matches!(result, Err(BuildError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn unreachable_backend_at_startup_is_fatal() {
        let directory = InMemoryDirectory::new();
        directory.set_accepting(false);
        let result = AppBuilder::new(PlugsConfig::default())
            .database(Box::new(InMemoryDatabase::new()))
            .directory(Box::new(directory))
            .object_store(Box::new(objects()))
            .build()
            .await;

        let Err(err) = result else {
            panic!("build should fail");
        };
        assert!(matches!(err, BuildError::Connect(_)));
        let cause = err.as_plug_error().unwrap();
        assert_eq!(cause.kind(), ErrorKind::Connectivity);
        assert!(cause.is_fatal());
    }
}
