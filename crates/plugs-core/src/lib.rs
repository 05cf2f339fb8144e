//! plugs-core
//!
//! Core building blocks for the plug rotation service.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, plug, errors）
//! - **ports**: 抽象化レイヤー（PlugStore, CreditDirectory, ObjectStore, Connector, Clock, Dice）
//! - **app**: アプリケーションロジック（guard, ledger, assets, repository, selection, service, builder）
//! - **impls**: 実装（開発・テスト用のインメモリ実装、`postgres` feature の PgPlugStore）
//! - **config**: TOML + 環境変数による設定
//! - **observability**: tracing の初期化とカタログ集計

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{AppBuilder, BuildError, PlugService, Served, Submission, Upload};
pub use config::PlugsConfig;
pub use domain::{ErrorKind, PlugError, Result};
