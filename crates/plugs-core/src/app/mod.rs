//! App - アプリケーション層
//!
//! ports を組み合わせて plug のローテーションを実装します。
//!
//! # 主要コンポーネント
//! - **ConnectionGuard**: 使用直前の生存確認と再接続
//! - **Ledger**: クレジットの引き落としと管理者判定
//! - **AssetStore**: 画像オブジェクトと署名付き URL
//! - **PlugRepository**: plug レコードの CRUD
//! - **SelectionEngine**: 重み付き選択と表示回数の減算
//! - **PlugService**: 上記をまとめた利用者向けの操作
//! - **AppBuilder**: 設定とバックエンドからの組み立て

pub mod assets;
pub mod builder;
pub mod guard;
pub mod ledger;
pub mod locks;
pub mod repository;
pub mod selection;
pub mod service;

#[cfg(test)]
pub(crate) mod fixtures;

// 主要な型を再エクスポート
pub use self::assets::{AssetStore, PresignedUrl};
pub use self::builder::{AppBuilder, BuildError};
pub use self::guard::ConnectionGuard;
pub use self::ledger::Ledger;
pub use self::locks::KeyedMutex;
pub use self::repository::PlugRepository;
pub use self::selection::{Pools, RotationPolicy, SelectionEngine};
pub use self::service::{PendingPlug, PlugService, Served, Submission, Upload};
