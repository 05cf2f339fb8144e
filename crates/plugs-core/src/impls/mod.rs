//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryDatabase**: 開発・テスト用の plugs / logs ストア
//! - **InMemoryDirectory**: 開発・テスト用のクレジット残高ディレクトリ
//! - **InMemoryObjectStore**: 開発・テスト用のオブジェクトストア（署名付き URL）
//! - **PgConnector / PgPlugStore**: PostgreSQL 実装（`postgres` feature）
//! - **LdapConnector / LdapDirectory**: LDAP 実装（`ldap` feature）
//! - **S3Connector / S3ObjectStore**: S3 互換ストレージ実装（`s3` feature）
//!
//! インメモリ実装は「サーバー」を模していて、`drop_sessions()` で既存セッションを
//! 失効させたり、`set_accepting(false)` で接続を拒否させたりできます。

mod link;

pub mod inmem_database;
pub mod inmem_directory;
pub mod inmem_objects;
#[cfg(feature = "ldap")]
pub mod ldap_directory;
#[cfg(feature = "postgres")]
pub mod pg_plugs;
#[cfg(feature = "s3")]
pub mod s3_objects;

// 主要な型を再エクスポート
pub use self::inmem_database::InMemoryDatabase;
pub use self::inmem_directory::InMemoryDirectory;
pub use self::inmem_objects::{InMemoryObjectStore, StoredObject};
#[cfg(feature = "ldap")]
pub use self::ldap_directory::{DirectoryLayout, LdapConnector, LdapDirectory};
#[cfg(feature = "postgres")]
pub use self::pg_plugs::{PgConnector, PgPlugStore};
#[cfg(feature = "s3")]
pub use self::s3_objects::{S3Connector, S3ObjectStore};
