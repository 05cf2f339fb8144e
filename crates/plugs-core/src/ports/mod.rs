//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（PostgreSQL, LDAP, S3 互換ストレージ）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - バックエンドへのハンドルは `Connector` が作り、`Liveness` で生存確認する
//! - ハンドルの差し替えは `app::guard::ConnectionGuard` だけが行う
//! - 乱数と時刻も port にしてテストで固定できるようにする

pub mod connector;
pub mod plug_store;
pub mod credit_directory;
pub mod object_store;
pub mod clock;
pub mod dice;

// 主要な trait を再エクスポート
pub use self::connector::{Connector, Liveness};
pub use self::plug_store::PlugStore;
pub use self::credit_directory::CreditDirectory;
pub use self::object_store::ObjectStore;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::dice::{Dice, ScriptedDice, SeededDice, ThreadDice};
