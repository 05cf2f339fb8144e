//! Errors - エラー型と分類
//!
//! # 分類
//! - **Connectivity**: 再接続にも失敗したバックエンド（プロセス継続不可）
//! - **NotFound**: id で引いたが行がない（呼び出し側で処理可能）
//! - **EmptyCatalog**: 表示できる plug が 1 件もない
//! - **DataCorruption**: 不変条件を破った行・属性値
//! - **Rejected**: 入力や権限の問題（副作用なしで拒否）
//! - **Transient**: 生きているハンドル上での一時的な失敗
//!
//! クレジット不足はエラーではなく、`Ledger::debit` の `false` で表現します。

use std::fmt;

use thiserror::Error;

use super::ids::{PlugId, UserId};

/// The three stateful backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Relational,
    Directory,
    ObjectStore,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Backend::Relational => "relational",
            Backend::Directory => "directory",
            Backend::ObjectStore => "object-store",
        };
        f.write_str(name)
    }
}

/// A single failed backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend could not be reached, or the session is gone.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The backend answered but refused or failed the operation.
    #[error("operation failed: {0}")]
    Operation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connectivity,
    NotFound,
    EmptyCatalog,
    DataCorruption,
    Rejected,
    Transient,
    Configuration,
}

#[derive(Debug, Error)]
pub enum PlugError {
    #[error("{backend} backend unreachable after reconnect: {source}")]
    Connectivity {
        backend: Backend,
        #[source]
        source: BackendError,
    },

    #[error("{backend} backend call failed: {source}")]
    Backend {
        backend: Backend,
        #[source]
        source: BackendError,
    },

    #[error("plug {0} not found")]
    NotFound(PlugId),

    #[error("user {0} not found in directory")]
    UnknownUser(UserId),

    #[error("no eligible plug to serve")]
    EmptyCatalog,

    #[error("corrupt data: {0}")]
    DataCorruption(String),

    #[error("invalid credit amount {0}")]
    InvalidAmount(i64),

    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error("user {0} is not an administrator")]
    Forbidden(UserId),

    #[error("gave up after {attempts} attempts lost to concurrent updates")]
    Contention { attempts: u32 },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PlugError {
    /// Wrap a failure of a call made on a live handle.
    pub fn backend(backend: Backend) -> impl FnOnce(BackendError) -> PlugError {
        move |source| PlugError::Backend { backend, source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PlugError::Connectivity { .. } => ErrorKind::Connectivity,
            PlugError::Backend { .. } | PlugError::Contention { .. } => ErrorKind::Transient,
            PlugError::NotFound(_) | PlugError::UnknownUser(_) => ErrorKind::NotFound,
            PlugError::EmptyCatalog => ErrorKind::EmptyCatalog,
            PlugError::DataCorruption(_) => ErrorKind::DataCorruption,
            PlugError::InvalidAmount(_) | PlugError::InvalidUpload(_) | PlugError::Forbidden(_) => {
                ErrorKind::Rejected
            }
            PlugError::Config(_) => ErrorKind::Configuration,
        }
    }

    /// Only a failed reconnect may end the process.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Connectivity
    }
}

pub type Result<T, E = PlugError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connectivity_is_fatal() {
        let fatal = PlugError::Connectivity {
            backend: Backend::Directory,
            source: BackendError::Unavailable("refused".into()),
        };
        assert!(fatal.is_fatal());

        let transient = PlugError::Backend {
            backend: Backend::Relational,
            source: BackendError::Operation("deadlock".into()),
        };
        assert!(!transient.is_fatal());
        assert_eq!(transient.kind(), ErrorKind::Transient);

        assert!(!PlugError::NotFound(PlugId::new(3)).is_fatal());
        assert!(!PlugError::EmptyCatalog.is_fatal());
    }

    #[test]
    fn messages_name_the_backend() {
        let err = PlugError::Connectivity {
            backend: Backend::ObjectStore,
            source: BackendError::Unavailable("dns".into()),
        };
        assert_eq!(
            err.to_string(),
            "object-store backend unreachable after reconnect: unavailable: dns"
        );
    }
}
