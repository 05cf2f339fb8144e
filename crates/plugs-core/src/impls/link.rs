//! ServerLink - インメモリ実装用の擬似コネクション状態
//!
//! サーバー側の「世代」を持ち、`connect()` で開いたセッションは
//! 世代が変わると失効します（サーバー再起動・接続断の再現）。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::domain::{Backend, BackendError};

#[derive(Debug)]
pub(crate) struct ServerLink {
    backend: Backend,
    epoch: AtomicU64,
    accepting: AtomicBool,
    connections: AtomicU64,
}

impl ServerLink {
    pub(crate) fn new(backend: Backend) -> Self {
        Self {
            backend,
            epoch: AtomicU64::new(0),
            accepting: AtomicBool::new(true),
            connections: AtomicU64::new(0),
        }
    }

    /// Open a session and return the epoch it is bound to.
    pub(crate) fn open(&self) -> Result<u64, BackendError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable(format!(
                "{} server refused the connection",
                self.backend
            )));
        }
        self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(self.epoch.load(Ordering::SeqCst))
    }

    /// Fails once the server dropped the sessions of `epoch`.
    pub(crate) fn check(&self, epoch: u64) -> Result<(), BackendError> {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return Err(BackendError::Unavailable(format!(
                "{} session closed by server",
                self.backend
            )));
        }
        Ok(())
    }

    pub(crate) fn drop_sessions(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    pub(crate) fn connections(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_go_stale_after_drop() {
        let link = ServerLink::new(Backend::Relational);
        let epoch = link.open().unwrap();
        assert!(link.check(epoch).is_ok());

        link.drop_sessions();
        assert!(matches!(link.check(epoch), Err(BackendError::Unavailable(_))));

        let fresh = link.open().unwrap();
        assert!(link.check(fresh).is_ok());
        assert_eq!(link.connections(), 2);
    }

    #[test]
    fn refusing_server_rejects_open() {
        let link = ServerLink::new(Backend::Directory);
        link.set_accepting(false);
        assert!(link.open().is_err());
        assert_eq!(link.connections(), 0);
    }
}
