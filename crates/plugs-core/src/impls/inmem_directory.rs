//! InMemoryDirectory - 開発・テスト用のディレクトリサービス
//!
//! ユーザーごとに残高属性（文字列）とグループ所属を持ちます。

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::link::ServerLink;
use crate::domain::{Backend, BackendError, UserId};
use crate::ports::{Connector, CreditDirectory, Liveness};

#[derive(Debug, Clone)]
struct Entry {
    balance: String,
    groups: BTreeSet<String>,
}

#[derive(Debug)]
struct DirectoryInner {
    link: ServerLink,
    entries: Mutex<HashMap<UserId, Entry>>,
}

/// In-memory directory. Clones share the same entries.
#[derive(Debug, Clone)]
pub struct InMemoryDirectory {
    inner: Arc<DirectoryInner>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DirectoryInner {
                link: ServerLink::new(Backend::Directory),
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn add_user(&self, user: impl Into<UserId>, balance: i64, groups: &[&str]) {
        let entry = Entry {
            balance: balance.to_string(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        };
        self.inner.entries.lock().insert(user.into(), entry);
    }

    /// Store an arbitrary attribute value, e.g. one that does not parse.
    pub fn set_raw_balance(&self, user: &UserId, raw: &str) {
        if let Some(entry) = self.inner.entries.lock().get_mut(user) {
            entry.balance = raw.to_string();
        }
    }

    pub fn balance(&self, user: &UserId) -> Option<i64> {
        self.inner
            .entries
            .lock()
            .get(user)
            .and_then(|e| e.balance.parse().ok())
    }

    pub fn drop_sessions(&self) {
        self.inner.link.drop_sessions();
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.inner.link.set_accepting(accepting);
    }

    pub fn connections(&self) -> u64 {
        self.inner.link.connections()
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector<dyn CreditDirectory> for InMemoryDirectory {
    fn backend(&self) -> Backend {
        Backend::Directory
    }

    async fn connect(&self) -> Result<Arc<dyn CreditDirectory>, BackendError> {
        let epoch = self.inner.link.open()?;
        Ok(Arc::new(DirectorySession {
            inner: Arc::clone(&self.inner),
            epoch,
        }))
    }
}

struct DirectorySession {
    inner: Arc<DirectoryInner>,
    epoch: u64,
}

#[async_trait]
impl Liveness for DirectorySession {
    async fn ping(&self) -> Result<(), BackendError> {
        self.inner.link.check(self.epoch)
    }
}

#[async_trait]
impl CreditDirectory for DirectorySession {
    async fn read_balance(&self, user: &UserId) -> Result<Option<String>, BackendError> {
        self.inner.link.check(self.epoch)?;
        Ok(self
            .inner
            .entries
            .lock()
            .get(user)
            .map(|e| e.balance.clone()))
    }

    async fn swap_balance(
        &self,
        user: &UserId,
        expected: &str,
        new: &str,
    ) -> Result<bool, BackendError> {
        self.inner.link.check(self.epoch)?;
        let mut entries = self.inner.entries.lock();
        let entry = entries
            .get_mut(user)
            .ok_or_else(|| BackendError::Operation(format!("no such object: uid={user}")))?;
        if entry.balance != expected {
            return Ok(false);
        }
        entry.balance = new.to_string();
        Ok(true)
    }

    async fn is_member(&self, user: &UserId, groups: &[String]) -> Result<bool, BackendError> {
        self.inner.link.check(self.epoch)?;
        Ok(self
            .inner
            .entries
            .lock()
            .get(user)
            .is_some_and(|e| groups.iter().any(|g| e.groups.contains(g))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn swap_requires_matching_old_value() {
        let dir = InMemoryDirectory::new();
        dir.add_user("alice", 5, &[]);
        let session = dir.connect().await.unwrap();
        let alice = UserId::new("alice");

        assert!(!session.swap_balance(&alice, "4", "1").await.unwrap());
        assert!(session.swap_balance(&alice, "5", "2").await.unwrap());
        assert_eq!(dir.balance(&alice), Some(2));
    }

    #[tokio::test]
    async fn swap_on_missing_entry_is_an_error() {
        let dir = InMemoryDirectory::new();
        let session = dir.connect().await.unwrap();
        let err = session
            .swap_balance(&UserId::new("ghost"), "1", "0")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Operation(_)));
    }

    #[tokio::test]
    async fn membership_matches_any_group() {
        let dir = InMemoryDirectory::new();
        dir.add_user("root", 0, &["rtp"]);
        dir.add_user("bob", 0, &["members"]);
        let session = dir.connect().await.unwrap();
        let groups = vec!["drink".to_string(), "rtp".to_string()];

        assert!(session.is_member(&UserId::new("root"), &groups).await.unwrap());
        assert!(!session.is_member(&UserId::new("bob"), &groups).await.unwrap());
        assert!(!session.is_member(&UserId::new("nobody"), &groups).await.unwrap());
    }
}
