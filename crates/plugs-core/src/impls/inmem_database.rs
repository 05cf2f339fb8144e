//! InMemoryDatabase - 開発・テスト用のリレーショナルストア
//!
//! plugs / logs テーブルを BTreeMap と Vec で表現します。

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::link::ServerLink;
use crate::domain::{AuditEntry, Backend, BackendError, NewPlug, Plug, PlugId};
use crate::ports::{Connector, Liveness, PlugStore};

#[derive(Debug)]
struct Tables {
    plugs: BTreeMap<PlugId, Plug>,
    logs: Vec<AuditEntry>,
    next_id: i32,
    /// Row removed right after its next `fetch_by_id`.
    vanishing: Option<PlugId>,
}

impl Tables {
    fn allocate_id(&mut self) -> PlugId {
        let id = PlugId::new(self.next_id);
        self.next_id += 1;
        id
    }
}

#[derive(Debug)]
struct DatabaseInner {
    link: ServerLink,
    tables: Mutex<Tables>,
    reject_logs: AtomicBool,
}

/// In-memory relational store. Clones share the same tables.
#[derive(Debug, Clone)]
pub struct InMemoryDatabase {
    inner: Arc<DatabaseInner>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                link: ServerLink::new(Backend::Relational),
                tables: Mutex::new(Tables {
                    plugs: BTreeMap::new(),
                    logs: Vec::new(),
                    next_id: 1,
                    vanishing: None,
                }),
                reject_logs: AtomicBool::new(false),
            }),
        }
    }

    /// Insert a row directly, bypassing sessions (fixtures, demo seeding).
    pub fn seed(&self, plug: NewPlug, approved: bool) -> Plug {
        let mut tables = self.inner.tables.lock();
        let id = tables.allocate_id();
        let row = plug.into_plug(id, approved);
        tables.plugs.insert(id, row.clone());
        row
    }

    /// Overwrite a row as-is, for simulating corrupted data.
    pub fn put_raw(&self, plug: Plug) {
        let mut tables = self.inner.tables.lock();
        tables.next_id = tables.next_id.max(plug.id.get() + 1);
        tables.plugs.insert(plug.id, plug);
    }

    pub fn plug(&self, id: PlugId) -> Option<Plug> {
        self.inner.tables.lock().plugs.get(&id).cloned()
    }

    pub fn plugs(&self) -> Vec<Plug> {
        self.inner.tables.lock().plugs.values().cloned().collect()
    }

    pub fn logs(&self) -> Vec<AuditEntry> {
        self.inner.tables.lock().logs.clone()
    }

    /// Make `append_log` fail while the rest of the store keeps working.
    pub fn fail_log_writes(&self, fail: bool) {
        self.inner.reject_logs.store(fail, Ordering::Relaxed);
    }

    /// The next `fetch_by_id(id)` still returns the row, then the row is gone,
    /// as if another writer deleted it in between.
    pub fn delete_behind_next_fetch(&self, id: PlugId) {
        self.inner.tables.lock().vanishing = Some(id);
    }

    /// Invalidate every open session, as a server restart would.
    pub fn drop_sessions(&self) {
        self.inner.link.drop_sessions();
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.inner.link.set_accepting(accepting);
    }

    /// Number of sessions opened so far.
    pub fn connections(&self) -> u64 {
        self.inner.link.connections()
    }
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector<dyn PlugStore> for InMemoryDatabase {
    fn backend(&self) -> Backend {
        Backend::Relational
    }

    async fn connect(&self) -> Result<Arc<dyn PlugStore>, BackendError> {
        let epoch = self.inner.link.open()?;
        Ok(Arc::new(DatabaseSession {
            inner: Arc::clone(&self.inner),
            epoch,
        }))
    }
}

struct DatabaseSession {
    inner: Arc<DatabaseInner>,
    epoch: u64,
}

impl DatabaseSession {
    fn tables(&self) -> Result<parking_lot::MutexGuard<'_, Tables>, BackendError> {
        self.inner.link.check(self.epoch)?;
        Ok(self.inner.tables.lock())
    }
}

#[async_trait]
impl Liveness for DatabaseSession {
    async fn ping(&self) -> Result<(), BackendError> {
        self.inner.link.check(self.epoch)
    }
}

#[async_trait]
impl PlugStore for DatabaseSession {
    async fn insert_unapproved(&self, plug: NewPlug) -> Result<Plug, BackendError> {
        let mut tables = self.tables()?;
        let id = tables.allocate_id();
        let row = plug.into_plug(id, false);
        tables.plugs.insert(id, row.clone());
        Ok(row)
    }

    async fn fetch_approved(&self) -> Result<Vec<Plug>, BackendError> {
        let tables = self.tables()?;
        Ok(tables.plugs.values().filter(|p| p.approved).cloned().collect())
    }

    async fn fetch_pending(&self) -> Result<Vec<Plug>, BackendError> {
        let tables = self.tables()?;
        Ok(tables
            .plugs
            .values()
            .filter(|p| p.views_remaining >= 0)
            .cloned()
            .collect())
    }

    async fn fetch_by_id(&self, id: PlugId) -> Result<Option<Plug>, BackendError> {
        let mut tables = self.tables()?;
        let row = tables.plugs.get(&id).cloned();
        if tables.vanishing == Some(id) {
            tables.vanishing = None;
            tables.plugs.remove(&id);
        }
        Ok(row)
    }

    async fn set_views(&self, id: PlugId, views: i32) -> Result<bool, BackendError> {
        let mut tables = self.tables()?;
        match tables.plugs.get_mut(&id) {
            Some(row) => {
                row.views_remaining = views;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn compare_and_set_views(
        &self,
        id: PlugId,
        expected: i32,
        new: i32,
    ) -> Result<bool, BackendError> {
        let mut tables = self.tables()?;
        match tables.plugs.get_mut(&id) {
            Some(row) if row.views_remaining == expected => {
                row.views_remaining = new;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_approval_set(&self, ids: &[PlugId]) -> Result<(), BackendError> {
        let approved: HashSet<PlugId> = ids.iter().copied().collect();
        let mut tables = self.tables()?;
        for row in tables.plugs.values_mut() {
            row.approved = approved.contains(&row.id);
        }
        Ok(())
    }

    async fn delete(&self, id: PlugId) -> Result<bool, BackendError> {
        Ok(self.tables()?.plugs.remove(&id).is_some())
    }

    async fn append_log(&self, entry: &AuditEntry) -> Result<(), BackendError> {
        if self.inner.reject_logs.load(Ordering::Relaxed) {
            return Err(BackendError::Operation("logs table is read-only".into()));
        }
        self.tables()?.logs.push(entry.clone());
        Ok(())
    }
}
