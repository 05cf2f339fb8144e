//! ConnectionGuard - 使用直前の生存確認とハンドル差し替え
//!
//! # フロー
//! 1. 現在のハンドルで `ping()`（副作用なし）
//! 2. 成功ならそのまま返す
//! 3. 失敗したら起動時と同じ `Connector` で新しいハンドルを作り、差し替えて返す
//!    （probe の再試行はしない、probe の失敗は呼び出し側に伝えない）
//! 4. 差し替えにも失敗したら `PlugError::Connectivity`（致命的）
//!
//! 同じ世代の失敗を同時に観測した呼び出しは、1 回だけ再接続します。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::domain::{Backend, PlugError, Result};
use crate::ports::{Connector, Liveness};

struct Slot<H: ?Sized> {
    handle: Arc<H>,
    generation: u64,
}

/// Process-wide handle to one backend, verified before every use.
pub struct ConnectionGuard<H: ?Sized + Liveness + 'static> {
    backend: Backend,
    connector: Box<dyn Connector<H>>,
    current: RwLock<Slot<H>>,
    reconnects: AtomicU64,
}

impl<H: ?Sized + Liveness + 'static> ConnectionGuard<H> {
    /// Open the initial handle. Failure here is a startup connectivity failure.
    pub async fn connect(connector: Box<dyn Connector<H>>) -> Result<Self> {
        let backend = connector.backend();
        let handle = connector.connect().await.map_err(|source| {
            error!(%backend, error = %source, "initial connection failed");
            PlugError::Connectivity { backend, source }
        })?;
        info!(%backend, "backend connected");
        Ok(Self {
            backend,
            connector,
            current: RwLock::new(Slot {
                handle,
                generation: 0,
            }),
            reconnects: AtomicU64::new(0),
        })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Number of times the handle has been replaced.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Probe the current handle and replace it if the probe fails.
    pub async fn ensure_alive(&self) -> Result<Arc<H>> {
        let (handle, generation) = {
            let slot = self.current.read().await;
            (Arc::clone(&slot.handle), slot.generation)
        };
        match handle.ping().await {
            Ok(()) => Ok(handle),
            Err(probe) => {
                warn!(backend = %self.backend, error = %probe, "liveness probe failed, reconnecting");
                self.replace(generation).await
            }
        }
    }

    async fn replace(&self, observed: u64) -> Result<Arc<H>> {
        let mut slot = self.current.write().await;
        if slot.generation != observed {
            // another caller already swapped in a fresh handle
            return Ok(Arc::clone(&slot.handle));
        }
        let handle = self.connector.connect().await.map_err(|source| {
            error!(backend = %self.backend, error = %source, "reconnect failed");
            PlugError::Connectivity {
                backend: self.backend,
                source,
            }
        })?;
        slot.handle = handle;
        slot.generation += 1;
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        info!(backend = %self.backend, generation = slot.generation, "backend handle replaced");
        Ok(Arc::clone(&slot.handle))
    }
}
