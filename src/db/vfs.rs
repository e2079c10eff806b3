//! Deferred sync: coalesce fsync-equivalent work behind a debounce timer
//! instead of hooking sqlite's VFS directly, since `sqlx` gives no safe
//! access to that layer. Callers call `request()` after a write, and once
//! things go quiet a debounce timer fires a `PRAGMA wal_checkpoint(PASSIVE)`
//! on a small worker pool, tracked by a pending-count and notified on
//! drain.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::{Notify, Semaphore};
use tokio::time::Duration;

use crate::config::DEFERRED_SYNC_DELAY_SECS;

/// At most two checkpoints run concurrently, mirroring a small fixed worker
/// pool rather than one sync per request.
const MAX_CONCURRENT_SYNCS: usize = 2;

pub struct DeferredSync {
    pool: SqlitePool,
    generation: AtomicU64,
    pending: AtomicU32,
    pending_idle: Notify,
    workers: Arc<Semaphore>,
}

impl DeferredSync {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Arc::new(Self {
            pool,
            generation: AtomicU64::new(0),
            pending: AtomicU32::new(0),
            pending_idle: Notify::new(),
            workers: Arc::new(Semaphore::new(MAX_CONCURRENT_SYNCS)),
        })
    }

    /// Request a sync. Coalesces with any other request within the debounce
    /// window: only the last request in a burst actually schedules work.
    pub fn request(self: &Arc<Self>) {
        let my_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(DEFERRED_SYNC_DELAY_SECS)).await;
            if this.generation.load(Ordering::SeqCst) != my_generation {
                // Superseded by a later request; let that one fire instead.
                return;
            }
            this.fire().await;
        });
    }

    async fn fire(self: &Arc<Self>) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let permit = Arc::clone(&self.workers).acquire_owned().await;
        let pool = self.pool.clone();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            let _ = sqlx::query("PRAGMA wal_checkpoint(PASSIVE)")
                .execute(&pool)
                .await;
            if this.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                this.pending_idle.notify_waiters();
            }
        });
    }

    /// Cancel any outstanding debounce timer, run one last sync immediately,
    /// and block until every in-flight sync has completed.
    pub async fn close(self: &Arc<Self>) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.fire().await;
        loop {
            // Register interest before checking, so a notify that lands
            // between the check and the await isn't lost.
            let notified = self.pending_idle.notified();
            if self.pending.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }
    }

    pub fn pending_count(&self) -> u32 {
        self.pending.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> SqlitePool {
        SqlitePool::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn close_drains_pending_syncs() {
        let pool = memory_pool().await;
        let ds = DeferredSync::new(pool);
        ds.request();
        ds.request();
        ds.close().await;
        assert_eq!(ds.pending_count(), 0);
    }
}
