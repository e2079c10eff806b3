//! Database handle: one connection pool per file, the
//! reentrant writer lock, busy-retry wrapper, corruption-reopen and
//! maintenance.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::config::{PragmaConfig, BUSY_RETRY_ATTEMPTS, BUSY_RETRY_SLEEP_MS, VACUUM_FREELIST_PERMILLE_THRESHOLD};
use crate::db::vfs::DeferredSync;
use crate::error::{Result, StoreError};

/// ASCII-case-insensitive whole-word containment test. `sqlx` has no
/// supported hook to register custom scalar SQL functions, so the predicate
/// is evaluated at the Rust layer wherever a search expression needs it
/// instead of inside SQLite itself.
pub fn sql_match(needle: &str, haystack: &str) -> bool {
    let needle = needle.to_ascii_lowercase();
    let haystack_lower = haystack.to_ascii_lowercase();
    haystack_lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| word == needle)
}

/// A held writer lock plus open savepoint depth.
/// Nested callers receive `&mut WriteGuard` rather than re-acquiring the
/// lock, which gives reentrancy for free through the type system instead
/// of tracking a reentrant owner-thread id at runtime.
pub struct WriteGuard<'a> {
    db: &'a Database,
    _lock: OwnedRwLockWriteGuard<()>,
    depth: u32,
}

impl<'a> WriteGuard<'a> {
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Open a nested savepoint.
    pub async fn begin(&mut self) -> Result<()> {
        self.depth += 1;
        let sql = format!("SAVEPOINT TN{}", self.depth);
        self.db.retry_busy(|| sqlx::query(&sql).execute(self.db.pool())).await?;
        Ok(())
    }

    /// Release the innermost savepoint.
    pub async fn commit(&mut self) -> Result<()> {
        if self.depth == 0 {
            return Err(StoreError::InvalidOperation("commit with no open savepoint".into()));
        }
        let sql = format!("RELEASE SAVEPOINT TN{}", self.depth);
        self.db.retry_busy(|| sqlx::query(&sql).execute(self.db.pool())).await?;
        self.depth -= 1;
        Ok(())
    }

    /// Roll back to the innermost savepoint, then release it.
    pub async fn abort(&mut self) -> Result<()> {
        if self.depth == 0 {
            return Err(StoreError::InvalidOperation("abort with no open savepoint".into()));
        }
        let rollback = format!("ROLLBACK TO SAVEPOINT TN{}", self.depth);
        self.db.retry_busy(|| sqlx::query(&rollback).execute(self.db.pool())).await?;
        let release = format!("RELEASE SAVEPOINT TN{}", self.depth);
        self.db.retry_busy(|| sqlx::query(&release).execute(self.db.pool())).await?;
        self.depth -= 1;
        Ok(())
    }
}

pub struct Database {
    pool: SqlitePool,
    file_name: String,
    rw_lock: Arc<RwLock<()>>,
    deferred_sync: Arc<DeferredSync>,
}

impl Database {
    /// Open `path`, retrying once against `<path>.corrupt` if the engine
    /// reports corruption on the first probe query.
    pub async fn open(path: &str) -> Result<Self> {
        match Self::open_once(path).await {
            Ok(db) => Ok(db),
            Err(StoreError::StorageCorrupt(_)) => {
                let corrupt_path = format!("{path}.corrupt");
                if Path::new(path).exists() {
                    std::fs::rename(path, &corrupt_path)?;
                }
                Self::open_once(path).await
            }
            Err(other) => Err(other),
        }
    }

    async fn open_once(path: &str) -> Result<Self> {
        let cfg = PragmaConfig::from_env();

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_millis(BUSY_RETRY_SLEEP_MS * BUSY_RETRY_ATTEMPTS as u64));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        // Probe query: surfaces CANTOPEN/CORRUPT/NOTADB immediately rather
        // than on the caller's first real statement.
        sqlx::query("PRAGMA schema_version")
            .fetch_one(&pool)
            .await?;

        if let Some(cache_size) = &cfg.cache_size {
            let sql = format!("PRAGMA cache_size = {cache_size}");
            sqlx::query(&sql).execute(&pool).await?;
        }
        if cfg.in_memory {
            sqlx::query("PRAGMA journal_mode = OFF").execute(&pool).await?;
            sqlx::query("PRAGMA temp_store = MEMORY").execute(&pool).await?;
        }
        sqlx::query("ATTACH DATABASE ':memory:' AS mem")
            .execute(&pool)
            .await?;

        let deferred_sync = DeferredSync::new(pool.clone());

        Ok(Self {
            pool,
            file_name: path.to_string(),
            rw_lock: Arc::new(RwLock::new(())),
            deferred_sync,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn deferred_sync(&self) -> &Arc<DeferredSync> {
        &self.deferred_sync
    }

    /// Request a coalesced durability sync after a write.
    pub fn request_sync(&self) {
        self.deferred_sync.request();
    }

    pub async fn close(&self) {
        self.deferred_sync.close().await;
    }

    /// Acquire the writer lock and open the outermost savepoint.
    pub async fn begin_write(&self) -> Result<WriteGuard<'_>> {
        let lock = Arc::clone(&self.rw_lock).write_owned().await;
        let mut guard = WriteGuard {
            db: self,
            _lock: lock,
            depth: 0,
        };
        guard.begin().await?;
        Ok(guard)
    }

    /// Shared reader lock, unless `writer` proves the caller already holds
    /// the write lock, in which case this is a no-op.
    pub async fn read_lock(&self, writer: Option<&WriteGuard<'_>>) -> Option<tokio::sync::OwnedRwLockReadGuard<()>> {
        if writer.is_some() {
            return None;
        }
        Some(Arc::clone(&self.rw_lock).read_owned().await)
    }

    /// Retry a statement up to `BUSY_RETRY_ATTEMPTS` times on BUSY/LOCKED,
    /// sleeping `BUSY_RETRY_SLEEP_MS` between attempts.
    pub async fn retry_busy<'q, F, Fut, T>(&self, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        let mut attempts = 0u32;
        loop {
            match f().await {
                Ok(v) => return Ok(v),
                Err(err) => {
                    let mapped: StoreError = err.into();
                    if matches!(mapped, StoreError::StorageBusy) && attempts < BUSY_RETRY_ATTEMPTS {
                        attempts += 1;
                        tokio::time::sleep(Duration::from_millis(BUSY_RETRY_SLEEP_MS)).await;
                        continue;
                    }
                    return Err(mapped);
                }
            }
        }
    }

    pub async fn exec(&self, sql: &str) -> Result<()> {
        self.retry_busy(|| sqlx::query(sql).execute(&self.pool)).await?;
        Ok(())
    }

    pub async fn count(&self, sql: &str) -> Result<i64> {
        self.retry_busy(|| sqlx::query_scalar(sql).fetch_one(&self.pool)).await
    }

    pub async fn select(&self, sql: &str) -> Result<Vec<SqliteRow>> {
        self.retry_busy(|| sqlx::query(sql).fetch_all(&self.pool)).await
    }

    /// Vacuum when the free-list exceeds 5% of the page count.
    pub async fn maintenance(&self) -> Result<()> {
        let page_count: i64 = self.count("PRAGMA page_count").await?;
        let freelist_count: i64 = self.count("PRAGMA freelist_count").await?;
        if page_count == 0 {
            return Ok(());
        }
        let permille = freelist_count * 1000 / page_count;
        if permille > VACUUM_FREELIST_PERMILLE_THRESHOLD {
            self.exec("VACUUM").await?;
        }
        Ok(())
    }
}

pub(crate) fn row_get_string(row: &SqliteRow, idx: usize) -> Option<String> {
    row.try_get::<Option<String>, _>(idx).ok().flatten()
}

pub(crate) fn row_get_i64(row: &SqliteRow, idx: usize) -> i64 {
    row.try_get::<i64, _>(idx).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_file_and_closes_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        db.exec("CREATE TABLE t (x INTEGER)").await.unwrap();
        db.exec("INSERT INTO t VALUES (1)").await.unwrap();
        let n = db.count("SELECT COUNT(*) FROM t").await.unwrap();
        assert_eq!(n, 1);
        db.close().await;
    }

    #[tokio::test]
    async fn nested_savepoints_track_depth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        let mut tx = db.begin_write().await.unwrap();
        assert_eq!(tx.depth(), 1);
        tx.begin().await.unwrap();
        assert_eq!(tx.depth(), 2);
        tx.commit().await.unwrap();
        assert_eq!(tx.depth(), 1);
        tx.commit().await.unwrap();
        assert_eq!(tx.depth(), 0);
        db.close().await;
    }

    #[tokio::test]
    async fn reader_lock_is_noop_while_holding_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        let tx = db.begin_write().await.unwrap();
        assert!(db.read_lock(Some(&tx)).await.is_none());
        drop(tx);
        assert!(db.read_lock(None).await.is_some());
        db.close().await;
    }

    #[test]
    fn sql_match_is_whole_word_and_case_insensitive() {
        assert!(sql_match("Alice", "Hello Alice Smith"));
        assert!(!sql_match("ali", "Hello Alice Smith"));
        assert!(sql_match("smith", "hello alice SMITH"));
    }

    #[tokio::test]
    async fn open_quarantines_a_corrupt_file_and_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        std::fs::write(&path, b"not a sqlite file at all, just junk bytes").unwrap();

        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        assert!(Path::new(&format!("{}.corrupt", path.to_str().unwrap())).exists());
        db.exec("CREATE TABLE t (x INTEGER)").await.unwrap();
        db.close().await;
    }
}
