//! Environment-variable configuration.

/// Pragmas and debug switches read once at [`crate::db::Database::open`] time.
#[derive(Debug, Clone, Default)]
pub struct PragmaConfig {
    pub cache_size: Option<String>,
    pub in_memory: bool,
}

impl PragmaConfig {
    pub fn from_env() -> Self {
        Self {
            cache_size: std::env::var("CAMEL_SQLITE_DEFAULT_CACHE_SIZE").ok(),
            in_memory: std::env::var("CAMEL_SQLITE_IN_MEMORY").is_ok(),
        }
    }
}

/// Debug logging categories recognized by `CAMEL_DEBUG` (comma-separated).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugCategory {
    Sqlite,
    DbTime,
    DbTimeTs,
    Junk,
    Vfolder,
}

pub fn debug_categories() -> Vec<DebugCategory> {
    let raw = match std::env::var("CAMEL_DEBUG") {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    raw.split(',')
        .filter_map(|tok| match tok.trim() {
            "sqlite" => Some(DebugCategory::Sqlite),
            "dbtime" => Some(DebugCategory::DbTime),
            "dbtimets" => Some(DebugCategory::DbTimeTs),
            "junk" => Some(DebugCategory::Junk),
            "vfolder" => Some(DebugCategory::Vfolder),
            _ => None,
        })
        .collect()
}

/// Default tombstone retention window.
pub const DEFAULT_TOMBSTONE_RETENTION_SECS: i64 = 30 * 24 * 60 * 60;

/// Busy-retry budget: 150 retries at 100ms each.
pub const BUSY_RETRY_ATTEMPTS: u32 = 150;
pub const BUSY_RETRY_SLEEP_MS: u64 = 100;

/// Deferred-sync coalescing window.
pub const DEFERRED_SYNC_DELAY_SECS: u64 = 5;

/// Vacuum threshold: freelist_count * 1000 / page_count > 50).
pub const VACUUM_FREELIST_PERMILLE_THRESHOLD: i64 = 50;
