//! Message-info cache: process-wide dedup of
//! `(backing-folder, source-uid) -> MessageInfoData`, plus the vuid index.
//! Lookups insert on miss and refcount on hit; vuids are derived from a
//! `DefaultHasher` hash of the subfolder identity rather than a separately
//! allocated id.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::model::MessageInfoRecord;

/// Identity of a backing folder, used both as the cache dedup key and as
/// the input to the vuid hash.
pub type SubfolderId = String;

/// A cached message-info entry, refcounted across virtual folders and
/// subfolder links.
#[derive(Debug, Clone)]
pub struct MessageInfoData {
    pub vuid: String,
    pub subfolder: SubfolderId,
    pub source_uid: String,
    pub record: MessageInfoRecord,
    refcount: u32,
}

impl MessageInfoData {
    pub fn refcount(&self) -> u32 {
        self.refcount
    }
}

/// Per-subfolder bookkeeping: a link the cache keeps alive for as long as
/// any `MessageInfoData` it owns is referenced.
#[derive(Debug, Default)]
struct SubfolderData {
    usage: u32,
}

fn hash32(identity: &str) -> u32 {
    let mut hasher = DefaultHasher::new();
    identity.hash(&mut hasher);
    (hasher.finish() & 0xFFFF_FFFF) as u32
}

/// Builds a vuid as `hex(hash32(subfolder))[0..8] + source_uid`.
pub fn make_vuid(subfolder: &str, source_uid: &str) -> String {
    format!("{:08x}{}", hash32(subfolder), source_uid)
}

struct Inner {
    by_key: HashMap<(SubfolderId, String), String>,
    by_vuid: HashMap<String, MessageInfoData>,
    subfolders: HashMap<SubfolderId, SubfolderData>,
}

/// Process-wide cache, one per root scope.
pub struct MessageInfoCache {
    inner: RwLock<Inner>,
}

impl Default for MessageInfoCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageInfoCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                by_key: HashMap::new(),
                by_vuid: HashMap::new(),
                subfolders: HashMap::new(),
            }),
        }
    }

    /// Registers a backing folder so its cached entries have somewhere to
    /// attach their lifetime.
    pub async fn add_subfolder(&self, subfolder: &str) {
        let mut inner = self.inner.write().await;
        inner.subfolders.entry(subfolder.to_string()).or_default().usage += 1;
    }

    /// Releases one use of a subfolder link; when usage drops to zero the
    /// link itself is dropped (its message infos must already be gone).
    pub async fn remove_subfolder(&self, subfolder: &str) {
        let mut inner = self.inner.write().await;
        if let Some(data) = inner.subfolders.get_mut(subfolder) {
            if data.usage > 0 {
                data.usage -= 1;
            }
            if data.usage == 0 {
                inner.subfolders.remove(subfolder);
            }
        }
    }

    /// Looks up `(subfolder, source_uid)`, inserting a fresh entry with
    /// refcount 1 if absent.
    pub async fn get(&self, subfolder: &str, source_uid: &str, record: MessageInfoRecord) -> MessageInfoData {
        let key = (subfolder.to_string(), source_uid.to_string());
        let mut inner = self.inner.write().await;
        if let Some(vuid) = inner.by_key.get(&key).cloned() {
            let entry = inner.by_vuid.get_mut(&vuid).expect("by_key/by_vuid desync");
            entry.refcount += 1;
            return entry.clone();
        }
        let vuid = make_vuid(subfolder, source_uid);
        let data = MessageInfoData {
            vuid: vuid.clone(),
            subfolder: subfolder.to_string(),
            source_uid: source_uid.to_string(),
            record,
            refcount: 1,
        };
        inner.by_key.insert(key, vuid.clone());
        inner.by_vuid.insert(vuid, data.clone());
        data
    }

    /// Direct lookup by vuid, no insert.
    pub async fn get_by_vuid(&self, vuid: &str) -> Option<MessageInfoData> {
        self.inner.read().await.by_vuid.get(vuid).cloned()
    }

    pub async fn contains(&self, subfolder: &str, source_uid: &str) -> bool {
        let key = (subfolder.to_string(), source_uid.to_string());
        self.inner.read().await.by_key.contains_key(&key)
    }

    /// Drops one reference; the entry is actually removed only once its
    /// refcount reaches zero.
    pub async fn remove(&self, vuid: &str) {
        let mut inner = self.inner.write().await;
        let should_remove = match inner.by_vuid.get_mut(vuid) {
            Some(data) => {
                if data.refcount > 0 {
                    data.refcount -= 1;
                }
                data.refcount == 0
            }
            None => false,
        };
        if should_remove {
            if let Some(data) = inner.by_vuid.remove(vuid) {
                inner.by_key.remove(&(data.subfolder, data.source_uid));
            }
        }
    }

    /// Iterates a stable snapshot of every entry for `subfolder`.
    pub async fn foreach_message_info_data(&self, subfolder: &str, mut visit: impl FnMut(&MessageInfoData)) {
        let inner = self.inner.read().await;
        let snapshot: Vec<&MessageInfoData> = inner
            .by_vuid
            .values()
            .filter(|d| d.subfolder == subfolder)
            .collect();
        for data in snapshot {
            visit(data);
        }
    }
}

/// Shared handle, cloned into the virtual-folder engine and the offline
/// controller.
pub type SharedMessageInfoCache = Arc<MessageInfoCache>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vuid_prefix_is_stable_lowercase_hex() {
        let a = make_vuid("INBOX", "5");
        let b = make_vuid("INBOX", "6");
        assert_eq!(&a[0..8], &b[0..8]);
        assert!(a[0..8].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(&a[8..], "5");
    }

    #[tokio::test]
    async fn get_dedups_and_refcounts() {
        let cache = MessageInfoCache::new();
        let rec = MessageInfoRecord::new("5");
        let a = cache.get("INBOX", "5", rec.clone()).await;
        let b = cache.get("INBOX", "5", rec).await;
        assert_eq!(a.vuid, b.vuid);
        assert_eq!(cache.get_by_vuid(&a.vuid).await.unwrap().refcount(), 2);
    }

    #[tokio::test]
    async fn remove_only_evicts_at_zero_refcount() {
        let cache = MessageInfoCache::new();
        let rec = MessageInfoRecord::new("5");
        let a = cache.get("INBOX", "5", rec.clone()).await;
        let _ = cache.get("INBOX", "5", rec).await;
        cache.remove(&a.vuid).await;
        assert!(cache.get_by_vuid(&a.vuid).await.is_some());
        cache.remove(&a.vuid).await;
        assert!(cache.get_by_vuid(&a.vuid).await.is_none());
    }

    #[tokio::test]
    async fn get_by_vuid_does_not_insert() {
        let cache = MessageInfoCache::new();
        assert!(cache.get_by_vuid("deadbeef5").await.is_none());
        assert!(!cache.contains("INBOX", "5").await);
    }
}
