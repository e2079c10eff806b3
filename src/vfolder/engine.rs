//! Virtual-folder engine: `VeeFolder` reconciliation against
//! backing folders plus `VeeStore`'s Unmatched bookkeeping. Change events
//! from a subfolder drain through a single in-flight background job per
//! virtual folder rather than spawning one job per event.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;

use crate::cache::{MessageInfoData, SharedMessageInfoCache};
use crate::changeinfo::{ChangeInfo, SharedChangeBus};
use crate::db::handle::Database;
use crate::error::Result;
use crate::model::{FolderFlags, MessageInfoRecord};
use crate::session::SharedSession;
use crate::vfolder::search::{ExpressionEvaluator, SimpleEvaluator};

/// Reserved name for the Unmatched folder.
pub const UNMATCHED_NAME: &str = "Unmatched";

struct FolderState {
    expression: Option<String>,
    subfolders: Vec<String>,
    auto_update: bool,
    /// uids suppressed exactly once, used after a vfolder-originated write
    /// to its own backing folder.
    ignore_changed: HashSet<String>,
    skipped_changes: HashMap<String, ChangeInfo>,
    change_queue: VecDeque<(String, ChangeInfo)>,
    change_queue_busy: bool,
    /// vuids currently materialized in this folder's summary, by
    /// originating subfolder.
    subfolder_vuids: HashMap<String, HashSet<String>>,
    subscriptions: HashMap<String, (u64, tokio::task::JoinHandle<()>)>,
}

/// A materialized virtual folder: either a saved search or the Unmatched
/// pseudo-folder.
pub struct VeeFolder {
    pub name: String,
    db: Arc<Database>,
    cache: SharedMessageInfoCache,
    session: SharedSession,
    store: Mutex<Weak<VeeStore>>,
    pub is_unmatched: bool,
    evaluator: Arc<dyn ExpressionEvaluator>,
    change_bus: SharedChangeBus,
    freeze_count: AtomicU32,
    state: Mutex<FolderState>,
}

impl VeeFolder {
    fn new(name: &str, db: Arc<Database>, cache: SharedMessageInfoCache, session: SharedSession, is_unmatched: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            db,
            cache,
            session,
            store: Mutex::new(Weak::new()),
            is_unmatched,
            evaluator: Arc::new(SimpleEvaluator),
            change_bus: Arc::new(crate::changeinfo::ChangeBus::new()),
            freeze_count: AtomicU32::new(0),
            state: Mutex::new(FolderState {
                expression: None,
                subfolders: Vec::new(),
                auto_update: true,
                ignore_changed: HashSet::new(),
                skipped_changes: HashMap::new(),
                change_queue: VecDeque::new(),
                change_queue_busy: false,
                subfolder_vuids: HashMap::new(),
                subscriptions: HashMap::new(),
            }),
        })
    }

    pub fn change_bus(&self) -> &SharedChangeBus {
        &self.change_bus
    }

    async fn prepare_table(&self) -> Result<()> {
        self.db.prepare_message_info_table(&self.name).await
    }

    /// Sets the search expression; rebuilds every subfolder if it changed.
    pub async fn set_expression(self: &Arc<Self>, expr: Option<String>) -> Result<()> {
        let changed = {
            let mut state = self.state.lock().await;
            if state.expression == expr {
                false
            } else {
                state.expression = expr;
                true
            }
        };
        if changed {
            let subfolders = self.state.lock().await.subfolders.clone();
            for sub in subfolders {
                self.rebuild_folder(&sub).await?;
            }
        }
        Ok(())
    }

    pub async fn expression(&self) -> Option<String> {
        self.state.lock().await.expression.clone()
    }

    /// Subscribes to `subfolder`'s changed signal and starts tracking it.
    pub async fn add_folder(self: &Arc<Self>, subfolder: &str) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if state.subfolders.iter().any(|s| s == subfolder) {
                return Ok(());
            }
            state.subfolders.push(subfolder.to_string());
            state.subfolder_vuids.entry(subfolder.to_string()).or_default();
        }
        self.cache.add_subfolder(subfolder).await;

        if let Some(store) = self.store.lock().await.upgrade() {
            store.note_subfolder_used(subfolder).await;
            let bus = store.bus_for(subfolder).await;
            let mut sub = bus.subscribe().await;
            let this = Arc::clone(self);
            let subfolder_owned = subfolder.to_string();
            let handle = tokio::spawn(async move {
                while let Some(ci) = sub.recv().await {
                    let _ = this.on_subfolder_changed(&subfolder_owned, ci).await;
                }
            });
            let id = sub_id_placeholder();
            self.state
                .lock()
                .await
                .subscriptions
                .insert(subfolder.to_string(), (id, handle));
        }

        self.propagate_freeze_to(subfolder).await;
        self.rebuild_folder(subfolder).await
    }

    /// Unsubscribes and sweeps rows originating in `subfolder`.
    pub async fn remove_folder(self: &Arc<Self>, subfolder: &str) -> Result<()> {
        let vuids: Vec<String> = {
            let mut state = self.state.lock().await;
            state.subfolders.retain(|s| s != subfolder);
            if let Some((_, handle)) = state.subscriptions.remove(subfolder) {
                handle.abort();
            }
            state
                .subfolder_vuids
                .remove(subfolder)
                .unwrap_or_default()
                .into_iter()
                .collect()
        };

        self.unpropagate_freeze_from(subfolder).await;

        if !vuids.is_empty() {
            let mut tx = self.db.begin_write().await?;
            self.db.delete_vuids(&mut tx, &self.name, &vuids).await?;
            let mut ci = ChangeInfo::new();
            for vuid in &vuids {
                ci.remove(vuid.clone());
                if let Some(store) = self.store.lock().await.upgrade() {
                    if !self.is_unmatched {
                        store.note_vuid_unused(vuid).await;
                    }
                }
                self.cache.remove(vuid).await;
            }
            self.change_bus.emit(ci).await;
        }

        self.cache.remove_subfolder(subfolder).await;
        Ok(())
    }

    /// Diffs `new` against the current subfolder set.
    pub async fn set_folders(self: &Arc<Self>, new: &[String]) -> Result<()> {
        let current = self.state.lock().await.subfolders.clone();
        for sub in &current {
            if !new.contains(sub) {
                self.remove_folder(sub).await?;
            }
        }
        for sub in new {
            if !current.contains(sub) {
                self.add_folder(sub).await?;
            }
        }
        Ok(())
    }

    /// Full re-evaluation of `subfolder` against the current expression.
    pub async fn rebuild_folder(self: &Arc<Self>, subfolder: &str) -> Result<()> {
        if self.is_unmatched {
            return Ok(());
        }
        self.prepare_table().await?;
        let expr = self.expression().await;
        let records = self.db.read_message_info_records(subfolder).await?;

        let matched: Vec<&MessageInfoRecord> = match &expr {
            None => Vec::new(),
            Some(e) => records.iter().filter(|r| self.evaluator.matches(e, r)).collect(),
        };

        let previous = self
            .state
            .lock()
            .await
            .subfolder_vuids
            .get(subfolder)
            .cloned()
            .unwrap_or_default();

        let mut ci = ChangeInfo::new();
        let mut still_present: HashSet<String> = HashSet::new();
        let mut tx = self.db.begin_write().await?;

        for rec in &matched {
            let data = self.cache.get(subfolder, &rec.uid, (*rec).clone()).await;
            still_present.insert(data.vuid.clone());
            let is_new = !previous.contains(&data.vuid);
            let mut vrec = (*rec).clone();
            vrec.uid = data.vuid.clone();
            self.db.write_message_info(&mut tx, &self.name, &vrec).await?;
            if is_new {
                ci.add(data.vuid.clone());
                if let Some(store) = self.store.lock().await.upgrade() {
                    store.note_vuid_used(&data).await;
                }
            } else {
                ci.change(data.vuid.clone());
            }
        }

        let stale: Vec<String> = previous.difference(&still_present).cloned().collect();
        if !stale.is_empty() {
            self.db.delete_vuids(&mut tx, &self.name, &stale).await?;
            for vuid in &stale {
                ci.remove(vuid.clone());
                if let Some(store) = self.store.lock().await.upgrade() {
                    store.note_vuid_unused(vuid).await;
                }
                self.cache.remove(vuid).await;
            }
        }

        self.state
            .lock()
            .await
            .subfolder_vuids
            .insert(subfolder.to_string(), still_present);

        self.change_bus.emit(ci).await;
        Ok(())
    }

    pub async fn search_by_expression(&self, expression: &str) -> Result<Vec<MessageInfoRecord>> {
        let records = self.db.read_message_info_records(&self.name).await?;
        Ok(records.into_iter().filter(|r| self.evaluator.matches(expression, r)).collect())
    }

    pub async fn search_by_uids(&self, uids: &[String]) -> Result<Vec<MessageInfoRecord>> {
        let mut out = Vec::new();
        for uid in uids {
            if let Some(rec) = self.db.read_message_info_record(&self.name, uid).await? {
                out.push(rec);
            }
        }
        Ok(out)
    }

    pub async fn count_by_expression(&self, expression: &str) -> Result<usize> {
        Ok(self.search_by_expression(expression).await?.len())
    }

    pub async fn ignore_next_changed_event(&self, subfolder: &str) {
        self.state.lock().await.ignore_changed.insert(subfolder.to_string());
    }

    pub async fn remove_from_ignore(&self, subfolder: &str) {
        self.state.lock().await.ignore_changed.remove(subfolder);
    }

    pub fn freeze(&self) {
        self.freeze_count.fetch_add(1, Ordering::SeqCst);
        self.change_bus.freeze();
    }

    pub fn thaw<'a>(self: &'a Arc<Self>) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let prev = self.freeze_count.fetch_sub(1, Ordering::SeqCst);
            self.change_bus.thaw().await;
            if prev == 1 {
                let skipped: Vec<(String, ChangeInfo)> = {
                    let mut state = self.state.lock().await;
                    state.skipped_changes.drain().collect()
                };
                for (subfolder, ci) in skipped {
                    self.folder_changed(&subfolder, ci).await?;
                }
            }
            Ok(())
        })
    }

    async fn propagate_freeze_to(&self, _subfolder: &str) {
        // Backing folders in this crate are plain names with no freeze
        // state of their own to propagate into; the store-level Unmatched
        // propagation is handled by `VeeStore` for non-Unmatched vfolders.
    }

    async fn unpropagate_freeze_from(&self, _subfolder: &str) {}

    async fn on_subfolder_changed(self: &Arc<Self>, subfolder: &str, ci: ChangeInfo) -> Result<()> {
        let should_enqueue = {
            let mut state = self.state.lock().await;
            if state.ignore_changed.remove(subfolder) || !state.auto_update {
                state.skipped_changes.entry(subfolder.to_string()).or_default().cat(&ci);
                false
            } else {
                true
            }
        };
        if !should_enqueue {
            return Ok(());
        }

        let submit = {
            let mut state = self.state.lock().await;
            state.change_queue.push_back((subfolder.to_string(), ci));
            if state.change_queue_busy {
                false
            } else {
                state.change_queue_busy = true;
                true
            }
        };

        if submit {
            let this = Arc::clone(self);
            let name = self.name.clone();
            self.session
                .submit_job(format!("Updating search folder '{name}'"), move |_id, _token| async move {
                    loop {
                        let next = {
                            let mut state = this.state.lock().await;
                            state.change_queue.pop_front()
                        };
                        match next {
                            Some((sub, ci)) => {
                                this.folder_changed(&sub, ci).await.map_err(|e| e.to_string())?;
                            }
                            None => {
                                this.state.lock().await.change_queue_busy = false;
                                break;
                            }
                        }
                    }
                    Ok(())
                })
                .await;
        }
        Ok(())
    }

    /// Reconciles one accumulated change-set from `subfolder`.
    async fn folder_changed(self: &Arc<Self>, subfolder: &str, ci: ChangeInfo) -> Result<()> {
        self.freeze();
        let result = self.folder_changed_inner(subfolder, &ci).await;
        self.thaw().await?;
        result
    }

    async fn folder_changed_inner(self: &Arc<Self>, subfolder: &str, ci: &ChangeInfo) -> Result<()> {
        let mut emitted = ChangeInfo::new();
        let mut tx = self.db.begin_write().await?;

        for uid in &ci.uid_removed {
            if let Some(data) = self.find_cached(subfolder, uid).await {
                self.db.delete_vuids(&mut tx, &self.name, &[data.vuid.clone()]).await?;
                self.forget_vuid(subfolder, &data.vuid).await;
                emitted.remove(data.vuid.clone());
                if let Some(store) = self.store.lock().await.upgrade() {
                    if !self.is_unmatched {
                        store.note_vuid_unused(&data.vuid).await;
                    }
                }
                self.cache.remove(&data.vuid).await;
            }
        }

        let mut candidates: Vec<String> = ci.uid_added.iter().chain(ci.uid_changed.iter()).cloned().collect();
        candidates.sort();
        candidates.dedup();

        if !candidates.is_empty() {
            let expr = self.expression().await;
            if let Some(expr) = expr {
                let whole_subfolder = self.evaluator.mentions_match_threads(&expr);
                let pool = if whole_subfolder {
                    self.db.read_message_info_records(subfolder).await?
                } else {
                    let mut recs = Vec::new();
                    for uid in &candidates {
                        if let Some(r) = self.db.read_message_info_record(subfolder, uid).await? {
                            recs.push(r);
                        }
                    }
                    recs
                };

                let matched: HashSet<String> = pool
                    .iter()
                    .filter(|r| self.evaluator.matches(&expr, r))
                    .map(|r| r.uid.clone())
                    .collect();

                let scan_set: Vec<&MessageInfoRecord> = if whole_subfolder {
                    pool.iter().collect()
                } else {
                    pool.iter().filter(|r| candidates.contains(&r.uid)).collect()
                };

                for rec in &scan_set {
                    let is_match = matched.contains(&rec.uid);
                    let data = self.cache.get(subfolder, &rec.uid, (*rec).clone()).await;
                    let already_present = self.is_tracked(subfolder, &data.vuid).await;

                    if is_match {
                        let mut vrec = (*rec).clone();
                        vrec.uid = data.vuid.clone();
                        self.db.write_message_info(&mut tx, &self.name, &vrec).await?;
                        self.track_vuid(subfolder, &data.vuid).await;
                        if already_present {
                            emitted.change(data.vuid.clone());
                        } else {
                            emitted.add(data.vuid.clone());
                            if let Some(store) = self.store.lock().await.upgrade() {
                                if !self.is_unmatched {
                                    store.note_vuid_used(&data).await;
                                }
                            }
                        }
                    } else if already_present {
                        self.db.delete_vuids(&mut tx, &self.name, &[data.vuid.clone()]).await?;
                        self.forget_vuid(subfolder, &data.vuid).await;
                        emitted.remove(data.vuid.clone());
                        if let Some(store) = self.store.lock().await.upgrade() {
                            if !self.is_unmatched {
                                store.note_vuid_unused(&data.vuid).await;
                            }
                        }
                        self.cache.remove(&data.vuid).await;
                    }
                }
            }
        }

        self.change_bus.emit(emitted).await;
        Ok(())
    }

    async fn find_cached(&self, subfolder: &str, source_uid: &str) -> Option<MessageInfoData> {
        if self.cache.contains(subfolder, source_uid).await {
            let vuid = crate::cache::make_vuid(subfolder, source_uid);
            self.cache.get_by_vuid(&vuid).await
        } else {
            None
        }
    }

    async fn is_tracked(&self, subfolder: &str, vuid: &str) -> bool {
        self.state
            .lock()
            .await
            .subfolder_vuids
            .get(subfolder)
            .map(|s| s.contains(vuid))
            .unwrap_or(false)
    }

    async fn track_vuid(&self, subfolder: &str, vuid: &str) {
        self.state
            .lock()
            .await
            .subfolder_vuids
            .entry(subfolder.to_string())
            .or_default()
            .insert(vuid.to_string());
    }

    async fn forget_vuid(&self, subfolder: &str, vuid: &str) {
        if let Some(set) = self.state.lock().await.subfolder_vuids.get_mut(subfolder) {
            set.remove(vuid);
        }
    }

    /// Directly adds or removes a single vuid to/from this folder's
    /// summary without going through the expression evaluator - used by
    /// `VeeStore` to maintain Unmatched on usage-counter transitions.
    async fn apply_unmatched_transition(self: &Arc<Self>, data: &MessageInfoData, present: bool) -> Result<()> {
        let mut tx = self.db.begin_write().await?;
        let mut ci = ChangeInfo::new();
        if present {
            let mut vrec = data.record.clone();
            vrec.uid = data.vuid.clone();
            self.db.write_message_info(&mut tx, &self.name, &vrec).await?;
            self.track_vuid(&data.subfolder, &data.vuid).await;
            ci.add(data.vuid.clone());
        } else {
            self.db.delete_vuids(&mut tx, &self.name, &[data.vuid.clone()]).await?;
            self.forget_vuid(&data.subfolder, &data.vuid).await;
            ci.remove(data.vuid.clone());
        }
        self.change_bus.emit(ci).await;
        Ok(())
    }
}

fn sub_id_placeholder() -> u64 {
    0
}

/// Coordinates every virtual folder sharing one database, Unmatched's
/// usage-counter bookkeeping, and the per-backing-folder change buses
/// vfolders subscribe to.
pub struct VeeStore {
    db: Arc<Database>,
    cache: SharedMessageInfoCache,
    session: SharedSession,
    folders: Mutex<HashMap<String, Arc<VeeFolder>>>,
    buses: Mutex<HashMap<String, SharedChangeBus>>,
    vuid_usage: Mutex<HashMap<String, u32>>,
    unmatched: Mutex<Option<Arc<VeeFolder>>>,
    unmatched_enabled: AtomicBool,
    /// Subfolders already seeded by [`note_subfolder_used`](Self::note_subfolder_used),
    /// so a second vfolder adding the same subfolder doesn't reseed it.
    seeded_subfolders: Mutex<HashSet<String>>,
}

impl VeeStore {
    pub fn new(db: Arc<Database>, cache: SharedMessageInfoCache, session: SharedSession) -> Arc<Self> {
        Arc::new(Self {
            db,
            cache,
            session,
            folders: Mutex::new(HashMap::new()),
            buses: Mutex::new(HashMap::new()),
            vuid_usage: Mutex::new(HashMap::new()),
            unmatched: Mutex::new(None),
            unmatched_enabled: AtomicBool::new(false),
            seeded_subfolders: Mutex::new(HashSet::new()),
        })
    }

    /// Returns the shared change bus backing folders of `name` publish to
    /// and vfolders subscribe to. Created on first use.
    pub async fn bus_for(&self, name: &str) -> SharedChangeBus {
        let mut buses = self.buses.lock().await;
        buses
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(crate::changeinfo::ChangeBus::new()))
            .clone()
    }

    pub async fn create_folder(self: &Arc<Self>, name: &str) -> Result<Arc<VeeFolder>> {
        if name == UNMATCHED_NAME {
            return Err(crate::error::StoreError::InvalidOperation(
                "Unmatched is managed via enable_unmatched".into(),
            ));
        }
        let folder = VeeFolder::new(name, Arc::clone(&self.db), Arc::clone(&self.cache), Arc::clone(&self.session), false);
        *folder.store.lock().await = Arc::downgrade(self);
        folder.prepare_table().await?;
        self.folders.lock().await.insert(name.to_string(), Arc::clone(&folder));
        Ok(folder)
    }

    pub async fn folder(&self, name: &str) -> Option<Arc<VeeFolder>> {
        self.folders.lock().await.get(name).cloned()
    }

    /// The first time any vfolder starts using `subfolder`, seeds every one
    /// of its messages into the cache with a zero usage count, so messages
    /// that never match any vfolder's expression still become visible to
    /// Unmatched instead of being invisible because nothing ever cached
    /// them. Newly seeded, still-unused vuids are added straight into
    /// Unmatched (if enabled); `note_vuid_used` removes them again once a
    /// vfolder actually claims one.
    async fn note_subfolder_used(&self, subfolder: &str) {
        let first_use = self.seeded_subfolders.lock().await.insert(subfolder.to_string());
        if !first_use {
            return;
        }
        let records = match self.db.read_message_info_records(subfolder).await {
            Ok(records) => records,
            Err(_) => return,
        };
        for rec in records {
            let data = self.cache.get(subfolder, &rec.uid, rec.clone()).await;
            let still_unused = {
                let mut usage = self.vuid_usage.lock().await;
                *usage.entry(data.vuid.clone()).or_insert(0) == 0
            };
            if still_unused {
                if let Some(unmatched) = self.unmatched.lock().await.clone() {
                    let _ = unmatched.apply_unmatched_transition(&data, true).await;
                }
            }
        }
    }

    /// A subfolder's vuid usage counter went from/to 0; drives Unmatched
    /// membership.
    pub async fn note_vuid_used(self: &Arc<Self>, data: &MessageInfoData) {
        let became_one = {
            let mut usage = self.vuid_usage.lock().await;
            let count = usage.entry(data.vuid.clone()).or_insert(0);
            *count += 1;
            *count == 1
        };
        if became_one {
            if let Some(unmatched) = self.unmatched.lock().await.clone() {
                let _ = unmatched.apply_unmatched_transition(data, false).await;
            }
        }
    }

    pub async fn note_vuid_unused(self: &Arc<Self>, vuid: &str) {
        let became_zero = {
            let mut usage = self.vuid_usage.lock().await;
            match usage.get_mut(vuid) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    *count == 0
                }
                _ => false,
            }
        };
        if became_zero {
            if let Some(data) = self.cache.get_by_vuid(vuid).await {
                if let Some(unmatched) = self.unmatched.lock().await.clone() {
                    let _ = unmatched.apply_unmatched_transition(&data, true).await;
                }
            }
        }
    }

    /// Enables Unmatched: creates it if absent, emits a synthetic
    /// folder-created change, and performs a full rebuild.
    pub async fn enable_unmatched(self: &Arc<Self>) -> Result<()> {
        if self.unmatched_enabled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let folder = {
            let mut slot = self.unmatched.lock().await;
            if slot.is_none() {
                let folder = VeeFolder::new(UNMATCHED_NAME, Arc::clone(&self.db), Arc::clone(&self.cache), Arc::clone(&self.session), true);
                *folder.store.lock().await = Arc::downgrade(self);
                folder.prepare_table().await?;

                let mut flags = FolderFlags::default();
                flags.set(FolderFlags::PRIVATE);
                let mut info = crate::model::FolderInfoRecord::new(UNMATCHED_NAME);
                info.flags = flags.0;
                let mut tx = self.db.begin_write().await?;
                self.db.write_folder_info(&mut tx, &info).await?;

                *slot = Some(Arc::clone(&folder));
            }
            slot.clone().unwrap()
        };
        self.rebuild_unmatched(&folder).await
    }

    /// Disables Unmatched, emitting a synthetic folder-deleted change.
    pub async fn disable_unmatched(&self) -> Result<()> {
        if !self.unmatched_enabled.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(folder) = self.unmatched.lock().await.clone() {
            let mut tx = self.db.begin_write().await?;
            self.db.clear_folder_summary(&mut tx, &folder.name).await?;
        }
        Ok(())
    }

    /// Resets Unmatched to exactly the vuids whose usage counter is zero.
    pub async fn rebuild_unmatched(self: &Arc<Self>, folder: &Arc<VeeFolder>) -> Result<()> {
        let mut tx = self.db.begin_write().await?;
        self.db.clear_folder_summary(&mut tx, &folder.name).await?;
        {
            let mut state = folder.state.lock().await;
            state.subfolder_vuids.clear();
        }

        let zero_usage: Vec<String> = {
            let usage = self.vuid_usage.lock().await;
            usage
                .iter()
                .filter(|(_, count)| **count == 0)
                .map(|(vuid, _)| vuid.clone())
                .collect()
        };

        let mut ci = ChangeInfo::new();
        for vuid in zero_usage {
            if let Some(data) = self.cache.get_by_vuid(&vuid).await {
                folder.add_folder(&data.subfolder).await.ok();
                let mut tx = self.db.begin_write().await?;
                let mut vrec = data.record.clone();
                vrec.uid = data.vuid.clone();
                self.db.write_message_info(&mut tx, &folder.name, &vrec).await?;
                folder.track_vuid(&data.subfolder, &data.vuid).await;
                ci.add(vuid);
            }
        }
        folder.change_bus.emit(ci).await;
        Ok(())
    }

    pub async fn unmatched(&self) -> Option<Arc<VeeFolder>> {
        self.unmatched.lock().await.clone()
    }
}

pub type SharedVeeStore = Arc<VeeStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handle::Database;

    async fn setup() -> (tempfile::TempDir, Arc<Database>, SharedMessageInfoCache, SharedSession) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vfolder.db");
        let db = Arc::new(Database::open(path.to_str().unwrap()).await.unwrap());
        db.create_folders_table().await.unwrap();
        db.prepare_message_info_table("INBOX").await.unwrap();
        (dir, db, Arc::new(crate::cache::MessageInfoCache::new()), Arc::new(crate::session::Session::new()))
    }

    async fn write(db: &Database, folder: &str, uid: &str, subject: &str) {
        let mut tx = db.begin_write().await.unwrap();
        let mut rec = MessageInfoRecord::new(uid);
        rec.subject = Some(subject.to_string());
        db.write_message_info(&mut tx, folder, &rec).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn rebuild_folder_matches_by_expression() {
        let (_dir, db, cache, session) = setup().await;
        write(&db, "INBOX", "1", "Quarterly Report").await;
        write(&db, "INBOX", "2", "Lunch plans").await;

        let store = VeeStore::new(Arc::clone(&db), cache, session);
        let vf = store.create_folder("Reports").await.unwrap();
        vf.set_expression(Some("quarterly".into())).await.unwrap();
        vf.add_folder("INBOX").await.unwrap();

        let total = db.count_total("Reports").await.unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn unmatched_tracks_zero_usage_vuids() {
        let (_dir, db, cache, session) = setup().await;
        write(&db, "INBOX", "1", "Quarterly Report").await;
        write(&db, "INBOX", "2", "Lunch plans").await;

        let store = VeeStore::new(Arc::clone(&db), cache, session);
        store.enable_unmatched().await.unwrap();
        let vf = store.create_folder("Reports").await.unwrap();
        vf.set_expression(Some("quarterly".into())).await.unwrap();
        vf.add_folder("INBOX").await.unwrap();

        let unmatched = store.unmatched().await.unwrap();
        // Message 1 is matched by Reports (usage 1) so it must NOT be in
        // Unmatched; message 2 matches nothing (usage 0) so it must be.
        let vuid1 = crate::cache::make_vuid("INBOX", "1");
        let vuid2 = crate::cache::make_vuid("INBOX", "2");
        assert!(db.read_message_info_record(&unmatched.name, &vuid1).await.unwrap().is_none());
        assert!(db.read_message_info_record(&unmatched.name, &vuid2).await.unwrap().is_some());
    }
}
