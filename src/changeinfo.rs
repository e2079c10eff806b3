//! Folder change bus: the `ChangeInfo` accumulator and the
//! broadcast mechanism folders use to publish it. Subscribers register an
//! mpsc channel; publishing fans out to every live subscriber and prunes
//! any whose receiver has gone away.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Accumulated added/removed/changed/recent uids between two observable
/// states of a folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeInfo {
    pub uid_added: Vec<String>,
    pub uid_removed: Vec<String>,
    pub uid_changed: Vec<String>,
    pub uid_recent: Vec<String>,
}

impl ChangeInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, uid: impl Into<String>) {
        self.uid_added.push(uid.into());
    }

    pub fn remove(&mut self, uid: impl Into<String>) {
        self.uid_removed.push(uid.into());
    }

    pub fn change(&mut self, uid: impl Into<String>) {
        self.uid_changed.push(uid.into());
    }

    pub fn recent(&mut self, uid: impl Into<String>) {
        self.uid_recent.push(uid.into());
    }

    /// Merge `other` into `self`. Associative and commutative up to set
    /// semantics, so accumulating out of order still yields the same result.
    pub fn cat(&mut self, other: &ChangeInfo) {
        self.uid_added.extend(other.uid_added.iter().cloned());
        self.uid_removed.extend(other.uid_removed.iter().cloned());
        self.uid_changed.extend(other.uid_changed.iter().cloned());
        self.uid_recent.extend(other.uid_recent.iter().cloned());
    }

    pub fn clear(&mut self) {
        self.uid_added.clear();
        self.uid_removed.clear();
        self.uid_changed.clear();
        self.uid_recent.clear();
    }

    /// True if at least one list is non-empty; gates whether the `changed`
    /// signal fires at all.
    pub fn changed(&self) -> bool {
        !self.uid_added.is_empty()
            || !self.uid_removed.is_empty()
            || !self.uid_changed.is_empty()
            || !self.uid_recent.is_empty()
    }
}

/// Handle returned by [`ChangeBus::subscribe`].
pub struct ChangeSubscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<ChangeInfo>,
}

impl ChangeSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<ChangeInfo> {
        self.receiver.recv().await
    }
}

/// Per-folder broadcast of `changed(ChangeInfo)`, respecting a freeze
/// counter.
pub struct ChangeBus {
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<ChangeInfo>>>,
    next_id: std::sync::atomic::AtomicU64,
    freeze_count: std::sync::atomic::AtomicU32,
    pending: Mutex<ChangeInfo>,
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: std::sync::atomic::AtomicU64::new(1),
            freeze_count: std::sync::atomic::AtomicU32::new(0),
            pending: Mutex::new(ChangeInfo::new()),
        }
    }

    pub async fn subscribe(&self) -> ChangeSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.subscribers.lock().await.insert(id, tx);
        ChangeSubscription { id, receiver: rx }
    }

    pub async fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().await.remove(&id);
    }

    /// Increment the freeze counter. While frozen, `emit` accumulates into
    /// `pending` instead of broadcasting.
    pub fn freeze(&self) {
        self.freeze_count
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    /// Decrement the freeze counter; at 0, broadcast whatever accumulated
    /// while frozen.
    pub async fn thaw(&self) {
        let prev = self
            .freeze_count
            .fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        if prev == 1 {
            let mut pending = self.pending.lock().await;
            if pending.changed() {
                let ci = std::mem::take(&mut *pending);
                drop(pending);
                self.broadcast(ci).await;
            }
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.freeze_count.load(std::sync::atomic::Ordering::SeqCst) > 0
    }

    /// Emit a change-set, respecting the freeze counter.
    pub async fn emit(&self, ci: ChangeInfo) {
        if !ci.changed() {
            return;
        }
        if self.is_frozen() {
            self.pending.lock().await.cat(&ci);
            return;
        }
        self.broadcast(ci).await;
    }

    async fn broadcast(&self, ci: ChangeInfo) {
        let mut subscribers = self.subscribers.lock().await;
        let mut dead = Vec::new();
        for (id, tx) in subscribers.iter() {
            if tx.send(ci.clone()).is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            subscribers.remove(&id);
        }
    }
}

/// Shared, cloneable handle to a folder's change bus.
pub type SharedChangeBus = Arc<ChangeBus>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cat_is_associative_and_commutative_up_to_sets() {
        let mut a = ChangeInfo::new();
        a.add("1");
        let mut b = ChangeInfo::new();
        b.add("2");
        let mut c = ChangeInfo::new();
        c.add("3");

        let mut ab_then_c = a.clone();
        ab_then_c.cat(&b);
        ab_then_c.cat(&c);

        let mut bc = b.clone();
        bc.cat(&c);
        let mut a_then_bc = a.clone();
        a_then_bc.cat(&bc);

        let mut sorted = |ci: &ChangeInfo| {
            let mut v = ci.uid_added.clone();
            v.sort();
            v
        };
        assert_eq!(sorted(&ab_then_c), sorted(&a_then_bc));
    }

    #[test]
    fn changed_reflects_any_nonempty_list() {
        let mut ci = ChangeInfo::new();
        assert!(!ci.changed());
        ci.recent("u1");
        assert!(ci.changed());
    }

    #[tokio::test]
    async fn freeze_defers_broadcast_until_thaw() {
        let bus = ChangeBus::new();
        let mut sub = bus.subscribe().await;

        bus.freeze();
        let mut ci = ChangeInfo::new();
        ci.add("u1");
        bus.emit(ci).await;

        // Nothing delivered yet.
        assert!(sub.receiver.try_recv().is_err());

        bus.thaw().await;
        let received = sub.recv().await.unwrap();
        assert_eq!(received.uid_added, vec!["u1".to_string()]);
    }

    #[tokio::test]
    async fn empty_changeinfo_never_broadcasts() {
        let bus = ChangeBus::new();
        let mut sub = bus.subscribe().await;
        bus.emit(ChangeInfo::new()).await;
        assert!(sub.receiver.try_recv().is_err());
    }
}
