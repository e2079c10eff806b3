//! End-to-end scenarios exercising the full stack: schema migration,
//! deferred sync, virtual-folder reconciliation, Unmatched, offline
//! downsync, and corruption recovery. Each test opens its own temp sqlite
//! file.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use campost::cache::{make_vuid, MessageInfoCache};
use campost::db::Database;
use campost::model::MessageInfoRecord;
use campost::offline::{MessageSynchronizer, OfflineController};
use campost::session::Session;
use campost::vfolder::VeeStore;
use campost::{ChangeBus, Result};

async fn open_store(dir: &tempfile::TempDir, name: &str) -> Database {
    let path = dir.path().join(name);
    let db = Database::open(path.to_str().unwrap()).await.unwrap();
    db.create_folders_table().await.unwrap();
    db
}

async fn write(db: &Database, folder: &str, uid: &str, subject: &str) {
    let mut tx = db.begin_write().await.unwrap();
    let mut rec = MessageInfoRecord::new(uid);
    rec.subject = Some(subject.to_string());
    db.write_message_info(&mut tx, folder, &rec).await.unwrap();
    tx.commit().await.unwrap();
}

/// Scenario 2: deferred sync coalescing.
#[tokio::test]
async fn deferred_sync_coalesces_bursts_into_one_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_store(&dir, "sync.db").await;

    db.request_sync();
    tokio::time::sleep(Duration::from_millis(30)).await;
    db.request_sync();
    tokio::time::sleep(Duration::from_millis(30)).await;
    db.request_sync();

    // Within the debounce window, still nothing pending-completed yet.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(db.deferred_sync().pending_count() <= 1);

    db.close().await;
    assert_eq!(db.deferred_sync().pending_count(), 0);
}

/// Scenario 3: virtual folder add/remove reconciliation.
#[tokio::test]
async fn virtual_folder_tracks_backing_folder_changes() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(open_store(&dir, "vfolder.db").await);
    db.prepare_message_info_table("B").await.unwrap();
    write(&db, "B", "a", "alpha report").await;
    write(&db, "B", "b", "lunch").await;
    write(&db, "B", "c", "gamma report").await;

    let cache = Arc::new(MessageInfoCache::new());
    let session = Arc::new(Session::new());
    let store = VeeStore::new(Arc::clone(&db), cache, session);
    let vf = store.create_folder("V").await.unwrap();
    vf.set_expression(Some("report".into())).await.unwrap();
    vf.add_folder("B").await.unwrap();

    assert_eq!(db.count_total("V").await.unwrap(), 2);

    // B removes 'a'.
    let mut tx = db.begin_write().await.unwrap();
    db.delete_uid(&mut tx, "B", "a").await.unwrap();
    tx.commit().await.unwrap();
    vf.rebuild_folder("B").await.unwrap();

    let vuid_a = make_vuid("B", "a");
    assert!(db.read_message_info_record("V", &vuid_a).await.unwrap().is_none());
    assert_eq!(db.count_total("V").await.unwrap(), 1);

    // B adds 'd', matching.
    write(&db, "B", "d", "delta report").await;
    vf.rebuild_folder("B").await.unwrap();

    let vuid_d = make_vuid("B", "d");
    assert!(db.read_message_info_record("V", &vuid_d).await.unwrap().is_some());
    assert_eq!(db.count_total("V").await.unwrap(), 2);
}

/// Scenario 4: Unmatched transitions as a second vfolder claims a uid.
#[tokio::test]
async fn unmatched_transitions_when_a_uid_becomes_claimed() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(open_store(&dir, "unmatched.db").await);
    db.prepare_message_info_table("B").await.unwrap();
    write(&db, "B", "x", "alpha").await;
    write(&db, "B", "y", "beta").await;

    let cache = Arc::new(MessageInfoCache::new());
    let session = Arc::new(Session::new());
    let store = VeeStore::new(Arc::clone(&db), cache, session);
    store.enable_unmatched().await.unwrap();

    let v = store.create_folder("V").await.unwrap();
    v.set_expression(Some("alpha".into())).await.unwrap();
    v.add_folder("B").await.unwrap();

    let unmatched = store.unmatched().await.unwrap();
    let vuid_y = make_vuid("B", "y");
    assert!(db.read_message_info_record(&unmatched.name, &vuid_y).await.unwrap().is_some());

    let v2 = store.create_folder("V2").await.unwrap();
    v2.set_expression(Some("beta".into())).await.unwrap();
    v2.add_folder("B").await.unwrap();

    assert!(db.read_message_info_record(&unmatched.name, &vuid_y).await.unwrap().is_none());
}

struct CountingSynchronizer {
    synced: tokio::sync::Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl MessageSynchronizer for CountingSynchronizer {
    async fn synchronize_message(&self, uid: &str) -> Result<()> {
        self.synced.lock().await.push(uid.to_string());
        Ok(())
    }
    async fn is_cached(&self, _uid: &str) -> bool {
        false
    }
}

/// Scenario 5: offline auto-downsync on `uid_added`.
#[tokio::test]
async fn offline_controller_downloads_every_added_uid() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(open_store(&dir, "offline.db").await);
    db.prepare_message_info_table("F").await.unwrap();

    let synchronizer = Arc::new(CountingSynchronizer {
        synced: tokio::sync::Mutex::new(Vec::new()),
    });
    let bus = Arc::new(ChangeBus::new());
    let controller = OfflineController::new(
        "F",
        Arc::clone(&db),
        Arc::new(Session::new()),
        Arc::clone(&bus),
        Arc::clone(&synchronizer),
        Arc::new(AtomicBool::new(false)),
        Duration::from_millis(500),
    );
    controller.set_offline_sync(true);
    let _handle = controller.start();

    let mut ci = campost::ChangeInfo::new();
    ci.add("m1");
    ci.add("m2");
    ci.add("m3");
    bus.emit(ci).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    let synced = synchronizer.synced.lock().await.clone();
    assert_eq!(synced, vec!["m1".to_string(), "m2".to_string(), "m3".to_string()]);
}

/// Clear-then-delete idempotence law.
#[tokio::test]
async fn clear_then_delete_matches_direct_delete() {
    let dir = tempfile::tempdir().unwrap();
    let db1 = open_store(&dir, "a.db").await;
    db1.prepare_message_info_table("F").await.unwrap();
    write(&db1, "F", "1", "hello").await;
    let mut tx = db1.begin_write().await.unwrap();
    db1.clear_folder_summary(&mut tx, "F").await.unwrap();
    db1.delete_folder(&mut tx, "F").await.unwrap();
    tx.commit().await.unwrap();

    let db2 = open_store(&dir, "b.db").await;
    db2.prepare_message_info_table("F").await.unwrap();
    write(&db2, "F", "1", "hello").await;
    let mut tx = db2.begin_write().await.unwrap();
    db2.delete_folder(&mut tx, "F").await.unwrap();
    tx.commit().await.unwrap();

    assert!(db1.read_folder_info("F").await.unwrap().is_none());
    assert!(db2.read_folder_info("F").await.unwrap().is_none());
}
