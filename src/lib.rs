//! SQLite-backed message metadata store and virtual-folder engine.
//!
//! Three subsystems, bottom to top: [`db`] (component A-C: deferred sync,
//! the database handle, the per-folder summary store), [`cache`] (component
//! D: the process-wide message-info cache), and [`vfolder`] (component E:
//! the virtual-folder engine and Unmatched). [`offline`] (component F) and
//! [`session`] (background job submission) sit alongside the virtual-folder
//! engine. [`changeinfo`] (component G) is the change-set type and
//! broadcast bus every other layer publishes through.

pub mod cache;
pub mod changeinfo;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod offline;
pub mod session;
pub mod vfolder;

pub use cache::{MessageInfoCache, MessageInfoData, SharedMessageInfoCache};
pub use changeinfo::{ChangeBus, ChangeInfo, ChangeSubscription, SharedChangeBus};
pub use db::{Database, DeferredSync, WriteGuard};
pub use error::{Result, StoreError};
pub use model::{ColumnIdent, FolderFlags, FolderInfoRecord, MessageFlags, MessageInfoRecord, PreviewRow, TombstoneRow};
pub use offline::{MessageSynchronizer, OfflineController};
pub use session::{JobHandle, JobStatus, Session, SharedSession};
pub use vfolder::{SharedVeeStore, VeeFolder, VeeStore, UNMATCHED_NAME};
