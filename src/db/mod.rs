//! Storage layer: deferred sync, the database handle, and the
//! per-folder summary store built on top of it.

pub mod handle;
pub mod summary;
pub mod vfs;

pub use handle::{sql_match, Database, WriteGuard};
pub use vfs::DeferredSync;
