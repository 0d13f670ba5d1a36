//! Master/slave synchronization for KeePass databases.
//!
//! A database lists sync jobs as records in a reserved group. When it is
//! saved, every job copies its selection of entries into another database
//! file, mirrors group structure by identity, resolves conflicts by
//! modification time and propagates deletions. Targets then run their own
//! jobs, which gives star or mesh topologies without a server.

pub mod credential;
pub mod database;
pub mod error;
pub mod jobs;
pub mod merge;
pub mod orchestrator;
pub mod prune;
pub mod reference;
pub mod selector;
pub mod tree;

#[cfg(test)]
mod test_support;

pub use credential::Credential;
pub use database::{DatabaseStore, FileStore, KeepassDatabase};
pub use error::{Result, SyncError};
pub use jobs::{load_jobs, SyncJob, DEFAULT_JOBS_GROUP};
pub use merge::{MergeOptions, MergeStats};
pub use orchestrator::{
    DocumentHost, NoDocuments, OpenDocument, SaveToken, SaveTracker, SyncOrchestrator,
    SyncReport, SyncSettings, SyncWarning,
};
pub use selector::Selection;
