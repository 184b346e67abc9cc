//! vendorsync core library.
//!
//! This crate vendors third-party source trees into a host working copy and
//! keeps them current: revision resolution, tree snapshot extraction,
//! provenance metadata, tree diffing, three-way merging of local edits, and
//! the sync engine that runs import and update.

pub mod config;
pub mod errors;
pub mod file_policy;
pub mod host;
pub mod merge;
pub mod metadata;
pub mod models;
pub mod snapshot;
pub mod svn;
pub mod sync_engine;
pub mod tree_diff;
pub mod upstream;

// Re-exports for convenience.
pub use config::VendorConfig;
pub use host::{detect_host, HostWorkingCopy};
pub use metadata::ProvenanceRecord;
pub use snapshot::TreeSnapshot;
pub use sync_engine::SyncEngine;
pub use tree_diff::TreeDiffer;
pub use upstream::{open_upstream, UpstreamOpener, UpstreamRepository};
