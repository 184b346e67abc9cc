//! Merging upstream changes into a locally edited vendored tree.
//!
//! [`merger`] does the line-level three-way merge of a single file.
//! [`applier`] walks a change set and decides per path whether to
//! overwrite, merge, keep, move or delete.

pub mod applier;
pub mod merger;

pub use applier::{sentinel_path, ApplyEngine, BASE_SUFFIX, MINE_SUFFIX, THEIRS_SUFFIX};
pub use merger::{ConflictMarker, MergeLabels, MergeResult, Merger};
