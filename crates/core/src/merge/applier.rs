//! Replays a [`ChangeSet`] onto a vendored directory.
//!
//! Every path is compared against the old snapshot (the merge base) to
//! decide whether the operator edited it locally:
//!
//! | upstream | local vs. base | action |
//! |----------|----------------|--------|
//! | added | absent | write + add |
//! | added | present, different | merge against an empty base |
//! | deleted | unchanged | delete |
//! | deleted | edited | keep the local file, flag it conflicted |
//! | modified | unchanged | overwrite |
//! | modified | edited | three-way merge, conflict markers on overlap |
//! | moved | any | host move or copy, local content travels along |
//!
//! Passes run in a fixed order: copies, moves, deletions, pruning of
//! directories the new snapshot no longer has, additions, modifications.

use std::cmp::Reverse;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::merger::{MergeLabels, Merger};
use crate::errors::HostError;
use crate::host::HostWorkingCopy;
use crate::models::{ChangeSet, ConflictSides, MovedPath, PathAction, PathOutcome};
use crate::snapshot::{read_entry, write_entry, FileEntry, FileMode, TreeSnapshot};

/// Suffix of the sentinel holding the local side of a conflict.
pub const MINE_SUFFIX: &str = ".mine";
/// Suffix of the sentinel holding the merge base.
pub const BASE_SUFFIX: &str = ".rOLD";
/// Suffix of the sentinel holding the upstream side.
pub const THEIRS_SUFFIX: &str = ".rNEW";

pub struct ApplyEngine<'a> {
    host: &'a dyn HostWorkingCopy,
    dest: &'a Path,
    old: &'a TreeSnapshot,
    new: &'a TreeSnapshot,
    labels: MergeLabels,
}

impl<'a> ApplyEngine<'a> {
    pub fn new(
        host: &'a dyn HostWorkingCopy,
        dest: &'a Path,
        old: &'a TreeSnapshot,
        new: &'a TreeSnapshot,
    ) -> Self {
        Self {
            host,
            dest,
            old,
            new,
            labels: MergeLabels::default(),
        }
    }

    /// Apply `changes`, returning one outcome per touched path in the order
    /// the paths were handled.
    pub async fn apply(&self, changes: &ChangeSet) -> Result<Vec<PathOutcome>, HostError> {
        let mut outcomes = Vec::with_capacity(changes.len());

        let (copies, renames): (Vec<&MovedPath>, Vec<&MovedPath>) =
            changes.moved.iter().partition(|m| m.is_copy);
        for copy in copies {
            outcomes.extend(self.apply_copy(copy).await?);
        }
        for rename in renames {
            outcomes.extend(self.apply_rename(rename).await?);
        }
        for path in &changes.deleted {
            outcomes.push(self.apply_delete(path).await?);
        }
        self.prune_directories(changes).await?;
        for path in &changes.added {
            outcomes.push(self.apply_add(path).await?);
        }
        for path in &changes.modified {
            outcomes.push(self.apply_modify(path).await?);
        }

        info!(
            dest = %self.dest.display(),
            paths = outcomes.len(),
            conflicts = outcomes.iter().filter(|o| o.action == PathAction::Conflict).count(),
            "apply pass finished"
        );
        Ok(outcomes)
    }

    fn abs(&self, rel: &str) -> PathBuf {
        self.dest.join(rel)
    }

    fn local(&self, rel: &str) -> Result<Option<FileEntry>, HostError> {
        let path = self.abs(rel);
        read_entry(&path).map_err(|e| HostError::io(path, e))
    }

    async fn apply_copy(&self, copy: &MovedPath) -> Result<Vec<PathOutcome>, HostError> {
        let Some(entry) = self.new.get(&copy.to) else {
            return Ok(Vec::new());
        };
        if self.local(&copy.to)?.is_some() {
            return Ok(vec![self.apply_add(&copy.to).await?]);
        }
        let from = self.abs(&copy.from);
        let to = self.abs(&copy.to);
        if self.local(&copy.from)?.is_none() {
            debug!(from = %copy.from, to = %copy.to, "copy source missing locally, adding instead");
            return Ok(vec![self.apply_add(&copy.to).await?]);
        }

        self.host.copy_path(&from, &to).await?;
        self.host.write(&to, &entry.content, entry.mode).await?;
        debug!(from = %copy.from, to = %copy.to, "copied");
        Ok(vec![PathOutcome::new(
            copy.to.clone(),
            PathAction::Copied {
                from: copy.from.clone(),
            },
        )])
    }

    async fn apply_rename(&self, rename: &MovedPath) -> Result<Vec<PathOutcome>, HostError> {
        let source_present = self.local(&rename.from)?.is_some();
        if !source_present || self.local(&rename.to)?.is_some() {
            debug!(from = %rename.from, to = %rename.to, "rename not applicable, splitting into delete and add");
            let mut outcomes = Vec::new();
            if source_present {
                outcomes.push(self.apply_delete(&rename.from).await?);
            }
            outcomes.push(self.apply_add(&rename.to).await?);
            return Ok(outcomes);
        }

        self.host
            .move_path(&self.abs(&rename.from), &self.abs(&rename.to))
            .await?;
        debug!(from = %rename.from, to = %rename.to, "moved");
        Ok(vec![PathOutcome::new(
            rename.to.clone(),
            PathAction::Moved {
                from: rename.from.clone(),
            },
        )])
    }

    async fn apply_delete(&self, rel: &str) -> Result<PathOutcome, HostError> {
        let local = self.local(rel)?;
        let action = match (local, self.old.get(rel)) {
            (None, _) => PathAction::Skipped {
                reason: "already deleted locally".into(),
            },
            (Some(local), Some(base)) if local == *base => {
                self.host.delete(&self.abs(rel)).await?;
                PathAction::Deleted
            }
            (Some(local), base) => {
                let sides = ConflictSides {
                    base: base.map(|b| b.content.clone()).unwrap_or_default(),
                    ours: local.content,
                    theirs: None,
                };
                let path = self.abs(rel);
                self.write_sentinels(&path, &sides)?;
                self.host.mark_conflicted(&path, &sides).await?;
                warn!(path = rel, "upstream deleted a locally modified file, keeping it");
                PathAction::KeptLocal
            }
        };
        Ok(PathOutcome::new(rel, action))
    }

    /// Delete directories that became empty and that the new snapshot does
    /// not contain, deepest first.
    async fn prune_directories(&self, changes: &ChangeSet) -> Result<(), HostError> {
        let keep = self.new.directories();
        let mut candidates: Vec<String> = changes
            .deleted
            .iter()
            .map(String::as_str)
            .chain(changes.moved_from())
            .flat_map(parent_dirs)
            .filter(|dir| !keep.contains(dir))
            .collect();
        candidates.sort_by_key(|dir| (Reverse(dir.matches('/').count()), Reverse(dir.clone())));
        candidates.dedup();

        for dir in candidates {
            let path = self.abs(&dir);
            let is_empty = match std::fs::read_dir(&path) {
                Ok(mut entries) => entries.next().is_none(),
                Err(_) => false,
            };
            if is_empty {
                self.host.delete(&path).await?;
                debug!(dir = %dir, "pruned empty directory");
            }
        }
        Ok(())
    }

    async fn apply_add(&self, rel: &str) -> Result<PathOutcome, HostError> {
        let Some(entry) = self.new.get(rel) else {
            return Ok(PathOutcome::new(
                rel,
                PathAction::Skipped {
                    reason: "not in upstream snapshot".into(),
                },
            ));
        };
        let path = self.abs(rel);
        let local = self.local(rel)?;
        if local.is_none() {
            self.host.write(&path, &entry.content, entry.mode).await?;
        }
        // Registered first: a conflict flag raised by the merge must stay last.
        self.host.add(&path).await?;
        let action = match local {
            Some(local) if local != *entry => {
                debug!(path = rel, "added upstream over an existing local file, merging");
                self.merge(rel, &FileEntry::new(Vec::new(), entry.mode), &local, entry)
                    .await?
            }
            _ => PathAction::Added,
        };
        Ok(PathOutcome::new(rel, action))
    }

    async fn apply_modify(&self, rel: &str) -> Result<PathOutcome, HostError> {
        let (Some(base), Some(theirs)) = (self.old.get(rel), self.new.get(rel)) else {
            return Ok(PathOutcome::new(
                rel,
                PathAction::Skipped {
                    reason: "missing from a snapshot".into(),
                },
            ));
        };
        let action = match self.local(rel)? {
            None => {
                warn!(path = rel, "upstream modified a file deleted locally, leaving it deleted");
                PathAction::Skipped {
                    reason: "deleted locally".into(),
                }
            }
            Some(local) if local == *base => {
                self.host
                    .write(&self.abs(rel), &theirs.content, theirs.mode)
                    .await?;
                PathAction::Clean
            }
            Some(local) if local == *theirs => PathAction::Clean,
            Some(local) => self.merge(rel, base, &local, theirs).await?,
        };
        Ok(PathOutcome::new(rel, action))
    }

    async fn merge(
        &self,
        rel: &str,
        base: &FileEntry,
        ours: &FileEntry,
        theirs: &FileEntry,
    ) -> Result<PathAction, HostError> {
        let path = self.abs(rel);
        let mode = if theirs.mode == base.mode {
            ours.mode
        } else {
            theirs.mode
        };
        let (base, ours, theirs) = (&base.content, &ours.content, &theirs.content);

        let binary = [base, ours, theirs].iter().any(|c| Merger::is_binary(c));
        let content = if binary || mode == FileMode::Symlink {
            if ours == base || theirs == base || ours == theirs {
                let winner = if ours == base { theirs } else { ours };
                self.host.write(&path, winner, mode).await?;
                return Ok(PathAction::Merged);
            }
            debug!(path = rel, "whole-file conflict");
            theirs.clone()
        } else {
            let result = Merger::three_way_merge(base, ours, theirs, &self.labels);
            if !result.has_conflicts {
                self.host.write(&path, &result.merged_content, mode).await?;
                debug!(path = rel, "merged cleanly");
                return Ok(PathAction::Merged);
            }
            result.merged_content
        };

        let sides = ConflictSides {
            base: base.clone(),
            ours: ours.clone(),
            theirs: Some(theirs.clone()),
        };
        self.host.write(&path, &content, mode).await?;
        self.write_sentinels(&path, &sides)?;
        self.host.mark_conflicted(&path, &sides).await?;
        warn!(path = rel, "merge conflict");
        Ok(PathAction::Conflict)
    }

    fn write_sentinels(&self, path: &Path, sides: &ConflictSides) -> Result<(), HostError> {
        for (suffix, content) in [
            (MINE_SUFFIX, Some(&sides.ours)),
            (BASE_SUFFIX, Some(&sides.base)),
            (THEIRS_SUFFIX, sides.theirs.as_ref()),
        ] {
            let Some(content) = content else {
                continue;
            };
            let sentinel = sentinel_path(path, suffix);
            write_entry(&sentinel, content, FileMode::Regular)
                .map_err(|e| HostError::io(&sentinel, e))?;
        }
        Ok(())
    }
}

/// `<path><suffix>`, e.g. `lib/a.rb.mine`.
pub fn sentinel_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Every proper ancestor directory of a relative file path.
fn parent_dirs(path: &str) -> Vec<String> {
    let mut dirs = Vec::new();
    let mut current = path;
    while let Some(idx) = current.rfind('/') {
        current = &current[..idx];
        dirs.push(current.to_string());
    }
    dirs
}
