//! Tree differencer.
//!
//! Compares two [`TreeSnapshot`]s and classifies every differing path as
//! added, deleted, modified, renamed or copied. Renames and copies are
//! detected purely by content-hash equality: a path that appeared is paired
//! with a path that vanished, or failing that with an untouched path that
//! carries the same content.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::models::{ChangeSet, MovedPath};
use crate::snapshot::TreeSnapshot;

/// Stateless snapshot differencer.
pub struct TreeDiffer;

impl TreeDiffer {
    /// Diff `old` against `new`.
    ///
    /// Every list in the result is sorted, and a path appears in at most one
    /// of `added`, `deleted`, `modified`, or one side of `moved`. When one
    /// vanished path matches several appeared paths, the lexicographically
    /// first becomes the rename and the rest become copies. An appeared path
    /// left unpaired becomes a copy of the first unchanged path with the same
    /// content, if any. Empty files never take part in pairing.
    pub fn diff(old: &TreeSnapshot, new: &TreeSnapshot) -> ChangeSet {
        let old_index: BTreeMap<&str, String> =
            old.iter().map(|(p, e)| (p, e.digest())).collect();
        let new_index: BTreeMap<&str, String> =
            new.iter().map(|(p, e)| (p, e.digest())).collect();

        let mut candidate_adds: BTreeSet<&str> = BTreeSet::new();
        let mut modified = Vec::new();
        for (path, new_hash) in &new_index {
            match old_index.get(path) {
                None => {
                    candidate_adds.insert(*path);
                }
                Some(old_hash) if old_hash != new_hash => modified.push(path.to_string()),
                Some(_) => {}
            }
        }
        let candidate_deletes: Vec<&str> = old_index
            .keys()
            .filter(|p| !new_index.contains_key(*p))
            .copied()
            .collect();

        // hash -> unpaired appeared paths, in path order
        let mut adds_by_hash: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for path in &candidate_adds {
            if new.get(path).is_some_and(|e| e.content.is_empty()) {
                continue;
            }
            adds_by_hash
                .entry(new_index[path].as_str())
                .or_default()
                .push(*path);
        }

        let mut moved = Vec::new();
        let mut deleted = Vec::new();
        for from in candidate_deletes {
            let hash = old_index[from].as_str();
            match adds_by_hash.remove(hash) {
                Some(targets) if !old.get(from).is_some_and(|e| e.content.is_empty()) => {
                    for (i, to) in targets.into_iter().enumerate() {
                        candidate_adds.remove(to);
                        moved.push(MovedPath {
                            from: from.to_string(),
                            to: to.to_string(),
                            is_copy: i > 0,
                        });
                    }
                }
                Some(targets) => {
                    adds_by_hash.insert(hash, targets);
                    deleted.push(from.to_string());
                }
                None => deleted.push(from.to_string()),
            }
        }

        // hash -> first path whose content is identical on both sides
        let mut survivors: BTreeMap<&str, &str> = BTreeMap::new();
        for (path, old_hash) in &old_index {
            if new_index.get(path) == Some(old_hash) {
                survivors.entry(old_hash.as_str()).or_insert(*path);
            }
        }

        let mut added = Vec::new();
        for to in candidate_adds {
            let source = new
                .get(to)
                .filter(|e| !e.content.is_empty())
                .and_then(|_| survivors.get(new_index[to].as_str()));
            match source {
                Some(from) => moved.push(MovedPath {
                    from: from.to_string(),
                    to: to.to_string(),
                    is_copy: true,
                }),
                None => added.push(to.to_string()),
            }
        }
        moved.sort_by(|a, b| (&a.from, &a.to).cmp(&(&b.from, &b.to)));

        let changes = ChangeSet {
            added,
            deleted,
            modified,
            moved,
        };
        info!(
            added = changes.added.len(),
            deleted = changes.deleted.len(),
            modified = changes.modified.len(),
            moved = changes.moved.len(),
            "computed tree diff"
        );
        for m in &changes.moved {
            debug!(from = %m.from, to = %m.to, copy = m.is_copy, "paired by content");
        }
        changes
    }
}
