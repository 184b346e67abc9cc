//! Unversioned host directory.
//!
//! Changes land on disk directly. Every registration is journaled in memory
//! so `status` can report what a versioned host would have scheduled.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{copy_on_disk, relative_to, remove_from_disk, rename_on_disk, HostWorkingCopy};
use crate::config::HostKind;
use crate::errors::HostError;
use crate::models::{ConflictSides, StatusCode, StatusEntry};
use crate::snapshot::{write_entry, FileMode};

/// One registration call received by a [`PlainHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOperation {
    Add(PathBuf),
    Delete(PathBuf),
    Move { from: PathBuf, to: PathBuf },
    Copy { from: PathBuf, to: PathBuf },
    Conflicted(PathBuf),
}

#[derive(Debug, Default)]
struct Journal {
    operations: Vec<HostOperation>,
    status: BTreeMap<PathBuf, StatusCode>,
}

impl Journal {
    fn schedule_add(&mut self, path: &Path, code: StatusCode) {
        let code = match self.status.get(path) {
            Some(StatusCode::Deleted) | Some(StatusCode::Replaced) => StatusCode::Replaced,
            _ => code,
        };
        self.status.insert(path.to_path_buf(), code);
    }

    fn schedule_delete(&mut self, path: &Path) {
        self.status.retain(|p, _| !p.starts_with(path) || p == path);
        match self.status.get(path) {
            Some(StatusCode::Added) | Some(StatusCode::Copied) => {
                self.status.remove(path);
            }
            _ => {
                self.status.insert(path.to_path_buf(), StatusCode::Deleted);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct PlainHost {
    journal: Mutex<Journal>,
}

impl PlainHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every registration received so far, in call order.
    pub async fn operations(&self) -> Vec<HostOperation> {
        self.journal.lock().await.operations.clone()
    }
}

#[async_trait]
impl HostWorkingCopy for PlainHost {
    fn kind(&self) -> HostKind {
        HostKind::Plain
    }

    async fn add(&self, path: &Path) -> Result<(), HostError> {
        if std::fs::symlink_metadata(path).is_err() {
            return Err(HostError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "cannot add a missing path"),
            ));
        }
        let mut journal = self.journal.lock().await;
        journal.operations.push(HostOperation::Add(path.to_path_buf()));
        journal.schedule_add(path, StatusCode::Added);
        debug!(path = %path.display(), "journaled add");
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<(), HostError> {
        remove_from_disk(path)?;
        let mut journal = self.journal.lock().await;
        journal.operations.push(HostOperation::Delete(path.to_path_buf()));
        journal.schedule_delete(path);
        debug!(path = %path.display(), "journaled delete");
        Ok(())
    }

    async fn move_path(&self, from: &Path, to: &Path) -> Result<(), HostError> {
        rename_on_disk(from, to)?;
        let mut journal = self.journal.lock().await;
        journal.operations.push(HostOperation::Move {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        });
        journal.schedule_delete(from);
        journal.schedule_add(to, StatusCode::Copied);
        Ok(())
    }

    async fn copy_path(&self, from: &Path, to: &Path) -> Result<(), HostError> {
        copy_on_disk(from, to)?;
        let mut journal = self.journal.lock().await;
        journal.operations.push(HostOperation::Copy {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        });
        journal.schedule_add(to, StatusCode::Copied);
        Ok(())
    }

    async fn write(&self, path: &Path, content: &[u8], mode: FileMode) -> Result<(), HostError> {
        let existed = path.exists();
        write_entry(path, content, mode).map_err(|e| HostError::io(path, e))?;
        if existed {
            self.touched(path).await?;
        }
        Ok(())
    }

    async fn touched(&self, path: &Path) -> Result<(), HostError> {
        let mut journal = self.journal.lock().await;
        journal
            .status
            .entry(path.to_path_buf())
            .or_insert(StatusCode::Modified);
        Ok(())
    }

    async fn mark_conflicted(&self, path: &Path, _sides: &ConflictSides) -> Result<(), HostError> {
        let mut journal = self.journal.lock().await;
        journal
            .operations
            .push(HostOperation::Conflicted(path.to_path_buf()));
        journal
            .status
            .insert(path.to_path_buf(), StatusCode::Conflicted);
        Ok(())
    }

    async fn status(&self, dir: &Path) -> Result<Vec<StatusEntry>, HostError> {
        let journal = self.journal.lock().await;
        let mut entries: Vec<StatusEntry> = journal
            .status
            .iter()
            .filter_map(|(path, code)| {
                let rel = relative_to(dir, path)?;
                Some(StatusEntry::new(*code, if rel.is_empty() { ".".into() } else { rel }))
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}
