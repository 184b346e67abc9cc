//! Git working copy host via `git2`.
//!
//! Registrations are index updates. A conflicted path gets the usual
//! stage 1/2/3 index entries (base, ours, theirs), so `git status` and
//! merge tools see it as unmerged.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use git2::{IndexAddOption, IndexEntry, IndexTime, Repository, Status, StatusOptions};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::{copy_on_disk, relative_to, remove_from_disk, rename_on_disk, HostWorkingCopy};
use crate::config::HostKind;
use crate::errors::HostError;
use crate::models::{ConflictSides, StatusCode, StatusEntry};

/// Position of the merge stage within `IndexEntry::flags`.
const STAGE_SHIFT: u16 = 12;

pub struct GitHost {
    repo: Mutex<Repository>,
    workdir: PathBuf,
}

impl GitHost {
    /// Open the non-bare repository containing `dir`.
    pub fn discover(dir: &Path) -> Result<Self, HostError> {
        let repo = Repository::discover(dir)
            .map_err(|_| HostError::NotVersioned(dir.to_path_buf()))?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| HostError::NotVersioned(dir.to_path_buf()))?
            .canonicalize()
            .map_err(|e| HostError::io(dir, e))?;
        info!(workdir = %workdir.display(), "opened git host working copy");
        Ok(Self {
            repo: Mutex::new(repo),
            workdir,
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn rel(&self, path: &Path) -> Result<String, HostError> {
        relative_to(&self.workdir, path)
            .filter(|rel| !rel.is_empty())
            .ok_or_else(|| HostError::OutsideWorkingCopy(path.to_path_buf()))
    }
}

#[async_trait]
impl HostWorkingCopy for GitHost {
    fn kind(&self) -> HostKind {
        HostKind::Git
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    async fn add(&self, path: &Path) -> Result<(), HostError> {
        let rel = self.rel(path)?;
        let repo = self.repo.lock().await;
        let mut index = repo.index()?;
        index.add_all([rel.as_str()].iter(), IndexAddOption::FORCE, None)?;
        index.write()?;
        debug!(path = %rel, "staged");
        Ok(())
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    async fn delete(&self, path: &Path) -> Result<(), HostError> {
        let rel = self.rel(path)?;
        remove_from_disk(path)?;
        let repo = self.repo.lock().await;
        let mut index = repo.index()?;
        index.remove_all([rel.as_str()].iter(), None)?;
        index.write()?;
        Ok(())
    }

    #[instrument(skip_all, fields(from = %from.display(), to = %to.display()))]
    async fn move_path(&self, from: &Path, to: &Path) -> Result<(), HostError> {
        let from_rel = self.rel(from)?;
        let to_rel = self.rel(to)?;
        rename_on_disk(from, to)?;
        let repo = self.repo.lock().await;
        let mut index = repo.index()?;
        index.remove_all([from_rel.as_str()].iter(), None)?;
        index.add_all([to_rel.as_str()].iter(), IndexAddOption::FORCE, None)?;
        index.write()?;
        Ok(())
    }

    #[instrument(skip_all, fields(from = %from.display(), to = %to.display()))]
    async fn copy_path(&self, from: &Path, to: &Path) -> Result<(), HostError> {
        let to_rel = self.rel(to)?;
        copy_on_disk(from, to)?;
        let repo = self.repo.lock().await;
        let mut index = repo.index()?;
        index.add_path(Path::new(&to_rel))?;
        index.write()?;
        Ok(())
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    async fn mark_conflicted(&self, path: &Path, sides: &ConflictSides) -> Result<(), HostError> {
        let rel = self.rel(path)?;
        let repo = self.repo.lock().await;
        let mut index = repo.index()?;
        let mode = index
            .get_path(Path::new(&rel), 0)
            .map(|e| e.mode)
            .unwrap_or(0o100644);
        let entry = |stage: u16, content: &[u8]| -> Result<IndexEntry, git2::Error> {
            Ok(IndexEntry {
                ctime: IndexTime::new(0, 0),
                mtime: IndexTime::new(0, 0),
                dev: 0,
                ino: 0,
                mode,
                uid: 0,
                gid: 0,
                file_size: u32::try_from(content.len()).unwrap_or(u32::MAX),
                id: repo.blob(content)?,
                flags: stage << STAGE_SHIFT,
                flags_extended: 0,
                path: rel.as_bytes().to_vec(),
            })
        };
        let mut stages = vec![entry(1, &sides.base)?, entry(2, &sides.ours)?];
        if let Some(theirs) = &sides.theirs {
            stages.push(entry(3, theirs)?);
        }

        index.remove_path(Path::new(&rel))?;
        for staged in &stages {
            index.add(staged)?;
        }
        index.write()?;
        info!(path = %rel, stages = stages.len(), "recorded index conflict");
        Ok(())
    }

    async fn status(&self, dir: &Path) -> Result<Vec<StatusEntry>, HostError> {
        let dir_rel = relative_to(&self.workdir, dir)
            .ok_or_else(|| HostError::OutsideWorkingCopy(dir.to_path_buf()))?;
        let repo = self.repo.lock().await;
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        if !dir_rel.is_empty() {
            opts.pathspec(dir_rel.as_str());
        }

        let mut entries = Vec::new();
        for status_entry in repo.statuses(Some(&mut opts))?.iter() {
            let Some(path) = status_entry.path() else {
                continue;
            };
            let Some(code) = status_code(status_entry.status()) else {
                continue;
            };
            if let Some(rel) = relative_to(dir, &self.workdir.join(path)) {
                entries.push(StatusEntry::new(code, rel));
            }
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}

fn status_code(status: Status) -> Option<StatusCode> {
    if status.is_conflicted() {
        Some(StatusCode::Conflicted)
    } else if status.is_index_new() {
        Some(StatusCode::Added)
    } else if status.is_index_deleted() {
        Some(StatusCode::Deleted)
    } else if status.is_index_renamed() || status.is_index_typechange() {
        Some(StatusCode::Replaced)
    } else if status.is_index_modified() || status.is_wt_modified() || status.is_wt_typechange() {
        Some(StatusCode::Modified)
    } else if status.is_wt_deleted() {
        Some(StatusCode::Missing)
    } else if status.is_wt_new() {
        Some(StatusCode::Unversioned)
    } else {
        None
    }
}
