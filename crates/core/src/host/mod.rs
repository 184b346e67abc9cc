//! Host working copy capability.
//!
//! A [`HostWorkingCopy`] stages path-level changes (add, delete, move, copy)
//! in the version control system that owns the vendored directory. The
//! apply engine issues every registration through this trait and never
//! commits; the operator does that separately.
//!
//! All paths handed to the trait are absolute.

pub mod git;
pub mod plain;
pub mod svn;

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::{HostKind, VendorConfig};
use crate::errors::HostError;
use crate::models::{ConflictSides, StatusEntry};
use crate::snapshot::{write_entry, FileMode};

pub use git::GitHost;
pub use plain::{HostOperation, PlainHost};
pub use svn::SvnHost;

#[async_trait]
pub trait HostWorkingCopy: Send + Sync {
    fn kind(&self) -> HostKind;

    /// Schedule an existing file or directory for addition.
    async fn add(&self, path: &Path) -> Result<(), HostError>;

    /// Remove a file or directory from disk and schedule its deletion.
    async fn delete(&self, path: &Path) -> Result<(), HostError>;

    /// Move on disk, keeping history.
    async fn move_path(&self, from: &Path, to: &Path) -> Result<(), HostError>;

    /// Copy on disk, keeping history.
    async fn copy_path(&self, from: &Path, to: &Path) -> Result<(), HostError>;

    /// Materialize `content` at `path`, creating parent directories.
    async fn write(&self, path: &Path, content: &[u8], mode: FileMode) -> Result<(), HostError> {
        write_entry(path, content, mode).map_err(|e| HostError::io(path, e))
    }

    /// Content at `path` changed outside [`write`](Self::write).
    async fn touched(&self, _path: &Path) -> Result<(), HostError> {
        Ok(())
    }

    /// Flag `path` as conflicted. Markers and sentinel files are already on
    /// disk when this is called.
    async fn mark_conflicted(&self, path: &Path, sides: &ConflictSides) -> Result<(), HostError>;

    /// Status entries below `dir`, relative to it and sorted by path.
    async fn status(&self, dir: &Path) -> Result<Vec<StatusEntry>, HostError>;
}

/// Pick the host adapter for `dir` (which may not exist yet).
pub fn detect_host(dir: &Path, config: &VendorConfig) -> Result<Arc<dyn HostWorkingCopy>, HostError> {
    let anchor = existing_ancestor(dir)?;
    let kind = match config.host.kind {
        HostKind::Auto => detect_kind(&anchor),
        explicit => explicit,
    };
    info!(dir = %dir.display(), kind = ?kind, "selected host working copy");
    let host: Arc<dyn HostWorkingCopy> = match kind {
        HostKind::Svn => Arc::new(SvnHost::new(&config.svn)),
        HostKind::Git => Arc::new(GitHost::discover(&anchor)?),
        HostKind::Plain | HostKind::Auto => Arc::new(PlainHost::new()),
    };
    Ok(host)
}

fn detect_kind(anchor: &Path) -> HostKind {
    if anchor.ancestors().any(|a| a.join(".svn").is_dir()) {
        return HostKind::Svn;
    }
    if git2::Repository::discover(anchor).is_ok_and(|r| !r.is_bare()) {
        return HostKind::Git;
    }
    debug!(anchor = %anchor.display(), "no host VCS found");
    HostKind::Plain
}

/// Closest ancestor of `dir` (itself included) that exists, canonicalized.
fn existing_ancestor(dir: &Path) -> Result<PathBuf, HostError> {
    let absolute = absolutize(dir).map_err(|e| HostError::io(dir, e))?;
    for candidate in absolute.ancestors() {
        if candidate.is_dir() {
            return candidate
                .canonicalize()
                .map_err(|e| HostError::io(candidate, e));
        }
    }
    Err(HostError::OutsideWorkingCopy(dir.to_path_buf()))
}

/// Make `path` absolute against the current directory and drop `.`/`..`
/// components lexically.
pub fn absolutize(path: &Path) -> std::io::Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// `path` relative to `dir` with forward slashes; `None` if outside.
pub(crate) fn relative_to(dir: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(dir).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Remove a file, symlink or directory tree. Absent paths are fine.
pub(crate) fn remove_from_disk(path: &Path) -> Result<(), HostError> {
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    };
    result.map_err(|e| HostError::io(path, e))
}

/// Rename, creating the destination's parent directories.
pub(crate) fn rename_on_disk(from: &Path, to: &Path) -> Result<(), HostError> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HostError::io(parent, e))?;
    }
    std::fs::rename(from, to).map_err(|e| HostError::io(from, e))
}

/// Copy a file (or symlink), creating the destination's parent directories.
pub(crate) fn copy_on_disk(from: &Path, to: &Path) -> Result<(), HostError> {
    let entry = crate::snapshot::read_entry(from)
        .map_err(|e| HostError::io(from, e))?
        .ok_or_else(|| {
            HostError::io(
                from,
                std::io::Error::new(std::io::ErrorKind::NotFound, "copy source is missing"),
            )
        })?;
    write_entry(to, &entry.content, entry.mode).map_err(|e| HostError::io(to, e))
}
