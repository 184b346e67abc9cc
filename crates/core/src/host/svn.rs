//! Subversion working copy host, driven through the `svn` CLI.
//!
//! svn has no command to flag a path as conflicted without running a merge
//! itself, so a modified path with a `.mine` sentinel next to it is
//! reported as conflicted by [`status`](HostWorkingCopy::status).

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{relative_to, HostWorkingCopy};
use crate::config::{HostKind, SvnConfig};
use crate::errors::HostError;
use crate::models::{ConflictSides, StatusCode, StatusEntry};
use crate::svn::{SvnClient, SvnStatusEntry};

pub struct SvnHost {
    client: SvnClient,
}

impl SvnHost {
    pub fn new(config: &SvnConfig) -> Self {
        Self::with_client(SvnClient::from_config(config))
    }

    pub fn with_client(client: SvnClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HostWorkingCopy for SvnHost {
    fn kind(&self) -> HostKind {
        HostKind::Svn
    }

    async fn add(&self, path: &Path) -> Result<(), HostError> {
        Ok(self.client.add(path).await?)
    }

    async fn delete(&self, path: &Path) -> Result<(), HostError> {
        Ok(self.client.remove(path).await?)
    }

    async fn move_path(&self, from: &Path, to: &Path) -> Result<(), HostError> {
        Ok(self.client.move_path(from, to).await?)
    }

    async fn copy_path(&self, from: &Path, to: &Path) -> Result<(), HostError> {
        Ok(self.client.copy_path(from, to).await?)
    }

    async fn mark_conflicted(&self, path: &Path, _sides: &ConflictSides) -> Result<(), HostError> {
        debug!(path = %path.display(), "conflict recorded through sentinel files");
        Ok(())
    }

    #[instrument(skip_all, fields(dir = %dir.display()))]
    async fn status(&self, dir: &Path) -> Result<Vec<StatusEntry>, HostError> {
        let raw = self.client.status(dir).await?;
        let mut entries: Vec<StatusEntry> = raw
            .iter()
            .filter_map(|entry| to_status_entry(dir, entry))
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}

fn to_status_entry(dir: &Path, entry: &SvnStatusEntry) -> Option<StatusEntry> {
    let path = dir.join(&entry.path);
    let code = match entry.item.as_str() {
        "added" if entry.copied => StatusCode::Copied,
        "added" => StatusCode::Added,
        "deleted" => StatusCode::Deleted,
        "replaced" => StatusCode::Replaced,
        "conflicted" => StatusCode::Conflicted,
        "missing" => StatusCode::Missing,
        "unversioned" => StatusCode::Unversioned,
        "modified" if has_mine_sentinel(&path) => StatusCode::Conflicted,
        "modified" => StatusCode::Modified,
        _ => return None,
    };
    let rel = relative_to(dir, &path)?;
    Some(StatusEntry::new(code, if rel.is_empty() { ".".into() } else { rel }))
}

fn has_mine_sentinel(path: &Path) -> bool {
    let mut name = path.as_os_str().to_owned();
    name.push(".mine");
    Path::new(&name).is_file()
}
