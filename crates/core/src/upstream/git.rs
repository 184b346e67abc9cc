//! Git upstream adapter via `git2`.
//!
//! The repository is cloned (bare) into a private temporary directory when
//! the adapter is opened; every resolve and extract afterwards is local.

use async_trait::async_trait;
use git2::{ObjectType, Oid, Repository, Tree};
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::UpstreamRepository;
use crate::errors::UpstreamError;
use crate::models::{RepositoryKind, ResolvedRevision, RevisionSpec};
use crate::snapshot::{FileEntry, FileMode, TreeSnapshot};

/// Prefixes tried, in order, in front of a symbolic specifier.
const REF_PREFIXES: &[&str] = &[
    "",
    "refs/heads/",
    "refs/tags/",
    "refs/remotes/",
    "refs/remotes/origin/",
];

pub struct GitUpstream {
    url: String,
    repo: Mutex<Repository>,
    /// Removed, clone included, when the adapter is dropped.
    _clone_dir: TempDir,
}

impl GitUpstream {
    /// Clone `url` (a remote URL or a local path) into a temporary directory.
    #[instrument(skip_all, fields(url = %url))]
    pub fn open(url: &str) -> Result<Self, UpstreamError> {
        let clone_dir = tempfile::Builder::new().prefix("vendorsync-git-").tempdir()?;
        info!("cloning upstream git repository");
        let repo = git2::build::RepoBuilder::new()
            .bare(true)
            .clone(url, clone_dir.path())
            .map_err(|e| UpstreamError::Resolution {
                spec: url.to_string(),
                detail: format!("cannot clone: {}", e.message()),
            })?;
        debug!(path = %clone_dir.path().display(), "clone completed");
        Ok(Self {
            url: url.to_string(),
            repo: Mutex::new(repo),
            _clone_dir: clone_dir,
        })
    }
}

#[async_trait]
impl UpstreamRepository for GitUpstream {
    fn kind(&self) -> RepositoryKind {
        RepositoryKind::Git
    }

    fn url(&self) -> &str {
        &self.url
    }

    #[instrument(skip_all, fields(url = %self.url, spec = %spec))]
    async fn resolve(&self, spec: &RevisionSpec) -> Result<ResolvedRevision, UpstreamError> {
        let repo = self.repo.lock().await;
        let resolved = match spec.as_deref() {
            None => resolve_head(&repo)?,
            Some(name) => {
                let oid = resolve_name(&repo, name)?;
                ResolvedRevision::new(oid.to_string(), Some(name.to_string()))
            }
        };
        info!(revision = %resolved, "resolved git revision");
        Ok(resolved)
    }

    #[instrument(skip_all, fields(url = %self.url, revision = %revision.short_id()))]
    async fn extract(&self, revision: &ResolvedRevision) -> Result<TreeSnapshot, UpstreamError> {
        let repo = self.repo.lock().await;
        let extraction = |detail: String| UpstreamError::Extraction {
            revision: revision.identifier.clone(),
            detail,
        };
        let oid = Oid::from_str(&revision.identifier).map_err(|e| extraction(e.message().into()))?;
        let commit = repo
            .find_commit(oid)
            .map_err(|e| extraction(e.message().into()))?;
        let tree = commit
            .tree()
            .map_err(|e| extraction(e.message().into()))?;

        let mut snapshot = TreeSnapshot::new();
        collect_tree(&repo, &tree, "", &mut snapshot)?;
        info!(files = snapshot.len(), "extracted git tree");
        Ok(snapshot)
    }
}

/// Primary line of history: whatever the cloned HEAD points at.
fn resolve_head(repo: &Repository) -> Result<ResolvedRevision, UpstreamError> {
    let head = repo.head().map_err(|e| UpstreamError::Resolution {
        spec: "HEAD".into(),
        detail: e.message().to_string(),
    })?;
    let commit = head.peel_to_commit()?;
    let branch = head
        .is_branch()
        .then(|| head.shorthand().map(str::to_string))
        .flatten();
    Ok(ResolvedRevision::new(commit.id().to_string(), branch))
}

fn resolve_name(repo: &Repository, name: &str) -> Result<Oid, UpstreamError> {
    for prefix in REF_PREFIXES {
        let full = format!("{}{}", prefix, name);
        if let Ok(reference) = repo.find_reference(&full) {
            if let Ok(commit) = reference.peel_to_commit() {
                debug!(reference = %full, "matched reference");
                return Ok(commit.id());
            }
        }
    }

    if looks_like_full_oid(name) {
        if let Ok(commit) = Oid::from_str(name).and_then(|oid| repo.find_commit(oid)) {
            return Ok(commit.id());
        }
    }

    repo.revparse_single(name)
        .and_then(|obj| obj.peel_to_commit())
        .map(|commit| commit.id())
        .map_err(|e| UpstreamError::Resolution {
            spec: name.to_string(),
            detail: e.message().to_string(),
        })
}

fn looks_like_full_oid(name: &str) -> bool {
    name.len() == 40 && name.bytes().all(|b| b.is_ascii_hexdigit())
}

fn collect_tree(
    repo: &Repository,
    tree: &Tree<'_>,
    prefix: &str,
    snapshot: &mut TreeSnapshot,
) -> Result<(), UpstreamError> {
    for entry in tree.iter() {
        let Some(name) = entry.name() else {
            warn!(prefix, "skipping tree entry with non UTF-8 name");
            continue;
        };
        let path = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", prefix, name)
        };
        match entry.kind() {
            Some(ObjectType::Tree) => {
                let subtree = repo.find_tree(entry.id())?;
                collect_tree(repo, &subtree, &path, snapshot)?;
            }
            Some(ObjectType::Blob) => {
                let mode = FileMode::from_git_filemode(entry.filemode()).unwrap_or_default();
                let blob = repo.find_blob(entry.id())?;
                snapshot.insert(path, FileEntry::new(blob.content(), mode));
            }
            _ => debug!(path = %path, "skipping submodule entry"),
        }
    }
    Ok(())
}
