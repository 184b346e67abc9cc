//! Shared fixtures for the end-to-end tests: an in-memory upstream with
//! branches and commits, and helpers to inspect vendored directories.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use vendorsync_core::errors::UpstreamError;
use vendorsync_core::file_policy::FilePolicy;
use vendorsync_core::host::HostWorkingCopy;
use vendorsync_core::models::{RepositoryKind, ResolvedRevision, RevisionSpec, UpstreamHandle};
use vendorsync_core::snapshot::{FileEntry, TreeSnapshot};
use vendorsync_core::upstream::{UpstreamOpener, UpstreamRepository};
use vendorsync_core::SyncEngine;

pub const UPSTREAM_URL: &str = "memory://upstream";

#[derive(Default)]
struct MemoryState {
    head: String,
    refs: BTreeMap<String, String>,
    commits: BTreeMap<String, TreeSnapshot>,
    extractions: usize,
}

/// Upstream whose history lives in memory. Commit ids are 40-char hex
/// strings derived from a counter.
pub struct MemoryUpstream {
    state: Mutex<MemoryState>,
}

impl MemoryUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MemoryState {
                head: "main".into(),
                ..Default::default()
            }),
        })
    }

    /// Record `files` as the new tip of `branch` and return the commit id.
    pub fn commit(&self, branch: &str, files: &[(&str, &str)]) -> String {
        let snapshot: TreeSnapshot = files
            .iter()
            .map(|(p, c)| (p.to_string(), FileEntry::regular(*c)))
            .collect();
        let mut state = self.state.lock().unwrap();
        let id = format!("{:040x}", state.commits.len() + 1);
        state.commits.insert(id.clone(), snapshot);
        state.refs.insert(branch.to_string(), id.clone());
        id
    }

    /// Point `name` (a tag or branch) at an existing commit id, which may
    /// be unknown to simulate a broken upstream.
    pub fn set_ref(&self, name: &str, id: &str) {
        self.state
            .lock()
            .unwrap()
            .refs
            .insert(name.to_string(), id.to_string());
    }

    pub fn extractions(&self) -> usize {
        self.state.lock().unwrap().extractions
    }

    pub fn handle() -> UpstreamHandle {
        UpstreamHandle::new(UPSTREAM_URL, RepositoryKind::Git)
    }
}

#[async_trait]
impl UpstreamRepository for MemoryUpstream {
    fn kind(&self) -> RepositoryKind {
        RepositoryKind::Git
    }

    fn url(&self) -> &str {
        UPSTREAM_URL
    }

    async fn resolve(&self, spec: &RevisionSpec) -> Result<ResolvedRevision, UpstreamError> {
        let state = self.state.lock().unwrap();
        let name = spec.as_deref().unwrap_or(&state.head).to_string();
        if let Some(id) = state.refs.get(&name) {
            return Ok(ResolvedRevision::new(id.clone(), Some(name)));
        }
        if state.commits.contains_key(&name) {
            return Ok(ResolvedRevision::new(name, None));
        }
        Err(UpstreamError::Resolution {
            spec: name,
            detail: "no such ref or commit".into(),
        })
    }

    async fn extract(&self, revision: &ResolvedRevision) -> Result<TreeSnapshot, UpstreamError> {
        let mut state = self.state.lock().unwrap();
        state.extractions += 1;
        state
            .commits
            .get(&revision.identifier)
            .cloned()
            .ok_or_else(|| UpstreamError::Extraction {
                revision: revision.identifier.clone(),
                detail: "commit not found".into(),
            })
    }
}

pub struct MemoryOpener(pub Arc<MemoryUpstream>);

#[async_trait]
impl UpstreamOpener for MemoryOpener {
    async fn open(
        &self,
        _handle: &UpstreamHandle,
    ) -> Result<Arc<dyn UpstreamRepository>, UpstreamError> {
        Ok(self.0.clone())
    }
}

pub fn engine(upstream: &Arc<MemoryUpstream>, host: Arc<dyn HostWorkingCopy>) -> SyncEngine {
    engine_with_policy(upstream, host, FilePolicy::default())
}

pub fn engine_with_policy(
    upstream: &Arc<MemoryUpstream>,
    host: Arc<dyn HostWorkingCopy>,
    policy: FilePolicy,
) -> SyncEngine {
    SyncEngine::new(Arc::new(MemoryOpener(upstream.clone())), host, policy)
}

/// The upstream history used by the import/update scenarios.
pub struct ScenarioUpstream {
    pub upstream: Arc<MemoryUpstream>,
    pub first: String,
}

pub const FIRST_COMMIT: &[(&str, &str)] = &[
    ("README", "vendored library\n"),
    ("conflicting_file", "shared line\n"),
    ("file_in_first_commit", "only in the first commit\n"),
    ("file_to_copy", "content to copy\n"),
    ("file_to_rename", "content to rename\n"),
];

pub const SECOND_COMMIT: &[(&str, &str)] = &[
    ("README", "vendored library\nupstream readme addition\n"),
    ("conflicting_file", "shared line\nupstream addition\n"),
    ("copied_file", "content to copy\n"),
    ("file_in_second_commit", "new in the second commit\n"),
    ("file_to_copy", "content to copy\n"),
    ("renamed_file", "content to rename\n"),
];

pub fn scenario_upstream() -> ScenarioUpstream {
    let upstream = MemoryUpstream::new();
    let first = upstream.commit("main", FIRST_COMMIT);
    ScenarioUpstream { upstream, first }
}

pub fn read(dir: &Path, rel: &str) -> String {
    std::fs::read_to_string(dir.join(rel)).unwrap()
}

pub fn append(dir: &Path, rel: &str, text: &str) {
    let mut content = read(dir, rel);
    content.push_str(text);
    std::fs::write(dir.join(rel), content).unwrap();
}
