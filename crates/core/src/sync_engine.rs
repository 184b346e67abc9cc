//! Import and update orchestration.
//!
//! The [`SyncEngine`] ties the pieces together:
//!
//! 1. Resolve the revision spec against the upstream.
//! 2. Extract tree snapshots (old and new concurrently on update).
//! 3. Diff the snapshots and replay the change set onto the vendored
//!    directory through the host working copy.
//! 4. Advance the provenance record, only after the apply pass finished.
//!
//! One operation runs at a time per engine; a second caller gets
//! [`SyncError::AlreadyRunning`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::config::VendorConfig;
use crate::errors::{HostError, MetadataError, SyncError};
use crate::file_policy::FilePolicy;
use crate::host::{absolutize, detect_host, HostWorkingCopy};
use crate::merge::{ApplyEngine, Merger};
use crate::metadata::{self, ProvenanceRecord, METADATA_FILE};
use crate::models::{
    ImportReport, LocalChange, LocalChangeKind, ResolvedRevision, RevisionSpec, UpdateReport,
    UpstreamHandle, VendorStatus,
};
use crate::snapshot::{read_directory, TreeSnapshot};
use crate::tree_diff::TreeDiffer;
use crate::upstream::{AdapterOpener, UpstreamOpener, UpstreamRepository};

pub struct SyncEngine {
    opener: Arc<dyn UpstreamOpener>,
    host: Arc<dyn HostWorkingCopy>,
    policy: FilePolicy,
    /// Set while an operation is in progress.
    running: Arc<AtomicBool>,
    started_at: DateTime<Utc>,
}

impl SyncEngine {
    pub fn new(
        opener: Arc<dyn UpstreamOpener>,
        host: Arc<dyn HostWorkingCopy>,
        policy: FilePolicy,
    ) -> Self {
        info!(host = ?host.kind(), "initializing sync engine");
        Self {
            opener,
            host,
            policy,
            running: Arc::new(AtomicBool::new(false)),
            started_at: Utc::now(),
        }
    }

    /// Engine with the built-in adapters and the host detected for `dest`.
    pub fn from_config(config: &VendorConfig, dest: &Path) -> Result<Self, SyncError> {
        let host = detect_host(dest, config)?;
        Ok(Self::new(
            Arc::new(AdapterOpener::new(config.clone())),
            host,
            FilePolicy::from(&config.policy),
        ))
    }

    pub fn host(&self) -> &dyn HostWorkingCopy {
        self.host.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> Result<RunGuard, SyncError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::AlreadyRunning {
                started_at: self.started_at.to_rfc3339(),
            });
        }
        Ok(RunGuard(self.running.clone()))
    }

    // -----------------------------------------------------------------------
    // Import
    // -----------------------------------------------------------------------

    /// Vendor `upstream` at `spec` into `dest`, registering every file as an
    /// addition with the host.
    #[instrument(skip_all, fields(url = %upstream.url, dest = %dest.display()))]
    pub async fn import(
        &self,
        upstream: UpstreamHandle,
        spec: &RevisionSpec,
        dest: &Path,
    ) -> Result<ImportReport, SyncError> {
        let _guard = self.acquire()?;
        let dest = absolutize(dest).map_err(|e| HostError::io(dest, e))?;
        if metadata::is_vendored(&dest) {
            return Err(SyncError::AlreadyVendored(dest));
        }

        let repo = self.opener.open(&upstream).await?;
        let revision = repo.resolve(spec).await?;
        info!(
            url = %upstream.url,
            revision = %revision,
            dest = %dest.display(),
            "importing upstream"
        );
        let mut snapshot = self.extract(repo.as_ref(), &revision).await?;
        self.policy.filter(&mut [&mut snapshot]);

        std::fs::create_dir_all(&dest).map_err(|e| HostError::io(&dest, e))?;
        let dest = dest.canonicalize().map_err(|e| HostError::io(&dest, e))?;
        self.host.add(&dest).await?;

        let mut files = Vec::with_capacity(snapshot.len());
        for (path, entry) in snapshot.iter() {
            let target = dest.join(path);
            self.host.write(&target, &entry.content, entry.mode).await?;
            self.host.add(&target).await?;
            files.push(path.to_string());
        }

        let record = ProvenanceRecord::new(upstream.clone(), revision.clone());
        let record_path = metadata::save(&dest, &record)?;
        self.host.add(&record_path).await?;

        info!(files = files.len(), revision = %revision, "import complete");
        Ok(ImportReport {
            upstream,
            revision,
            files,
        })
    }

    // -----------------------------------------------------------------------
    // Update
    // -----------------------------------------------------------------------

    /// Bring `dest` up to date with its upstream, merging local edits.
    ///
    /// Without `spec`, the recorded symbolic name (branch or `HEAD`) is
    /// re-resolved. Conflicts are reported per path and do not fail the
    /// update. Any error leaves the provenance record untouched.
    #[instrument(skip_all, fields(dest = %dest.display()))]
    pub async fn update(
        &self,
        dest: &Path,
        spec: Option<&RevisionSpec>,
    ) -> Result<UpdateReport, SyncError> {
        let _guard = self.acquire()?;
        let started_at = Utc::now();
        let dest = vendored_dir(dest)?;
        let record = metadata::load(&dest)?;
        if record.locked {
            return Err(SyncError::Locked(dest));
        }

        let repo = self.opener.open(&record.upstream).await?;
        let spec = spec.cloned().unwrap_or_else(|| record.revision.follow_spec());
        let target = repo.resolve(&spec).await?;

        if target.identifier == record.revision.identifier {
            info!(revision = %record.revision, "already up to date");
            return Ok(UpdateReport {
                from: record.revision.clone(),
                to: record.revision,
                outcomes: Vec::new(),
                started_at,
                completed_at: Some(Utc::now()),
            });
        }

        info!(
            from = %record.revision,
            to = %target,
            dest = %dest.display(),
            "updating vendored directory"
        );
        let (mut old, mut new) = tokio::try_join!(
            self.extract(repo.as_ref(), &record.revision),
            self.extract(repo.as_ref(), &target)
        )?;
        self.policy.filter(&mut [&mut old, &mut new]);

        let changes = TreeDiffer::diff(&old, &new);
        let outcomes = ApplyEngine::new(self.host.as_ref(), &dest, &old, &new)
            .apply(&changes)
            .await?;

        let record_path = metadata::save(&dest, &record.advanced_to(target.clone()))?;
        self.host.touched(&record_path).await?;

        let report = UpdateReport {
            from: record.revision,
            to: target,
            outcomes,
            started_at,
            completed_at: Some(Utc::now()),
        };
        if report.conflict_count() > 0 {
            warn!(
                conflicts = report.conflict_count(),
                "update finished with conflicts"
            );
        } else {
            info!(paths = report.outcomes.len(), "update complete");
        }
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Local edits of `dest` against its recorded snapshot and, when
    /// `check_upstream` is set, the identifier the upstream now resolves to.
    pub async fn status(&self, dest: &Path, check_upstream: bool) -> Result<VendorStatus, SyncError> {
        let dest = vendored_dir(dest)?;
        let record = metadata::load(&dest)?;
        let repo = self.opener.open(&record.upstream).await?;
        let (recorded, local) = self.recorded_and_local(repo.as_ref(), &record, &dest).await?;

        let mut local_changes = Vec::new();
        for (path, entry) in recorded.iter() {
            match local.get(path) {
                None => local_changes.push(LocalChange {
                    kind: LocalChangeKind::Missing,
                    path: path.to_string(),
                }),
                Some(current) if current != entry => local_changes.push(LocalChange {
                    kind: LocalChangeKind::Modified,
                    path: path.to_string(),
                }),
                Some(_) => {}
            }
        }
        for path in local.paths().filter(|p| !recorded.contains(p)) {
            local_changes.push(LocalChange {
                kind: LocalChangeKind::AddedLocally,
                path: path.to_string(),
            });
        }
        local_changes.sort_by(|a, b| a.path.cmp(&b.path));

        let upstream_revision = if check_upstream {
            Some(repo.resolve(&record.revision.follow_spec()).await?)
        } else {
            None
        };

        debug!(local_changes = local_changes.len(), "computed vendor status");
        Ok(VendorStatus {
            upstream: record.upstream,
            revision: record.revision,
            locked: record.locked,
            local_changes,
            upstream_revision,
        })
    }

    /// Unified diff of local edits against the recorded upstream snapshot.
    pub async fn diff(&self, dest: &Path) -> Result<String, SyncError> {
        let dest = vendored_dir(dest)?;
        let record = metadata::load(&dest)?;
        let repo = self.opener.open(&record.upstream).await?;
        let (recorded, local) = self.recorded_and_local(repo.as_ref(), &record, &dest).await?;
        Ok(render_diff(&recorded, &local))
    }

    // -----------------------------------------------------------------------
    // Locking
    // -----------------------------------------------------------------------

    /// Refuse further updates of `dest` until [`unlock`](Self::unlock).
    pub async fn lock(&self, dest: &Path) -> Result<ProvenanceRecord, SyncError> {
        self.set_locked(dest, true).await
    }

    pub async fn unlock(&self, dest: &Path) -> Result<ProvenanceRecord, SyncError> {
        self.set_locked(dest, false).await
    }

    async fn set_locked(&self, dest: &Path, locked: bool) -> Result<ProvenanceRecord, SyncError> {
        let _guard = self.acquire()?;
        let dest = vendored_dir(dest)?;
        let mut record = metadata::load(&dest)?;
        if record.locked == locked {
            debug!(dest = %dest.display(), locked, "lock flag already set");
            return Ok(record);
        }
        record.locked = locked;
        let path = metadata::save(&dest, &record)?;
        self.host.touched(&path).await?;
        info!(dest = %dest.display(), locked, "lock flag changed");
        Ok(record)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn extract(
        &self,
        repo: &dyn UpstreamRepository,
        revision: &ResolvedRevision,
    ) -> Result<TreeSnapshot, SyncError> {
        let mut snapshot = repo.extract(revision).await?;
        snapshot.remove(METADATA_FILE);
        debug!(revision = %revision, files = snapshot.len(), "extracted snapshot");
        Ok(snapshot)
    }

    /// The recorded upstream snapshot and the current contents of `dest`,
    /// filtered together.
    async fn recorded_and_local(
        &self,
        repo: &dyn UpstreamRepository,
        record: &ProvenanceRecord,
        dest: &Path,
    ) -> Result<(TreeSnapshot, TreeSnapshot), SyncError> {
        let mut recorded = self.extract(repo, &record.revision).await?;
        let mut local =
            read_directory(dest, &[METADATA_FILE]).map_err(|e| HostError::io(dest, e))?;
        self.policy.filter(&mut [&mut recorded, &mut local]);
        Ok((recorded, local))
    }
}

/// Canonical path of an existing vendored directory.
fn vendored_dir(dest: &Path) -> Result<PathBuf, SyncError> {
    let absolute = absolutize(dest).map_err(|e| HostError::io(dest, e))?;
    if !metadata::is_vendored(&absolute) {
        return Err(MetadataError::Missing(absolute).into());
    }
    absolute
        .canonicalize()
        .map_err(|e| HostError::io(&absolute, e).into())
}

/// `recorded` -> `local` as a multi-file unified diff, paths in order.
fn render_diff(recorded: &TreeSnapshot, local: &TreeSnapshot) -> String {
    let mut paths: Vec<&str> = recorded.paths().chain(local.paths()).collect();
    paths.sort_unstable();
    paths.dedup();

    let mut out = String::new();
    for path in paths {
        let before = recorded.get(path).map(|e| e.content.as_slice());
        let after = local.get(path).map(|e| e.content.as_slice());
        if before == after {
            continue;
        }
        let old_name = before.map_or_else(|| "/dev/null".to_string(), |_| format!("a/{}", path));
        let new_name = after.map_or_else(|| "/dev/null".to_string(), |_| format!("b/{}", path));
        let before = before.unwrap_or_default();
        let after = after.unwrap_or_default();

        let binary = Merger::is_binary(before) || Merger::is_binary(after);
        match (std::str::from_utf8(before), std::str::from_utf8(after)) {
            (Ok(before), Ok(after)) if !binary => {
                let patch = diffy::create_patch(before, after).to_string();
                let hunks = patch.splitn(3, '\n').nth(2).unwrap_or_default();
                out.push_str(&format!("--- {}\n+++ {}\n{}", old_name, new_name, hunks));
            }
            _ => out.push_str(&format!("Binary files {} and {} differ\n", old_name, new_name)),
        }
    }
    out
}

/// Clears the `running` flag when dropped, even on panic.
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
