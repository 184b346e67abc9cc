//! Upstream repository capability.
//!
//! An [`UpstreamRepository`] resolves revision specifiers to immutable
//! identifiers and extracts full tree snapshots at those identifiers. One
//! adapter exists per supported upstream VCS; the sync engine only ever
//! talks to the trait.

pub mod git;
pub mod svn;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::VendorConfig;
use crate::errors::UpstreamError;
use crate::models::{RepositoryKind, ResolvedRevision, RevisionSpec, UpstreamHandle};
use crate::snapshot::TreeSnapshot;

pub use git::GitUpstream;
pub use svn::SvnUpstream;

/// Read-only access to one upstream repository.
#[async_trait]
pub trait UpstreamRepository: Send + Sync {
    fn kind(&self) -> RepositoryKind;

    fn url(&self) -> &str;

    /// Resolve `spec` to an immutable identifier. The symbolic name of the
    /// result is what a later update re-resolves.
    async fn resolve(&self, spec: &RevisionSpec) -> Result<ResolvedRevision, UpstreamError>;

    /// Full tree at `revision`, without VCS control files.
    async fn extract(&self, revision: &ResolvedRevision) -> Result<TreeSnapshot, UpstreamError>;
}

/// Produces an [`UpstreamRepository`] for a handle.
#[async_trait]
pub trait UpstreamOpener: Send + Sync {
    async fn open(
        &self,
        handle: &UpstreamHandle,
    ) -> Result<Arc<dyn UpstreamRepository>, UpstreamError>;
}

/// Opener backed by the built-in git and svn adapters.
#[derive(Debug, Clone)]
pub struct AdapterOpener {
    config: VendorConfig,
}

impl AdapterOpener {
    pub fn new(config: VendorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl UpstreamOpener for AdapterOpener {
    async fn open(
        &self,
        handle: &UpstreamHandle,
    ) -> Result<Arc<dyn UpstreamRepository>, UpstreamError> {
        open_upstream(handle, &self.config).await
    }
}

/// Open the adapter matching `handle.kind`.
pub async fn open_upstream(
    handle: &UpstreamHandle,
    config: &VendorConfig,
) -> Result<Arc<dyn UpstreamRepository>, UpstreamError> {
    info!(url = %handle.url, kind = %handle.kind, "opening upstream");
    let upstream: Arc<dyn UpstreamRepository> = match handle.kind {
        RepositoryKind::Git => Arc::new(GitUpstream::open(&handle.url)?),
        RepositoryKind::Svn => Arc::new(SvnUpstream::new(&handle.url, &config.svn)),
    };
    Ok(upstream)
}
