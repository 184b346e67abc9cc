//! Subversion upstream adapter.
//!
//! Revisions are svn revision numbers. The identifier recorded for a URL is
//! its last-changed revision, so an update is a no-op until something below
//! that URL actually changes.

use async_trait::async_trait;
use tracing::{info, instrument};

use super::UpstreamRepository;
use crate::config::SvnConfig;
use crate::errors::UpstreamError;
use crate::models::{RepositoryKind, ResolvedRevision, RevisionSpec};
use crate::snapshot::{read_directory, TreeSnapshot};
use crate::svn::SvnClient;

/// Symbolic name of svn's primary line of history.
pub const SVN_HEAD: &str = "HEAD";

pub struct SvnUpstream {
    url: String,
    client: SvnClient,
}

impl SvnUpstream {
    pub fn new(url: &str, config: &SvnConfig) -> Self {
        Self::with_client(url, SvnClient::from_config(config))
    }

    pub fn with_client(url: &str, client: SvnClient) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl UpstreamRepository for SvnUpstream {
    fn kind(&self) -> RepositoryKind {
        RepositoryKind::Svn
    }

    fn url(&self) -> &str {
        &self.url
    }

    #[instrument(skip_all, fields(url = %self.url, spec = %spec))]
    async fn resolve(&self, spec: &RevisionSpec) -> Result<ResolvedRevision, UpstreamError> {
        let name = spec.as_deref().unwrap_or(SVN_HEAD);
        let info = self
            .client
            .info(&self.url, Some(name))
            .await
            .map_err(|e| UpstreamError::Resolution {
                spec: name.to_string(),
                detail: e.to_string(),
            })?;
        let resolved = ResolvedRevision::new(
            info.last_changed_rev.to_string(),
            Some(name.to_string()),
        );
        info!(revision = %resolved, "resolved svn revision");
        Ok(resolved)
    }

    #[instrument(skip_all, fields(url = %self.url, revision = %revision.identifier))]
    async fn extract(&self, revision: &ResolvedRevision) -> Result<TreeSnapshot, UpstreamError> {
        let tmp = tempfile::Builder::new()
            .prefix("vendorsync-svn-")
            .tempdir()?;
        let dest = tmp.path().join("export");
        self.client
            .export(&self.url, &revision.identifier, &dest)
            .await
            .map_err(|e| UpstreamError::Extraction {
                revision: revision.identifier.clone(),
                detail: e.to_string(),
            })?;
        let snapshot = read_directory(&dest, &[])?;
        info!(files = snapshot.len(), "extracted svn tree");
        Ok(snapshot)
    }
}
