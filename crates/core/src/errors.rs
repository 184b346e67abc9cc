//! Errors, one `thiserror` enum per subsystem.
//!
//! [`SyncError`] wraps the lower layers for the import and update entry
//! points.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the `svn` command-line client.
#[derive(Debug, Error)]
pub enum SvnError {
    #[error("cannot run '{0}'; is Subversion installed?")]
    BinaryNotFound(String),

    #[error("svn exited with status {exit_code}: {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    #[error("unreadable svn XML output: {0}")]
    XmlParseError(String),

    #[error("cannot talk to svn: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors raised while resolving or extracting upstream revisions.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The revision specifier matched nothing upstream.
    #[error("cannot resolve revision '{spec}': {detail}")]
    Resolution { spec: String, detail: String },

    /// The resolved revision could not be read back from the upstream.
    #[error("cannot extract revision '{revision}': {detail}")]
    Extraction { revision: String, detail: String },

    /// No adapter is registered for this repository kind.
    #[error("unsupported repository kind '{0}'")]
    UnsupportedKind(String),

    /// Failure talking to an svn upstream.
    #[error(transparent)]
    Svn(#[from] SvnError),

    #[error(transparent)]
    Git2Error(#[from] git2::Error),

    #[error("upstream checkout failed: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors from the host working copy capability.
#[derive(Debug, Error)]
pub enum HostError {
    /// Failure driving an svn working copy.
    #[error(transparent)]
    Svn(#[from] SvnError),

    /// The path does not live inside the host working copy.
    #[error("path '{0}' is outside the host working copy")]
    OutsideWorkingCopy(PathBuf),

    /// The directory is not under host version control.
    #[error("'{0}' is not a versioned working copy")]
    NotVersioned(PathBuf),

    #[error(transparent)]
    Git2Error(#[from] git2::Error),

    #[error("host I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HostError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from the provenance record store.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// No provenance record exists: the directory is not vendored.
    #[error("'{0}' is not a vendored directory (no metadata file)")]
    Missing(PathBuf),

    /// The provenance record exists but cannot be understood.
    #[error("corrupt metadata at '{path}': {detail}")]
    Corrupt { path: PathBuf, detail: String },

    /// The record was written by a newer (or unknown) format.
    #[error("unsupported metadata format version {found}")]
    UnsupportedFormat { found: u32 },

    #[error("cannot access the metadata file: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors from the import / update orchestration.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Import target already carries a provenance record.
    #[error("'{0}' is already a vendored directory")]
    AlreadyVendored(PathBuf),

    /// The vendored directory is locked against updates.
    #[error("'{0}' is locked; unlock it before updating")]
    Locked(PathBuf),

    /// Another operation is already running on this engine.
    #[error("an operation is already running (started at {started_at})")]
    AlreadyRunning { started_at: String },

    #[error("upstream: {0}")]
    UpstreamError(#[from] UpstreamError),

    #[error("working copy: {0}")]
    HostError(#[from] HostError),

    #[error("provenance record: {0}")]
    MetadataError(#[from] MetadataError),
}

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration at {0}")]
    FileNotFound(String),

    #[error("malformed configuration: {0}")]
    ParseError(String),

    /// `field` names an environment variable that is unset.
    #[error("{field} refers to ${var}, which is not set")]
    EnvVarMissing { var: String, field: String },

    #[error("{field}: {detail}")]
    InvalidValue { field: String, detail: String },

    #[error("cannot read configuration: {0}")]
    IoError(#[from] std::io::Error),
}
