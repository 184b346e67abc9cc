//! Domain model types used throughout vendorsync.
//!
//! These types bridge the upstream adapters, the differencer, the apply
//! engine and the CLI reports.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::UpstreamError;

// ---------------------------------------------------------------------------
// Upstream identity
// ---------------------------------------------------------------------------

/// Which upstream adapter handles a repository.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    Git,
    Svn,
}

impl RepositoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Svn => "svn",
        }
    }

    /// Guess the adapter for `url` from its scheme, suffix, or (for local
    /// paths) the control directory it carries.
    pub fn guess(url: &str) -> Option<Self> {
        let lower = url.to_ascii_lowercase();
        if lower.starts_with("git://")
            || lower.starts_with("git@")
            || lower.ends_with(".git")
            || lower.ends_with(".git/")
        {
            return Some(Self::Git);
        }
        if lower.starts_with("svn://") || lower.starts_with("svn+ssh://") {
            return Some(Self::Svn);
        }

        let local = url.strip_prefix("file://").unwrap_or(url);
        let path = std::path::Path::new(local);
        let bare_git = path.join("HEAD").is_file() && path.join("objects").is_dir();
        if path.join(".git").exists() || bare_git {
            return Some(Self::Git);
        }
        if path.join("format").is_file() && path.join("db").is_dir() {
            // `svnadmin create` layout
            return Some(Self::Svn);
        }
        None
    }
}

impl fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepositoryKind {
    type Err = UpstreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "git" => Ok(Self::Git),
            "svn" | "subversion" => Ok(Self::Svn),
            other => Err(UpstreamError::UnsupportedKind(other.to_string())),
        }
    }
}

/// An upstream repository plus the adapter that reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpstreamHandle {
    pub url: String,
    pub kind: RepositoryKind,
}

impl UpstreamHandle {
    pub fn new(url: impl Into<String>, kind: RepositoryKind) -> Self {
        Self {
            url: url.into(),
            kind,
        }
    }
}

/// Operator-supplied revision: a branch, tag, ref or id, or nothing at all
/// (the upstream's primary line of history).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionSpec(Option<String>);

impl RevisionSpec {
    pub fn primary() -> Self {
        Self(None)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self(Some(name.into()))
    }

    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl From<Option<String>> for RevisionSpec {
    fn from(value: Option<String>) -> Self {
        Self(value.filter(|s| !s.trim().is_empty()))
    }
}

impl fmt::Display for RevisionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(name) => f.write_str(name),
            None => f.write_str("<primary>"),
        }
    }
}

/// An immutable upstream point plus the name used to re-resolve it later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedRevision {
    pub identifier: String,
    pub symbolic_name: Option<String>,
}

impl ResolvedRevision {
    pub fn new(identifier: impl Into<String>, symbolic_name: Option<String>) -> Self {
        Self {
            identifier: identifier.into(),
            symbolic_name,
        }
    }

    /// What a later update re-resolves: the symbolic name, or the identifier itself.
    pub fn follow_spec(&self) -> RevisionSpec {
        match &self.symbolic_name {
            Some(name) => RevisionSpec::named(name.clone()),
            None => RevisionSpec::named(self.identifier.clone()),
        }
    }

    /// Abbreviated identifier for log lines and reports.
    pub fn short_id(&self) -> &str {
        let end = self
            .identifier
            .char_indices()
            .nth(12)
            .map(|(i, _)| i)
            .unwrap_or(self.identifier.len());
        &self.identifier[..end]
    }
}

impl fmt::Display for ResolvedRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.symbolic_name {
            Some(name) => write!(f, "{} ({})", self.short_id(), name),
            None => f.write_str(self.short_id()),
        }
    }
}

// ---------------------------------------------------------------------------
// Change set
// ---------------------------------------------------------------------------

/// A rename (`is_copy == false`) or copy detected between two snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MovedPath {
    pub from: String,
    pub to: String,
    pub is_copy: bool,
}

/// Classification of every path that differs between two snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub deleted: Vec<String>,
    pub modified: Vec<String>,
    pub moved: Vec<MovedPath>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.deleted.is_empty()
            && self.modified.is_empty()
            && self.moved.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.deleted.len() + self.modified.len() + self.moved.len()
    }

    /// Rename sources: paths that disappear because they were moved away.
    pub fn moved_from(&self) -> impl Iterator<Item = &str> {
        self.moved
            .iter()
            .filter(|m| !m.is_copy)
            .map(|m| m.from.as_str())
    }
}

// ---------------------------------------------------------------------------
// Conflict payload
// ---------------------------------------------------------------------------

/// The three inputs of a failed merge, handed to the host so it can record
/// the conflict in its own terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictSides {
    pub base: Vec<u8>,
    pub ours: Vec<u8>,
    /// `None` when upstream deleted the file.
    pub theirs: Option<Vec<u8>>,
}

// ---------------------------------------------------------------------------
// Host status
// ---------------------------------------------------------------------------

/// Status code reported by a host working copy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Added,
    /// Added with history (svn `A  +`).
    Copied,
    Deleted,
    Modified,
    Replaced,
    Conflicted,
    Missing,
    Unversioned,
}

impl StatusCode {
    /// Single-column code in svn's notation.
    pub fn letter(&self) -> char {
        match self {
            Self::Added | Self::Copied => 'A',
            Self::Deleted => 'D',
            Self::Modified => 'M',
            Self::Replaced => 'R',
            Self::Conflicted => 'C',
            Self::Missing => '!',
            Self::Unversioned => '?',
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copied => f.write_str("A  +"),
            other => write!(f, "{}", other.letter()),
        }
    }
}

/// One `(status, path)` line from [`crate::host::HostWorkingCopy::status`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct StatusEntry {
    pub code: StatusCode,
    pub path: String,
}

impl StatusEntry {
    pub fn new(code: StatusCode, path: impl Into<String>) -> Self {
        Self {
            code,
            path: path.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// What the apply engine did to one path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum PathAction {
    /// New upstream file written and registered.
    Added,
    /// Upstream deletion of an unmodified file.
    Deleted,
    /// Upstream change applied over an unmodified file.
    Clean,
    /// Upstream and local changes combined without overlap.
    Merged,
    /// Overlapping changes; markers and sentinel files written.
    Conflict,
    /// Upstream deleted a locally modified file; the local copy stays.
    KeptLocal,
    Moved { from: String },
    Copied { from: String },
    Skipped { reason: String },
}

impl PathAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Deleted => "deleted",
            Self::Clean => "clean",
            Self::Merged => "merged",
            Self::Conflict => "conflict",
            Self::KeptLocal => "kept-local",
            Self::Moved { .. } => "moved",
            Self::Copied { .. } => "copied",
            Self::Skipped { .. } => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathOutcome {
    pub path: String,
    #[serde(flatten)]
    pub action: PathAction,
}

impl PathOutcome {
    pub fn new(path: impl Into<String>, action: PathAction) -> Self {
        Self {
            path: path.into(),
            action,
        }
    }
}

/// Result of a successful `import`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReport {
    pub upstream: UpstreamHandle,
    pub revision: ResolvedRevision,
    pub files: Vec<String>,
}

/// Result of a successful `update`, conflicts included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateReport {
    pub from: ResolvedRevision,
    pub to: ResolvedRevision,
    pub outcomes: Vec<PathOutcome>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UpdateReport {
    pub fn is_noop(&self) -> bool {
        self.from.identifier == self.to.identifier && self.outcomes.is_empty()
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &PathOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.action == PathAction::Conflict)
    }

    pub fn conflict_count(&self) -> usize {
        self.conflicts().count()
    }
}

/// How a vendored file differs from the recorded upstream snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum LocalChangeKind {
    Modified,
    Missing,
    AddedLocally,
}

impl fmt::Display for LocalChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Modified => f.write_str("modified"),
            Self::Missing => f.write_str("missing"),
            Self::AddedLocally => f.write_str("added locally"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalChange {
    pub kind: LocalChangeKind,
    pub path: String,
}

/// Summary produced by the `status` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorStatus {
    pub upstream: UpstreamHandle,
    pub revision: ResolvedRevision,
    pub locked: bool,
    pub local_changes: Vec<LocalChange>,
    /// Present when the upstream was consulted for a newer revision.
    pub upstream_revision: Option<ResolvedRevision>,
}

impl VendorStatus {
    pub fn upstream_changed(&self) -> bool {
        self.upstream_revision
            .as_ref()
            .is_some_and(|r| r.identifier != self.revision.identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip_and_guess() {
        assert_eq!("git".parse::<RepositoryKind>().unwrap(), RepositoryKind::Git);
        assert_eq!("SVN".parse::<RepositoryKind>().unwrap(), RepositoryKind::Svn);
        assert!(matches!(
            "hg".parse::<RepositoryKind>(),
            Err(UpstreamError::UnsupportedKind(_))
        ));

        assert_eq!(
            RepositoryKind::guess("https://example.com/lib.git"),
            Some(RepositoryKind::Git)
        );
        assert_eq!(
            RepositoryKind::guess("svn+ssh://svn.example.com/repo/trunk"),
            Some(RepositoryKind::Svn)
        );
        assert_eq!(RepositoryKind::guess("https://example.com/unknown"), None);
    }

    #[test]
    fn test_guess_local_git_dir() {
        let dir = tempfile::tempdir().unwrap();
        git2::Repository::init(dir.path()).unwrap();
        assert_eq!(
            RepositoryKind::guess(dir.path().to_str().unwrap()),
            Some(RepositoryKind::Git)
        );
    }

    #[test]
    fn test_follow_spec_prefers_symbolic_name() {
        let rev = ResolvedRevision::new("abc123", Some("main".into()));
        assert_eq!(rev.follow_spec(), RevisionSpec::named("main"));

        let pinned = ResolvedRevision::new("abc123", None);
        assert_eq!(pinned.follow_spec(), RevisionSpec::named("abc123"));
    }

    #[test]
    fn test_short_id() {
        let rev = ResolvedRevision::new("0123456789abcdef0123", None);
        assert_eq!(rev.short_id(), "0123456789ab");
        assert_eq!(ResolvedRevision::new("42", None).short_id(), "42");
    }

    #[test]
    fn test_revision_spec_from_blank_is_primary() {
        assert_eq!(RevisionSpec::from(Some("  ".to_string())), RevisionSpec::primary());
        assert_eq!(
            RevisionSpec::from(Some("v1.0".to_string())).as_deref(),
            Some("v1.0")
        );
    }

    #[test]
    fn test_status_code_display() {
        assert_eq!(StatusCode::Copied.to_string(), "A  +");
        assert_eq!(StatusCode::Conflicted.to_string(), "C");
        assert_eq!(StatusCode::Unversioned.letter(), '?');
    }

    #[test]
    fn test_update_report_counts() {
        let report = UpdateReport {
            from: ResolvedRevision::new("a", None),
            to: ResolvedRevision::new("b", None),
            outcomes: vec![
                PathOutcome::new("x", PathAction::Conflict),
                PathOutcome::new("y", PathAction::Clean),
                PathOutcome::new("z", PathAction::Conflict),
            ],
            started_at: Utc::now(),
            completed_at: None,
        };
        assert_eq!(report.conflict_count(), 2);
        assert_eq!(report.count("clean"), 1);
        assert!(!report.is_noop());
    }
}
