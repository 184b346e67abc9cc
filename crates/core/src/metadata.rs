//! Provenance record store.
//!
//! Every vendored directory carries a `.vendorsync.yml` file naming the
//! upstream it mirrors and the revision it was last synchronized to:
//!
//! ```yaml
//! format: 1
//! repository_url: https://example.com/lib.git
//! repository_class: git
//! lock: false
//! handler:
//!   commit: 6f3c0a...
//!   branch: main
//! ```
//!
//! The `handler` keys depend on the repository kind: git records `commit`
//! and `branch`, svn records `revision` and `ref`.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::MetadataError;
use crate::models::{RepositoryKind, ResolvedRevision, UpstreamHandle};

/// Name of the provenance file inside a vendored directory.
pub const METADATA_FILE: &str = ".vendorsync.yml";

/// The only format version this build reads and writes.
pub const FORMAT_VERSION: u32 = 1;

/// Everything recorded about one vendored directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceRecord {
    pub format_version: u32,
    pub upstream: UpstreamHandle,
    pub revision: ResolvedRevision,
    pub locked: bool,
}

impl ProvenanceRecord {
    pub fn new(upstream: UpstreamHandle, revision: ResolvedRevision) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            upstream,
            revision,
            locked: false,
        }
    }

    /// Same record pointing at a new revision. The lock flag is carried over.
    pub fn advanced_to(&self, revision: ResolvedRevision) -> Self {
        Self {
            revision,
            ..self.clone()
        }
    }

    pub fn to_yaml(&self) -> Result<String, MetadataError> {
        if self.format_version != FORMAT_VERSION {
            return Err(MetadataError::UnsupportedFormat {
                found: self.format_version,
            });
        }
        let (id_key, name_key) = handler_keys(self.upstream.kind);
        let mut handler = BTreeMap::new();
        handler.insert(id_key.to_string(), self.revision.identifier.clone());
        if let Some(name) = &self.revision.symbolic_name {
            handler.insert(name_key.to_string(), name.clone());
        }
        let file = RecordFile {
            format: self.format_version,
            repository_url: self.upstream.url.clone(),
            repository_class: self.upstream.kind.as_str().to_string(),
            lock: self.locked,
            handler,
        };
        serde_yaml::to_string(&file).map_err(|e| MetadataError::Corrupt {
            path: PathBuf::from(METADATA_FILE),
            detail: e.to_string(),
        })
    }

    /// Parse a record; `path` is only used in error messages.
    pub fn from_yaml(path: &Path, text: &str) -> Result<Self, MetadataError> {
        let corrupt = |detail: String| MetadataError::Corrupt {
            path: path.to_path_buf(),
            detail,
        };

        let header: FormatHeader =
            serde_yaml::from_str(text).map_err(|e| corrupt(e.to_string()))?;
        match header.format {
            Some(FORMAT_VERSION) => {}
            Some(found) => return Err(MetadataError::UnsupportedFormat { found }),
            None => return Err(corrupt("missing 'format' key".into())),
        }

        let file: RecordFile = serde_yaml::from_str(text).map_err(|e| corrupt(e.to_string()))?;
        let kind: RepositoryKind = file
            .repository_class
            .parse()
            .map_err(|e: crate::errors::UpstreamError| corrupt(e.to_string()))?;
        let (id_key, name_key) = handler_keys(kind);
        let identifier = file
            .handler
            .get(id_key)
            .filter(|id| !id.is_empty())
            .cloned()
            .ok_or_else(|| corrupt(format!("handler has no '{}'", id_key)))?;
        let symbolic_name = file.handler.get(name_key).cloned();

        Ok(Self {
            format_version: file.format,
            upstream: UpstreamHandle::new(file.repository_url, kind),
            revision: ResolvedRevision::new(identifier, symbolic_name),
            locked: file.lock,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordFile {
    format: u32,
    repository_url: String,
    repository_class: String,
    #[serde(default)]
    lock: bool,
    #[serde(default)]
    handler: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FormatHeader {
    format: Option<u32>,
}

/// `(identifier key, symbolic name key)` of the handler map.
fn handler_keys(kind: RepositoryKind) -> (&'static str, &'static str) {
    match kind {
        RepositoryKind::Git => ("commit", "branch"),
        RepositoryKind::Svn => ("revision", "ref"),
    }
}

/// Location of the provenance file for `dir`.
pub fn metadata_path(dir: &Path) -> PathBuf {
    dir.join(METADATA_FILE)
}

/// Whether `dir` carries a provenance file at all.
pub fn is_vendored(dir: &Path) -> bool {
    metadata_path(dir).is_file()
}

/// Load the record of `dir`.
pub fn load(dir: &Path) -> Result<ProvenanceRecord, MetadataError> {
    let path = metadata_path(dir);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(MetadataError::Missing(dir.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    let record = ProvenanceRecord::from_yaml(&path, &text)?;
    debug!(
        path = %path.display(),
        url = %record.upstream.url,
        revision = %record.revision,
        "loaded provenance record"
    );
    Ok(record)
}

/// Write the record of `dir`, replacing any previous one atomically.
pub fn save(dir: &Path, record: &ProvenanceRecord) -> Result<PathBuf, MetadataError> {
    let yaml = record.to_yaml()?;
    let path = metadata_path(dir);

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(yaml.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(&path).map_err(|e| e.error)?;

    info!(
        path = %path.display(),
        revision = %record.revision,
        locked = record.locked,
        "saved provenance record"
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_record() -> ProvenanceRecord {
        ProvenanceRecord::new(
            UpstreamHandle::new("https://example.com/lib.git", RepositoryKind::Git),
            ResolvedRevision::new("6f3c0a1b2c3d4e5f", Some("main".into())),
        )
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let record = git_record();
        let path = save(dir.path(), &record).unwrap();
        assert_eq!(path, dir.path().join(METADATA_FILE));
        assert!(is_vendored(dir.path()));
        assert_eq!(load(dir.path()).unwrap(), record);
    }

    #[test]
    fn test_git_handler_keys_on_disk() {
        let yaml = git_record().to_yaml().unwrap();
        assert!(yaml.contains("format: 1"));
        assert!(yaml.contains("repository_class: git"));
        assert!(yaml.contains("commit: 6f3c0a1b2c3d4e5f"));
        assert!(yaml.contains("branch: main"));
    }

    #[test]
    fn test_svn_handler_keys() {
        let text = "format: 1\n\
                    repository_url: svn://example.com/repo/trunk\n\
                    repository_class: svn\n\
                    handler:\n  revision: '42'\n  ref: HEAD\n";
        let record = ProvenanceRecord::from_yaml(Path::new("x"), text).unwrap();
        assert_eq!(record.upstream.kind, RepositoryKind::Svn);
        assert_eq!(record.revision.identifier, "42");
        assert_eq!(record.revision.symbolic_name.as_deref(), Some("HEAD"));
        assert!(!record.locked);
    }

    #[test]
    fn test_load_missing_is_not_vendored() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load(dir.path()), Err(MetadataError::Missing(_))));
        assert!(!is_vendored(dir.path()));
    }

    #[test]
    fn test_future_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(METADATA_FILE),
            "format: 2\nrepository_url: x\nsomething_new: true\n",
        )
        .unwrap();
        assert!(matches!(
            load(dir.path()),
            Err(MetadataError::UnsupportedFormat { found: 2 })
        ));

        let mut record = git_record();
        record.format_version = 2;
        assert!(matches!(
            save(dir.path(), &record),
            Err(MetadataError::UnsupportedFormat { found: 2 })
        ));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(METADATA_FILE), "::: not yaml [").unwrap();
        assert!(matches!(load(dir.path()), Err(MetadataError::Corrupt { .. })));

        std::fs::write(
            dir.path().join(METADATA_FILE),
            "format: 1\nrepository_url: x\nrepository_class: git\nhandler: {}\n",
        )
        .unwrap();
        assert!(matches!(load(dir.path()), Err(MetadataError::Corrupt { .. })));
    }

    #[test]
    fn test_failed_save_keeps_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let record = git_record();
        save(dir.path(), &record).unwrap();

        let mut future = record.advanced_to(ResolvedRevision::new("ffff", None));
        future.format_version = 9;
        assert!(save(dir.path(), &future).is_err());
        assert_eq!(load(dir.path()).unwrap(), record);
    }

    #[test]
    fn test_advanced_to_keeps_lock() {
        let mut record = git_record();
        record.locked = true;
        let next = record.advanced_to(ResolvedRevision::new("abc", Some("main".into())));
        assert!(next.locked);
        assert_eq!(next.revision.identifier, "abc");
        assert_eq!(next.upstream, record.upstream);
    }
}
