//! Which upstream files end up in a snapshot.
//!
//! Built from the `[policy]` config section. Ignore globs are checked
//! before the size cap; a cap of 0 disables it. Snapshots that are compared
//! with each other are filtered together: a path rejected in one of them is
//! dropped from all, so a file growing past the cap is neither deleted nor
//! re-added.

use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, warn};

use crate::config::PolicyConfig;
use crate::snapshot::TreeSnapshot;

/// Why a file was left out of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusion {
    Pattern(String),
    TooLarge { size: u64, limit: u64 },
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pattern(glob) => write!(f, "matches '{}'", glob),
            Self::TooLarge { size, limit } => {
                write!(f, "{} bytes exceeds the {} byte limit", size, limit)
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FilePolicy {
    limit: u64,
    globs: Vec<String>,
}

impl FilePolicy {
    pub fn new(max_file_size: u64, ignore_patterns: Vec<String>) -> Self {
        let globs = ignore_patterns
            .into_iter()
            .map(|p| p.replace('\\', "/"))
            .collect();
        Self {
            limit: max_file_size,
            globs,
        }
    }

    /// `None` when `path` (slash separated, relative to the snapshot root)
    /// may be vendored.
    pub fn exclusion(&self, path: &str, size: u64) -> Option<Exclusion> {
        if let Some(glob) = self.globs.iter().find(|g| glob_hits(g, path)) {
            debug!(path, glob = glob.as_str(), "ignored by pattern");
            return Some(Exclusion::Pattern(glob.clone()));
        }
        if self.limit != 0 && size > self.limit {
            warn!(path, size, limit = self.limit, "file too large to vendor");
            return Some(Exclusion::TooLarge {
                size,
                limit: self.limit,
            });
        }
        None
    }

    pub fn admits(&self, path: &str, size: u64) -> bool {
        self.exclusion(path, size).is_none()
    }

    /// Drop from every snapshot each path rejected in any of them.
    pub fn filter(&self, snapshots: &mut [&mut TreeSnapshot]) {
        let rejected: BTreeSet<String> = snapshots
            .iter()
            .flat_map(|snapshot| snapshot.iter())
            .filter(|(path, entry)| !self.admits(path, entry.content.len() as u64))
            .map(|(path, _)| path.to_string())
            .collect();
        for snapshot in snapshots.iter_mut() {
            for path in &rejected {
                snapshot.remove(path);
            }
        }
    }
}

impl From<&PolicyConfig> for FilePolicy {
    fn from(cfg: &PolicyConfig) -> Self {
        Self::new(cfg.max_file_size, cfg.ignore_patterns.clone())
    }
}

// A glob without '/' is tried against the bare file name as well.
fn glob_hits(glob: &str, path: &str) -> bool {
    let path = path.replace('\\', "/");
    if glob_match::glob_match(glob, &path) {
        return true;
    }
    !glob.contains('/')
        && path
            .rsplit('/')
            .next()
            .map_or(false, |name| glob_match::glob_match(glob, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::FileEntry;

    #[test]
    fn test_default_admits_everything() {
        let policy = FilePolicy::default();
        assert!(policy.admits("src/main.rs", u64::MAX));
        assert!(policy.admits("build.log", 0));
    }

    #[test]
    fn test_size_cap() {
        let policy = FilePolicy::new(1000, Vec::new());
        assert!(policy.admits("exact.txt", 1000));
        let excluded = policy.exclusion("blob.bin", 1001).unwrap();
        assert_eq!(
            excluded,
            Exclusion::TooLarge {
                size: 1001,
                limit: 1000
            }
        );
        assert_eq!(excluded.to_string(), "1001 bytes exceeds the 1000 byte limit");
    }

    #[test]
    fn test_name_glob_applies_at_any_depth() {
        let policy = FilePolicy::new(0, vec!["*.orig".into()]);
        assert_eq!(
            policy.exclusion("lib/deep/file.rb.orig", 3),
            Some(Exclusion::Pattern("*.orig".into()))
        );
        assert!(policy.admits("lib/file.rb", 3));
    }

    #[test]
    fn test_path_glob_is_anchored() {
        let policy = FilePolicy::new(0, vec!["spec/fixtures/**".into()]);
        assert!(!policy.admits("spec/fixtures/large/data.json", 1));
        assert!(policy.admits("lib/spec/fixtures/data.json", 1));
    }

    #[test]
    fn test_pattern_wins_over_size() {
        let policy = FilePolicy::new(1, vec!["*.log".into()]);
        assert!(matches!(
            policy.exclusion("build.log", 50),
            Some(Exclusion::Pattern(_))
        ));
    }

    #[test]
    fn test_filter_drops_a_path_rejected_on_either_side() {
        let policy = FilePolicy::new(10, vec!["*.tmp".into()]);
        let mut old = TreeSnapshot::new();
        old.insert("data.txt", FileEntry::regular("small\n"));
        old.insert("keep.rb", FileEntry::regular("x\n"));
        old.insert("scratch.tmp", FileEntry::regular("t"));
        let mut new = TreeSnapshot::new();
        new.insert("data.txt", FileEntry::regular("x".repeat(50)));
        new.insert("keep.rb", FileEntry::regular("y\n"));

        policy.filter(&mut [&mut old, &mut new]);

        assert_eq!(old.paths().collect::<Vec<_>>(), vec!["keep.rb"]);
        assert_eq!(new.paths().collect::<Vec<_>>(), vec!["keep.rb"]);
    }

    #[test]
    fn test_from_config() {
        let cfg = PolicyConfig {
            ignore_patterns: vec!["*.log".into()],
            max_file_size: 10,
        };
        let policy = FilePolicy::from(&cfg);
        assert!(policy.admits("a.txt", 10));
        assert!(!policy.admits("a.log", 1));
        assert!(!policy.admits("a.txt", 11));
    }
}
