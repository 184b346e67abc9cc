//! In-memory tree snapshots of upstream revisions and vendored directories.
//!
//! A [`TreeSnapshot`] maps forward-slash relative paths to file content and
//! mode. Directories are implicit. Snapshots are produced by the upstream
//! adapters and by [`read_directory`] for trees already on disk.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::debug;


/// Control directories that never belong to a snapshot.
pub const VCS_DIRS: &[&str] = &[".git", ".svn", ".hg", "_darcs", "CVS"];

/// File type / permission bits carried by a snapshot entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FileMode {
    #[default]
    Regular,
    Executable,
    /// Content holds the link target.
    Symlink,
}

impl FileMode {
    pub fn from_git_filemode(mode: i32) -> Option<Self> {
        match mode {
            0o100644 | 0o100664 => Some(Self::Regular),
            0o100755 => Some(Self::Executable),
            0o120000 => Some(Self::Symlink),
            _ => None,
        }
    }
}

/// Content and mode of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub content: Vec<u8>,
    pub mode: FileMode,
}

impl FileEntry {
    pub fn new(content: impl Into<Vec<u8>>, mode: FileMode) -> Self {
        Self {
            content: content.into(),
            mode,
        }
    }

    pub fn regular(content: impl Into<Vec<u8>>) -> Self {
        Self::new(content, FileMode::Regular)
    }

    /// Hex SHA-256 over the mode tag and the content.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(match self.mode {
            FileMode::Regular => b"f",
            FileMode::Executable => b"x",
            FileMode::Symlink => b"l",
        });
        hasher.update(&self.content);
        hex::encode(hasher.finalize())
    }
}

/// Ordered path → file mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeSnapshot {
    files: BTreeMap<String, FileEntry>,
}

impl TreeSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, entry: FileEntry) {
        self.files.insert(path.into(), entry);
    }

    pub fn remove(&mut self, path: &str) -> Option<FileEntry> {
        self.files.remove(path)
    }

    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileEntry)> {
        self.files.iter().map(|(p, e)| (p.as_str(), e))
    }

    /// Every directory implied by the file paths, excluding the root.
    pub fn directories(&self) -> BTreeSet<String> {
        let mut dirs = BTreeSet::new();
        for path in self.files.keys() {
            let mut current = path.as_str();
            while let Some(idx) = current.rfind('/') {
                current = &current[..idx];
                if !dirs.insert(current.to_string()) {
                    break;
                }
            }
        }
        dirs
    }
}

impl FromIterator<(String, FileEntry)> for TreeSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, FileEntry)>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

/// Read every file below `root` into a snapshot, skipping VCS control
/// directories and any top-level name listed in `skip`.
pub fn read_directory(root: &Path, skip: &[&str]) -> std::io::Result<TreeSnapshot> {
    let mut snapshot = TreeSnapshot::new();
    read_directory_into(root, "", skip, &mut snapshot)?;
    debug!(root = %root.display(), files = snapshot.len(), "read directory snapshot");
    Ok(snapshot)
}

fn read_directory_into(
    dir: &Path,
    prefix: &str,
    skip: &[&str],
    snapshot: &mut TreeSnapshot,
) -> std::io::Result<()> {
    let mut entries = std::fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        if VCS_DIRS.contains(&name.as_ref()) {
            continue;
        }
        if prefix.is_empty() && skip.contains(&name.as_ref()) {
            continue;
        }

        let rel = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", prefix, name)
        };
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())?;
            let target = target.to_string_lossy().into_owned().into_bytes();
            snapshot.insert(rel, FileEntry::new(target, FileMode::Symlink));
        } else if file_type.is_dir() {
            read_directory_into(&entry.path(), &rel, skip, snapshot)?;
        } else {
            let content = std::fs::read(entry.path())?;
            let mode = if is_executable(&entry.metadata()?) {
                FileMode::Executable
            } else {
                FileMode::Regular
            };
            snapshot.insert(rel, FileEntry::new(content, mode));
        }
    }
    Ok(())
}

/// Read one file from disk as a snapshot entry; `None` when absent.
pub fn read_entry(path: &Path) -> std::io::Result<Option<FileEntry>> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    if meta.file_type().is_symlink() {
        let target = std::fs::read_link(path)?;
        return Ok(Some(FileEntry::new(
            target.to_string_lossy().into_owned().into_bytes(),
            FileMode::Symlink,
        )));
    }
    if meta.is_dir() {
        return Ok(None);
    }
    let mode = if is_executable(&meta) {
        FileMode::Executable
    } else {
        FileMode::Regular
    };
    Ok(Some(FileEntry::new(std::fs::read(path)?, mode)))
}

/// Materialize `entry` at `path`, creating parent directories.
pub fn write_entry(path: &Path, content: &[u8], mode: FileMode) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if std::fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink()) {
        std::fs::remove_file(path)?;
    }

    match mode {
        FileMode::Symlink => write_symlink(path, content),
        FileMode::Regular | FileMode::Executable => {
            std::fs::write(path, content)?;
            set_executable(path, mode == FileMode::Executable)
        }
    }
}

#[cfg(unix)]
fn write_symlink(path: &Path, target: &[u8]) -> std::io::Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let target = String::from_utf8_lossy(target).into_owned();
    std::os::unix::fs::symlink(target, path)
}

#[cfg(not(unix))]
fn write_symlink(path: &Path, target: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, target)
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    false
}

#[cfg(unix)]
fn set_executable(path: &Path, executable: bool) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    let mode = perms.mode();
    let new_mode = if executable {
        mode | ((mode & 0o444) >> 2)
    } else {
        mode & !0o111
    };
    if new_mode != mode {
        perms.set_mode(new_mode);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path, _executable: bool) -> std::io::Result<()> {
    Ok(())
}
