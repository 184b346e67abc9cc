//! End-to-end tests with real Subversion repositories:
//! - an svn host working copy receiving a vendored tree
//! - an svn upstream exported by the built-in adapter
//!
//! No network I/O: repositories are created with `svnadmin create` and
//! accessed through `file://` URLs.
//!
//! Without `svn` and `svnadmin` on PATH the tests return early.

mod common;

use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;

use tempfile::TempDir;

use vendorsync_core::config::{SvnConfig, VendorConfig};
use vendorsync_core::file_policy::FilePolicy;
use vendorsync_core::host::{HostWorkingCopy, PlainHost, SvnHost};
use vendorsync_core::metadata::{self, METADATA_FILE};
use vendorsync_core::models::{RepositoryKind, RevisionSpec, StatusCode, StatusEntry, UpstreamHandle};
use vendorsync_core::upstream::AdapterOpener;
use vendorsync_core::SyncEngine;

use common::{append, engine, read, scenario_upstream, SECOND_COMMIT};

fn tool_runs(binary: &str) -> bool {
    Command::new(binary)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

fn svn_available() -> bool {
    tool_runs("svn") && tool_runs("svnadmin")
}

/// A fresh repository under `dir`, as a `file://` URL.
fn create_svn_repo(dir: &Path) -> String {
    let repo = dir.join("repo");
    let ok = Command::new("svnadmin")
        .arg("create")
        .arg(&repo)
        .status()
        .unwrap()
        .success();
    assert!(ok, "svnadmin create {}", repo.display());
    format!("file://{}", repo.display())
}

fn svn(args: &[&str]) -> String {
    let out = Command::new("svn")
        .args(args)
        .arg("--non-interactive")
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
    assert!(
        out.status.success(),
        "svn {}: {}",
        args.join(" "),
        String::from_utf8_lossy(&out.stderr)
    );
    stdout
}

fn svn_checkout(url: &str, wc_path: &Path) {
    svn(&["checkout", url, wc_path.to_str().unwrap()]);
}

/// `svn add` whatever is new below `wc_path`, commit, and return the
/// committed revision.
fn svn_commit_all(wc_path: &Path, message: &str) -> i64 {
    let wc = wc_path.to_str().unwrap();
    svn(&["add", "--force", "--parents", wc]);
    let out = svn(&["commit", "-m", message, wc]);
    out.lines()
        .find_map(|l| l.trim().strip_prefix("Committed revision "))
        .and_then(|rev| rev.trim_end_matches('.').parse().ok())
        .unwrap_or_else(|| panic!("no revision in commit output:\n{}", out))
}

fn setup_wc(tmp: &TempDir) -> std::path::PathBuf {
    let url = create_svn_repo(tmp.path());
    let wc = tmp.path().join("wc");
    svn_checkout(&url, &wc);
    std::fs::create_dir_all(wc.join("trunk/vendor")).unwrap();
    svn_commit_all(&wc, "layout");
    wc.canonicalize().unwrap()
}

#[tokio::test]
async fn test_svn_host_import_and_conflicting_update() {
    if !svn_available() {
        eprintln!("skipping: svn/svnadmin not installed");
        return;
    }
    let tmp = TempDir::new().unwrap();
    let wc = setup_wc(&tmp);
    let dest = wc.join("trunk/vendor/parent");
    let scenario = scenario_upstream();
    let host = Arc::new(SvnHost::new(&SvnConfig::default()));

    engine(&scenario.upstream, host.clone())
        .import(common::MemoryUpstream::handle(), &RevisionSpec::primary(), &dest)
        .await
        .unwrap();

    let status = host.status(&dest).await.unwrap();
    for path in [
        ".",
        METADATA_FILE,
        "README",
        "conflicting_file",
        "file_in_first_commit",
        "file_to_copy",
        "file_to_rename",
    ] {
        assert!(
            status.contains(&StatusEntry::new(StatusCode::Added, path)),
            "{} not scheduled for addition: {:?}",
            path,
            status
        );
    }

    svn_commit_all(&wc, "vendor parent");
    append(&dest, "conflicting_file", "local addition\n");
    scenario.upstream.commit("main", SECOND_COMMIT);

    let report = engine(&scenario.upstream, host.clone())
        .update(&dest, None)
        .await
        .unwrap();
    assert_eq!(report.conflict_count(), 1);

    let status = host.status(&dest).await.unwrap();
    let expected = [
        (StatusCode::Modified, METADATA_FILE),
        (StatusCode::Modified, "README"),
        (StatusCode::Conflicted, "conflicting_file"),
        (StatusCode::Copied, "copied_file"),
        (StatusCode::Copied, "renamed_file"),
        (StatusCode::Deleted, "file_to_rename"),
        (StatusCode::Deleted, "file_in_first_commit"),
        (StatusCode::Added, "file_in_second_commit"),
        (StatusCode::Unversioned, "conflicting_file.mine"),
        (StatusCode::Unversioned, "conflicting_file.rOLD"),
        (StatusCode::Unversioned, "conflicting_file.rNEW"),
    ];
    for (code, path) in expected {
        assert!(
            status.contains(&StatusEntry::new(code, path)),
            "expected {:?} {}: {:?}",
            code,
            path,
            status
        );
    }
    assert!(read(&dest, "conflicting_file").contains("<<<<<<< .mine\nlocal addition\n=======\n"));
}

#[tokio::test]
async fn test_svn_upstream_import_and_update() {
    if !svn_available() {
        eprintln!("skipping: svn/svnadmin not installed");
        return;
    }
    let tmp = TempDir::new().unwrap();
    let url = create_svn_repo(tmp.path());
    let upstream_wc = tmp.path().join("upstream_wc");
    svn_checkout(&url, &upstream_wc);
    std::fs::write(upstream_wc.join("README"), "svn library\n").unwrap();
    std::fs::create_dir_all(upstream_wc.join("src")).unwrap();
    std::fs::write(upstream_wc.join("src/main.c"), "int main() {}\n").unwrap();
    let first = svn_commit_all(&upstream_wc, "initial");

    let host_dir = tmp.path().join("host");
    let dest = host_dir.join("vendor/svnlib");
    let engine = SyncEngine::new(
        Arc::new(AdapterOpener::new(VendorConfig::default())),
        Arc::new(PlainHost::new()),
        FilePolicy::default(),
    );
    let report = engine
        .import(
            UpstreamHandle::new(url.clone(), RepositoryKind::Svn),
            &RevisionSpec::primary(),
            &dest,
        )
        .await
        .unwrap();
    assert_eq!(report.revision.identifier, first.to_string());
    assert_eq!(report.revision.symbolic_name.as_deref(), Some("HEAD"));
    assert_eq!(read(&dest, "src/main.c"), "int main() {}\n");
    assert!(!dest.join(".svn").exists());

    std::fs::write(upstream_wc.join("README"), "svn library\nversion 2\n").unwrap();
    let second = svn_commit_all(&upstream_wc, "second");

    let report = engine.update(&dest, None).await.unwrap();
    assert_eq!(report.from.identifier, first.to_string());
    assert_eq!(report.to.identifier, second.to_string());
    assert_eq!(read(&dest, "README"), "svn library\nversion 2\n");
    assert_eq!(
        metadata::load(&dest).unwrap().revision.identifier,
        second.to_string()
    );

    // pinned to the first revision: a numeric spec never moves
    let pinned_dest = host_dir.join("vendor/pinned");
    engine
        .import(
            UpstreamHandle::new(url, RepositoryKind::Svn),
            &RevisionSpec::named(first.to_string()),
            &pinned_dest,
        )
        .await
        .unwrap();
    let report = engine.update(&pinned_dest, None).await.unwrap();
    assert!(report.is_noop());
}
