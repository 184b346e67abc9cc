//! Asynchronous SVN CLI client shared by the svn upstream and host adapters.

use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::parser::{parse_svn_info, parse_svn_status, SvnInfo, SvnStatusEntry};
use crate::config::SvnConfig;
use crate::errors::SvnError;

/// Asynchronous client for the `svn` command line.
#[derive(Debug, Clone)]
pub struct SvnClient {
    binary: String,
    username: Option<String>,
    password: Option<String>,
}

impl SvnClient {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            username: None,
            password: None,
        }
    }

    pub fn from_config(config: &SvnConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            username: Some(config.username.clone()).filter(|u| !u.is_empty()),
            password: config.password.clone(),
        }
    }

    #[instrument(skip(self))]
    pub async fn info(&self, target: &str, revision: Option<&str>) -> Result<SvnInfo, SvnError> {
        let mut args = vec!["info", "--xml"];
        if let Some(rev) = revision {
            args.extend(["-r", rev]);
        }
        args.push(target);
        let output = self.run(&args, None).await?;
        parse_svn_info(&output)
    }

    #[instrument(skip_all, fields(dest = %dest.display()))]
    pub async fn export(&self, url: &str, revision: &str, dest: &Path) -> Result<(), SvnError> {
        let dest_str = dest.to_string_lossy().to_string();
        self.run(&["export", "--force", "-r", revision, url, &dest_str], None)
            .await?;
        info!(url, revision, "svn export completed");
        Ok(())
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn add(&self, path: &Path) -> Result<(), SvnError> {
        let path_str = path.to_string_lossy().to_string();
        self.run(&["add", "--parents", "--force", &path_str], path.parent())
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn remove(&self, path: &Path) -> Result<(), SvnError> {
        let path_str = path.to_string_lossy().to_string();
        self.run(&["rm", "--force", &path_str], path.parent()).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(from = %from.display(), to = %to.display()))]
    pub async fn move_path(&self, from: &Path, to: &Path) -> Result<(), SvnError> {
        let from_str = from.to_string_lossy().to_string();
        let to_str = to.to_string_lossy().to_string();
        self.run(&["mv", "--parents", &from_str, &to_str], from.parent())
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(from = %from.display(), to = %to.display()))]
    pub async fn copy_path(&self, from: &Path, to: &Path) -> Result<(), SvnError> {
        let from_str = from.to_string_lossy().to_string();
        let to_str = to.to_string_lossy().to_string();
        self.run(&["cp", "--parents", &from_str, &to_str], from.parent())
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub async fn status(&self, dir: &Path) -> Result<Vec<SvnStatusEntry>, SvnError> {
        let dir_str = dir.to_string_lossy().to_string();
        let output = self.run(&["status", "--xml", &dir_str], Some(dir)).await?;
        parse_svn_status(&output)
    }

    /// Run `svn` with `args`, optionally from `dir`, returning stdout.
    ///
    /// A configured password goes through stdin, never the argument list.
    pub async fn run(&self, args: &[&str], dir: Option<&Path>) -> Result<String, SvnError> {
        let mut cmd = Command::new(&self.binary);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        cmd.args(args).arg("--non-interactive");
        if let Some(username) = &self.username {
            cmd.arg("--username").arg(username);
        }
        if self.password.is_some() {
            cmd.args(["--password-from-stdin", "--no-auth-cache"])
                .stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        debug!(cmd = ?format!("{} {}", self.binary, args.join(" ")), "running svn command");
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SvnError::BinaryNotFound(self.binary.clone())
            } else {
                SvnError::IoError(e)
            }
        })?;
        if let (Some(password), Some(mut stdin)) = (&self.password, child.stdin.take()) {
            let line = format!("{}\n", password);
            match stdin.write_all(line.as_bytes()).await {
                // svn may exit before reading; its own error is reported below
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e.into()),
                _ => {}
            }
        }
        let output = child.wait_with_output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(exit_code, %stderr, "svn command failed");
            return Err(SvnError::CommandFailed { exit_code, stderr });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_from_config() {
        let config = SvnConfig {
            binary: "/opt/svn/bin/svn".into(),
            username: String::new(),
            password_env: String::new(),
            password: None,
        };
        let client = SvnClient::from_config(&config);
        assert_eq!(client.binary, "/opt/svn/bin/svn");
        assert!(client.username.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_password_is_written_to_stdin() {
        let client = SvnClient {
            binary: "sh".into(),
            username: Some("alice".into()),
            password: Some("s3cret".into()),
        };
        let script = r#"for a in "$@"; do echo "arg:$a"; done; read -r secret; echo "stdin:$secret""#;
        let output = client.run(&["-c", script, "svn"], None).await.unwrap();

        assert!(output.contains("arg:--username\narg:alice\n"));
        assert!(output.contains("arg:--password-from-stdin\n"));
        assert!(output.contains("stdin:s3cret\n"));
        assert!(!output.contains("arg:s3cret"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let client = SvnClient::new("/nonexistent/bin/svn-does-not-exist");
        let err = client.run(&["info"], None).await.unwrap_err();
        assert!(matches!(err, SvnError::BinaryNotFound(_)));
    }
}
