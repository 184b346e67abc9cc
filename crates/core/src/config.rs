//! `config.toml` handling.
//!
//! The svn password never appears in the file: `svn.password_env` names an
//! environment variable that [`VendorConfig::resolve_env_vars`] reads.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{ConfigError, UpstreamError};
use crate::models::RepositoryKind;

/// File name below `<user config dir>/vendorsync/`.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Contents of `config.toml`; every section is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub host: HostConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Shared by the svn host and the svn upstream.
    #[serde(default)]
    pub svn: SvnConfig,

    #[serde(default)]
    pub policy: PolicyConfig,
}

fn default_log_level() -> String {
    "warn".into()
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            host: HostConfig::default(),
            upstream: UpstreamConfig::default(),
            svn: SvnConfig::default(),
            policy: PolicyConfig::default(),
        }
    }
}

/// Which host working-copy adapter to drive.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HostKind {
    /// Detect from the destination directory.
    #[default]
    Auto,
    Svn,
    Git,
    /// Unversioned directory; registrations are only journaled.
    Plain,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub kind: HostKind,
}

/// Upstream kind used by `import` when none is given on the command line.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamKindSetting {
    /// Guess from the repository URL.
    #[default]
    Auto,
    Git,
    Svn,
}

impl UpstreamKindSetting {
    /// Adapter kind for `url` under this setting.
    pub fn resolve(&self, url: &str) -> Result<RepositoryKind, UpstreamError> {
        match self {
            Self::Git => Ok(RepositoryKind::Git),
            Self::Svn => Ok(RepositoryKind::Svn),
            Self::Auto => RepositoryKind::guess(url).ok_or_else(|| {
                UpstreamError::UnsupportedKind(format!("cannot guess the kind of '{}'", url))
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub default_kind: UpstreamKindSetting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvnConfig {
    /// svn executable name or path.
    #[serde(default = "default_svn_binary")]
    pub binary: String,

    /// Username passed to svn; empty = let svn decide.
    #[serde(default)]
    pub username: String,

    /// Environment variable holding the svn password; empty = none.
    #[serde(default)]
    pub password_env: String,

    /// Filled in by `resolve_env_vars`.
    #[serde(skip)]
    pub password: Option<String>,
}

fn default_svn_binary() -> String {
    "svn".into()
}

impl Default for SvnConfig {
    fn default() -> Self {
        Self {
            binary: default_svn_binary(),
            username: String::new(),
            password_env: String::new(),
            password: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Glob patterns excluded from every snapshot.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Largest file (bytes) carried into a snapshot; 0 = unlimited.
    #[serde(default)]
    pub max_file_size: u64,
}

impl VendorConfig {
    /// Parse only; `_env` references stay unresolved.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::FileNotFound(path.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let config = toml::from_str::<VendorConfig>(&text)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Read `svn.password_env`. Unset and empty are both errors.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        let var = self.svn.password_env.as_str();
        if var.is_empty() {
            return Ok(());
        }
        match env_value(var) {
            Some(value) => {
                self.svn.password = Some(value);
                Ok(())
            }
            None => Err(ConfigError::EnvVarMissing {
                var: var.to_string(),
                field: "svn.password_env".into(),
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];
        if !LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "log_level".into(),
                detail: format!("expected one of {}", LEVELS.join(", ")),
            });
        }
        if self.svn.binary.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "svn.binary".into(),
                detail: "svn binary must not be empty".into(),
            });
        }
        if !self.svn.password_env.is_empty() && self.svn.username.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "svn.username".into(),
                detail: "a password requires a username".into(),
            });
        }
        for pattern in &self.policy.ignore_patterns {
            if pattern.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "policy.ignore_patterns".into(),
                    detail: "patterns must not be empty".into(),
                });
            }
        }
        Ok(())
    }

    /// [`load_from_file`](Self::load_from_file), then resolve and validate.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// A missing file gives the built-in defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        Self::load_and_resolve(path)
    }

    /// Default config path: `<user config dir>/vendorsync/config.toml`.
    pub fn default_path(config_dir: Option<PathBuf>) -> Option<PathBuf> {
        config_dir.map(|d| d.join("vendorsync").join(CONFIG_FILE_NAME))
    }
}

/// Commented configuration written by `vendorsync init`.
pub const DEFAULT_CONFIG_TOML: &str = r#"# vendorsync configuration

# trace | debug | info | warn | error
log_level = "warn"

[host]
# auto | svn | git | plain
kind = "auto"

[upstream]
# auto | git | svn (used by `import` when --kind is not given)
default_kind = "auto"

[svn]
binary = "svn"
# username = "svn_user"
# password_env = "SVN_PASSWORD"

[policy]
# Glob patterns left out of every vendored snapshot.
ignore_patterns = []
# Largest file in bytes to vendor; 0 = unlimited.
max_file_size = 0
"#;

fn env_value(var: &str) -> Option<String> {
    let value = std::env::var(var).ok().filter(|v| !v.is_empty());
    if value.is_none() {
        warn!(var, "environment variable unset or empty");
    }
    value
}
