//! vendorsync command-line tool.
//!
//! Imports upstream source trees into a working copy and keeps them up to
//! date, merging local edits. Also inspects vendored directories and
//! generates / validates configuration files.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use vendorsync_core::config::{VendorConfig, DEFAULT_CONFIG_TOML};
use vendorsync_core::models::{RepositoryKind, RevisionSpec, UpstreamHandle};
use vendorsync_core::SyncEngine;

/// Vendor third-party source trees and keep them current.
#[derive(Parser, Debug)]
#[command(name = "vendorsync", version, about = "Vendor upstream source trees into a working copy")]
struct Cli {
    /// Path to the TOML configuration file [default: <config dir>/vendorsync/config.toml].
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level filter (overrides RUST_LOG and the config file).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Vendor an upstream repository into a new directory.
    Import {
        /// Branch, tag, ref, commit id or revision number.
        #[arg(short, long)]
        revision: Option<String>,

        /// Upstream kind: git or svn (guessed from the URL when omitted).
        #[arg(short, long)]
        kind: Option<String>,

        /// Upstream repository URL or path.
        upstream: String,

        /// Directory to vendor into.
        dest: PathBuf,
    },

    /// Update a vendored directory, merging local edits.
    Update {
        /// Revision to update to instead of the recorded branch or HEAD.
        #[arg(short, long)]
        revision: Option<String>,

        dest: PathBuf,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show local edits and, optionally, whether upstream moved on.
    Status {
        /// Also ask the upstream for a newer revision.
        #[arg(short, long)]
        upstream: bool,

        /// Print the status as JSON.
        #[arg(long)]
        json: bool,

        dest: PathBuf,
    },

    /// Unified diff of local edits against the recorded upstream revision.
    Diff { dest: PathBuf },

    /// Refuse updates of a vendored directory.
    Lock { dest: PathBuf },

    /// Allow updates of a vendored directory again.
    Unlock { dest: PathBuf },

    /// Generate a default configuration file.
    Init {
        /// Output path [default: the default config location].
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a configuration file.
    Validate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", style::warn("error:"), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => {
            init_logging(cli.log_level.as_deref(), "warn");
            cmd_init(output.or(cli.config))
        }
        Commands::Validate => {
            init_logging(cli.log_level.as_deref(), "warn");
            cmd_validate(&config_path(cli.config.as_deref())?)
        }
        command => {
            let config = load_config(cli.config.as_deref())?;
            init_logging(cli.log_level.as_deref(), &config.log_level);
            debug!(?command, "dispatching");

            match command {
                Commands::Import {
                    revision,
                    kind,
                    upstream,
                    dest,
                } => cmd_import(&config, revision, kind, upstream, &dest).await,
                Commands::Update {
                    revision,
                    dest,
                    json,
                } => cmd_update(&config, revision, &dest, json).await,
                Commands::Status {
                    upstream,
                    json,
                    dest,
                } => cmd_status(&config, &dest, upstream, json).await,
                Commands::Diff { dest } => cmd_diff(&config, &dest).await,
                Commands::Lock { dest } => cmd_lock(&config, &dest, true).await,
                Commands::Unlock { dest } => cmd_lock(&config, &dest, false).await,
                Commands::Init { .. } | Commands::Validate => Ok(()),
            }
        }
    }
}

/// `--log-level`, then `RUST_LOG`, then the configured level.
fn init_logging(cli_level: Option<&str>, configured: &str) {
    let filter = match cli_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => VendorConfig::default_path(dirs::config_dir())
            .context("cannot determine the user configuration directory"),
    }
}

/// An explicit `--config` must exist; the default location may be absent.
fn load_config(explicit: Option<&Path>) -> Result<VendorConfig> {
    let config = match explicit {
        Some(path) => VendorConfig::load_and_resolve(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => {
            let path = config_path(None)?;
            VendorConfig::load_or_default(&path)
                .with_context(|| format!("failed to load configuration {}", path.display()))?
        }
    };
    Ok(config)
}

fn engine_for(config: &VendorConfig, dest: &Path) -> Result<SyncEngine> {
    SyncEngine::from_config(config, dest).context("failed to open the host working copy")
}

async fn cmd_import(
    config: &VendorConfig,
    revision: Option<String>,
    kind: Option<String>,
    url: String,
    dest: &Path,
) -> Result<()> {
    let kind = match kind {
        Some(kind) => kind.parse::<RepositoryKind>()?,
        None => config.upstream.default_kind.resolve(&url)?,
    };
    let engine = engine_for(config, dest)?;
    let report = engine
        .import(UpstreamHandle::new(url, kind), &RevisionSpec::from(revision), dest)
        .await
        .with_context(|| format!("import into {} failed", dest.display()))?;

    println!(
        "{}",
        style::success(&format!(
            "Imported {} {} into {} ({} files)",
            report.upstream.kind,
            report.revision,
            dest.display(),
            report.files.len()
        ))
    );
    println!("{}", style::dim("Review and commit the result with your version control tool."));
    Ok(())
}

async fn cmd_update(
    config: &VendorConfig,
    revision: Option<String>,
    dest: &Path,
    json: bool,
) -> Result<()> {
    let engine = engine_for(config, dest)?;
    let spec = revision.map(RevisionSpec::named);
    let report = engine
        .update(dest, spec.as_ref())
        .await
        .with_context(|| format!("update of {} failed", dest.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.is_noop() {
        println!("{}", style::success(&format!("Already at {}", report.to)));
        return Ok(());
    }

    println!();
    println!(
        "{}",
        style::header(&format!("Updated {} → {}", report.from, report.to))
    );
    println!();
    println!("{}", style::outcome_table(&report.outcomes));
    println!();

    let conflicts = report.conflict_count();
    if conflicts > 0 {
        println!(
            "{}",
            style::warn(&format!(
                "{} conflict(s). Resolve the markers, then remove the .mine/.rOLD/.rNEW files.",
                conflicts
            ))
        );
    } else {
        println!(
            "{}",
            style::success(&format!("{} path(s) updated", report.outcomes.len()))
        );
    }
    Ok(())
}

async fn cmd_status(config: &VendorConfig, dest: &Path, check_upstream: bool, json: bool) -> Result<()> {
    let engine = engine_for(config, dest)?;
    let status = engine
        .status(dest, check_upstream)
        .await
        .with_context(|| format!("failed to read status of {}", dest.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!("{}", style::header(&dest.display().to_string()));
    println!("  Upstream : {} ({})", status.upstream.url, status.upstream.kind);
    println!("  Revision : {}", status.revision);
    println!("  Locked   : {}", if status.locked { "yes" } else { "no" });
    if let Some(ref upstream) = status.upstream_revision {
        if status.upstream_changed() {
            println!("  Latest   : {}", style::warn(&format!("{} available", upstream)));
        } else {
            println!("  Latest   : {}", style::success("up to date"));
        }
    }
    println!();

    if status.local_changes.is_empty() {
        println!("{}", style::success("No local changes"));
    } else {
        println!("{}", style::local_change_table(&status.local_changes));
    }
    println!();
    Ok(())
}

async fn cmd_diff(config: &VendorConfig, dest: &Path) -> Result<()> {
    let engine = engine_for(config, dest)?;
    let diff = engine
        .diff(dest)
        .await
        .with_context(|| format!("failed to diff {}", dest.display()))?;
    print!("{}", diff);
    Ok(())
}

async fn cmd_lock(config: &VendorConfig, dest: &Path, lock: bool) -> Result<()> {
    let engine = engine_for(config, dest)?;
    let record = if lock {
        engine.lock(dest).await
    } else {
        engine.unlock(dest).await
    }
    .with_context(|| format!("failed to change the lock of {}", dest.display()))?;

    let state = if record.locked { "locked" } else { "unlocked" };
    println!("{}", style::success(&format!("{} is {}", dest.display(), state)));
    Ok(())
}

fn cmd_init(output: Option<PathBuf>) -> Result<()> {
    let output = config_path(output.as_deref())?;
    anyhow::ensure!(
        !output.exists(),
        "{} exists; refusing to overwrite it",
        output.display()
    );
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(&output, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!("{}", style::success(&format!("Wrote {}", output.display())));
    println!(
        "{}",
        style::dim("Fill in [svn] credentials if an upstream or the host needs them,")
    );
    println!(
        "{}",
        style::dim(&format!("then run `vendorsync --config {} validate`.", output.display()))
    );
    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("{}", style::header(&config_path.display().to_string()));

    let mut config = VendorConfig::load_from_file(config_path)?;
    println!("  parse        {}", style::success("ok"));

    match config.resolve_env_vars() {
        Ok(()) => println!("  environment  {}", style::success("ok")),
        Err(e) => println!("  environment  {}", style::warn(&e.to_string())),
    }

    if let Err(e) = config.validate() {
        println!("  values       {}", style::warn(&e.to_string()));
        anyhow::bail!("{} is not a usable configuration", config_path.display());
    }
    println!("  values       {}", style::success("ok"));

    let max_size = match config.policy.max_file_size {
        0 => "unlimited".to_string(),
        n => format!("{} bytes", n),
    };
    println!();
    for (key, value) in [
        ("log_level", config.log_level.clone()),
        ("host.kind", format!("{:?}", config.host.kind).to_lowercase()),
        (
            "upstream.default_kind",
            format!("{:?}", config.upstream.default_kind).to_lowercase(),
        ),
        ("svn.binary", config.svn.binary.clone()),
        (
            "svn.password",
            if config.svn.password.is_some() { "set" } else { "unset" }.to_string(),
        ),
        (
            "policy.ignore_patterns",
            config.policy.ignore_patterns.len().to_string(),
        ),
        ("policy.max_file_size", max_size),
    ] {
        println!("  {:<24}{}", key, style::dim(&value));
    }
    Ok(())
}
