//! vault2git command-line tool.
//!
//! Replicates the history of mapped Vault folders into branches of a Git
//! repository. Re-running resumes from the stored checkpoints.

mod checkpoints;
mod console_sink;
mod signals;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use vault2git_core::config::Overrides;
use vault2git_core::progress::Stoppable;
use vault2git_core::{
    AppConfig, Database, Replicator, RunOptions, RunOutcome, RunReport, StopFlag, VaultClient,
};

use crate::console_sink::ConsoleProgress;

/// Replicate SourceGear Vault history into Git.
#[derive(Parser, Debug)]
#[command(name = "vault2git", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "vault2git.toml")]
    config: String,

    /// Replicate at most this many versions past each branch checkpoint.
    /// 0 means no limit.
    #[arg(long)]
    limit: Option<u64>,

    /// Only process this target branch (repeatable).
    #[arg(long = "branch", value_name = "NAME")]
    branches: Vec<String>,

    /// Folder to branch mappings, `folder~branch;folder~branch`. Replaces the
    /// configured mapping.
    #[arg(long, value_name = "MAPPINGS")]
    map: Option<String>,

    /// Do not create commits for versions that change nothing.
    #[arg(long)]
    skip_empty_commits: bool,

    /// Do not turn Vault labels into Git tags.
    #[arg(long)]
    ignore_labels: bool,

    /// Print progress lines to the console.
    #[arg(long)]
    console_output: bool,

    /// Let Ctrl+C / SIGTERM stop the run after the current version instead
    /// of killing the process.
    #[arg(long)]
    caps_lock: bool,

    /// Print the checkpoint table and exit.
    #[arg(long)]
    show_checkpoints: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(RunOutcome::Completed) => ExitCode::SUCCESS,
        Ok(RunOutcome::Cancelled) => {
            println!("{}", style::warn("Replication stopped on request; re-run to resume."));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", style::error(&format!("Error: {:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<RunOutcome> {
    let config_path = expand_tilde(&cli.config);
    let overrides = Overrides {
        paths: cli.map.clone(),
        skip_empty_commits: cli.skip_empty_commits,
        ignore_labels: cli.ignore_labels,
    };
    let config = AppConfig::load_and_resolve(&config_path, &overrides)
        .with_context(|| format!("failed to load configuration {}", config_path.display()))?;

    std::fs::create_dir_all(&config.migration.data_dir).with_context(|| {
        format!(
            "failed to create data directory {}",
            config.migration.data_dir.display()
        )
    })?;
    let _log_guard = init_logging(&config.migration.data_dir);

    let db = Database::new(config.checkpoint_db_path())
        .context("failed to open checkpoint database")?;

    if cli.show_checkpoints {
        checkpoints::print_table(&db)?;
        return Ok(RunOutcome::Completed);
    }

    let vault = VaultClient::new(
        &config.vault.command,
        &config.vault.server,
        &config.vault.repository,
        &config.vault.user,
        config.vault.password.clone().unwrap_or_default(),
    )
    .with_timeout(config.vault.timeout());

    let replicator = Replicator::from_config(&config, Arc::new(vault), Arc::new(db))
        .context("failed to prepare replication")?;

    let options = RunOptions {
        limit: cli.limit.filter(|&l| l > 0),
        branches: cli.branches.clone(),
        ..RunOptions::from_config(&config)
    };

    let stop = StopFlag::new();
    if cli.caps_lock {
        signals::install_stop_handler(stop.clone());
        if cli.console_output {
            println!("{}", style::dim("Press Ctrl+C to stop after the current version."));
        }
    }
    let mut sink = Stoppable::new(ConsoleProgress::new(cli.console_output), stop);

    info!(config = %config_path.display(), "starting replication");
    let report = replicator
        .run(&options, &mut sink)
        .await
        .context("replication failed")?;

    print_summary(&report);
    Ok(report.outcome)
}

/// Log to `<data_dir>/vault2git.log`; `RUST_LOG` overrides the `info` default.
fn init_logging(data_dir: &Path) -> WorkerGuard {
    let appender = tracing_appender::rolling::never(data_dir, "vault2git.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();
    guard
}

fn print_summary(report: &RunReport) {
    println!();
    println!("{}", style::header("Replication summary"));
    for branch in &report.branches {
        println!(
            "  {:<20} {} committed, {} skipped, checkpoint {}",
            branch.branch, branch.committed, branch.skipped, branch.checkpoint
        );
        if let Some(version) = branch.recovered {
            println!(
                "  {}",
                style::warn(&format!("checkpoint recovered from branch tip at {}", version))
            );
        }
    }
    match &report.tags {
        Some(tags) => println!(
            "  tags: {} created, {} already present, {} conflicts, {} unresolved",
            tags.created, tags.already_present, tags.conflicts, tags.unresolved
        ),
        None => println!("  {}", style::dim("tags: not created")),
    }
    if report.outcome == RunOutcome::Completed {
        println!("{}", style::success("Replication completed"));
    }
}

/// Expand a leading `~/` to the home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::parse_from([
            "vault2git",
            "--limit=2",
            "--branch=dev",
            "--branch",
            "master",
            "--map=src/app~master;src/lib~dev",
            "--skip-empty-commits",
            "--console-output",
            "--caps-lock",
        ]);
        assert_eq!(cli.limit, Some(2));
        assert_eq!(cli.branches, vec!["dev", "master"]);
        assert_eq!(cli.map.as_deref(), Some("src/app~master;src/lib~dev"));
        assert!(cli.skip_empty_commits);
        assert!(!cli.ignore_labels);
        assert!(cli.console_output);
        assert!(cli.caps_lock);
        assert_eq!(cli.config, "vault2git.toml");
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/etc/v2g.toml"), PathBuf::from("/etc/v2g.toml"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/v2g.toml"), home.join("v2g.toml"));
        }
    }
}
