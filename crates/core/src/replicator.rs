//! Replication engine.
//!
//! Per branch the engine runs a small state machine
//! `Idle → Pulling → Finalizing`: Init prepares the branch and fetches its
//! history window, Pulling replicates one version per step until the walker
//! is drained or a stop is requested, Finalizing runs housekeeping and
//! restores the work tree. Labels become tags once every requested branch
//! has been replicated.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::commit_format::CommitFormatter;
use crate::composer::CommitComposer;
use crate::config::AppConfig;
use crate::db::Database;
use crate::errors::{CoreError, GitError, ReplicationError, VaultError};
use crate::git::{CommitOutcome, GitClient};
use crate::identity::{AuthorMapper, GitIdentity};
use crate::mapping::{resolve_worklist, BranchMapping};
use crate::materialize::Materializer;
use crate::progress::{ProgressEvent, ProgressSink, Signal, VersionOutcome};
use crate::source::{SourceRepository, SourceVersion};
use crate::tags::{TagReport, TagSynchronizer};
use crate::walker::HistoryWalker;

/// Knobs of a single run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Highest number of versions past the checkpoint to replicate per
    /// branch. `None` means unbounded.
    pub limit: Option<u64>,
    /// Target branches to process. Empty means all mapped branches.
    pub branches: Vec<String>,
    pub skip_empty_commits: bool,
    pub ignore_labels: bool,
}

impl RunOptions {
    /// Options carrying the configured migration switches.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            limit: None,
            branches: Vec::new(),
            skip_empty_commits: config.migration.skip_empty_commits,
            ignore_labels: config.migration.ignore_labels,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened on one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchReport {
    pub branch: String,
    pub source_folder: String,
    /// Checkpoint when the branch started, after recovery.
    pub start_checkpoint: i64,
    /// Checkpoint when the branch finished.
    pub checkpoint: i64,
    pub committed: usize,
    pub skipped: usize,
    /// Version adopted from the branch tip because the checkpoint lagged.
    pub recovered: Option<i64>,
}

/// Summary of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub branches: Vec<BranchReport>,
    /// `None` when tag creation did not run.
    pub tags: Option<TagReport>,
}

impl RunReport {
    pub fn branch(&self, name: &str) -> Option<&BranchReport> {
        self.branches.iter().find(|b| b.branch == name)
    }

    pub fn total_committed(&self) -> usize {
        self.branches.iter().map(|b| b.committed).sum()
    }
}

/// Per-branch phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
    Idle,
    Pulling,
    Finalizing,
}

impl fmt::Display for BranchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Pulling => write!(f, "pulling"),
            Self::Finalizing => write!(f, "finalizing"),
        }
    }
}

/// Replicates mapped Vault folders onto Git branches.
pub struct Replicator {
    source: Arc<dyn SourceRepository>,
    git: GitClient,
    db: Arc<Database>,
    mappings: Vec<BranchMapping>,
    materializer: Materializer,
    composer: CommitComposer,
    tags: TagSynchronizer,
    /// `git` executable for housekeeping, `None` when gc is disabled.
    gc_command: Option<String>,
}

impl Replicator {
    /// Build a replicator from a configuration, validating it first. Opens
    /// (or initializes) the target repository.
    pub fn from_config(
        config: &AppConfig,
        source: Arc<dyn SourceRepository>,
        db: Arc<Database>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let mappings = config.mappings()?;
        let protected = config.protected_entries();
        let git =
            GitClient::open_or_init(&config.git.repo_path)?.with_protected_entries(&protected);
        let authors =
            AuthorMapper::new(config.git.authors_file.as_deref(), &config.git.domain_name)?;
        let tagger = GitIdentity {
            name: "vault2git".into(),
            email: format!("vault2git@{}", config.git.domain_name.trim_start_matches('@')),
        };

        info!(
            branches = mappings.len(),
            repo = %config.git.repo_path.display(),
            "replicator ready"
        );
        Ok(Self {
            source,
            git,
            db,
            mappings,
            materializer: Materializer::new(
                config.staging_dir(),
                config.migration.ignore_patterns.clone(),
            )
            .with_protected_entries(&protected),
            composer: CommitComposer::new(authors, CommitFormatter::new(&config.commit_format)),
            tags: TagSynchronizer::new(tagger),
            gc_command: config.git.gc.then(|| config.git.command.clone()),
        })
    }

    pub fn git(&self) -> &GitClient {
        &self.git
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn mappings(&self) -> &[BranchMapping] {
        &self.mappings
    }

    /// Replicate every requested branch, then create tags.
    ///
    /// Returns `Ok` with [`RunOutcome::Cancelled`] when the sink asked to
    /// stop. Any error is fatal for the run; checkpoints stay at the last
    /// fully replicated version.
    #[instrument(skip_all, fields(limit = ?options.limit))]
    pub async fn run(
        &self,
        options: &RunOptions,
        progress: &mut dyn ProgressSink,
    ) -> Result<RunReport, ReplicationError> {
        let worklist = resolve_worklist(&self.mappings, &options.branches)?;
        let run_id = Uuid::new_v4().to_string();
        self.db.start_run(&run_id)?;
        info!(run_id = %run_id, branches = worklist.len(), "replication run started");

        let result = self.run_worklist(&run_id, &worklist, options, progress).await;

        let (outcome, details) = match &result {
            Ok(report) => {
                let details = serde_json::to_string(report).unwrap_or_else(|e| {
                    warn!(error = %e, "failed to serialize run report");
                    String::new()
                });
                (report.outcome.as_str(), details)
            }
            Err(e) => {
                error!(error = %e, "replication run failed");
                ("failed", serde_json::json!({ "error": e.to_string() }).to_string())
            }
        };
        if let Err(e) = self.db.finish_run(&run_id, outcome, Some(&details)) {
            warn!(error = %e, "failed to record run outcome");
        }
        result
    }

    async fn run_worklist(
        &self,
        run_id: &str,
        worklist: &[BranchMapping],
        options: &RunOptions,
        progress: &mut dyn ProgressSink,
    ) -> Result<RunReport, ReplicationError> {
        let mut report = RunReport {
            run_id: run_id.to_string(),
            outcome: RunOutcome::Completed,
            branches: Vec::with_capacity(worklist.len()),
            tags: None,
        };

        for mapping in worklist {
            let (branch_report, signal) =
                self.replicate_branch(mapping, options, progress).await?;
            report.branches.push(branch_report);
            if signal == Signal::Stop {
                info!(
                    branch = %mapping.target_branch,
                    "stop requested, abandoning remaining branches"
                );
                report.outcome = RunOutcome::Cancelled;
                return Ok(report);
            }
        }

        if options.ignore_labels {
            debug!("labels ignored, skipping tag creation");
        } else {
            let started = Instant::now();
            let tags = self
                .tags
                .sync(self.source.as_ref(), &self.git, &self.db, worklist)
                .await?;
            // Nothing is left to stop after the last phase.
            let _ = progress.report(&ProgressEvent::TagCreation {
                created: tags.created,
                elapsed: started.elapsed(),
            });
            report.tags = Some(tags);
        }

        info!(committed = report.total_committed(), "replication run completed");
        Ok(report)
    }

    /// Drive one branch through `Idle → Pulling → Finalizing`.
    #[instrument(skip_all, fields(branch = %mapping.target_branch))]
    async fn replicate_branch(
        &self,
        mapping: &BranchMapping,
        options: &RunOptions,
        progress: &mut dyn ProgressSink,
    ) -> Result<(BranchReport, Signal), ReplicationError> {
        let branch = mapping.target_branch.as_str();
        let mut report = BranchReport {
            branch: branch.to_string(),
            source_folder: mapping.source_folder.clone(),
            start_checkpoint: 0,
            checkpoint: 0,
            committed: 0,
            skipped: 0,
            recovered: None,
        };
        let mut signal = Signal::Continue;
        let mut walker = HistoryWalker::from_versions(Vec::new(), 0, Some(0));
        let mut state = BranchState::Idle;

        loop {
            debug!(state = %state, "branch state");
            state = match state {
                BranchState::Idle => {
                    let started = Instant::now();
                    let (checkpoint, recovered) = self.prepare_branch(mapping)?;
                    report.start_checkpoint = checkpoint;
                    report.checkpoint = checkpoint;
                    report.recovered = recovered;
                    walker = HistoryWalker::fetch(
                        self.source.as_ref(),
                        &mapping.source_folder,
                        checkpoint,
                        options.limit,
                    )
                    .await
                    .map_err(|e| source_unavailable(branch, checkpoint + 1, e))?;
                    info!(
                        checkpoint,
                        upper = walker.upper(),
                        pending = walker.len(),
                        "branch initialized"
                    );

                    signal = progress.report(&ProgressEvent::Init {
                        branch: branch.to_string(),
                        elapsed: started.elapsed(),
                    });
                    if signal == Signal::Stop {
                        BranchState::Finalizing
                    } else {
                        BranchState::Pulling
                    }
                }
                BranchState::Pulling => match walker.next_version() {
                    None => BranchState::Finalizing,
                    Some(version) => {
                        let started = Instant::now();
                        let outcome = self
                            .replicate_version(mapping, version, options.skip_empty_commits)
                            .await?;
                        match outcome {
                            VersionOutcome::Committed => report.committed += 1,
                            VersionOutcome::SkippedEmpty => report.skipped += 1,
                        }
                        report.checkpoint = version.number;

                        signal = progress.report(&ProgressEvent::Version {
                            branch: branch.to_string(),
                            version: version.number,
                            outcome,
                            elapsed: started.elapsed(),
                        });
                        if signal == Signal::Stop {
                            info!(version = version.number, "stop requested");
                            BranchState::Finalizing
                        } else {
                            BranchState::Pulling
                        }
                    }
                },
                BranchState::Finalizing => {
                    if report.committed > 0 {
                        if let Some(command) = &self.gc_command {
                            let started = Instant::now();
                            if let Err(e) = self.git.gc(command).await {
                                warn!(error = %e, "git gc failed, continuing");
                            }
                            if progress.report(&ProgressEvent::Gc {
                                branch: branch.to_string(),
                                elapsed: started.elapsed(),
                            }) == Signal::Stop
                            {
                                signal = Signal::Stop;
                            }
                        }
                    }

                    let started = Instant::now();
                    self.finalize_branch(branch, report.checkpoint)?;
                    if progress.report(&ProgressEvent::Finalize {
                        branch: branch.to_string(),
                        elapsed: started.elapsed(),
                    }) == Signal::Stop
                    {
                        signal = Signal::Stop;
                    }
                    break;
                }
            };
        }

        info!(
            committed = report.committed,
            skipped = report.skipped,
            checkpoint = report.checkpoint,
            "branch finished"
        );
        Ok((report, signal))
    }

    /// Init phase: point `HEAD` at the branch and reconcile the checkpoint
    /// with the branch tip. Returns the checkpoint and, when it was advanced
    /// from the tip, the recovered version.
    fn prepare_branch(
        &self,
        mapping: &BranchMapping,
    ) -> Result<(i64, Option<i64>), ReplicationError> {
        let branch = mapping.target_branch.as_str();
        let checkpoint = self.db.checkpoint(branch)?;
        let git_failed = |e: GitError| commit_failed(branch, checkpoint, e);

        self.git.switch_to_branch(branch).map_err(git_failed)?;

        let tip = self.git.tip_commit(branch).map_err(git_failed)?;
        let tip_version = tip
            .as_ref()
            .and_then(|t| CommitFormatter::extract_version(&t.message));
        match (tip, tip_version) {
            (Some(tip), Some(version)) if version > checkpoint => {
                warn!(
                    checkpoint,
                    tip_version = version,
                    sha = %tip.sha,
                    "branch tip is ahead of the checkpoint, recovering"
                );
                self.db.record_version(branch, version, Some(&tip.sha), false)?;
                Ok((version, Some(version)))
            }
            _ => Ok((checkpoint, None)),
        }
    }

    /// Materialize, commit and checkpoint one version.
    #[instrument(skip_all, fields(version = version.number))]
    async fn replicate_version(
        &self,
        mapping: &BranchMapping,
        version: &SourceVersion,
        skip_empty: bool,
    ) -> Result<VersionOutcome, ReplicationError> {
        let branch = mapping.target_branch.as_str();
        let folder = mapping.source_folder.as_str();
        let git_failed = |e: GitError| commit_failed(branch, version.number, e);

        let export = self
            .materializer
            .export(self.source.as_ref(), folder, version.number)
            .await
            .map_err(|e| source_unavailable(branch, version.number, e))?;
        let workdir = self.git.workdir().map_err(git_failed)?;
        self.materializer.mirror(&export, workdir).map_err(git_failed)?;
        drop(export);

        let outcome = self
            .composer
            .compose(&self.git, branch, folder, version, skip_empty)
            .map_err(git_failed)?;
        let (sha, result) = match outcome {
            CommitOutcome::Committed(oid) => (Some(oid), VersionOutcome::Committed),
            CommitOutcome::SkippedEmpty(tip) => (tip, VersionOutcome::SkippedEmpty),
        };
        let sha = sha.map(|oid| oid.to_string());
        self.db.record_version(
            branch,
            version.number,
            sha.as_deref(),
            result == VersionOutcome::SkippedEmpty,
        )?;
        Ok(result)
    }

    /// Finalize phase: restore the work tree to the tip and drop staging.
    fn finalize_branch(&self, branch: &str, checkpoint: i64) -> Result<(), ReplicationError> {
        self.git
            .reset_to_tip(branch)
            .map_err(|e| commit_failed(branch, checkpoint, e))?;
        if let Err(e) = self.materializer.clear_staging() {
            warn!(error = %e, "failed to clear staging directory");
        }
        Ok(())
    }
}

fn source_unavailable(branch: &str, version: i64, source: VaultError) -> ReplicationError {
    ReplicationError::SourceUnavailable {
        branch: branch.to_string(),
        version,
        source,
    }
}

fn commit_failed(branch: &str, version: i64, source: GitError) -> ReplicationError {
    ReplicationError::CommitFailed {
        branch: branch.to_string(),
        version,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_state_display() {
        assert_eq!(BranchState::Idle.to_string(), "idle");
        assert_eq!(BranchState::Pulling.to_string(), "pulling");
        assert_eq!(BranchState::Finalizing.to_string(), "finalizing");
    }

    #[test]
    fn test_run_outcome_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&RunOutcome::Cancelled).unwrap(), "\"cancelled\"");
        assert_eq!(RunOutcome::Completed.to_string(), "completed");
    }

    #[test]
    fn test_run_report_totals() {
        let branch = |name: &str, committed| BranchReport {
            branch: name.into(),
            source_folder: format!("$/{}", name),
            start_checkpoint: 0,
            checkpoint: 3,
            committed,
            skipped: 0,
            recovered: None,
        };
        let report = RunReport {
            run_id: "r".into(),
            outcome: RunOutcome::Completed,
            branches: vec![branch("master", 2), branch("dev", 3)],
            tags: None,
        };
        assert_eq!(report.total_committed(), 5);
        assert_eq!(report.branch("dev").map(|b| b.committed), Some(3));
        assert!(report.branch("release").is_none());
    }
}
