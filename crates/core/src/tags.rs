//! Vault labels to annotated Git tags.

use std::sync::LazyLock;

use regex_lite::Regex;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::db::{queries::TagStatus, Database};
use crate::errors::{GitError, ReplicationError};
use crate::git::GitClient;
use crate::identity::GitIdentity;
use crate::mapping::BranchMapping;
use crate::source::{SourceLabel, SourceRepository};

/// Characters and sequences git refuses in a ref name component.
static INVALID_REF_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x20\x7f~^:?*\[\\/]+|@\{").expect("valid ref pattern"));
static DOT_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.{2,}").expect("valid dot pattern"));

/// Tag counts of one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TagReport {
    pub created: usize,
    pub already_present: usize,
    pub conflicts: usize,
    /// Labels whose version was never replicated, or whose name is unusable.
    pub unresolved: usize,
}

/// Creates tags for the labels of replicated folders.
#[derive(Debug, Clone)]
pub struct TagSynchronizer {
    tagger: GitIdentity,
}

impl TagSynchronizer {
    pub fn new(tagger: GitIdentity) -> Self {
        Self { tagger }
    }

    /// Tag every label of every branch in `branches`.
    ///
    /// Labels resolve through the commit map. Existing tags are never moved:
    /// one on the same commit counts as already present, one elsewhere as a
    /// conflict.
    #[instrument(skip_all, fields(branches = branches.len()))]
    pub async fn sync(
        &self,
        source: &dyn SourceRepository,
        git: &GitClient,
        db: &Database,
        branches: &[BranchMapping],
    ) -> Result<TagReport, ReplicationError> {
        let mut report = TagReport::default();
        for mapping in branches {
            let branch = mapping.target_branch.as_str();
            let labels = source.labels(&mapping.source_folder).await.map_err(|e| {
                ReplicationError::SourceUnavailable {
                    branch: branch.to_string(),
                    version: 0,
                    source: e,
                }
            })?;
            for label in &labels {
                self.sync_label(git, db, branch, label, &mut report)?;
            }
        }
        info!(
            created = report.created,
            already_present = report.already_present,
            conflicts = report.conflicts,
            unresolved = report.unresolved,
            "tag synchronization finished"
        );
        Ok(report)
    }

    fn sync_label(
        &self,
        git: &GitClient,
        db: &Database,
        branch: &str,
        label: &SourceLabel,
        report: &mut TagReport,
    ) -> Result<(), ReplicationError> {
        let commit_failed = |source: GitError| ReplicationError::CommitFailed {
            branch: branch.to_string(),
            version: label.version,
            source,
        };
        let Some(name) = sanitize_tag_name(&label.name) else {
            warn!(label = %label.name, branch, "label name cannot be used as a tag");
            report.unresolved += 1;
            return Ok(());
        };
        let Some(record) = db.commit_for_version(branch, label.version)? else {
            warn!(
                label = %label.name,
                branch,
                version = label.version,
                "label points at a version that was not replicated, skipping"
            );
            report.unresolved += 1;
            return Ok(());
        };
        let target = git2::Oid::from_str(&record.git_sha)
            .map_err(|e| commit_failed(GitError::from(e)))?;

        let status = match git.tag_target(&name).map_err(commit_failed)? {
            Some(existing) if existing == target => {
                report.already_present += 1;
                TagStatus::AlreadyPresent
            }
            Some(existing) => {
                warn!(
                    tag = %name,
                    existing = %existing,
                    wanted = %target,
                    "tag exists on a different commit, leaving it untouched"
                );
                report.conflicts += 1;
                TagStatus::Conflict
            }
            None => {
                let message = match label.comment.as_deref().map(str::trim) {
                    Some(comment) if !comment.is_empty() => comment.to_string(),
                    _ => format!("Vault label {}", label.name),
                };
                git.create_tag(&name, target, &self.tagger, &message)
                    .map_err(commit_failed)?;
                report.created += 1;
                TagStatus::Created
            }
        };
        db.record_tag(
            &name,
            &label.name,
            branch,
            label.version,
            Some(&record.git_sha),
            status,
        )?;
        Ok(())
    }
}

/// Turn a label into a valid tag name, `None` if nothing usable remains.
pub fn sanitize_tag_name(label: &str) -> Option<String> {
    let replaced = INVALID_REF_CHARS.replace_all(label.trim(), "_");
    let collapsed = DOT_RUNS.replace_all(&replaced, ".");
    let mut name = collapsed
        .trim_start_matches(['.', '-', '_'])
        .trim_end_matches(['.', '_'])
        .to_string();
    while let Some(stripped) = name.strip_suffix(".lock") {
        name = stripped.trim_end_matches(['.', '_']).to_string();
    }
    if name.is_empty() || name == "@" {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_keeps_valid_names() {
        assert_eq!(sanitize_tag_name("v1.0").as_deref(), Some("v1.0"));
        assert_eq!(sanitize_tag_name("Release_2010-03").as_deref(), Some("Release_2010-03"));
    }

    #[test]
    fn test_sanitize_replaces_invalid_characters() {
        assert_eq!(sanitize_tag_name("Build 1.2 final").as_deref(), Some("Build_1.2_final"));
        assert_eq!(sanitize_tag_name("a:b?c*d[e]").as_deref(), Some("a_b_c_d_e]"));
        assert_eq!(sanitize_tag_name("rel/2.0").as_deref(), Some("rel_2.0"));
        assert_eq!(sanitize_tag_name("x@{y}").as_deref(), Some("x_y}"));
        assert_eq!(sanitize_tag_name("one..two").as_deref(), Some("one.two"));
    }

    #[test]
    fn test_sanitize_trims_edges() {
        assert_eq!(sanitize_tag_name("  -beta. ").as_deref(), Some("beta"));
        assert_eq!(sanitize_tag_name(".hidden").as_deref(), Some("hidden"));
        assert_eq!(sanitize_tag_name("nightly.lock").as_deref(), Some("nightly"));
    }

    #[test]
    fn test_sanitize_rejects_empty() {
        assert_eq!(sanitize_tag_name("   "), None);
        assert_eq!(sanitize_tag_name("..."), None);
        assert_eq!(sanitize_tag_name("@"), None);
    }
}
