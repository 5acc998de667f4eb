//! Turns a materialized working tree into a commit on the target branch.

use tracing::{debug, info};

use crate::commit_format::CommitFormatter;
use crate::errors::GitError;
use crate::git::{CommitOutcome, GitClient};
use crate::identity::AuthorMapper;
use crate::source::SourceVersion;

/// Stages the tree and commits it with translated source metadata.
#[derive(Debug, Clone)]
pub struct CommitComposer {
    authors: AuthorMapper,
    formatter: CommitFormatter,
}

impl CommitComposer {
    pub fn new(authors: AuthorMapper, formatter: CommitFormatter) -> Self {
        Self { authors, formatter }
    }

    /// Commit the current working tree as `version` of `folder` on `branch`.
    ///
    /// Author and committer are both the translated source author, dated at
    /// the source timestamp. With `skip_empty`, an unchanged tree yields
    /// [`CommitOutcome::SkippedEmpty`].
    pub fn compose(
        &self,
        git: &GitClient,
        branch: &str,
        folder: &str,
        version: &SourceVersion,
        skip_empty: bool,
    ) -> Result<CommitOutcome, GitError> {
        let identity = self.authors.identity(&version.author);
        let message = self.formatter.format(version, folder);
        debug!(branch, version = version.number, email = %identity.email, "composing commit");

        let outcome = git.stage_and_commit(
            branch,
            &message,
            &identity,
            &identity,
            version.timestamp,
            skip_empty,
        )?;
        match outcome {
            CommitOutcome::Committed(oid) => {
                info!(branch, version = version.number, sha = %oid, "version committed");
            }
            CommitOutcome::SkippedEmpty(_) => {
                info!(branch, version = version.number, "empty version skipped");
            }
        }
        Ok(outcome)
    }
}
