//! Typed query helpers for the checkpoint database.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::debug;

use super::Database;
use crate::errors::DatabaseError;

// ---------------------------------------------------------------------------
// Domain structs returned by queries
// ---------------------------------------------------------------------------

/// A row from the `checkpoints` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointEntry {
    pub branch: String,
    pub last_version: i64,
    pub updated_at: String,
}

/// A row from the `commit_map` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub branch: String,
    pub version: i64,
    pub git_sha: String,
    pub skipped: bool,
    pub replicated_at: String,
}

/// Outcome recorded for a label in the `tag_log` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagStatus {
    Created,
    AlreadyPresent,
    Conflict,
}

impl TagStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AlreadyPresent => "already_present",
            Self::Conflict => "conflict",
        }
    }
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- checkpoints --------------------------------------------------------

    /// Last version replicated onto `branch`, or 0 when the branch has never
    /// been replicated.
    pub fn checkpoint(&self, branch: &str) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let version = conn
            .query_row(
                "SELECT last_version FROM checkpoints WHERE branch = ?1",
                params![branch],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version.unwrap_or(0))
    }

    /// Record that `version` has been replicated onto `branch`.
    ///
    /// The checkpoint and the commit map are written in one transaction. The
    /// checkpoint only moves forward: recording a version at or below the
    /// current checkpoint changes nothing. `git_sha` is `None` when a skipped
    /// version lands on a branch that has no commit yet. Returns `true` when
    /// the checkpoint advanced.
    pub fn record_version(
        &self,
        branch: &str,
        version: i64,
        git_sha: Option<&str>,
        skipped: bool,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let advanced = self.transaction(|conn| {
            let changed = conn.execute(
                "INSERT INTO checkpoints (branch, last_version, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(branch) DO UPDATE
                   SET last_version = excluded.last_version,
                       updated_at = excluded.updated_at
                   WHERE excluded.last_version > checkpoints.last_version",
                params![branch, version, now],
            )?;
            if changed > 0 {
                if let Some(sha) = git_sha {
                    conn.execute(
                        "INSERT OR IGNORE INTO commit_map
                            (branch, version, git_sha, skipped, replicated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![branch, version, sha, skipped, now],
                    )?;
                }
            }
            Ok(changed > 0)
        })?;
        debug!(branch, version, skipped, advanced, "recorded version");
        Ok(advanced)
    }

    /// All checkpoints, ordered by branch name.
    pub fn list_checkpoints(&self) -> Result<Vec<CheckpointEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT branch, last_version, updated_at FROM checkpoints ORDER BY branch",
        )?;
        let entries = stmt
            .query_map([], |row| {
                Ok(CheckpointEntry {
                    branch: row.get(0)?,
                    last_version: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // -- commit_map ---------------------------------------------------------

    /// The commit that replicated `version` on `branch`, if any.
    pub fn commit_for_version(
        &self,
        branch: &str,
        version: i64,
    ) -> Result<Option<CommitRecord>, DatabaseError> {
        let conn = self.conn();
        let record = conn
            .query_row(
                "SELECT branch, version, git_sha, skipped, replicated_at
                 FROM commit_map WHERE branch = ?1 AND version = ?2",
                params![branch, version],
                |row| {
                    Ok(CommitRecord {
                        branch: row.get(0)?,
                        version: row.get(1)?,
                        git_sha: row.get(2)?,
                        skipped: row.get(3)?,
                        replicated_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Number of versions recorded for `branch` (committed and skipped).
    pub fn count_commit_map(&self, branch: &str) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM commit_map WHERE branch = ?1",
            params![branch],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // -- runs ---------------------------------------------------------------

    /// Record the start of a run.
    pub fn start_run(&self, id: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn().execute(
            "INSERT INTO runs (id, started_at) VALUES (?1, ?2)",
            params![id, now],
        )?;
        debug!(id, "started run");
        Ok(())
    }

    /// Mark a run as finished with `outcome` and optional JSON `details`.
    pub fn finish_run(
        &self,
        id: &str,
        outcome: &str,
        details: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn().execute(
            "UPDATE runs SET completed_at = ?1, outcome = ?2, details = ?3 WHERE id = ?4",
            params![now, outcome, details, id],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "run".into(),
                id: id.into(),
            });
        }
        Ok(())
    }

    /// Outcome of the most recent finished run, if any.
    pub fn last_run_outcome(&self) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn();
        let outcome = conn
            .query_row(
                "SELECT outcome FROM runs WHERE completed_at IS NOT NULL
                 ORDER BY completed_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(outcome)
    }

    // -- tag_log ------------------------------------------------------------

    /// Record what happened to one label during tag creation.
    pub fn record_tag(
        &self,
        tag: &str,
        label: &str,
        branch: &str,
        version: i64,
        git_sha: Option<&str>,
        status: TagStatus,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn().execute(
            "INSERT INTO tag_log (tag, label, branch, version, git_sha, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![tag, label, branch, version, git_sha, status.as_str(), now],
        )?;
        Ok(())
    }

    /// Number of tag log rows with the given status.
    pub fn count_tags_by_status(&self, status: TagStatus) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM tag_log WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::in_memory().unwrap()
    }

    #[test]
    fn test_checkpoint_defaults_to_zero() {
        assert_eq!(db().checkpoint("master").unwrap(), 0);
    }

    #[test]
    fn test_record_version_advances_checkpoint() {
        let db = db();
        assert!(db.record_version("master", 3, Some("aaa"), false).unwrap());
        assert!(db.record_version("master", 5, Some("bbb"), false).unwrap());
        assert_eq!(db.checkpoint("master").unwrap(), 5);
        assert_eq!(db.checkpoint("dev").unwrap(), 0);

        let record = db.commit_for_version("master", 3).unwrap().unwrap();
        assert_eq!(record.git_sha, "aaa");
        assert!(!record.skipped);
    }

    #[test]
    fn test_record_version_is_idempotent_and_monotonic() {
        let db = db();
        db.record_version("master", 5, Some("bbb"), false).unwrap();
        assert!(!db.record_version("master", 5, Some("ccc"), false).unwrap());
        assert!(!db.record_version("master", 2, Some("ddd"), false).unwrap());

        assert_eq!(db.checkpoint("master").unwrap(), 5);
        assert_eq!(db.commit_for_version("master", 5).unwrap().unwrap().git_sha, "bbb");
        assert!(db.commit_for_version("master", 2).unwrap().is_none());
        assert_eq!(db.count_commit_map("master").unwrap(), 1);
    }

    #[test]
    fn test_skipped_version_without_commit() {
        let db = db();
        assert!(db.record_version("dev", 1, None, true).unwrap());
        assert_eq!(db.checkpoint("dev").unwrap(), 1);
        assert!(db.commit_for_version("dev", 1).unwrap().is_none());

        db.record_version("dev", 2, Some("abc"), true).unwrap();
        assert!(db.commit_for_version("dev", 2).unwrap().unwrap().skipped);
    }

    #[test]
    fn test_list_checkpoints() {
        let db = db();
        db.record_version("master", 2, Some("a"), false).unwrap();
        db.record_version("dev", 7, Some("b"), false).unwrap();
        let entries = db.list_checkpoints().unwrap();
        let pairs: Vec<_> = entries
            .iter()
            .map(|e| (e.branch.as_str(), e.last_version))
            .collect();
        assert_eq!(pairs, vec![("dev", 7), ("master", 2)]);
    }

    #[test]
    fn test_runs() {
        let db = db();
        assert!(db.last_run_outcome().unwrap().is_none());
        db.start_run("run-1").unwrap();
        db.finish_run("run-1", "completed", Some("{}")).unwrap();
        assert_eq!(db.last_run_outcome().unwrap().as_deref(), Some("completed"));
        assert!(matches!(
            db.finish_run("missing", "failed", None),
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[test]
    fn test_tag_log() {
        let db = db();
        db.record_tag("v1.0", "v1.0", "master", 3, Some("abc"), TagStatus::Created)
            .unwrap();
        db.record_tag("v1.0", "v 1.0", "dev", 9, None, TagStatus::Conflict)
            .unwrap();
        assert_eq!(db.count_tags_by_status(TagStatus::Created).unwrap(), 1);
        assert_eq!(db.count_tags_by_status(TagStatus::Conflict).unwrap(), 1);
        assert_eq!(db.count_tags_by_status(TagStatus::AlreadyPresent).unwrap(), 0);
    }
}
