//! Bounded, ascending walk over a folder's version history.

use tracing::debug;

use crate::errors::VaultError;
use crate::source::{SourceRepository, SourceVersion};

/// Versions of one folder in `(checkpoint, checkpoint + limit]`.
///
/// The walker owns the fetched metadata and a cursor into it. It is not
/// rewindable; a later run builds a new walker from the new checkpoint.
#[derive(Debug, Clone)]
pub struct HistoryWalker {
    versions: Vec<SourceVersion>,
    cursor: usize,
    checkpoint: i64,
    upper: i64,
}

impl HistoryWalker {
    /// Fetch the walk for `folder` from `source`.
    ///
    /// `limit` of `None` walks everything newer than `checkpoint`.
    pub async fn fetch(
        source: &dyn SourceRepository,
        folder: &str,
        checkpoint: i64,
        limit: Option<u64>,
    ) -> Result<Self, VaultError> {
        let max = limit.unwrap_or(u64::MAX);
        if max == 0 {
            return Ok(Self::from_versions(Vec::new(), checkpoint, limit));
        }
        let versions = source.history(folder, checkpoint, max).await?;
        Ok(Self::from_versions(versions, checkpoint, limit))
    }

    /// Build a walk from already fetched history. Entries outside the window
    /// are dropped, the rest sorted ascending with duplicates removed.
    pub fn from_versions(
        mut versions: Vec<SourceVersion>,
        checkpoint: i64,
        limit: Option<u64>,
    ) -> Self {
        let upper = upper_bound(checkpoint, limit);
        versions.retain(|v| v.number > checkpoint && v.number <= upper);
        versions.sort_by_key(|v| v.number);
        versions.dedup_by_key(|v| v.number);
        debug!(checkpoint, upper, count = versions.len(), "history window");
        Self {
            versions,
            cursor: 0,
            checkpoint,
            upper,
        }
    }

    /// Next version, advancing the cursor.
    pub fn next_version(&mut self) -> Option<&SourceVersion> {
        let version = self.versions.get(self.cursor)?;
        self.cursor += 1;
        Some(version)
    }

    pub fn checkpoint(&self) -> i64 {
        self.checkpoint
    }

    /// Highest version number the walk may yield.
    pub fn upper(&self) -> i64 {
        self.upper
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Versions not yet yielded.
    pub fn remaining(&self) -> usize {
        self.versions.len() - self.cursor
    }
}

fn upper_bound(checkpoint: i64, limit: Option<u64>) -> i64 {
    match limit {
        Some(l) => checkpoint.saturating_add(i64::try_from(l).unwrap_or(i64::MAX)),
        None => i64::MAX,
    }
}
