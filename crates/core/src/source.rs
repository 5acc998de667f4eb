//! Source repository abstraction.
//!
//! The replicator only talks to the legacy system through
//! [`SourceRepository`]. [`crate::vault::VaultClient`] is the production
//! implementation; tests substitute an in-memory history.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::errors::VaultError;

/// What happened to one path in a source version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
    Moved,
    Shared,
    Other(String),
}

impl ChangeKind {
    /// Map a Vault history type name onto a change kind.
    pub fn from_vault_type(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "add" | "added" | "addfolder" | "addfile" | "created" => Self::Added,
            "checkin" | "modified" | "edit" => Self::Modified,
            "delete" | "deleted" | "remove" => Self::Deleted,
            "rename" | "renamed" => Self::Renamed,
            "move" | "moved" => Self::Moved,
            "share" | "shared" | "branch" | "branched" => Self::Shared,
            _ => Self::Other(name.to_string()),
        }
    }
}

/// One path touched by a source version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOperation {
    pub path: String,
    pub kind: ChangeKind,
}

/// One entry of a folder's linear version history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceVersion {
    pub number: i64,
    pub author: String,
    pub timestamp: DateTime<FixedOffset>,
    pub comment: String,
    /// Source transaction id, when the server reports one.
    pub txid: Option<i64>,
    pub file_operations: Vec<FileOperation>,
}

/// A named snapshot of a source folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLabel {
    pub name: String,
    pub version: i64,
    pub comment: Option<String>,
}

/// Read access to the legacy repository.
#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// Versions of `folder` numbered strictly above `after`, ascending. The
    /// implementation may return fewer than `max` entries but never more.
    async fn history(
        &self,
        folder: &str,
        after: i64,
        max: u64,
    ) -> Result<Vec<SourceVersion>, VaultError>;

    /// Write the complete tree of `folder` as of `version` into `dest`.
    ///
    /// `dest` is empty when this is called; the implementation must not
    /// leave files of other versions behind.
    async fn export(&self, folder: &str, version: i64, dest: &Path) -> Result<(), VaultError>;

    /// All labels applied to `folder`.
    async fn labels(&self, folder: &str) -> Result<Vec<SourceLabel>, VaultError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_kind_from_vault_type() {
        assert_eq!(ChangeKind::from_vault_type("CheckIn"), ChangeKind::Modified);
        assert_eq!(ChangeKind::from_vault_type("Add"), ChangeKind::Added);
        assert_eq!(ChangeKind::from_vault_type("Delete"), ChangeKind::Deleted);
        assert_eq!(ChangeKind::from_vault_type("Rename"), ChangeKind::Renamed);
        assert_eq!(
            ChangeKind::from_vault_type("PropertyChange"),
            ChangeKind::Other("PropertyChange".into())
        );
    }
}
