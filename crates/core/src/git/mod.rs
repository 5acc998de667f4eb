//! Target Git repository operations.

pub mod client;

pub use client::{CommitOutcome, GitClient, GitCommitInfo};
