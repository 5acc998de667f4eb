//! vault2git core library.
//!
//! This crate provides the components for replicating the history of a
//! SourceGear Vault repository into Git: configuration, branch mapping, the
//! checkpoint database, the Vault and Git clients, author translation, and
//! the replication engine with its progress and tag stages.

pub mod commit_format;
pub mod composer;
pub mod config;
pub mod db;
pub mod errors;
pub mod git;
pub mod identity;
pub mod mapping;
pub mod materialize;
pub mod progress;
pub mod replicator;
pub mod source;
pub mod tags;
pub mod vault;
pub mod walker;

// Re-exports for convenience.
pub use config::AppConfig;
pub use db::Database;
pub use progress::{NullProgress, ProgressEvent, ProgressSink, Signal, StopFlag};
pub use replicator::{Replicator, RunOptions, RunOutcome, RunReport};
pub use source::SourceRepository;
pub use vault::VaultClient;
