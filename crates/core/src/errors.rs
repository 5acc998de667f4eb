//! Error types for the vault2git core library.
//!
//! Each subsystem has its own error type derived with `thiserror`. The
//! replication engine surfaces the operator-facing taxonomy through
//! [`ReplicationError`], and [`CoreError`] unifies everything for callers
//! that want a single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Replication(#[from] ReplicationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

// ---------------------------------------------------------------------------
// Vault errors
// ---------------------------------------------------------------------------

/// Errors from the Vault command-line client.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The Vault client executable could not be launched.
    #[error("vault client not found: {0}")]
    BinaryNotFound(String),

    /// A Vault command exited with a non-zero status.
    #[error("vault command failed (exit {exit_code}): {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    /// The Vault client reported a failure inside its XML result block.
    #[error("vault reported failure: {0}")]
    Rejected(String),

    /// Could not parse the XML produced by the Vault client.
    #[error("failed to parse vault XML output: {0}")]
    XmlParseError(String),

    /// The requested folder does not exist in the repository.
    #[error("vault folder not found: {0}")]
    FolderNotFound(String),

    /// A command did not finish within the configured timeout.
    #[error("vault command timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Generic I/O wrapper.
    #[error("vault I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from target repository (git2 / git CLI) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// The repository is bare and has no working tree to stage from.
    #[error("git repository at '{0}' has no working tree")]
    NoWorkingTree(String),

    /// The `git` executable failed.
    #[error("git command failed (exit {exit_code}): {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Replication engine errors
// ---------------------------------------------------------------------------

/// Fatal conditions of a replication run.
///
/// Tag conflicts are counted in the run report and cancellation is a run
/// outcome, so neither appears here.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// Bad mapping syntax, unknown branch filter, or other startup problems.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// The source could not deliver history or file state.
    #[error("source unavailable for branch '{branch}' at version {version}: {source}")]
    SourceUnavailable {
        branch: String,
        version: i64,
        #[source]
        source: VaultError,
    },

    /// The target repository rejected staging, committing or branch setup.
    #[error("commit failed on branch '{branch}' at version {version}: {source}")]
    CommitFailed {
        branch: String,
        version: i64,
        #[source]
        source: GitError,
    },

    /// A checkpoint could not be read or persisted.
    #[error("checkpoint store error: {0}")]
    Checkpoint(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading, validation and mapping resolution.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// A folder~branch mapping could not be parsed.
    #[error("invalid mapping '{segment}': {detail}")]
    InvalidMapping { segment: String, detail: String },

    /// The same target branch appears twice in the mapping table.
    #[error("branch '{0}' is mapped more than once")]
    DuplicateBranch(String),

    /// A branch filter names a branch that is not in the mapping table.
    #[error("unknown branch '{0}'; use one from the configured mapping")]
    UnknownBranch(String),

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite checkpoint store.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Identity errors
// ---------------------------------------------------------------------------

/// Errors from the author translation subsystem.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The authors file could not be loaded.
    #[error("authors file error at '{path}': {detail}")]
    MappingFileError { path: String, detail: String },

    /// TOML parse error when reading the authors file.
    #[error("authors file parse error: {0}")]
    ParseError(String),

    /// Generic I/O error.
    #[error("identity I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
