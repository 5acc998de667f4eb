//! Persistent replication state: per-branch checkpoints, the version to
//! commit map, and the run and tag logs, kept in one SQLite file.

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::errors::DatabaseError;

/// Handle on the checkpoint database.
///
/// Runs with `synchronous = FULL`: a committed transaction is on disk when
/// the call returns.
pub struct Database {
    conn: Mutex<Connection>,
}

const PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = FULL;
    PRAGMA busy_timeout = 5000;
";

impl Database {
    /// Open the checkpoint database at `path`, creating it and its parent
    /// directory when missing, and migrate it to the current schema.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening checkpoint database");

        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)?,
            _ => {}
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(PRAGMAS)?;
        Self::from_connection(conn)
    }

    /// Throwaway store for tests and dry runs.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DatabaseError> {
        schema::run_migrations(&conn)?;
        debug!("checkpoint database ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection. A poisoned lock is taken over as is; every
    /// write goes through a transaction, so no half-applied state survives.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("checkpoint database lock was poisoned");
            poisoned.into_inner()
        })
    }

    /// Run `f` in a transaction, committing on `Ok` and rolling back on
    /// `Err`.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}
