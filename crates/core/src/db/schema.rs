//! Checkpoint database schema. `PRAGMA user_version` records the last
//! migration applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// `(version, description, sql)`, ascending.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            branch        TEXT    PRIMARY KEY,
            last_version  INTEGER NOT NULL CHECK (last_version >= 0),
            updated_at    TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS commit_map (
            branch         TEXT    NOT NULL,
            version        INTEGER NOT NULL,
            git_sha        TEXT    NOT NULL,
            skipped        INTEGER NOT NULL DEFAULT 0,
            replicated_at  TEXT    NOT NULL,
            PRIMARY KEY (branch, version)
        );

        CREATE INDEX IF NOT EXISTS idx_commit_map_git_sha ON commit_map (git_sha);

        CREATE TABLE IF NOT EXISTS runs (
            id            TEXT PRIMARY KEY,
            started_at    TEXT NOT NULL,
            completed_at  TEXT,
            outcome       TEXT,
            details       TEXT
        );
        "#,
    ),
    (
        2,
        "tag log",
        r#"
        CREATE TABLE IF NOT EXISTS tag_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            tag         TEXT    NOT NULL,
            label       TEXT    NOT NULL,
            branch      TEXT    NOT NULL,
            version     INTEGER NOT NULL,
            git_sha     TEXT,
            status      TEXT    NOT NULL,
            created_at  TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_tag_log_tag ON tag_log (tag);
        "#,
    ),
];

/// Apply every migration newer than the database's `user_version`.
///
/// Each step runs in its own transaction together with the version bump.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let applied = schema_version(conn)?;
    let pending: Vec<_> = MIGRATIONS.iter().filter(|m| m.0 > applied).collect();
    if pending.is_empty() {
        debug!(version = applied, "schema up to date");
        return Ok(());
    }

    for &&(version, description, sql) in &pending {
        info!(version, description, "migrating checkpoint database");
        let batch = format!("BEGIN;\n{sql}\nPRAGMA user_version = {version};\nCOMMIT;");
        if let Err(e) = conn.execute_batch(&batch) {
            let _ = conn.execute_batch("ROLLBACK;");
            return Err(DatabaseError::MigrationFailed {
                version,
                detail: e.to_string(),
            });
        }
    }
    Ok(())
}

fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}
