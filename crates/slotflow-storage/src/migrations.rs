//! Database schema migrations.
//!
//! Version 1 creates the `records` table holding every finished record as a
//! JSON payload, keyed for insert-once semantics by its commit key.

use rusqlite::Connection;
use tracing::info;

use slotflow_core::error::SlotflowError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), SlotflowError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| SlotflowError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| SlotflowError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: records");
    }

    Ok(())
}

/// Version 1: records table.
fn apply_v1(conn: &Connection) -> Result<(), SlotflowError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS records (
            id              TEXT PRIMARY KEY NOT NULL,
            commit_key      TEXT NOT NULL UNIQUE,
            user_id         TEXT NOT NULL CHECK (length(user_id) > 0),
            domain          TEXT NOT NULL CHECK (length(domain) > 0),
            payload         TEXT NOT NULL CHECK (json_valid(payload)),
            summary         TEXT NOT NULL DEFAULT '',
            created_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_records_user_created
            ON records (user_id, created_at DESC);

        CREATE INDEX IF NOT EXISTS idx_records_domain_created
            ON records (domain, created_at DESC);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'records');
        ",
    )
    .map_err(|e| SlotflowError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
