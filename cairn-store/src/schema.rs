use rusqlite::Connection;

use crate::error::Result;

/// Creates the cache's three tables if this is a fresh file. `deps` is a
/// hint table only — nothing in this crate ever reads it to make a
/// correctness or scheduling decision; it exists for out-of-process
/// incremental-demand tooling that isn't part of this core.
pub(crate) fn migrate(conn: &Connection) -> Result<()> {
    // WAL is a no-op (silently ignored, not an error) on an in-memory
    // connection, which test fixtures use; a real cache file gets the
    // concurrent-reader benefit it's meant for.
    let _ = conn.execute_batch("PRAGMA journal_mode = WAL;");

    conn.execute_batch(
        "
        PRAGMA foreign_keys = OFF;

        CREATE TABLE IF NOT EXISTS results (
            fingerprint BLOB PRIMARY KEY,
            rule_id     TEXT NOT NULL,
            input_hash  BLOB NOT NULL,
            value       BLOB NOT NULL,
            created_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS claims (
            fingerprint BLOB PRIMARY KEY,
            worker_id   TEXT NOT NULL,
            heartbeat   INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS deps (
            parent BLOB NOT NULL,
            child  BLOB NOT NULL,
            PRIMARY KEY (parent, child)
        );
        ",
    )?;
    Ok(())
}
