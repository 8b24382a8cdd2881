//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Harvest database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Items saved by successful crawls, one row per fingerprint
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint TEXT NOT NULL UNIQUE,
    job_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    source_url TEXT NOT NULL,
    final_url TEXT NOT NULL,
    title TEXT,
    status_code INTEGER NOT NULL,
    content_type TEXT NOT NULL,
    body TEXT NOT NULL,
    link_count INTEGER NOT NULL DEFAULT 0,
    fetched_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_items_kind ON items(kind);
CREATE INDEX IF NOT EXISTS idx_items_job ON items(job_id);

-- Ledger of items that could not be crawled or saved
CREATE TABLE IF NOT EXISTS failed_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    url TEXT NOT NULL,
    reason TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    failed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_failed_items_kind ON failed_items(kind);

-- Final snapshots of finished jobs
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    mode TEXT NOT NULL,
    state TEXT NOT NULL,
    created_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT,
    total INTEGER NOT NULL,
    processed INTEGER NOT NULL,
    succeeded INTEGER NOT NULL,
    skipped INTEGER NOT NULL,
    failed INTEGER NOT NULL,
    error_summary TEXT
);

-- Last scheduler fire time per job kind
CREATE TABLE IF NOT EXISTS scheduler_state (
    kind TEXT PRIMARY KEY,
    last_fired_at TEXT NOT NULL
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
