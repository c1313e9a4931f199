use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS reports (
    id INTEGER PRIMARY KEY,
    broker TEXT NOT NULL,
    account TEXT,
    period TEXT,
    file_name TEXT NOT NULL,
    content_hash TEXT NOT NULL UNIQUE,
    raw_content TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    parsed_data TEXT,
    parser_version TEXT,
    processing_status TEXT NOT NULL DEFAULT 'raw'
        CHECK (processing_status IN ('raw', 'parsed', 'error')),
    error_log TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_reports_triple
    ON reports (broker, IFNULL(account, ''), period)
    WHERE broker != 'unknown' AND period IS NOT NULL;

CREATE INDEX IF NOT EXISTS idx_reports_status ON reports (processing_status);

CREATE TABLE IF NOT EXISTS import_events (
    id INTEGER PRIMARY KEY,
    run_key TEXT NOT NULL,
    kind TEXT NOT NULL,
    broker TEXT,
    account TEXT,
    period TEXT,
    file_name TEXT NOT NULL,
    content_hash TEXT,
    reason TEXT NOT NULL,
    filename_period TEXT,
    parsed_period TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_import_events_run ON import_events (run_key);

CREATE TABLE IF NOT EXISTS import_runs (
    id INTEGER PRIMARY KEY,
    run_key TEXT NOT NULL UNIQUE,
    source TEXT NOT NULL,
    broker_filter TEXT,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    discovered INTEGER NOT NULL,
    imported INTEGER NOT NULL,
    parse_failed INTEGER NOT NULL,
    exact_duplicates INTEGER NOT NULL,
    semantic_duplicates INTEGER NOT NULL,
    no_parser INTEGER NOT NULL,
    unreadable INTEGER NOT NULL,
    insert_failed INTEGER NOT NULL,
    archive_failed INTEGER NOT NULL,
    period_mismatches INTEGER NOT NULL,
    error_summary TEXT
);
";

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
