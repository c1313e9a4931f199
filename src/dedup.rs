use rusqlite::{Connection, OptionalExtension};

use crate::error::Result;
use crate::models::{Report, UNKNOWN_BROKER};
use crate::store::{map_report, REPORT_COLUMNS};

/// Semantic identity of a report: broker, account and canonical period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateKey {
    pub broker: String,
    pub account: Option<String>,
    pub period: Option<String>,
}

impl DuplicateKey {
    /// Keys for unknown brokers or without a period never collide.
    pub fn is_enforced(&self) -> bool {
        self.broker != UNKNOWN_BROKER && self.period.is_some()
    }
}

#[derive(Debug, Clone)]
pub enum Duplicate {
    Exact(Report),
    Semantic(Report),
}

pub fn find_by_hash(conn: &Connection, content_hash: &str) -> Result<Option<Report>> {
    let sql = format!("SELECT {REPORT_COLUMNS} FROM reports WHERE content_hash = ?1");
    Ok(conn.query_row(&sql, [content_hash], map_report).optional()?)
}

pub fn find_by_triple(conn: &Connection, key: &DuplicateKey) -> Result<Option<Report>> {
    if !key.is_enforced() {
        return Ok(None);
    }
    // `IS` so that a missing account matches a missing account.
    let sql = format!(
        "SELECT {REPORT_COLUMNS} FROM reports \
         WHERE broker = ?1 AND account IS ?2 AND period = ?3 ORDER BY id LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, rusqlite::params![key.broker, key.account, key.period], map_report)
        .optional()?)
}

/// Same as `find_by_triple`, ignoring the report with `id`.
pub fn find_by_triple_excluding(conn: &Connection, key: &DuplicateKey, id: i64) -> Result<Option<Report>> {
    if !key.is_enforced() {
        return Ok(None);
    }
    let sql = format!(
        "SELECT {REPORT_COLUMNS} FROM reports \
         WHERE broker = ?1 AND account IS ?2 AND period = ?3 AND id != ?4 ORDER BY id LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, rusqlite::params![key.broker, key.account, key.period, id], map_report)
        .optional()?)
}

/// Works out which existing report an insert collided with after the store
/// rejected it. Hash collisions take precedence.
pub fn resolve_conflict(conn: &Connection, content_hash: &str, key: &DuplicateKey) -> Result<Option<Duplicate>> {
    if let Some(existing) = find_by_hash(conn, content_hash)? {
        return Ok(Some(Duplicate::Exact(existing)));
    }
    Ok(find_by_triple(conn, key)?.map(Duplicate::Semantic))
}
