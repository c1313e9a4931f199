use std::fmt;

use rusqlite::Connection;

use crate::error::Result;
use crate::fingerprint;
use crate::models::{is_canonical_period, UNKNOWN_BROKER};
use crate::store::get_parsed_data;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    /// Stored content no longer hashes to the stored fingerprint.
    HashMismatch {
        report_id: i64,
        file_name: String,
        stored: String,
        actual: String,
    },
    DuplicateTriple {
        broker: String,
        account: Option<String>,
        period: String,
        report_ids: Vec<i64>,
    },
    InvalidPeriod {
        report_id: i64,
        period: String,
    },
    /// Marked parsed but without readable parsed data.
    MissingParsedData {
        report_id: i64,
        detail: String,
    },
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HashMismatch { report_id, file_name, stored, actual } => write!(
                f,
                "report #{report_id} ({file_name}): stored hash {stored} but content hashes to {actual}"
            ),
            Self::DuplicateTriple { broker, account, period, report_ids } => {
                let ids: Vec<String> = report_ids.iter().map(|id| format!("#{id}")).collect();
                write!(
                    f,
                    "{broker}/{}/{period} shared by reports {}",
                    account.as_deref().unwrap_or("-"),
                    ids.join(", ")
                )
            }
            Self::InvalidPeriod { report_id, period } => {
                write!(f, "report #{report_id}: period '{period}' is not YYYY-MM")
            }
            Self::MissingParsedData { report_id, detail } => {
                write!(f, "report #{report_id}: marked parsed but {detail}")
            }
        }
    }
}

fn hash_mismatches(conn: &Connection) -> Result<Vec<IntegrityIssue>> {
    let mut stmt = conn.prepare("SELECT id, file_name, content_hash, raw_content FROM reports ORDER BY id")?;
    let mut rows = stmt.query([])?;
    let mut issues = Vec::new();
    while let Some(row) = rows.next()? {
        let stored: String = row.get(2)?;
        let content: String = row.get(3)?;
        if !fingerprint::matches(&content, &stored) {
            issues.push(IntegrityIssue::HashMismatch {
                report_id: row.get(0)?,
                file_name: row.get(1)?,
                stored,
                actual: fingerprint::fingerprint(&content),
            });
        }
    }
    Ok(issues)
}

fn duplicate_triples(conn: &Connection) -> Result<Vec<IntegrityIssue>> {
    let mut stmt = conn.prepare(
        "SELECT broker, account, period, group_concat(id) FROM reports \
         WHERE broker != ?1 AND period IS NOT NULL \
         GROUP BY broker, IFNULL(account, ''), period HAVING count(*) > 1 \
         ORDER BY broker, period",
    )?;
    let rows = stmt
        .query_map([UNKNOWN_BROKER], |row| {
            let ids: String = row.get(3)?;
            Ok(IntegrityIssue::DuplicateTriple {
                broker: row.get(0)?,
                account: row.get(1)?,
                period: row.get(2)?,
                report_ids: ids.split(',').filter_map(|id| id.parse().ok()).collect(),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn invalid_periods(conn: &Connection) -> Result<Vec<IntegrityIssue>> {
    let mut stmt = conn.prepare("SELECT id, period FROM reports WHERE period IS NOT NULL ORDER BY id")?;
    let rows: Vec<(i64, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .filter(|(_, period)| !is_canonical_period(period))
        .map(|(report_id, period)| IntegrityIssue::InvalidPeriod { report_id, period })
        .collect())
}

fn parsed_without_data(conn: &Connection) -> Result<Vec<IntegrityIssue>> {
    let mut stmt = conn.prepare("SELECT id FROM reports WHERE processing_status = 'parsed' ORDER BY id")?;
    let ids: Vec<i64> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let mut issues = Vec::new();
    for report_id in ids {
        let detail = match get_parsed_data(conn, report_id) {
            Ok(Some(_)) => continue,
            Ok(None) => "has no parsed data".to_string(),
            Err(e) => format!("parsed data is unreadable: {e}"),
        };
        issues.push(IntegrityIssue::MissingParsedData { report_id, detail });
    }
    Ok(issues)
}

/// Re-fingerprints stored content and re-checks report identity.
pub fn verify_reports(conn: &Connection) -> Result<Vec<IntegrityIssue>> {
    let mut issues = hash_mismatches(conn)?;
    issues.extend(duplicate_triples(conn)?);
    issues.extend(invalid_periods(conn)?);
    issues.extend(parsed_without_data(conn)?);
    if !issues.is_empty() {
        tracing::warn!(count = issues.len(), "Integrity issues found");
    }
    Ok(issues)
}
