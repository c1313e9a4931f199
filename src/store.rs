use rusqlite::{Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::models::{NewReport, ParsedData, ProcessingStatus, Report};

pub(crate) const REPORT_COLUMNS: &str = "id, broker, account, period, file_name, content_hash, file_size, \
     parser_version, processing_status, error_log, created_at, updated_at";

pub(crate) fn map_report(row: &Row<'_>) -> rusqlite::Result<Report> {
    let status: String = row.get(8)?;
    let processing_status = ProcessingStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            rusqlite::types::Type::Text,
            format!("unknown processing_status: {status}").into(),
        )
    })?;
    Ok(Report {
        id: row.get(0)?,
        broker: row.get(1)?,
        account: row.get(2)?,
        period: row.get(3)?,
        file_name: row.get(4)?,
        content_hash: row.get(5)?,
        file_size: row.get(6)?,
        parser_version: row.get(7)?,
        processing_status,
        error_log: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

pub fn insert_report(conn: &Connection, report: &NewReport) -> Result<i64> {
    let parsed_json = match &report.parsed_data {
        Some(data) => Some(serde_json::to_string(data)?),
        None => None,
    };
    conn.execute(
        "INSERT INTO reports (broker, account, period, file_name, content_hash, raw_content, file_size, \
         parsed_data, parser_version, processing_status, error_log) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        rusqlite::params![
            report.broker,
            report.account,
            report.period,
            report.file_name,
            report.content_hash,
            report.raw_content,
            report.file_size,
            parsed_json,
            report.parser_version,
            report.processing_status.as_str(),
            report.error_log,
        ],
    )?;
    let id = conn.last_insert_rowid();
    tracing::info!(report_id = id, broker = %report.broker, file = %report.file_name, "Inserted report");
    Ok(id)
}

pub fn get_report(conn: &Connection, id: i64) -> Result<Option<Report>> {
    let sql = format!("SELECT {REPORT_COLUMNS} FROM reports WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], map_report).optional()?)
}

pub fn get_parsed_data(conn: &Connection, id: i64) -> Result<Option<ParsedData>> {
    let raw: Option<Option<String>> = conn
        .query_row("SELECT parsed_data FROM reports WHERE id = ?1", [id], |r| r.get(0))
        .optional()?;
    match raw.flatten() {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub broker: Option<String>,
    pub period: Option<String>,
    pub status: Option<ProcessingStatus>,
    /// Substring match on account.
    pub account: Option<String>,
    pub limit: usize,
}

pub fn list_reports(conn: &Connection, filter: &ReportFilter) -> Result<Vec<Report>> {
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(broker) = &filter.broker {
        params.push(Box::new(broker.clone()));
        conditions.push(format!("broker = ?{}", params.len()));
    }
    if let Some(period) = &filter.period {
        params.push(Box::new(period.clone()));
        conditions.push(format!("period = ?{}", params.len()));
    }
    if let Some(status) = filter.status {
        params.push(Box::new(status.as_str()));
        conditions.push(format!("processing_status = ?{}", params.len()));
    }
    if let Some(account) = &filter.account {
        params.push(Box::new(format!("%{account}%")));
        conditions.push(format!("account LIKE ?{}", params.len()));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    let limit = if filter.limit == 0 { 100 } else { filter.limit };
    let sql = format!(
        "SELECT {REPORT_COLUMNS} FROM reports {where_clause} ORDER BY created_at DESC, id DESC LIMIT {limit}"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), map_report)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Reports still awaiting a successful parse, with their content.
pub fn raw_reports(conn: &Connection, broker: Option<&str>) -> Result<Vec<(Report, String)>> {
    let sql = format!(
        "SELECT {REPORT_COLUMNS}, raw_content FROM reports \
         WHERE processing_status = 'raw' AND (?1 IS NULL OR broker = ?1) ORDER BY id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([broker], |row| Ok((map_report(row)?, row.get(12)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub struct ParsedUpdate<'a> {
    pub account: Option<&'a str>,
    pub period: Option<&'a str>,
    pub data: &'a ParsedData,
    pub parser_version: &'a str,
}

/// raw -> parsed. Returns false when the report was no longer raw.
pub fn mark_parsed(conn: &Connection, id: i64, update: &ParsedUpdate<'_>) -> Result<bool> {
    let json = serde_json::to_string(update.data)?;
    let affected = conn.execute(
        "UPDATE reports SET account = ?1, period = ?2, parsed_data = ?3, parser_version = ?4, \
         processing_status = 'parsed', error_log = NULL, updated_at = datetime('now') \
         WHERE id = ?5 AND processing_status = 'raw'",
        rusqlite::params![update.account, update.period, json, update.parser_version, id],
    )?;
    Ok(affected > 0)
}

/// raw -> error. Returns false when the report was no longer raw.
pub fn mark_error(conn: &Connection, id: i64, reason: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE reports SET processing_status = 'error', error_log = ?1, updated_at = datetime('now') \
         WHERE id = ?2 AND processing_status = 'raw'",
        rusqlite::params![reason, id],
    )?;
    Ok(affected > 0)
}

pub fn count_reports(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT count(*) FROM reports", [], |r| r.get(0))?)
}

pub struct Statistics {
    pub total: i64,
    pub by_broker: Vec<(String, i64)>,
    pub by_status: Vec<(String, i64)>,
    pub recent_24h: i64,
}

fn grouped_counts(conn: &Connection, column: &str) -> Result<Vec<(String, i64)>> {
    let sql = format!(
        "SELECT {column}, count(*) AS n FROM reports GROUP BY {column} ORDER BY n DESC, {column}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn statistics(conn: &Connection) -> Result<Statistics> {
    Ok(Statistics {
        total: count_reports(conn)?,
        by_broker: grouped_counts(conn, "broker")?,
        by_status: grouped_counts(conn, "processing_status")?,
        recent_24h: conn.query_row(
            "SELECT count(*) FROM reports WHERE created_at >= datetime('now', '-1 day')",
            [],
            |r| r.get(0),
        )?,
    })
}
