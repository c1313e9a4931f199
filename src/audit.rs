use rusqlite::{Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::models::{ImportEvent, OutcomeKind};

pub fn record_event(conn: &Connection, run_key: &str, event: &ImportEvent) -> Result<i64> {
    conn.execute(
        "INSERT INTO import_events (run_key, kind, broker, account, period, file_name, content_hash, \
         reason, filename_period, parsed_period) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            run_key,
            event.kind.as_str(),
            event.broker,
            event.account,
            event.period,
            event.file_name,
            event.content_hash,
            event.reason,
            event.filename_period,
            event.parsed_period,
        ],
    )?;
    tracing::debug!(kind = event.kind.as_str(), file = %event.file_name, "Recorded import event");
    Ok(conn.last_insert_rowid())
}

#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub id: i64,
    pub run_key: String,
    pub event: ImportEvent,
    pub created_at: String,
}

fn map_event(row: &Row<'_>) -> rusqlite::Result<StoredEvent> {
    let kind: String = row.get(2)?;
    let kind = OutcomeKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown event kind: {kind}").into(),
        )
    })?;
    Ok(StoredEvent {
        id: row.get(0)?,
        run_key: row.get(1)?,
        event: ImportEvent {
            kind,
            broker: row.get(3)?,
            account: row.get(4)?,
            period: row.get(5)?,
            file_name: row.get(6)?,
            content_hash: row.get(7)?,
            reason: row.get(8)?,
            filename_period: row.get(9)?,
            parsed_period: row.get(10)?,
        },
        created_at: row.get(11)?,
    })
}

const EVENT_COLUMNS: &str = "id, run_key, kind, broker, account, period, file_name, content_hash, \
     reason, filename_period, parsed_period, created_at";

/// Newest first.
pub fn list_events(conn: &Connection, kind: Option<OutcomeKind>, limit: usize) -> Result<Vec<StoredEvent>> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM import_events WHERE (?1 IS NULL OR kind = ?1) \
         ORDER BY id DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![kind.map(|k| k.as_str()), limit as i64], map_event)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// In recording order.
pub fn events_for_run(conn: &Connection, run_key: &str) -> Result<Vec<StoredEvent>> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM import_events WHERE run_key = ?1 ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([run_key], map_event)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_terminal_events(conn: &Connection, run_key: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT count(*) FROM import_events WHERE run_key = ?1 AND kind != ?2",
        rusqlite::params![run_key, OutcomeKind::PeriodMismatch.as_str()],
        |r| r.get(0),
    )?)
}

/// Append-only summary of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunRecord {
    pub run_key: String,
    pub source: String,
    pub broker_filter: Option<String>,
    pub started_at: String,
    pub finished_at: String,
    pub discovered: i64,
    pub imported: i64,
    pub parse_failed: i64,
    pub exact_duplicates: i64,
    pub semantic_duplicates: i64,
    pub no_parser: i64,
    pub unreadable: i64,
    pub insert_failed: i64,
    pub archive_failed: i64,
    pub period_mismatches: i64,
    pub errors: Vec<String>,
}

pub fn record_run(conn: &Connection, run: &RunRecord) -> Result<()> {
    let error_summary = if run.errors.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&run.errors)?)
    };
    conn.execute(
        "INSERT INTO import_runs (run_key, source, broker_filter, started_at, finished_at, discovered, \
         imported, parse_failed, exact_duplicates, semantic_duplicates, no_parser, unreadable, \
         insert_failed, archive_failed, period_mismatches, error_summary) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        rusqlite::params![
            run.run_key,
            run.source,
            run.broker_filter,
            run.started_at,
            run.finished_at,
            run.discovered,
            run.imported,
            run.parse_failed,
            run.exact_duplicates,
            run.semantic_duplicates,
            run.no_parser,
            run.unreadable,
            run.insert_failed,
            run.archive_failed,
            run.period_mismatches,
            error_summary,
        ],
    )?;
    tracing::info!(run = %run.run_key, discovered = run.discovered, imported = run.imported, "Recorded run summary");
    Ok(())
}

pub fn last_run(conn: &Connection) -> Result<Option<RunRecord>> {
    let row = conn
        .query_row(
            "SELECT run_key, source, broker_filter, started_at, finished_at, discovered, imported, \
             parse_failed, exact_duplicates, semantic_duplicates, no_parser, unreadable, insert_failed, \
             archive_failed, period_mismatches, error_summary \
             FROM import_runs ORDER BY id DESC LIMIT 1",
            [],
            |row| {
                let summary: Option<String> = row.get(15)?;
                Ok((
                    RunRecord {
                        run_key: row.get(0)?,
                        source: row.get(1)?,
                        broker_filter: row.get(2)?,
                        started_at: row.get(3)?,
                        finished_at: row.get(4)?,
                        discovered: row.get(5)?,
                        imported: row.get(6)?,
                        parse_failed: row.get(7)?,
                        exact_duplicates: row.get(8)?,
                        semantic_duplicates: row.get(9)?,
                        no_parser: row.get(10)?,
                        unreadable: row.get(11)?,
                        insert_failed: row.get(12)?,
                        archive_failed: row.get(13)?,
                        period_mismatches: row.get(14)?,
                        errors: Vec::new(),
                    },
                    summary,
                ))
            },
        )
        .optional()?;

    match row {
        Some((mut run, Some(summary))) => {
            run.errors = serde_json::from_str(&summary)?;
            Ok(Some(run))
        }
        Some((run, None)) => Ok(Some(run)),
        None => Ok(None),
    }
}
