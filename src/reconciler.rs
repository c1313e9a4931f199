use rusqlite::Connection;

use crate::dedup::{self, DuplicateKey};
use crate::error::Result;
use crate::models::ProcessingStatus;
use crate::parsers::{ParseOutcome, ParserRegistry};
use crate::store::{self, ParsedUpdate};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReparseResult {
    pub examined: usize,
    pub parsed: usize,
    pub failed: usize,
    /// Parsed fine, but the parsed identity belongs to another report.
    pub conflicts: usize,
    /// No parser for the broker yet; left raw.
    pub skipped: usize,
}

/// Re-runs parsers over reports stored raw after a failed parse. Each report
/// leaves `raw` for `parsed` or `error`, or stays raw when no parser exists.
pub fn reparse_raw(conn: &Connection, registry: &ParserRegistry, broker: Option<&str>) -> Result<ReparseResult> {
    let pending = store::raw_reports(conn, broker)?;
    let mut result = ReparseResult {
        examined: pending.len(),
        ..ReparseResult::default()
    };

    for (report, content) in &pending {
        if !report.processing_status.can_transition_to(ProcessingStatus::Parsed) {
            continue;
        }
        match registry.invoke(&report.broker, content) {
            ParseOutcome::NoParser => {
                result.skipped += 1;
            }
            ParseOutcome::Failed { reason } => {
                store::mark_error(conn, report.id, &reason)?;
                tracing::info!(report_id = report.id, "Reparse failed: {reason}");
                result.failed += 1;
            }
            ParseOutcome::Parsed { data, version } => {
                let key = DuplicateKey {
                    broker: report.broker.clone(),
                    account: data.account_number.clone().or_else(|| report.account.clone()),
                    period: data.canonical_period().or_else(|| report.period.clone()),
                };
                if let Some(existing) = dedup::find_by_triple_excluding(conn, &key, report.id)? {
                    let reason = format!(
                        "parsed as duplicate of report #{} ({})",
                        existing.id, existing.file_name
                    );
                    store::mark_error(conn, report.id, &reason)?;
                    tracing::warn!(report_id = report.id, existing = existing.id, "Reparse found semantic duplicate");
                    result.conflicts += 1;
                    continue;
                }

                let update = ParsedUpdate {
                    account: key.account.as_deref(),
                    period: key.period.as_deref(),
                    data: &data,
                    parser_version: &version,
                };
                match store::mark_parsed(conn, report.id, &update) {
                    Ok(true) => result.parsed += 1,
                    Ok(false) => result.skipped += 1,
                    Err(e) if e.is_unique_violation() => {
                        store::mark_error(conn, report.id, "parsed identity rejected by store as duplicate")?;
                        result.conflicts += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParsedData;
    use crate::parsers::{ParseError, Parser};
    use crate::store::insert_report;
    use crate::store::tests::{new_report, test_db};

    struct ContentParser;

    impl Parser for ContentParser {
        fn parse(&self, content: &str) -> std::result::Result<ParsedData, ParseError> {
            match content.strip_prefix("period:") {
                Some(date) => Ok(ParsedData {
                    period_start: Some(date.trim().to_string()),
                    account_number: Some("4000T49".into()),
                    ..ParsedData::default()
                }),
                None => Err(ParseError::MissingField("period_start")),
            }
        }

        fn version(&self) -> &str {
            "3.1"
        }
    }

    fn registry() -> ParserRegistry {
        let mut registry = ParserRegistry::new();
        registry.register("acme", || Box::new(ContentParser));
        registry
    }

    fn status(conn: &Connection, id: i64) -> ProcessingStatus {
        store::get_report(conn, id).unwrap().unwrap().processing_status
    }

    #[test]
    fn test_raw_report_becomes_parsed() {
        let (_dir, conn) = test_db();
        let id = insert_report(&conn, &new_report("acme", None, Some("2023-01"), "period: 2023-05-01")).unwrap();
        let result = reparse_raw(&conn, &registry(), None).unwrap();

        assert_eq!(result, ReparseResult { examined: 1, parsed: 1, ..ReparseResult::default() });
        let stored = store::get_report(&conn, id).unwrap().unwrap();
        assert_eq!(stored.processing_status, ProcessingStatus::Parsed);
        assert_eq!(stored.period.as_deref(), Some("2023-05"));
        assert_eq!(stored.account.as_deref(), Some("4000T49"));
        assert_eq!(stored.parser_version.as_deref(), Some("3.1"));
        assert!(store::get_parsed_data(&conn, id).unwrap().is_some());
    }

    #[test]
    fn test_still_failing_report_becomes_error() {
        let (_dir, conn) = test_db();
        let id = insert_report(&conn, &new_report("acme", None, Some("2023-01"), "garbage")).unwrap();
        let result = reparse_raw(&conn, &registry(), None).unwrap();

        assert_eq!(result.failed, 1);
        assert_eq!(status(&conn, id), ProcessingStatus::Error);
        // A second sweep has nothing left to do.
        assert_eq!(reparse_raw(&conn, &registry(), None).unwrap().examined, 0);
    }

    #[test]
    fn test_collision_with_existing_report_becomes_error() {
        let (_dir, conn) = test_db();
        let mut existing = new_report("acme", Some("4000T49"), Some("2023-05"), "original");
        existing.processing_status = ProcessingStatus::Parsed;
        insert_report(&conn, &existing).unwrap();
        let id = insert_report(&conn, &new_report("acme", None, Some("2023-01"), "period: 2023-05-10")).unwrap();

        let result = reparse_raw(&conn, &registry(), None).unwrap();
        assert_eq!(result.conflicts, 1);
        let stored = store::get_report(&conn, id).unwrap().unwrap();
        assert_eq!(stored.processing_status, ProcessingStatus::Error);
        assert_eq!(stored.period.as_deref(), Some("2023-01"));
        assert!(stored.error_log.unwrap().contains("duplicate"));
    }

    #[test]
    fn test_without_parser_report_stays_raw() {
        let (_dir, conn) = test_db();
        let id = insert_report(&conn, &new_report("orphan", None, None, "period: 2023-05-01")).unwrap();
        let result = reparse_raw(&conn, &registry(), None).unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(status(&conn, id), ProcessingStatus::Raw);
    }

    #[test]
    fn test_broker_filter() {
        let (_dir, conn) = test_db();
        insert_report(&conn, &new_report("acme", None, None, "period: 2023-05-01")).unwrap();
        insert_report(&conn, &new_report("orphan", None, None, "x")).unwrap();
        let result = reparse_raw(&conn, &registry(), Some("orphan")).unwrap();
        assert_eq!(result.examined, 1);
        assert_eq!(result.skipped, 1);
    }
}
