use comfy_table::{Cell, Table};

use crate::cli::open_db;
use crate::error::{BrokerboxError, Result};
use crate::fmt::{format_bytes, or_dash, short_hash};
use crate::models::{ProcessingStatus, Report};
use crate::settings::load_settings;
use crate::store::{list_reports, ReportFilter};

pub fn parse_status(status: Option<&str>) -> Result<Option<ProcessingStatus>> {
    match status {
        None => Ok(None),
        Some(s) => ProcessingStatus::parse(s)
            .map(Some)
            .ok_or_else(|| BrokerboxError::Other(format!("Unknown status '{s}' (expected raw, parsed or error)"))),
    }
}

pub fn run(filter: ReportFilter, csv: bool) -> Result<()> {
    let conn = open_db(&load_settings())?;
    let reports = list_reports(&conn, &filter)?;

    if csv {
        return write_csv(&reports, std::io::stdout());
    }
    if reports.is_empty() {
        println!("No reports found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Broker", "Account", "Period", "Status", "File", "Hash", "Size", "Imported"]);
    for r in &reports {
        table.add_row(vec![
            Cell::new(r.id),
            Cell::new(&r.broker),
            Cell::new(or_dash(r.account.as_deref())),
            Cell::new(or_dash(r.period.as_deref())),
            Cell::new(r.processing_status.as_str()),
            Cell::new(&r.file_name),
            Cell::new(short_hash(&r.content_hash)),
            Cell::new(format_bytes(r.file_size.max(0) as u64)),
            Cell::new(&r.created_at),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub fn write_csv<W: std::io::Write>(reports: &[Report], out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record([
        "id",
        "broker",
        "account",
        "period",
        "processing_status",
        "file_name",
        "content_hash",
        "file_size",
        "parser_version",
        "error_log",
        "created_at",
        "updated_at",
    ])?;
    for r in reports {
        writer.write_record([
            r.id.to_string(),
            r.broker.clone(),
            r.account.clone().unwrap_or_default(),
            r.period.clone().unwrap_or_default(),
            r.processing_status.as_str().to_string(),
            r.file_name.clone(),
            r.content_hash.clone(),
            r.file_size.to_string(),
            r.parser_version.clone().unwrap_or_default(),
            r.error_log.clone().unwrap_or_default(),
            r.created_at.clone(),
            r.updated_at.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::insert_report;
    use crate::store::tests::{new_report, test_db};

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status(None).unwrap(), None);
        assert_eq!(parse_status(Some("parsed")).unwrap(), Some(ProcessingStatus::Parsed));
        assert!(parse_status(Some("done")).is_err());
    }

    #[test]
    fn test_write_csv() {
        let (_dir, conn) = test_db();
        insert_report(&conn, &new_report("sber", Some("4000T49"), Some("2023-07"), "a")).unwrap();
        let reports = list_reports(&conn, &ReportFilter::default()).unwrap();

        let mut out = Vec::new();
        write_csv(&reports, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("id,broker,account,period"));
        assert!(lines.next().unwrap().contains(",sber,4000T49,2023-07,raw,sber.html,"));
        assert!(lines.next().is_none());
    }
}
