use comfy_table::{Cell, Table};

use crate::audit::{events_for_run, list_events};
use crate::cli::open_db;
use crate::error::{BrokerboxError, Result};
use crate::fmt::{or_dash, short_hash};
use crate::models::OutcomeKind;
use crate::settings::load_settings;

pub fn run(limit: usize, kind: Option<&str>, run_key: Option<&str>) -> Result<()> {
    let kind = match kind {
        Some(k) => Some(
            OutcomeKind::parse(k).ok_or_else(|| BrokerboxError::Other(format!("Unknown event kind '{k}'")))?,
        ),
        None => None,
    };
    let conn = open_db(&load_settings())?;
    let events = match run_key {
        Some(key) => events_for_run(&conn, key)?
            .into_iter()
            .filter(|e| kind.map_or(true, |k| e.event.kind == k))
            .take(limit)
            .collect(),
        None => list_events(&conn, kind, limit)?,
    };
    if events.is_empty() {
        println!("No import events recorded.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "When", "Run", "Kind", "File", "Broker", "Account", "Period", "Hash", "Reason"]);
    for stored in &events {
        let e = &stored.event;
        let reason = match (&e.filename_period, &e.parsed_period) {
            (Some(from_name), Some(parsed)) if e.kind == OutcomeKind::PeriodMismatch => {
                format!("{} ({from_name} -> {parsed})", e.reason)
            }
            _ => e.reason.clone(),
        };
        table.add_row(vec![
            Cell::new(stored.id),
            Cell::new(&stored.created_at),
            Cell::new(&stored.run_key),
            Cell::new(e.kind.as_str()),
            Cell::new(&e.file_name),
            Cell::new(or_dash(e.broker.as_deref())),
            Cell::new(or_dash(e.account.as_deref())),
            Cell::new(or_dash(e.period.as_deref())),
            Cell::new(or_dash(e.content_hash.as_deref().map(short_hash))),
            Cell::new(reason),
        ]);
    }
    println!("{table}");
    Ok(())
}
