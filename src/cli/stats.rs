use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::audit::last_run;
use crate::cli::open_db;
use crate::error::Result;
use crate::settings::load_settings;
use crate::store::statistics;

pub fn run() -> Result<()> {
    let settings = load_settings();
    let conn = open_db(&settings)?;
    let stats = statistics(&conn)?;

    println!("Database:      {}", settings.db_path().display());
    println!("Reports:       {}", stats.total);
    println!("Last 24 hours: {}", stats.recent_24h);

    if !stats.by_broker.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["Broker", "Reports"]);
        for (broker, n) in &stats.by_broker {
            table.add_row(vec![Cell::new(broker), Cell::new(n)]);
        }
        println!("\n{table}");

        let mut table = Table::new();
        table.set_header(vec!["Status", "Reports"]);
        for (status, n) in &stats.by_status {
            table.add_row(vec![Cell::new(status), Cell::new(n)]);
        }
        println!("{table}");
    }

    match last_run(&conn)? {
        Some(run) => {
            println!("\n{} {} ({})", "Last run".bold(), run.run_key, run.source);
            println!(
                "  {} discovered, {} imported, {} stored raw, {} exact and {} semantic duplicates, \
                 {} without parser, {} unreadable",
                run.discovered,
                run.imported,
                run.parse_failed,
                run.exact_duplicates,
                run.semantic_duplicates,
                run.no_parser,
                run.unreadable
            );
            if run.insert_failed > 0 || run.archive_failed > 0 {
                println!(
                    "  {}",
                    format!("{} insert and {} archive failures", run.insert_failed, run.archive_failed).red()
                );
            }
            for error in &run.errors {
                println!("  - {error}");
            }
        }
        None => println!("\nNo import runs yet."),
    }
    Ok(())
}
