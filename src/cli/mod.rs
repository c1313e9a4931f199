pub mod events;
pub mod import;
pub mod init;
pub mod list;
pub mod parsers;
pub mod reparse;
pub mod show;
pub mod stats;
pub mod verify;

use clap::{Parser, Subcommand};
use rusqlite::Connection;

use crate::db::{get_connection, init_db};
use crate::error::Result;
use crate::settings::Settings;

#[derive(Parser)]
#[command(
    name = "brokerbox",
    version,
    about = "Imports broker reports from an inbox, weeds out duplicates and files them away."
)]
pub struct Cli {
    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the data directory, inbox, archive and database.
    Init {
        /// Path for brokerbox data (default: ~/Documents/brokerbox)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Import every report waiting in the inbox.
    Import {
        /// Directory to import from instead of the configured inbox
        #[arg(long)]
        source: Option<String>,
        /// Decide outcomes without writing to the database or moving files
        #[arg(long)]
        dry_run: bool,
        /// Only process files classified as this broker
        #[arg(long)]
        broker: Option<String>,
    },
    /// List stored reports, newest first.
    List {
        #[arg(long)]
        broker: Option<String>,
        /// Period as YYYY-MM
        #[arg(long)]
        period: Option<String>,
        /// raw, parsed or error
        #[arg(long)]
        status: Option<String>,
        /// Substring of the account number
        #[arg(long)]
        account: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Write CSV to stdout instead of a table
        #[arg(long)]
        csv: bool,
    },
    /// Show one report with the data its parser extracted.
    Show {
        id: i64,
        /// Print only this parsed field (e.g. balance_ending, trade_count)
        #[arg(long)]
        field: Option<String>,
    },
    /// Show report counts and the last import run.
    Stats,
    /// Show the import audit trail.
    Events {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Only events of this kind (e.g. exact_duplicate)
        #[arg(long)]
        kind: Option<String>,
        /// Only events from this import run
        #[arg(long)]
        run: Option<String>,
    },
    /// Re-hash stored content and check report identities.
    Verify,
    /// Retry parsing reports stored raw after a parse failure.
    Reparse {
        #[arg(long)]
        broker: Option<String>,
    },
    /// List brokers with their registered parsers.
    Parsers,
}

pub(crate) fn open_db(settings: &Settings) -> Result<Connection> {
    std::fs::create_dir_all(settings.data_path())?;
    let conn = get_connection(&settings.db_path())?;
    init_db(&conn)?;
    Ok(conn)
}
