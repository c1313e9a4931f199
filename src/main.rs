mod archive;
mod audit;
mod classifier;
mod cli;
mod db;
mod dedup;
mod error;
mod filename_meta;
mod fingerprint;
mod fmt;
mod integrity;
mod models;
mod parsers;
mod pipeline;
mod reconciler;
mod settings;
mod store;

use clap::Parser;

use cli::{Cli, Commands};
use store::ReportFilter;

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "brokerbox=warn",
        1 => "brokerbox=info",
        _ => "brokerbox=debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Import {
            source,
            dry_run,
            broker,
        } => cli::import::run(source, dry_run, broker),
        Commands::List {
            broker,
            period,
            status,
            account,
            limit,
            csv,
        } => cli::list::parse_status(status.as_deref()).and_then(|status| {
            let filter = ReportFilter {
                broker,
                period,
                status,
                account,
                limit,
            };
            cli::list::run(filter, csv)
        }),
        Commands::Show { id, field } => cli::show::run(id, field.as_deref()),
        Commands::Stats => cli::stats::run(),
        Commands::Events { limit, kind, run } => {
            cli::events::run(limit, kind.as_deref(), run.as_deref())
        }
        Commands::Verify => cli::verify::run(),
        Commands::Reparse { broker } => cli::reparse::run(broker.as_deref()),
        Commands::Parsers => cli::parsers::run(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
