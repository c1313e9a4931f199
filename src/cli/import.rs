use std::path::PathBuf;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::archive::ArchiveLayout;
use crate::classifier::PatternTable;
use crate::cli::open_db;
use crate::error::{BrokerboxError, Result};
use crate::fmt::or_dash;
use crate::models::{OutcomeKind, UNKNOWN_BROKER};
use crate::parsers::ParserRegistry;
use crate::pipeline::{FileReport, ImportOptions, ImportPipeline, RunSummary};
use crate::settings::{load_settings, shellexpand_path};

pub fn run(source: Option<String>, dry_run: bool, broker: Option<String>) -> Result<()> {
    let settings = load_settings();
    // Re-read on every run so pattern edits apply without a restart.
    let table = PatternTable::load(&settings.patterns_path())?;
    if let Some(b) = &broker {
        if b != UNKNOWN_BROKER && !table.contains(b) {
            return Err(BrokerboxError::UnknownBroker(b.clone()));
        }
    }
    let classifier = table.compile()?;
    let registry = ParserRegistry::with_builtin();
    let conn = open_db(&settings)?;
    let archive = ArchiveLayout::new(settings.archive_path());

    let source = match source {
        Some(dir) => PathBuf::from(shellexpand_path(&dir)),
        None => settings.inbox_path(),
    };
    let options = ImportOptions {
        dry_run,
        broker_filter: broker,
        max_file_size: settings.max_file_size_bytes(),
        extensions: settings.supported_extensions.clone(),
    };

    let summary = ImportPipeline::new(&conn, &registry, &classifier, &archive, options).run(&source)?;
    println!("{}", format_summary(&summary));
    summary.into_result().map(|_| ())
}

fn outcome_cell(file: &FileReport) -> Cell {
    let label = file.kind.as_str();
    if file.failure.is_some() {
        return Cell::new(format!("{label} (failed)").red().bold());
    }
    match file.kind {
        OutcomeKind::Imported => Cell::new(label.green()),
        OutcomeKind::ParseFailed => Cell::new(label.yellow()),
        OutcomeKind::ExactDuplicate | OutcomeKind::SemanticDuplicate => Cell::new(label.cyan()),
        OutcomeKind::InsertFailed => Cell::new(label.red()),
        _ => Cell::new(label),
    }
}

pub fn format_summary(summary: &RunSummary) -> String {
    let stats = &summary.stats;
    if stats.discovered == 0 {
        return format!("No reports found in {}", summary.source.display());
    }

    let mut files = Table::new();
    files.set_header(vec!["File", "Outcome", "Broker", "Period", "Detail"]);
    for file in &summary.files {
        let detail = match (&file.destination, file.failure) {
            (Some(dest), None) if !summary.dry_run => dest.display().to_string(),
            (_, Some(_)) => format!("{} (stopped at {:?})", file.reason, file.stage),
            _ => file.reason.clone(),
        };
        files.add_row(vec![
            Cell::new(&file.file_name),
            outcome_cell(file),
            Cell::new(or_dash(file.broker.as_deref())),
            Cell::new(or_dash(file.period.as_deref())),
            Cell::new(detail),
        ]);
    }

    let mut counts = Table::new();
    counts.set_header(vec!["Outcome", "Files"]);
    for (label, n) in [
        ("Imported", stats.imported),
        ("Stored raw (parse failed)", stats.parse_failed),
        ("Exact duplicates", stats.exact_duplicates),
        ("Semantic duplicates", stats.semantic_duplicates),
        ("No parser", stats.no_parser),
        ("Unreadable", stats.unreadable),
        ("Insert failed", stats.insert_failed),
        ("Period mismatches", stats.period_mismatches),
        ("Archive failures", stats.archive_failed),
    ] {
        if n > 0 {
            counts.add_row(vec![Cell::new(label), Cell::new(n)]);
        }
    }
    counts.add_row(vec![Cell::new("Stored".bold()), Cell::new(stats.succeeded())]);
    counts.add_row(vec![Cell::new("Total".bold()), Cell::new(stats.discovered)]);

    let title = if summary.dry_run {
        format!("Dry run of {} (nothing was written or moved)", summary.source.display())
    } else {
        format!("Import run {}", summary.run_key)
    };
    let mut out = format!("{title}\n{files}\n{counts}");
    if stats.has_inconsistencies() {
        out.push_str(&format!(
            "\n{}",
            "Archive and database are out of step for the files marked failed.".red()
        ));
    }
    out
}
