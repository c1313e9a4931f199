use crate::cli::open_db;
use crate::error::Result;
use crate::parsers::ParserRegistry;
use crate::reconciler::reparse_raw;
use crate::settings::load_settings;

pub fn run(broker: Option<&str>) -> Result<()> {
    let conn = open_db(&load_settings())?;
    let registry = ParserRegistry::with_builtin();
    let result = reparse_raw(&conn, &registry, broker)?;

    if result.examined == 0 {
        println!("No raw reports to reparse.");
        return Ok(());
    }
    println!(
        "{} examined: {} parsed, {} failed again, {} duplicate of another report, {} without parser",
        result.examined, result.parsed, result.failed, result.conflicts, result.skipped
    );
    Ok(())
}
