use comfy_table::{Cell, Table};

use crate::classifier::PatternTable;
use crate::error::Result;
use crate::parsers::ParserRegistry;
use crate::settings::load_settings;

pub fn run() -> Result<()> {
    let settings = load_settings();
    let patterns = PatternTable::load(&settings.patterns_path())?;
    let registry = ParserRegistry::with_builtin();
    let parsers = registry.info();
    let version_of = |broker: &str| {
        parsers
            .iter()
            .find(|p| p.broker == broker)
            .map(|p| format!("v{}", p.version))
    };

    let mut table = Table::new();
    table.set_header(vec!["Broker", "Parser", "Filename patterns", "Content patterns"]);
    for broker in &patterns.brokers {
        let parser = if registry.supports(&broker.id) {
            version_of(&broker.id).unwrap_or_default()
        } else {
            "-".to_string()
        };
        table.add_row(vec![
            Cell::new(&broker.id),
            Cell::new(parser),
            Cell::new(broker.filename_patterns.len()),
            Cell::new(broker.content_patterns.len()),
        ]);
    }
    for broker in registry.brokers().into_iter().filter(|b| !patterns.contains(b)) {
        table.add_row(vec![
            Cell::new(broker),
            Cell::new(format!("{} (never detected)", version_of(broker).unwrap_or_default())),
            Cell::new(0),
            Cell::new(0),
        ]);
    }
    println!("{table}");
    Ok(())
}
