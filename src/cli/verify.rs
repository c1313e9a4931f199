use colored::Colorize;

use crate::cli::open_db;
use crate::error::{BrokerboxError, Result};
use crate::integrity::verify_reports;
use crate::settings::load_settings;
use crate::store::count_reports;

pub fn run() -> Result<()> {
    let conn = open_db(&load_settings())?;
    let checked = count_reports(&conn)?;
    let issues = verify_reports(&conn)?;

    if issues.is_empty() {
        println!("{} {checked} report(s) checked, no issues found.", "OK".green().bold());
        return Ok(());
    }
    for issue in &issues {
        println!("{} {issue}", "!".red().bold());
    }
    Err(BrokerboxError::IntegrityIssues(issues.len()))
}
