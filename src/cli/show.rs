use colored::Colorize;
use comfy_table::{Cell, Table};
use serde_json::Value;

use crate::cli::open_db;
use crate::error::{BrokerboxError, Result};
use crate::fmt::or_dash;
use crate::models::ParsedData;
use crate::settings::load_settings;
use crate::store::{get_parsed_data, get_report};

/// Field name and display value for every field the parser filled in, extras included.
pub fn parsed_fields(data: &ParsedData) -> Result<Vec<(String, String)>> {
    let Value::Object(map) = serde_json::to_value(data)? else {
        return Ok(Vec::new());
    };
    Ok(map
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k, display_value(&v)))
        .collect())
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn field_value(data: &ParsedData, field: &str) -> Result<String> {
    let fields = parsed_fields(data)?;
    match fields.iter().find(|(name, _)| name == field) {
        Some((_, value)) => Ok(value.clone()),
        None => {
            let available: Vec<&str> = fields.iter().map(|(name, _)| name.as_str()).collect();
            Err(BrokerboxError::Other(format!(
                "Field '{field}' not in parsed data (available: {})",
                available.join(", ")
            )))
        }
    }
}

pub fn run(id: i64, field: Option<&str>) -> Result<()> {
    let conn = open_db(&load_settings())?;
    let report = get_report(&conn, id)?.ok_or_else(|| BrokerboxError::Other(format!("Report #{id} not found")))?;
    let data = get_parsed_data(&conn, id)?;

    if let Some(field) = field {
        let data = data.ok_or_else(|| {
            BrokerboxError::Other(format!(
                "Report #{id} has no parsed data (status {})",
                report.processing_status.as_str()
            ))
        })?;
        println!("{}", field_value(&data, field)?);
        return Ok(());
    }

    println!("{} #{} {}", "Report".bold(), report.id, report.file_name);
    println!("  Broker:  {}", report.broker);
    println!("  Account: {}", or_dash(report.account.as_deref()));
    println!("  Period:  {}", or_dash(report.period.as_deref()));
    println!("  Status:  {}", report.processing_status.as_str());
    println!("  Parser:  {}", or_dash(report.parser_version.as_deref()));
    if let Some(error) = &report.error_log {
        println!("  Error:   {}", error.red());
    }

    match data {
        Some(data) => {
            let mut table = Table::new();
            table.set_header(vec!["Field", "Value"]);
            for (name, value) in parsed_fields(&data)? {
                table.add_row(vec![Cell::new(name), Cell::new(value)]);
            }
            println!("{table}");
        }
        None => println!("No parsed data."),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ParsedData {
        let mut data = ParsedData {
            account_number: Some("S000T49".into()),
            period_start: Some("2023-07-01".into()),
            balance_ending: Some(12345.67),
            trade_count: Some(4),
            ..ParsedData::default()
        };
        data.extra.insert("isin".into(), Value::String("RU0009029540".into()));
        data.extra.insert("instruments".into(), serde_json::json!(["SBER", "GAZP"]));
        data
    }

    #[test]
    fn test_parsed_fields_lists_typed_and_extra() {
        let fields = parsed_fields(&sample()).unwrap();
        let names: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"account_number"));
        assert!(names.contains(&"isin"));
        assert!(!names.contains(&"cash_balance"));
        assert!(fields.contains(&("balance_ending".to_string(), "12345.67".to_string())));
        assert!(fields.contains(&("instruments".to_string(), r#"["SBER","GAZP"]"#.to_string())));
    }

    #[test]
    fn test_field_value() {
        let data = sample();
        assert_eq!(field_value(&data, "trade_count").unwrap(), "4");
        assert_eq!(field_value(&data, "account_number").unwrap(), "S000T49");
        assert_eq!(field_value(&data, "isin").unwrap(), "RU0009029540");

        let err = field_value(&data, "cash_balance").unwrap_err().to_string();
        assert!(err.contains("available: "));
        assert!(err.contains("balance_ending"));
    }
}
