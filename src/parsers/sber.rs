use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use super::{ParseError, Parser};
use crate::models::ParsedData;

const VERSION: &str = "2.0";

/// Sberbank brokerage HTML report.
pub struct SberParser;

struct Patterns {
    script: Regex,
    style: Regex,
    cell_end: Regex,
    line_break: Regex,
    tag: Regex,
    blank_runs: Regex,
    table: Regex,
    period: Regex,
    investor: Regex,
    account: Regex,
    contract_date: Regex,
    currency: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        script: Regex::new(r"(?is)<script\b.*?</script\s*>").unwrap(),
        style: Regex::new(r"(?is)<style\b.*?</style\s*>").unwrap(),
        cell_end: Regex::new(r"(?i)</t[dh]\s*>").unwrap(),
        line_break: Regex::new(r"(?i)<br\s*/?>|</(?:tr|p|div|h[1-6]|li|table)\s*>").unwrap(),
        tag: Regex::new(r"(?s)<[^>]*>").unwrap(),
        blank_runs: Regex::new(r"[ \u{00A0}]+").unwrap(),
        table: Regex::new(r"(?is)<table\b.*?</table\s*>").unwrap(),
        period: Regex::new(r"за период с\s+(\d{2}\.\d{2}\.\d{4})\s+по\s+(\d{2}\.\d{2}\.\d{4})").unwrap(),
        investor: Regex::new(r"Инвестор:\s*([^\n\r\t]+)").unwrap(),
        account: Regex::new(r"Договор[^\n]*?\s([0-9A-Z]{5,12})(?:\s|$)").unwrap(),
        contract_date: Regex::new(r"Договор[^\n]*?\sот\s+(\d{2}\.\d{2}\.\d{4})").unwrap(),
        currency: Regex::new(r"\b(RUB|USD|EUR|CNY)\b").unwrap(),
    })
}

/// Flattens markup to text: table cells end with a tab, block elements end a line.
fn html_to_text(html: &str) -> String {
    let p = patterns();
    let text = p.script.replace_all(html, "");
    let text = p.style.replace_all(&text, "");
    let text = p.cell_end.replace_all(&text, "\t");
    let text = p.line_break.replace_all(&text, "\n");
    let text = p.tag.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&laquo;", "«")
        .replace("&raquo;", "»")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&");
    p.blank_runs.replace_all(&text, " ").to_string()
}

fn parse_dmy(raw: &str) -> Result<String, ParseError> {
    NaiveDate::parse_from_str(raw, "%d.%m.%Y")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| ParseError::Malformed(format!("invalid date: {raw}")))
}

/// "1 234 567,89" -> 1234567.89
fn parse_ru_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{00A0}')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

#[derive(Debug, Default, PartialEq)]
struct AssetTotals {
    portfolio_value: Option<f64>,
    cash_balance: Option<f64>,
    total: Option<f64>,
}

// "Итого" row of the asset valuation table: securities, cash, total.
fn asset_totals(text: &str) -> AssetTotals {
    let from = text.find("Оценка портфеля ЦБ").unwrap_or(0);
    let Some(line) = text[from..]
        .lines()
        .find(|line| line.trim_start().starts_with("Итого"))
    else {
        return AssetTotals::default();
    };
    let cells: Vec<&str> = line.split('\t').map(str::trim).filter(|c| !c.is_empty()).collect();
    let total = cells.iter().skip(1).rev().find_map(|c| parse_ru_number(c));
    if cells.len() >= 4 {
        AssetTotals {
            portfolio_value: parse_ru_number(cells[1]),
            cash_balance: parse_ru_number(cells[2]),
            total,
        }
    } else {
        AssetTotals {
            portfolio_value: total,
            cash_balance: None,
            total,
        }
    }
}

// Rows of the securities table with a non-zero quantity change (13th column).
fn trade_count(html: &str) -> Option<u64> {
    let table = patterns()
        .table
        .find_iter(html)
        .map(|m| m.as_str())
        .find(|t| t.contains("Портфель Ценных Бумаг"))?;
    let text = html_to_text(table);
    let count = text
        .lines()
        .filter_map(|line| {
            let cells: Vec<&str> = line.split('\t').collect();
            // The piece after the last tab is not a cell.
            let cells = &cells[..cells.len().saturating_sub(1)];
            cells.get(12).and_then(|c| parse_ru_number(c))
        })
        .filter(|change| *change != 0.0)
        .count();
    Some(count as u64)
}

impl Parser for SberParser {
    fn parse(&self, content: &str) -> Result<ParsedData, ParseError> {
        let text = html_to_text(content);
        if text.trim().is_empty() {
            return Err(ParseError::Malformed("document has no text".into()));
        }
        let p = patterns();

        let period = p
            .period
            .captures(&text)
            .ok_or(ParseError::MissingField("period_start"))?;
        let period_start = parse_dmy(&period[1])?;
        let period_end = parse_dmy(&period[2])?;

        let investor_name = p
            .investor
            .captures(&text)
            .map(|c| c[1].trim().to_string())
            .filter(|s| !s.is_empty());
        let account_number = p.account.captures(&text).map(|c| c[1].to_string());
        let contract_date = match p.contract_date.captures(&text) {
            Some(c) => Some(parse_dmy(&c[1])?),
            None => None,
        };
        let totals = asset_totals(&text);
        let currency = p
            .currency
            .captures(&text)
            .map(|c| c[1].to_string())
            .or_else(|| text.contains("руб").then(|| "RUB".to_string()));

        Ok(ParsedData {
            parser_version: Some(VERSION.to_string()),
            account_number,
            investor_name,
            contract_date,
            period_start: Some(period_start),
            period_end: Some(period_end),
            portfolio_value: totals.portfolio_value,
            cash_balance: totals.cash_balance,
            balance_ending: totals.total,
            currency,
            trade_count: trade_count(content),
            ..ParsedData::default()
        })
    }

    fn version(&self) -> &str {
        VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "<html><head><style>td { color: red }</style></head><body>\
        <h3>Отчет брокера</h3>\
        <p>Инвестор: Иванов Иван Иванович</p>\
        <p>Договор на ведение индивидуального инвестиционного счета S000T49 от 13.08.2019</p>\
        <p>Отчет за период с 01.07.2023 по 31.07.2023</p>\
        <table><tr><td class=\"c\">Торговая площадка</td><td class=\"c\">Оценка портфеля ЦБ, руб.</td></tr>\
        <tr><td>Итого</td><td>1&nbsp;000,00</td><td>12 345,67</td></tr></table>\
        </body></html>";

    #[test]
    fn test_parse_sample_report() {
        let data = SberParser.parse(SAMPLE).unwrap();
        assert_eq!(data.period_start.as_deref(), Some("2023-07-01"));
        assert_eq!(data.period_end.as_deref(), Some("2023-07-31"));
        assert_eq!(data.account_number.as_deref(), Some("S000T49"));
        assert_eq!(data.investor_name.as_deref(), Some("Иванов Иван Иванович"));
        assert_eq!(data.contract_date.as_deref(), Some("2019-08-13"));
        assert_eq!(data.balance_ending, Some(12345.67));
        assert_eq!(data.currency.as_deref(), Some("RUB"));
        assert_eq!(data.canonical_period().as_deref(), Some("2023-07"));
        assert!(data.validate().is_ok());
    }

    fn securities_row(name: &str, change: &str) -> String {
        let mut cells = vec![name.to_string()];
        cells.extend((1..12).map(|i| format!("{i},00")));
        cells.push(change.to_string());
        let cells: String = cells.iter().map(|c| format!("<td>{c}</td>")).collect();
        format!("<tr>{cells}</tr>")
    }

    #[test]
    fn test_asset_totals_and_trades() {
        let mut html = String::from(
            "<p>Отчет за период с 01.08.2023 по 31.08.2023</p>\
             <table><tr><td class=\"c\">Площадка</td><td class=\"c\">Оценка портфеля ЦБ, руб.</td>\
             <td class=\"c\">Денежные средства</td><td class=\"c\">Всего</td></tr>\
             <tr><td>Итого</td><td>10 000,00</td><td>2 500,50</td><td>12 500,50</td></tr></table>\
             <table><tr><td>Портфель Ценных Бумаг</td></tr>",
        );
        html.push_str(&securities_row("Наименование", "Изменение"));
        html.push_str(&securities_row("SBER", "10"));
        html.push_str(&securities_row("GAZP", "0"));
        html.push_str(&securities_row("LKOH", "-3"));
        html.push_str("</table>");

        let data = SberParser.parse(&html).unwrap();
        assert_eq!(data.portfolio_value, Some(10000.0));
        assert_eq!(data.cash_balance, Some(2500.5));
        assert_eq!(data.balance_ending, Some(12500.5));
        assert_eq!(data.trade_count, Some(2));
    }

    #[test]
    fn test_no_securities_table_means_unknown_trade_count() {
        let data = SberParser.parse(SAMPLE).unwrap();
        assert_eq!(data.trade_count, None);
        assert_eq!(data.cash_balance, None);
        assert_eq!(data.portfolio_value, Some(12345.67));
    }

    #[test]
    fn test_missing_period_is_an_error() {
        let html = "<p>Инвестор: Петров</p><p>Договор 4000T49 от 01.01.2020</p>";
        assert_eq!(
            SberParser.parse(html),
            Err(ParseError::MissingField("period_start"))
        );
    }

    #[test]
    fn test_impossible_period_date_is_malformed() {
        let html = "<p>за период с 31.02.2023 по 28.02.2023</p>";
        assert!(matches!(SberParser.parse(html), Err(ParseError::Malformed(_))));
    }

    #[test]
    fn test_empty_document_is_malformed() {
        assert!(matches!(
            SberParser.parse("<html><script>var x = 1;</script></html>"),
            Err(ParseError::Malformed(_))
        ));
    }

    #[test]
    fn test_html_to_text_layout() {
        let text = html_to_text("<table><tr><td>a</td><td>b&amp;c</td></tr></table>x<br/>y");
        assert!(text.contains("a\tb&c\t\n"));
        assert!(text.contains("x\ny"));
    }

    #[test]
    fn test_parse_ru_number() {
        assert_eq!(parse_ru_number("1 234 567,89"), Some(1234567.89));
        assert_eq!(parse_ru_number("-50,5"), Some(-50.5));
        assert_eq!(parse_ru_number("итого"), None);
        assert_eq!(parse_ru_number(""), None);
    }
}
