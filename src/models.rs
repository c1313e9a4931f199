use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Broker id assigned when no pattern matches.
pub const UNKNOWN_BROKER: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    Raw,
    Parsed,
    Error,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Parsed => "parsed",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "raw" => Some(Self::Raw),
            "parsed" => Some(Self::Parsed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Status only moves forward out of `raw`.
    pub fn can_transition_to(&self, next: ProcessingStatus) -> bool {
        matches!(
            (self, next),
            (Self::Raw, Self::Parsed) | (Self::Raw, Self::Error)
        )
    }
}

#[derive(Debug, Clone)]
pub struct Report {
    pub id: i64,
    pub broker: String,
    pub account: Option<String>,
    pub period: Option<String>,
    pub file_name: String,
    pub content_hash: String,
    pub file_size: i64,
    pub parser_version: Option<String>,
    pub processing_status: ProcessingStatus,
    pub error_log: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewReport {
    pub broker: String,
    pub account: Option<String>,
    pub period: Option<String>,
    pub file_name: String,
    pub content_hash: String,
    pub raw_content: String,
    pub file_size: i64,
    pub parsed_data: Option<ParsedData>,
    pub parser_version: Option<String>,
    pub processing_status: ProcessingStatus,
    pub error_log: Option<String>,
}

/// Structured output of a broker parser. Keys without a typed field land in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parser_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub investor_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cash_balance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_ending: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_count: Option<u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn parse_iso_date(raw: &str) -> Option<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

impl ParsedData {
    /// `YYYY-MM` of `period_start`, when it is a valid ISO date.
    pub fn canonical_period(&self) -> Option<String> {
        let start = parse_iso_date(self.period_start.as_deref()?)?;
        Some(start.format("%Y-%m").to_string())
    }

    /// Shape checks applied to every parser result before the pipeline trusts it.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let start = match self.period_start.as_deref() {
            Some(raw) => Some(parse_iso_date(raw).ok_or_else(|| format!("period_start is not an ISO date: {raw}"))?),
            None => None,
        };
        let end = match self.period_end.as_deref() {
            Some(raw) => Some(parse_iso_date(raw).ok_or_else(|| format!("period_end is not an ISO date: {raw}"))?),
            None => None,
        };
        if let (Some(start), Some(end)) = (start, end) {
            if end < start {
                return Err(format!("period_end {end} precedes period_start {start}"));
            }
        }
        if let Some(account) = &self.account_number {
            if account.trim().is_empty() {
                return Err("account_number is empty".to_string());
            }
        }
        Ok(())
    }
}

/// `YYYY-MM` with a month in 01..=12.
pub fn is_canonical_period(period: &str) -> bool {
    let bytes = period.as_bytes();
    if bytes.len() != 7 || bytes[4] != b'-' {
        return false;
    }
    let (year, month) = (&period[..4], &period[5..]);
    if !year.bytes().all(|b| b.is_ascii_digit()) || !month.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    matches!(month.parse::<u32>(), Ok(1..=12))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Imported,
    ExactDuplicate,
    SemanticDuplicate,
    NoParserFound,
    ParseFailed,
    Unreadable,
    InsertFailed,
    /// Advisory: filename and parsed periods disagreed. Never the final word on a file.
    PeriodMismatch,
}

impl OutcomeKind {
    pub const ALL: [OutcomeKind; 8] = [
        Self::Imported,
        Self::ExactDuplicate,
        Self::SemanticDuplicate,
        Self::NoParserFound,
        Self::ParseFailed,
        Self::Unreadable,
        Self::InsertFailed,
        Self::PeriodMismatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Imported => "imported",
            Self::ExactDuplicate => "exact_duplicate",
            Self::SemanticDuplicate => "semantic_duplicate",
            Self::NoParserFound => "no_parser_found",
            Self::ParseFailed => "parse_failed",
            Self::Unreadable => "unreadable",
            Self::InsertFailed => "insert_failed",
            Self::PeriodMismatch => "period_mismatch",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().find(|k| k.as_str() == s).copied()
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::PeriodMismatch)
    }
}

#[derive(Debug, Clone)]
pub struct ImportEvent {
    pub kind: OutcomeKind,
    pub broker: Option<String>,
    pub account: Option<String>,
    pub period: Option<String>,
    pub file_name: String,
    pub content_hash: Option<String>,
    pub reason: String,
    pub filename_period: Option<String>,
    pub parsed_period: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_only_leave_raw() {
        use ProcessingStatus::*;
        assert!(Raw.can_transition_to(Parsed));
        assert!(Raw.can_transition_to(Error));
        assert!(!Parsed.can_transition_to(Raw));
        assert!(!Error.can_transition_to(Raw));
        assert!(!Parsed.can_transition_to(Error));
        assert!(!Raw.can_transition_to(Raw));
    }

    #[test]
    fn test_canonical_period_from_period_start() {
        let data = ParsedData {
            period_start: Some("2023-08-01".into()),
            ..ParsedData::default()
        };
        assert_eq!(data.canonical_period().as_deref(), Some("2023-08"));
        assert_eq!(ParsedData::default().canonical_period(), None);
        let bad = ParsedData {
            period_start: Some("01.08.2023".into()),
            ..ParsedData::default()
        };
        assert_eq!(bad.canonical_period(), None);
    }

    #[test]
    fn test_validate_rejects_reversed_period() {
        let data = ParsedData {
            period_start: Some("2023-08-31".into()),
            period_end: Some("2023-08-01".into()),
            ..ParsedData::default()
        };
        assert!(data.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_blank_account_and_bad_dates() {
        let blank = ParsedData {
            account_number: Some("  ".into()),
            ..ParsedData::default()
        };
        assert!(blank.validate().is_err());
        let bad_date = ParsedData {
            period_end: Some("2023-13-01".into()),
            ..ParsedData::default()
        };
        assert!(bad_date.validate().is_err());
        assert!(ParsedData::default().validate().is_ok());
    }

    #[test]
    fn test_unknown_keys_preserved_in_extra() {
        let json = r#"{"period_start": "2023-07-01", "trade_count": 3, "isin": "RU000A0JX0J2"}"#;
        let data: ParsedData = serde_json::from_str(json).unwrap();
        assert_eq!(data.trade_count, Some(3));
        assert_eq!(data.extra.get("isin").and_then(|v| v.as_str()), Some("RU000A0JX0J2"));
        let back = serde_json::to_string(&data).unwrap();
        assert!(back.contains("\"isin\""));
        assert!(!back.contains("account_number"));
    }

    #[test]
    fn test_is_canonical_period() {
        assert!(is_canonical_period("2023-07"));
        assert!(!is_canonical_period("2023-13"));
        assert!(!is_canonical_period("2023-7"));
        assert!(!is_canonical_period("unknown"));
        assert!(!is_canonical_period("2023/07"));
    }

    #[test]
    fn test_outcome_kind_roundtrip_names() {
        for kind in OutcomeKind::ALL {
            assert_eq!(OutcomeKind::parse(kind.as_str()), Some(kind));
        }
        assert!(!OutcomeKind::PeriodMismatch.is_terminal());
        assert!(OutcomeKind::ParseFailed.is_terminal());
    }
}
