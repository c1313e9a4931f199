use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{BrokerboxError, Result};
use crate::models::UNKNOWN_BROKER;

const REGEX_PREFIX: &str = "re:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPatterns {
    pub id: String,
    #[serde(default)]
    pub filename_patterns: Vec<String>,
    #[serde(default)]
    pub content_patterns: Vec<String>,
}

/// Broker detection table. Order of `brokers` is the tie-break order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternTable {
    pub brokers: Vec<BrokerPatterns>,
}

fn entry(id: &str, filename: &[&str], content: &[&str]) -> BrokerPatterns {
    BrokerPatterns {
        id: id.to_string(),
        filename_patterns: filename.iter().map(|s| s.to_string()).collect(),
        content_patterns: content.iter().map(|s| s.to_string()).collect(),
    }
}

impl PatternTable {
    pub fn builtin() -> Self {
        Self {
            brokers: vec![
                entry("sber", &["sber", "сбер"], &["сбербанк", "sberbank", "сбер"]),
                entry("tinkoff", &["tinkoff", "тинькофф", "tbank"], &["тинькофф", "tinkoff", "т-банк"]),
                entry("vtb", &["vtb", "втб"], &["втб капитал", "втб", "vtb"]),
                entry("gazprombank", &["gazprombank", "газпромбанк"], &["газпромбанк", "gazprombank"]),
                entry("alpha", &["alfa", "alpha", "альфа"], &["альфа-банк", "alfa-bank", "альфа"]),
            ],
        }
    }

    /// Reads the table from disk, or the built-in table when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No pattern file, using built-in table");
            return Ok(Self::builtin());
        }
        let content = std::fs::read_to_string(path)?;
        let table: PatternTable = serde_json::from_str(&content).map_err(|e| {
            BrokerboxError::Settings(format!("invalid pattern file {}: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), brokers = table.brokers.len(), "Loaded broker patterns");
        Ok(table)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, format!("{json}\n"))?;
        Ok(())
    }

    pub fn contains(&self, broker: &str) -> bool {
        self.brokers.iter().any(|b| b.id == broker)
    }

    pub fn compile(&self) -> Result<Classifier> {
        let mut entries = Vec::with_capacity(self.brokers.len());
        for broker in &self.brokers {
            if broker.id == UNKNOWN_BROKER {
                continue;
            }
            entries.push(CompiledBroker {
                id: broker.id.clone(),
                filename: compile_all(&broker.filename_patterns)?,
                content: compile_all(&broker.content_patterns)?,
            });
        }
        Ok(Classifier { entries })
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Matcher>> {
    patterns.iter().map(|p| Matcher::new(p)).collect()
}

#[derive(Debug)]
enum Matcher {
    /// Lowercased needle.
    Substring(String),
    Regex(Regex),
}

impl Matcher {
    fn new(pattern: &str) -> Result<Self> {
        match pattern.strip_prefix(REGEX_PREFIX) {
            Some(re) => Ok(Self::Regex(RegexBuilder::new(re).case_insensitive(true).build()?)),
            None => Ok(Self::Substring(pattern.to_lowercase())),
        }
    }

    fn is_match(&self, haystack: &str, haystack_lower: &str) -> bool {
        match self {
            Self::Substring(needle) => !needle.is_empty() && haystack_lower.contains(needle.as_str()),
            Self::Regex(re) => re.is_match(haystack),
        }
    }

    fn source(&self) -> String {
        match self {
            Self::Substring(needle) => needle.clone(),
            Self::Regex(re) => format!("{REGEX_PREFIX}{}", re.as_str()),
        }
    }
}

#[derive(Debug)]
struct CompiledBroker {
    id: String,
    filename: Vec<Matcher>,
    content: Vec<Matcher>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Filename,
    Content,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub broker: String,
    pub tier: Tier,
    pub pattern: Option<String>,
}

#[derive(Debug)]
pub struct Classifier {
    entries: Vec<CompiledBroker>,
}

impl Classifier {
    /// Filename evidence first, then content; first broker in table order wins within a tier.
    pub fn classify(&self, file_name: &str, content: &str) -> Classification {
        let name_lower = file_name.to_lowercase();
        if let Some((id, pattern)) = self.first_match(file_name, &name_lower, |b| &b.filename) {
            return Classification {
                broker: id,
                tier: Tier::Filename,
                pattern: Some(pattern),
            };
        }

        let content_lower = content.to_lowercase();
        if let Some((id, pattern)) = self.first_match(content, &content_lower, |b| &b.content) {
            return Classification {
                broker: id,
                tier: Tier::Content,
                pattern: Some(pattern),
            };
        }

        Classification {
            broker: UNKNOWN_BROKER.to_string(),
            tier: Tier::Fallback,
            pattern: None,
        }
    }

    fn first_match<F>(&self, haystack: &str, haystack_lower: &str, tier: F) -> Option<(String, String)>
    where
        F: Fn(&CompiledBroker) -> &Vec<Matcher>,
    {
        self.entries.iter().find_map(|broker| {
            tier(broker)
                .iter()
                .find(|m| m.is_match(haystack, haystack_lower))
                .map(|m| (broker.id.clone(), m.source()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier(brokers: Vec<BrokerPatterns>) -> Classifier {
        PatternTable { brokers }.compile().unwrap()
    }

    #[test]
    fn test_filename_match_wins_over_content() {
        let c = classifier(vec![
            entry("sber", &["sber"], &[]),
            entry("vtb", &[], &["втб"]),
        ]);
        let result = c.classify("SBER_2023-07.html", "Отчет ВТБ Капитал");
        assert_eq!(result.broker, "sber");
        assert_eq!(result.tier, Tier::Filename);
    }

    #[test]
    fn test_content_tier_used_when_filename_silent() {
        let c = classifier(vec![
            entry("sber", &["sber"], &["сбербанк"]),
            entry("vtb", &["vtb"], &["втб"]),
        ]);
        let result = c.classify("report_2023-07.html", "<p>Банк ВТБ</p>");
        assert_eq!(result.broker, "vtb");
        assert_eq!(result.tier, Tier::Content);
        assert_eq!(result.pattern.as_deref(), Some("втб"));
    }

    #[test]
    fn test_ties_broken_by_table_order_not_match_count() {
        let c = classifier(vec![
            entry("alpha", &[], &["alpha"]),
            entry("sber", &[], &["sber"]),
        ]);
        let result = c.classify("x.html", "sber sber sber sber alpha");
        assert_eq!(result.broker, "alpha");
    }

    #[test]
    fn test_falls_back_to_unknown() {
        let c = classifier(vec![entry("sber", &["sber"], &["сбербанк"])]);
        let result = c.classify("statement.html", "nothing to see");
        assert_eq!(result.broker, UNKNOWN_BROKER);
        assert_eq!(result.tier, Tier::Fallback);
        assert!(result.pattern.is_none());
    }

    #[test]
    fn test_regex_patterns_are_case_insensitive() {
        let c = classifier(vec![entry("tinkoff", &[r"re:^broker_report_\d+"], &[])]);
        assert_eq!(c.classify("BROKER_REPORT_2023.html", "").broker, "tinkoff");
        assert_eq!(c.classify("my_broker_report_2023.html", "").broker, UNKNOWN_BROKER);
    }

    #[test]
    fn test_unknown_entry_in_table_is_ignored() {
        let c = classifier(vec![entry("unknown", &["report"], &[]), entry("vtb", &["report"], &[])]);
        assert_eq!(c.classify("report.html", "").broker, "vtb");
    }

    #[test]
    fn test_invalid_regex_rejected_at_compile() {
        let table = PatternTable {
            brokers: vec![entry("bad", &["re:(unclosed"], &[])],
        };
        assert!(table.compile().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let table = PatternTable::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(table, PatternTable::builtin());
    }

    #[test]
    fn test_save_then_load_picks_up_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patterns.json");
        let mut table = PatternTable::builtin();
        table.save(&path).unwrap();
        table.brokers.push(entry("finam", &["finam"], &["финам"]));
        table.save(&path).unwrap();
        let loaded = PatternTable::load(&path).unwrap();
        assert!(loaded.contains("finam"));
        assert_eq!(loaded.compile().unwrap().classify("finam_2024-01.html", "").broker, "finam");
    }

    #[test]
    fn test_load_invalid_json_is_settings_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patterns.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(PatternTable::load(&path), Err(BrokerboxError::Settings(_))));
    }

    #[test]
    fn test_builtin_detects_cyrillic_names() {
        let c = PatternTable::builtin().compile().unwrap();
        assert_eq!(c.classify("Отчет_Сбербанк.html", "").broker, "sber");
        assert_eq!(c.classify("report.html", "АО «Тинькофф Банк»").broker, "tinkoff");
    }
}
