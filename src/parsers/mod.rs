pub mod sber;

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;

use crate::models::{ParsedData, UNKNOWN_BROKER};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid parser output: {0}")]
    InvalidOutput(String),
}

/// Broker-specific extraction. Implementations read the content and return data;
/// they never touch the filesystem or the database.
pub trait Parser {
    fn parse(&self, content: &str) -> Result<ParsedData, ParseError>;
    fn version(&self) -> &str;
}

pub type ParserFactory = Box<dyn Fn() -> Box<dyn Parser>>;

/// What the pipeline gets back from a parse attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed { data: ParsedData, version: String },
    NoParser,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserInfo {
    pub broker: String,
    pub version: String,
}

#[derive(Default)]
pub struct ParserRegistry {
    factories: BTreeMap<String, ParserFactory>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every parser that ships with brokerbox.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("sber", || Box::new(sber::SberParser));
        registry
    }

    pub fn register<F>(&mut self, broker: &str, factory: F)
    where
        F: Fn() -> Box<dyn Parser> + 'static,
    {
        if self.factories.insert(broker.to_string(), Box::new(factory)).is_some() {
            tracing::debug!(broker, "Replaced registered parser");
        }
    }

    pub fn supports(&self, broker: &str) -> bool {
        broker != UNKNOWN_BROKER && self.factories.contains_key(broker)
    }

    pub fn lookup(&self, broker: &str) -> Option<Box<dyn Parser>> {
        if broker == UNKNOWN_BROKER {
            return None;
        }
        self.factories.get(broker).map(|factory| factory())
    }

    pub fn brokers(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn info(&self) -> Vec<ParserInfo> {
        self.factories
            .iter()
            .map(|(broker, factory)| ParserInfo {
                broker: broker.clone(),
                version: factory().version().to_string(),
            })
            .collect()
    }

    /// Runs the broker's parser and folds every failure mode into a `ParseOutcome`.
    /// A parser that panics is reported as a failure instead of taking the run down.
    pub fn invoke(&self, broker: &str, content: &str) -> ParseOutcome {
        let Some(parser) = self.lookup(broker) else {
            return ParseOutcome::NoParser;
        };
        let version = parser.version().to_string();

        let result = panic::catch_unwind(AssertUnwindSafe(|| parser.parse(content)));
        match result {
            Ok(Ok(mut data)) => {
                if let Err(reason) = data.validate() {
                    return ParseOutcome::Failed {
                        reason: ParseError::InvalidOutput(reason).to_string(),
                    };
                }
                if data.parser_version.is_none() {
                    data.parser_version = Some(version.clone());
                }
                ParseOutcome::Parsed { data, version }
            }
            Ok(Err(e)) => ParseOutcome::Failed { reason: e.to_string() },
            Err(_) => ParseOutcome::Failed {
                reason: format!("{broker} parser {version} panicked"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedParser;

    impl Parser for FixedParser {
        fn parse(&self, _content: &str) -> Result<ParsedData, ParseError> {
            Ok(ParsedData {
                period_start: Some("2023-07-01".into()),
                ..ParsedData::default()
            })
        }

        fn version(&self) -> &str {
            "1.0"
        }
    }

    struct BrokenParser;

    impl Parser for BrokenParser {
        fn parse(&self, _content: &str) -> Result<ParsedData, ParseError> {
            Err(ParseError::Malformed("no tables".into()))
        }

        fn version(&self) -> &str {
            "0.1"
        }
    }

    struct ReversedPeriodParser;

    impl Parser for ReversedPeriodParser {
        fn parse(&self, _content: &str) -> Result<ParsedData, ParseError> {
            Ok(ParsedData {
                period_start: Some("2023-07-31".into()),
                period_end: Some("2023-07-01".into()),
                ..ParsedData::default()
            })
        }

        fn version(&self) -> &str {
            "0.2"
        }
    }

    struct PanickingParser;

    impl Parser for PanickingParser {
        fn parse(&self, _content: &str) -> Result<ParsedData, ParseError> {
            panic!("index out of bounds")
        }

        fn version(&self) -> &str {
            "0.3"
        }
    }

    #[test]
    fn test_builtin_registry_supports_sber() {
        let registry = ParserRegistry::with_builtin();
        assert!(registry.supports("sber"));
        assert!(!registry.supports("nonexistent"));
        assert!(!registry.supports(""));
        assert!(!registry.supports(UNKNOWN_BROKER));
        assert!(registry.lookup("sber").is_some());
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ParserRegistry::new();
        assert!(registry.lookup("test_broker").is_none());
        registry.register("test_broker", || Box::new(FixedParser));
        assert!(registry.supports("test_broker"));
        assert_eq!(registry.lookup("test_broker").unwrap().version(), "1.0");
        assert_eq!(registry.brokers(), vec!["test_broker"]);
    }

    #[test]
    fn test_unknown_is_never_supported() {
        let mut registry = ParserRegistry::new();
        registry.register(UNKNOWN_BROKER, || Box::new(FixedParser));
        assert_eq!(registry.invoke(UNKNOWN_BROKER, "x"), ParseOutcome::NoParser);
    }

    #[test]
    fn test_info_lists_versions_sorted() {
        let mut registry = ParserRegistry::new();
        registry.register("zeta", || Box::new(BrokenParser));
        registry.register("alpha", || Box::new(FixedParser));
        let info = registry.info();
        assert_eq!(info[0], ParserInfo { broker: "alpha".into(), version: "1.0".into() });
        assert_eq!(info[1].broker, "zeta");
    }

    #[test]
    fn test_invoke_success_stamps_version() {
        let mut registry = ParserRegistry::new();
        registry.register("acme", || Box::new(FixedParser));
        match registry.invoke("acme", "content") {
            ParseOutcome::Parsed { data, version } => {
                assert_eq!(version, "1.0");
                assert_eq!(data.parser_version.as_deref(), Some("1.0"));
                assert_eq!(data.canonical_period().as_deref(), Some("2023-07"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_invoke_missing_parser() {
        let registry = ParserRegistry::new();
        assert_eq!(registry.invoke("acme", "content"), ParseOutcome::NoParser);
    }

    #[test]
    fn test_invoke_parser_error() {
        let mut registry = ParserRegistry::new();
        registry.register("acme", || Box::new(BrokenParser));
        assert_eq!(
            registry.invoke("acme", "content"),
            ParseOutcome::Failed { reason: "malformed document: no tables".into() }
        );
    }

    #[test]
    fn test_invalid_output_treated_as_failure() {
        let mut registry = ParserRegistry::new();
        registry.register("acme", || Box::new(ReversedPeriodParser));
        match registry.invoke("acme", "content") {
            ParseOutcome::Failed { reason } => assert!(reason.starts_with("invalid parser output")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_panicking_parser_is_contained() {
        let mut registry = ParserRegistry::new();
        registry.register("acme", || Box::new(PanickingParser));
        match registry.invoke("acme", "content") {
            ParseOutcome::Failed { reason } => assert!(reason.contains("panicked")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
