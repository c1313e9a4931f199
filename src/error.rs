use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerboxError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("Source directory does not exist: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("Unknown broker: {0}")]
    UnknownBroker(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Import finished with {persistence} persistence and {archival} archival failure(s); archive and database need manual reconciliation")]
    IncompleteRun { persistence: usize, archival: usize },

    #[error("Integrity check found {0} issue(s)")]
    IntegrityIssues(usize),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, BrokerboxError>;

impl BrokerboxError {
    /// True for a SQLite UNIQUE violation, i.e. the store rejected a duplicate.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Db(rusqlite::Error::SqliteFailure(err, _)) => {
                err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_unique_violation_detected() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err: BrokerboxError = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn test_other_errors_are_not_unique_violations() {
        let conn = Connection::open_in_memory().unwrap();
        let err: BrokerboxError = conn
            .execute("INSERT INTO missing VALUES (1)", [])
            .unwrap_err()
            .into();
        assert!(!err.is_unique_violation());
        assert!(!BrokerboxError::Other("x".into()).is_unique_violation());
    }
}
