use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{BrokerboxError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    /// Overrides `<data_dir>/inbox`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbox_dir: Option<String>,
    /// Overrides `<data_dir>/archive`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_dir: Option<String>,
    /// Overrides `<data_dir>/brokers_patterns.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patterns_file: Option<String>,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_supported_extensions")]
    pub supported_extensions: Vec<String>,
}

fn default_max_file_size_mb() -> u64 {
    50
}

fn default_supported_extensions() -> Vec<String> {
    ["html", "htm", "txt", "md"].iter().map(|s| s.to_string()).collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            inbox_dir: None,
            archive_dir: None,
            patterns_file: None,
            max_file_size_mb: default_max_file_size_mb(),
            supported_extensions: default_supported_extensions(),
        }
    }
}

impl Settings {
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_path().join("brokerbox.db")
    }

    pub fn inbox_path(&self) -> PathBuf {
        match &self.inbox_dir {
            Some(dir) => PathBuf::from(dir),
            None => self.data_path().join("inbox"),
        }
    }

    pub fn archive_path(&self) -> PathBuf {
        match &self.archive_dir {
            Some(dir) => PathBuf::from(dir),
            None => self.data_path().join("archive"),
        }
    }

    pub fn patterns_path(&self) -> PathBuf {
        match &self.patterns_file {
            Some(file) => PathBuf::from(file),
            None => self.data_path().join("brokers_patterns.json"),
        }
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("brokerbox")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("brokerbox")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    if path.exists() {
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        match serde_json::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable settings file");
                Settings::default()
            }
        }
    } else {
        Settings::default()
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| BrokerboxError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = Settings {
            data_dir: "/tmp/brokerbox".to_string(),
            inbox_dir: Some("/tmp/drop".to_string()),
            max_file_size_mb: 5,
            ..Settings::default()
        };
        let json = serde_json::to_string_pretty(&settings).unwrap();
        std::fs::write(&path, &json).unwrap();
        let loaded: Settings = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.data_dir, "/tmp/brokerbox");
        assert_eq!(loaded.inbox_path(), PathBuf::from("/tmp/drop"));
        assert_eq!(loaded.max_file_size_mb, 5);
    }

    #[test]
    fn test_load_merges_with_defaults() {
        let s: Settings = serde_json::from_str(r#"{"data_dir": "/srv/reports"}"#).unwrap();
        assert_eq!(s.max_file_size_mb, 50);
        assert!(s.supported_extensions.contains(&"html".to_string()));
        assert_eq!(s.inbox_path(), PathBuf::from("/srv/reports/inbox"));
        assert_eq!(s.archive_path(), PathBuf::from("/srv/reports/archive"));
        assert_eq!(s.db_path(), PathBuf::from("/srv/reports/brokerbox.db"));
        assert_eq!(
            s.patterns_path(),
            PathBuf::from("/srv/reports/brokers_patterns.json")
        );
    }

    #[test]
    fn test_unset_overrides_are_not_serialized() {
        let json = serde_json::to_string(&Settings::default()).unwrap();
        assert!(!json.contains("inbox_dir"));
        assert!(!json.contains("archive_dir"));
    }

    #[test]
    fn test_max_file_size_bytes() {
        let s = Settings {
            max_file_size_mb: 2,
            ..Settings::default()
        };
        assert_eq!(s.max_file_size_bytes(), 2 * 1024 * 1024);
    }
}
