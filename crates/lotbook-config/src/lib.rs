//! Configuration management for lotbook
//!
//! This module handles loading, validation, and management of
//! lotbook configuration from YAML files.

pub mod error;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use error::ConfigError;

// ==================== Configuration Types ====================

/// Data storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./lotbook.db")
}

/// Order of the month and day components in QIF dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateOrder {
    /// `M/D/Y`, the US Quicken default
    MonthFirst,
    /// `D/M/Y`, used by most non-US exports
    DayFirst,
}

impl Default for DateOrder {
    fn default() -> Self {
        DateOrder::MonthFirst
    }
}

impl std::str::FromStr for DateOrder {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "month_first" | "mdy" => Ok(DateOrder::MonthFirst),
            "day_first" | "dmy" => Ok(DateOrder::DayFirst),
            _ => Err(format!("Invalid date order: {}", s)),
        }
    }
}

impl std::fmt::Display for DateOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateOrder::MonthFirst => write!(f, "month_first"),
            DateOrder::DayFirst => write!(f, "day_first"),
        }
    }
}

/// QIF import settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ImportConfig {
    /// How to read ambiguous `a/b/c` dates
    #[serde(default)]
    pub date_order: DateOrder,
}

/// Holdings valuation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldingsConfig {
    /// A price older than this many days before the as-of date is stale
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: i64,
    /// Add a cash line per account that holds securities
    #[serde(default = "default_true")]
    pub include_cash: bool,
}

impl Default for HoldingsConfig {
    fn default() -> Self {
        Self {
            stale_after_days: default_stale_after_days(),
            include_cash: true,
        }
    }
}

fn default_stale_after_days() -> i64 {
    1
}

fn default_true() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

const LOG_LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Storage settings
    #[serde(default)]
    pub data: DataConfig,
    /// QIF import settings
    #[serde(default)]
    pub import: ImportConfig,
    /// Holdings settings
    #[serde(default)]
    pub holdings: HoldingsConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_string_lossy().to_string(),
            });
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|_| ConfigError::IoError)?;

        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|_| ConfigError::InvalidYaml)?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.holdings.stale_after_days < 0 {
            return Err(ConfigError::InvalidValue {
                field: "holdings.stale_after_days".to_string(),
                reason: "Stale threshold must not be negative".to_string(),
            });
        }

        let level = self.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                reason: format!("Log level must be one of: {}", LOG_LEVELS.join(", ")),
            });
        }

        if self.data.database_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingField {
                field: "data.database_path".to_string(),
            });
        }

        Ok(())
    }

    /// Generate a default configuration file
    pub fn generate_default() -> &'static str {
        include_str!("../templates/default_config.yaml")
    }

    /// Get the database path
    pub fn database_path(&self) -> PathBuf {
        self.data.database_path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.import.date_order, DateOrder::MonthFirst);
        assert_eq!(config.holdings.stale_after_days, 1);
        assert!(config.holdings.include_cash);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.data.database_path, PathBuf::from("./lotbook.db"));
    }

    #[test]
    fn test_default_template_parses() {
        let config = Config::from_yaml(Config::generate_default());
        assert!(config.is_ok());
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
import:
  date_order: day_first
holdings:
  stale_after_days: 3
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.import.date_order, DateOrder::DayFirst);
        assert_eq!(config.holdings.stale_after_days, 3);
        assert!(config.holdings.include_cash);
    }

    #[test]
    fn test_negative_stale_threshold_rejected() {
        let yaml = "holdings:\n  stale_after_days: -1\n";
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let yaml = "logging:\n  level: loud\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_invalid_yaml() {
        let err = Config::from_yaml("data: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidYaml));
    }

    #[test]
    fn test_date_order_from_str() {
        assert_eq!("day-first".parse::<DateOrder>().unwrap(), DateOrder::DayFirst);
        assert_eq!("MDY".parse::<DateOrder>().unwrap(), DateOrder::MonthFirst);
        assert!("ymd".parse::<DateOrder>().is_err());
    }
}
