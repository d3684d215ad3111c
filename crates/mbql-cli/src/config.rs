//! Configuration for the mbql CLI
//!
//! Loads configuration from:
//! 1. mbql.yaml (or `--config`) - logging and diagnostics settings
//! 2. .env file - loaded into the environment at startup
//!
//! Environment variables always override file values.

use std::path::{Path, PathBuf};

use mbql_expr::DiagnosticPolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::{LogFormat, LogOutput};

pub const DEFAULT_CONFIG_FILE: &str = "mbql.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {value}")]
    InvalidEnvVar { name: &'static str, value: String },
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directives in `RUST_LOG` syntax
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Directory for log files
    pub directory: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            directory: PathBuf::from("./logs"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub policy: DiagnosticPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub diagnostics: DiagnosticsConfig,
}

impl Config {
    /// Load configuration from a YAML file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Load `path` if given, else `mbql.yaml` when it exists, else defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::load(DEFAULT_CONFIG_FILE),
            None => {
                let mut config = Config::default();
                config.apply_env()?;
                Ok(config)
            }
        }
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.logging.format = LogFormat::from_name(&format).ok_or(ConfigError::InvalidEnvVar {
                name: "LOG_FORMAT",
                value: format,
            })?;
        }
        if let Ok(output) = std::env::var("LOG_OUTPUT") {
            self.logging.output = LogOutput::from_name(&output).ok_or(ConfigError::InvalidEnvVar {
                name: "LOG_OUTPUT",
                value: output,
            })?;
        }
        if let Ok(dir) = std::env::var("LOG_DIR") {
            self.logging.directory = PathBuf::from(dir);
        }
        if let Ok(policy) = std::env::var("MBQL_DIAGNOSTICS_POLICY") {
            self.diagnostics.policy = policy.parse().map_err(|_| ConfigError::InvalidEnvVar {
                name: "MBQL_DIAGNOSTICS_POLICY",
                value: policy,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert_eq!(config.logging.output, LogOutput::Stderr);
        assert_eq!(config.diagnostics.policy, DiagnosticPolicy::CollectAll);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("diagnostics:\n  policy: first-error\n").unwrap();
        assert_eq!(config.diagnostics.policy, DiagnosticPolicy::FirstError);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_load_with_env_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
logging:
  level: "info"
  format: "json"
  output: "both"
  directory: "/tmp/mbql-logs"
diagnostics:
  policy: "collect-all"
"#
        )
        .unwrap();

        std::env::set_var("MBQL_DIAGNOSTICS_POLICY", "first-error");
        let config = Config::load(file.path());
        std::env::remove_var("MBQL_DIAGNOSTICS_POLICY");

        let config = config.unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.output, LogOutput::Both);
        assert_eq!(config.logging.directory, PathBuf::from("/tmp/mbql-logs"));
        assert_eq!(config.diagnostics.policy, DiagnosticPolicy::FirstError);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(dir.path().join("absent.yaml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "diagnostics:\n  policy: sometimes\n").unwrap();
        assert!(matches!(Config::load(file.path()), Err(ConfigError::Yaml(_))));
    }
}
