//! Structured logging for the mbql CLI
//!
//! Logs go to stderr so command output on stdout stays machine-readable.
//! Optionally also (or only) to daily-rotated files.

use serde::{Deserialize, Serialize};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "mbql.log";

/// Log format configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format for development
    Pretty,
    /// JSON format for log collection
    Json,
    /// Single-line format
    #[default]
    Compact,
}

impl LogFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pretty" => Some(LogFormat::Pretty),
            "json" => Some(LogFormat::Json),
            "compact" => Some(LogFormat::Compact),
            _ => None,
        }
    }
}

/// Log output configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Log to stderr only
    #[default]
    Stderr,
    /// Log to file only
    File,
    /// Log to both stderr and file
    Both,
}

impl LogOutput {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "stderr" => Some(LogOutput::Stderr),
            "file" => Some(LogOutput::File),
            "both" => Some(LogOutput::Both),
            _ => None,
        }
    }
}

fn stderr_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_writer(std::io::stderr).boxed(),
    }
}

/// Initialize the logging system from configuration
///
/// `config.level` takes `RUST_LOG` syntax, e.g. `"warn"` or
/// `"mbql_drill=debug,info"`. An unparsable level falls back to `warn`.
pub fn init(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("warn"));

    match config.output {
        LogOutput::Stderr => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer(config.format))
                .init();
        }
        LogOutput::File => {
            std::fs::create_dir_all(&config.directory).ok();
            let file_appender = RollingFileAppender::new(Rotation::DAILY, &config.directory, LOG_FILE_PREFIX);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(file_appender).with_ansi(false))
                .init();
        }
        LogOutput::Both => {
            std::fs::create_dir_all(&config.directory).ok();
            let file_appender = RollingFileAppender::new(Rotation::DAILY, &config.directory, LOG_FILE_PREFIX);

            let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false).boxed();

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer(config.format))
                .with(file_layer)
                .init();
        }
    }

    tracing::debug!(
        format = ?config.format,
        output = ?config.output,
        level = %config.level,
        "Logging initialized"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_names() {
        assert_eq!(LogFormat::from_name("json"), Some(LogFormat::Json));
        assert_eq!(LogFormat::from_name("pretty"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::from_name("compact"), Some(LogFormat::Compact));
        assert_eq!(LogFormat::from_name("xml"), None);
    }

    #[test]
    fn test_log_output_names() {
        assert_eq!(LogOutput::from_name("file"), Some(LogOutput::File));
        assert_eq!(LogOutput::from_name("both"), Some(LogOutput::Both));
        assert_eq!(LogOutput::from_name("stderr"), Some(LogOutput::Stderr));
        assert_eq!(LogOutput::from_name("stdout"), None);
    }
}
