//! Structured logging setup shared by the tether binaries and tests.
//!
//! Level, format and destination come from `TETHER_LOG_LEVEL`,
//! `TETHER_LOG_FORMAT` and `TETHER_LOG_FILE`; `TETHER_LOG_FILTER` replaces
//! the computed filter with a full `EnvFilter` directive string.

use crate::config::env::EnvParser;
use std::fs::OpenOptions;
use std::path::PathBuf;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Dependencies that are chatty at debug level.
const NOISY_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls", "mio"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "pretty" | "text" | "human" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
    /// Write to stderr instead of stdout when no file is configured.
    pub stderr: bool,
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to open log file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid log filter: {0}")]
    Filter(String),
    #[error("failed to install subscriber: {0}")]
    Install(String),
}

impl LogConfig {
    /// Read logging settings from the environment. Invalid values are ignored.
    pub fn from_env(default_level: &str) -> Self {
        let mut parser = EnvParser::new();
        let level = parser.get_log_level("LOG_LEVEL", default_level).value;
        let format = parser
            .get_optional_string("LOG_FORMAT")
            .value
            .and_then(|v| LogFormat::parse(&v))
            .unwrap_or_default();
        let file = parser.get_path("LOG_FILE").value;
        Self {
            level,
            format,
            file,
            stderr: false,
        }
    }

    pub fn with_level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    fn filter_directives(&self) -> String {
        if let Ok(filter) = std::env::var("TETHER_LOG_FILTER") {
            return filter;
        }
        let mut directives = self.level.clone();
        if matches!(self.level.as_str(), "debug" | "trace") {
            for target in NOISY_TARGETS {
                directives.push_str(&format!(",{target}=info"));
            }
        }
        directives
    }
}

/// Keeps the non-blocking writers flushing until dropped.
#[must_use = "dropping the guards stops log output"]
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

/// Install the global subscriber. Only the first call in a process wins;
/// later calls return an [`LoggingError::Install`] error.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards, LoggingError> {
    let filter = EnvFilter::try_new(config.filter_directives())
        .map_err(|e| LoggingError::Filter(e.to_string()))?;

    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::Io {
                    path: path.clone(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None if config.stderr => tracing_appender::non_blocking(std::io::stderr()),
        None => tracing_appender::non_blocking(std::io::stdout()),
    };
    let ansi = config.file.is_none() && config.format == LogFormat::Pretty;
    let verbose = matches!(config.level.as_str(), "debug" | "trace");

    let installed = match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(verbose)
            .with_ansi(ansi)
            .with_writer(writer)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_writer(writer)
            .try_init(),
    };
    installed.map_err(|e| LoggingError::Install(e.to_string()))?;

    Ok(LoggingGuards {
        _guards: vec![guard],
    })
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("pretty"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    #[serial]
    fn test_from_env_reads_level_and_format() {
        // SAFETY: serialized with other environment tests.
        unsafe {
            std::env::set_var("TETHER_LOG_LEVEL", "warning");
            std::env::set_var("TETHER_LOG_FORMAT", "json");
        }
        let config = LogConfig::from_env("info");
        // SAFETY: serialized with other environment tests.
        unsafe {
            std::env::remove_var("TETHER_LOG_LEVEL");
            std::env::remove_var("TETHER_LOG_FORMAT");
        }
        assert_eq!(config.level, "warn");
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.file.is_none());
    }

    #[test]
    #[serial]
    fn test_debug_level_quiets_http_stack() {
        // SAFETY: serialized with other environment tests.
        unsafe { std::env::remove_var("TETHER_LOG_FILTER") };
        let config = LogConfig::from_env("info").with_level("debug").with_stderr();
        let directives = config.filter_directives();
        assert!(directives.starts_with("debug"));
        assert!(directives.contains("reqwest=info"));
        assert!(config.stderr);
    }
}
