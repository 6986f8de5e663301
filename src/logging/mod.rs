//! Logging setup with tracing integration and sensitive data redaction

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod redaction;
pub use redaction::Redaction;

use tracing_subscriber::EnvFilter;

static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Logging errors
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logger already initialized")]
    AlreadyInitialized,

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive; overridden by `CMDGUARD_LOG` when set.
    pub filter: String,
    /// Optional log file; stderr otherwise.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
            file: None,
        }
    }
}

impl LogConfig {
    /// Map `-v` repetitions onto filter levels.
    pub fn from_verbosity(verbose: u8) -> Self {
        let filter = match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        Self {
            filter: filter.to_string(),
            file: None,
        }
    }
}

/// Initialize the global tracing subscriber. Safe to call once per process;
/// later calls report `AlreadyInitialized`.
pub fn init(config: &LogConfig) -> Result<(), LogError> {
    if LOGGER_INITIALIZED.swap(true, Ordering::SeqCst) {
        return Err(LogError::AlreadyInitialized);
    }

    let filter = EnvFilter::try_from_env("CMDGUARD_LOG")
        .unwrap_or_else(|_| EnvFilter::new(config.filter.clone()));

    match &config.file {
        Some(path) => {
            let directory = path.parent().unwrap_or(std::path::Path::new("."));
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "cmdguard.log".to_string());
            let appender = tracing_appender::rolling::never(directory, file_name);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(appender)
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_filters() {
        assert_eq!(LogConfig::from_verbosity(0).filter, "warn");
        assert_eq!(LogConfig::from_verbosity(1).filter, "info");
        assert_eq!(LogConfig::from_verbosity(2).filter, "debug");
        assert_eq!(LogConfig::from_verbosity(9).filter, "trace");
    }
}
