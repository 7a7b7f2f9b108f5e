//! Tracing setup and the timestamped lines shown in the log pane.

use std::fmt;

use chrono::Local;
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "tubefetch=info".into());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One entry of the log pane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Local wall-clock time, `HH:MM:SS`
    pub timestamp: String,
    pub level: LogLevel,
    pub text: String,
}

impl LogLine {
    /// Stamps `text` with the current local time and mirrors it to tracing.
    pub fn new(level: LogLevel, text: impl Into<String>) -> Self {
        let text = text.into();
        match level {
            LogLevel::Info => tracing::info!("{text}"),
            LogLevel::Warn => tracing::warn!("{text}"),
            LogLevel::Error => tracing::error!("{text}"),
        }
        Self {
            timestamp: Local::now().format("%H:%M:%S").to_string(),
            level,
            text,
        }
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp, self.text)
    }
}
