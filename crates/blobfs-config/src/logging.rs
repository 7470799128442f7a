//! Structured logging utilities for blobfs components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//! Fields follow the message and accept the usual `tracing` sigils.
//!
//! # Usage
//!
//! ```ignore
//! use blobfs_config::{log_cli_debug, log_store_info};
//!
//! log_store_info!("Saved blob", id = %id, bytes = size);
//! log_cli_debug!("Parsed arguments", command = "save");
//! ```

use std::fmt;
use std::str::FromStr;

/// Overrides every other filter source when set
pub const ENV_LOG: &str = "BLOBFS_LOG";

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const STORE: &'static str = "STORE";
    pub const CLI: &'static str = "CLI";
    pub const CONFIG: &'static str = "CONFIG";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Raise the level by `steps` (e.g. once per `-v`), saturating at trace.
    pub fn raised(self, steps: u8) -> Self {
        const ORDER: [LogLevel; 5] = [
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ];
        let index = self as usize + steps as usize;
        ORDER[index.min(ORDER.len() - 1)]
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

// === STORE logging macros ===

#[macro_export]
macro_rules! log_store_error {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::error!(component = "STORE", $($($field)+,)? $msg)
    };
}

#[macro_export]
macro_rules! log_store_warn {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::warn!(component = "STORE", $($($field)+,)? $msg)
    };
}

#[macro_export]
macro_rules! log_store_info {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::info!(component = "STORE", $($($field)+,)? $msg)
    };
}

#[macro_export]
macro_rules! log_store_debug {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::debug!(component = "STORE", $($($field)+,)? $msg)
    };
}

// === CLI logging macros ===

#[macro_export]
macro_rules! log_cli_warn {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::warn!(component = "CLI", $($($field)+,)? $msg)
    };
}

#[macro_export]
macro_rules! log_cli_info {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::info!(component = "CLI", $($($field)+,)? $msg)
    };
}

#[macro_export]
macro_rules! log_cli_debug {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::debug!(component = "CLI", $($($field)+,)? $msg)
    };
}

// === CONFIG logging macros ===

#[macro_export]
macro_rules! log_config_warn {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::warn!(component = "CONFIG", $($($field)+,)? $msg)
    };
}

#[macro_export]
macro_rules! log_config_debug {
    ($msg:literal $(, $($field:tt)+)?) => {
        tracing::debug!(component = "CONFIG", $($($field)+,)? $msg)
    };
}

/// Filter directive for `level`, unless `BLOBFS_LOG` or `RUST_LOG` is set.
pub fn filter_directive(level: LogLevel) -> String {
    std::env::var(ENV_LOG)
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .filter(|directive| !directive.trim().is_empty())
        .unwrap_or_else(|| level.as_str().to_string())
}

/// Initialize logging with the given level filter.
/// Call this once at application startup.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_new(filter_directive(level))
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
