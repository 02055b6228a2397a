//! Logging utilities for knit
//!
//! This module is only available with the `logging` feature.
//!
//! For library users: knit emits tracing events - install your own subscriber.
//! For application developers: use these convenience functions.

use std::sync::Once;

use knit_config::GlobalSettings;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Result, TraceError};

static INIT: Once = Once::new();

const KNIT_TARGETS: [&str; 3] = ["knit_config", "knit_graph", "knit_trace"];

/// Log level for knit output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    /// No logging output
    Silent,
    Error,
    Warn,
    /// Trace summaries (default)
    #[default]
    Info,
    /// One event per computed load record
    Debug,
    /// Also cache hits
    Trace,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Silent => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Directives applying this level to the knit crates only; everything
    /// else stays at `warn`.
    fn directives(&self) -> String {
        if *self == LogLevel::Silent {
            return "off".to_string();
        }
        let mut directives = vec!["warn".to_string()];
        directives.extend(
            KNIT_TARGETS
                .iter()
                .map(|target| format!("{}={}", target, self.as_filter())),
        );
        directives.join(",")
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "silent" | "off" => Ok(LogLevel::Silent),
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("Invalid log level: {}", other)),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_filter())
    }
}

fn install(filter: EnvFilter) {
    INIT.call_once(|| {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_target(false).without_time())
            .init();
    });
}

/// Initialize knit logging with specified level
///
/// `RUST_LOG`, when set, takes precedence. Only the first call in a process
/// installs a subscriber.
///
/// # Example
///
/// ```rust,no_run
/// use knit_trace::logging::{init_logging, LogLevel};
///
/// init_logging(LogLevel::Info);
/// ```
pub fn init_logging(level: LogLevel) {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => {
            EnvFilter::builder().parse_lossy(directives)
        }
        _ => EnvFilter::builder().parse_lossy(level.directives()),
    };
    install(filter);
}

/// Initialize logging from RUST_LOG environment variable
///
/// Falls back to Info level for the knit crates if RUST_LOG is not set or
/// invalid.
pub fn init_logging_from_env() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::builder().parse_lossy(LogLevel::Info.directives()));
    install(filter);
}

/// Initialize logging from the `[settings]` table of a knit configuration.
pub fn init_logging_from_settings(settings: &GlobalSettings) -> Result<()> {
    let level = match settings.log_level.as_deref() {
        Some(level) => level.parse::<LogLevel>().map_err(TraceError::Config)?,
        None => LogLevel::default(),
    };
    init_logging(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("info".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("off".parse::<LogLevel>().unwrap(), LogLevel::Silent);
        assert_eq!("INFO".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_directives_scope_knit_crates() {
        assert_eq!(
            LogLevel::Debug.directives(),
            "warn,knit_config=debug,knit_graph=debug,knit_trace=debug"
        );
        assert_eq!(LogLevel::Silent.to_string(), "off");
    }

    #[test]
    fn test_invalid_settings_level_is_config_error() {
        let settings = GlobalSettings {
            log_level: Some("loud".to_string()),
        };
        assert!(matches!(
            init_logging_from_settings(&settings),
            Err(TraceError::Config(_))
        ));
    }
}
