//! FZ_LOG_LEVEL translated into a `tracing` subscriber.
//!
//! Grounded on `fz/logging.py`: a five-level vocabulary (`QUIET` through
//! `DEBUG`) read once from the environment, with `QUIET` suppressing even
//! progress output. The original hand-rolls `print` with indentation per
//! level; here the indentation is dropped in favor of `tracing`'s own
//! formatting, since a structured subscriber is the idiomatic choice the
//! rest of the retrieval pack reaches for.

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Quiet,
    Error,
    Warning,
    Info,
    Debug,
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "QUIET" => Ok(LogLevel::Quiet),
            "ERROR" => Ok(LogLevel::Error),
            "WARNING" => Ok(LogLevel::Warning),
            "INFO" => Ok(LogLevel::Info),
            "DEBUG" => Ok(LogLevel::Debug),
            other => Err(Error::InvalidLogLevel(other.to_owned())),
        }
    }
}

impl LogLevel {
    pub fn from_env_or_default() -> Self {
        std::env::var("FZ_LOG_LEVEL")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(LogLevel::Error)
    }

    fn filter_directive(self) -> &'static str {
        match self {
            LogLevel::Quiet => "off",
            LogLevel::Error => "error",
            LogLevel::Warning => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }

    pub fn suppresses_progress(self) -> bool {
        matches!(self, LogLevel::Quiet)
    }
}

/// Installs the global subscriber. Call once from `main`.
pub fn init(level: LogLevel) {
    let filter = EnvFilter::try_new(level.filter_directive()).unwrap_or_else(|_| EnvFilter::new("error"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("Warning".parse::<LogLevel>().unwrap(), LogLevel::Warning);
    }

    #[test]
    fn rejects_unknown_level() {
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn quiet_suppresses_progress() {
        assert!(LogLevel::Quiet.suppresses_progress());
        assert!(!LogLevel::Info.suppresses_progress());
    }
}
