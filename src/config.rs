//! Environment-variable driven run configuration.
//!
//! Grounded on spec.md §6.4 and the way the teacher's `Cli` resolves
//! environment-backed fields once at parse time instead of re-reading
//! `std::env::var` ad hoc. `RunConfig::from_env` is called once in `main`.

use crate::logging::LogLevel;

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub log_level: LogLevel,
    pub run_timeout_secs: u64,
    pub max_retries: usize,
    pub max_workers: Option<usize>,
    pub shell_path: Option<String>,
    pub ssh_auto_accept_hostkeys: bool,
    pub ssh_keepalive_secs: u64,

    /// Resolved policy decisions (DESIGN.md open questions 1 and 2).
    pub retry_on_timeout: bool,
    pub cache_strict_validation: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            log_level: LogLevel::Error,
            run_timeout_secs: 600,
            max_retries: 3,
            max_workers: None,
            shell_path: None,
            ssh_auto_accept_hostkeys: false,
            ssh_keepalive_secs: 30,
            retry_on_timeout: true,
            cache_strict_validation: true,
        }
    }
}

impl RunConfig {
    pub fn from_env() -> Self {
        let mut config = RunConfig::default();

        config.log_level = LogLevel::from_env_or_default();

        if let Some(v) = env_u64("FZ_RUN_TIMEOUT") {
            config.run_timeout_secs = v;
        }

        if let Some(v) = env_usize("FZ_MAX_RETRIES") {
            config.max_retries = v;
        }

        config.max_workers = env_usize("FZ_MAX_WORKERS");

        config.shell_path = std::env::var("FZ_SHELL_PATH").ok().filter(|v| !v.is_empty());

        config.ssh_auto_accept_hostkeys = env_bool("FZ_SSH_AUTO_ACCEPT_HOSTKEYS").unwrap_or(false);

        if let Some(v) = env_u64("FZ_SSH_KEEPALIVE") {
            config.ssh_keepalive_secs = v;
        }

        if let Some(v) = env_bool("FZ_CACHE_STRICT_VALIDATION") {
            config.cache_strict_validation = v;
        }

        config
    }

    /// `PATH` prepended with `shell_path`, if configured, for resolving the
    /// shell utilities the local adapter depends on.
    pub fn effective_path(&self) -> String {
        let existing = std::env::var("PATH").unwrap_or_default();
        match &self.shell_path {
            Some(prefix) => format!("{prefix}:{existing}"),
            None => existing,
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse().ok()
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.parse().ok()
}

fn env_bool(name: &str) -> Option<bool> {
    match std::env::var(name).ok()?.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = RunConfig::default();
        assert_eq!(config.run_timeout_secs, 600);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_workers, None);
        assert!(!config.ssh_auto_accept_hostkeys);
        assert_eq!(config.ssh_keepalive_secs, 30);
    }
}
