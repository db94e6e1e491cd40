//! Calculator adapters: the five ways a case can actually be executed.
//!
//! Grounded on `fz/runners.py` in its entirety. The §9 redesign in
//! SPEC_FULL.md §4.5 replaces the original's runtime-typed URI strings
//! threaded everywhere with a parsed, tagged `CalculatorSpec` enum —
//! parsing happens once, at pool construction, not on every case dispatch.

pub mod cache;
pub mod funz;
pub mod local;
pub mod pool;
pub mod slurm;
pub mod ssh;

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::prelude::*;

/// Shared interrupt flag threaded from the scheduler down into every running
/// adapter so Ctrl+C can abort a case mid-execution, not just between cases.
pub type CancellationToken = Arc<AtomicBool>;

/// A parsed, validated calculator target. Constructed once from a URI or
/// alias and then handed to the matching adapter for every case it runs.
#[derive(Debug, Clone)]
pub enum CalculatorSpec {
    Local {
        command: Option<String>,
    },
    Ssh {
        host: String,
        port: u16,
        username: Option<String>,
        password: Option<String>,
        command: String,
    },
    Slurm {
        host: Option<String>,
        port: Option<u16>,
        username: Option<String>,
        password: Option<String>,
        partition: String,
        script: String,
    },
    Funz {
        host: String,
        port: u16,
        code: String,
    },
    Cache {
        glob: String,
    },
}

impl CalculatorSpec {
    /// Resolves a calculator argument that may be a URI, or a bare alias
    /// name pointing at a `.fz/calculators/<name>.json` descriptor whose
    /// `uri` field (plus an optional per-model command override under
    /// `commands.<model-id>`) composes the final URI, per spec.md §6.1/§6.2.
    pub fn resolve(spec: &str, project_root: &Path, model_id: Option<&str>) -> AppResult<Self> {
        if spec.contains("://") || spec.is_empty() {
            return CalculatorSpec::parse(spec);
        }

        let Some(descriptor) = crate::io::aliases::resolve_json_or_path_or_alias(spec, project_root, "calculators")?
        else {
            return Err(Error::CalculatorAliasNotFound(spec.to_owned()).into());
        };

        let uri = descriptor
            .get("uri")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::MalformedCalculatorUri {
                uri: spec.to_owned(),
                reason: "calculator descriptor has no 'uri' field".to_owned(),
            })?;

        let command_override = model_id
            .and_then(|id| descriptor.get("commands").and_then(|commands| commands.get(id)))
            .and_then(|v| v.as_str());

        let mut spec = CalculatorSpec::parse(uri)?;
        if let Some(command) = command_override {
            spec.set_command(command.to_owned());
        }
        Ok(spec)
    }

    fn set_command(&mut self, command: String) {
        match self {
            CalculatorSpec::Local { command: c } => *c = Some(command),
            CalculatorSpec::Ssh { command: c, .. } => *c = command,
            CalculatorSpec::Slurm { script: c, .. } => *c = command,
            _ => {}
        }
    }

    pub fn parse(uri: &str) -> AppResult<Self> {
        if let Some(rest) = uri.strip_prefix("ssh://") {
            return ssh::parse_ssh_uri(rest).map(|(host, port, username, password, command)| {
                CalculatorSpec::Ssh { host, port, username, password, command }
            });
        }
        if let Some(rest) = uri.strip_prefix("slurm://") {
            return slurm::parse_slurm_uri(rest).map(
                |(host, port, username, password, partition, script)| CalculatorSpec::Slurm {
                    host,
                    port,
                    username,
                    password,
                    partition,
                    script,
                },
            );
        }
        if let Some(rest) = uri.strip_prefix("funz://") {
            return parse_funz_uri(rest);
        }
        if let Some(rest) = uri.strip_prefix("cache://") {
            return Ok(CalculatorSpec::Cache { glob: rest.to_owned() });
        }
        if let Some(rest) = uri.strip_prefix("sh://") {
            let command = if rest.is_empty() { None } else { Some(rest.to_owned()) };
            return Ok(CalculatorSpec::Local { command });
        }
        if uri.is_empty() || uri == "local" {
            return Ok(CalculatorSpec::Local { command: None });
        }

        let scheme = uri.split("://").next().unwrap_or(uri);
        Err(Error::UnknownCalculatorScheme(scheme.to_owned()).into())
    }

    pub fn scheme_label(&self) -> &'static str {
        match self {
            CalculatorSpec::Local { .. } => "sh",
            CalculatorSpec::Ssh { .. } => "ssh",
            CalculatorSpec::Slurm { .. } => "slurm",
            CalculatorSpec::Funz { .. } => "funz",
            CalculatorSpec::Cache { .. } => "cache",
        }
    }
}

/// `funz://[host]:<udp-port>/<code>`. `host` defaults to `localhost` when
/// omitted (broadcast discovery binds locally); `code` is the calculator
/// code name passed to `EXECUTE` for every case this instance runs.
fn parse_funz_uri(rest: &str) -> AppResult<CalculatorSpec> {
    let (host_port, code) = rest.split_once('/').ok_or_else(|| Error::MalformedCalculatorUri {
        uri: format!("funz://{rest}"),
        reason: "expected host:port/code".to_owned(),
    })?;
    let (host, port) = host_port
        .split_once(':')
        .ok_or_else(|| Error::MalformedCalculatorUri {
            uri: format!("funz://{rest}"),
            reason: "expected host:port".to_owned(),
        })?;
    let host = if host.is_empty() { "localhost" } else { host };
    let port: u16 = port.parse().map_err(|_| Error::MalformedCalculatorUri {
        uri: format!("funz://{rest}"),
        reason: format!("invalid port '{port}'"),
    })?;
    if code.is_empty() {
        return Err(Error::MalformedCalculatorUri {
            uri: format!("funz://{rest}"),
            reason: "missing calculator code after final '/'".to_owned(),
        }
        .into());
    }
    Ok(CalculatorSpec::Funz { host: host.to_owned(), port, code: code.to_owned() })
}

/// Inputs an adapter needs to execute one case. Adapters write only into
/// `work_dir` (always a fresh temp directory); the case runner is the sole
/// authority that moves files from there into the real case directory,
/// per the §9 redesign flag on "who writes where".
pub struct ExecutionRequest<'a> {
    pub case_dir: &'a Path,
    pub work_dir: &'a Path,
    pub command: &'a str,
    pub timeout: Duration,
    pub cancel: &'a CancellationToken,
}

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_uri_is_local() {
        assert!(matches!(CalculatorSpec::parse("").unwrap(), CalculatorSpec::Local { .. }));
    }

    #[test]
    fn sh_scheme_carries_its_command() {
        match CalculatorSpec::parse("sh://python run.py").unwrap() {
            CalculatorSpec::Local { command } => assert_eq!(command.as_deref(), Some("python run.py")),
            _ => panic!("expected local"),
        }
    }

    #[test]
    fn unknown_scheme_is_an_error() {
        assert!(CalculatorSpec::parse("ftp://host/x").is_err());
    }

    #[test]
    fn funz_uri_parses_host_port_and_code() {
        match CalculatorSpec::parse("funz://calc.example.com:9090/mycode").unwrap() {
            CalculatorSpec::Funz { host, port, code } => {
                assert_eq!(host, "calc.example.com");
                assert_eq!(port, 9090);
                assert_eq!(code, "mycode");
            }
            _ => panic!("expected funz"),
        }
    }

    #[test]
    fn funz_uri_without_code_is_rejected() {
        assert!(CalculatorSpec::parse("funz://calc.example.com:9090").is_err());
    }
}
