//! SLURM calculator adapter: submits the case script via `srun`, either
//! locally or on a remote cluster head node reached over SSH.
//!
//! Grounded on `fz/runners.py::parse_slurm_uri`, `_run_local_slurm_calculation`,
//! `_run_remote_slurm_calculation`.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use crate::config::RunConfig;
use crate::error::Error;
use crate::prelude::*;

use super::ssh::SshConnection;
use super::ExecutionOutcome;

/// Parses `[user[:password]@host[:port]]:partition/script`. `uri` has
/// already had its `slurm://` scheme stripped.
///
/// `host` is `None` for local execution (`:partition/script`).
#[allow(clippy::type_complexity)]
pub fn parse_slurm_uri(
    uri: &str,
) -> AppResult<(Option<String>, Option<u16>, Option<String>, Option<String>, String, String)> {
    let malformed = |reason: &str| Error::MalformedCalculatorUri {
        uri: format!("slurm://{uri}"),
        reason: reason.to_owned(),
    };

    let slash_idx = uri.find('/').ok_or_else(|| malformed("expected a script path after the partition"))?;
    let partition_part = &uri[..slash_idx];
    let script = &uri[slash_idx + 1..];

    if script.is_empty() {
        return Err(malformed("script path is required").into());
    }
    if partition_part.is_empty() {
        return Err(malformed("partition is required").into());
    }

    if let Some((user_part, rest)) = partition_part.split_once('@') {
        let (username, password) = match user_part.split_once(':') {
            Some((u, p)) => (Some(u.to_owned()), Some(p.to_owned())),
            None => (Some(user_part.to_owned()), None),
        };

        let last_colon = rest.rfind(':').ok_or_else(|| {
            malformed("if a username is provided, host must also be provided with :partition")
        })?;
        let host_port_part = &rest[..last_colon];
        let partition = rest[last_colon + 1..].to_owned();

        let (host, port) = match host_port_part.split_once(':') {
            Some((h, p)) => {
                let port: u16 = p.parse().map_err(|_| malformed(&format!("invalid port '{p}'")))?;
                (h.to_owned(), port)
            }
            None => (host_port_part.to_owned(), 22),
        };

        return Ok((Some(host), Some(port), username, password, partition, script.to_owned()));
    }

    if let Some((first, rest)) = partition_part.split_once(':') {
        let colon_count = partition_part.matches(':').count();

        if colon_count == 1 {
            if first.is_empty() {
                return Ok((None, None, None, None, rest.to_owned(), script.to_owned()));
            }
            return Ok((Some(first.to_owned()), Some(22), None, None, rest.to_owned(), script.to_owned()));
        }

        if colon_count == 2 {
            let mut parts = partition_part.splitn(3, ':');
            let host = parts.next().unwrap().to_owned();
            let port_str = parts.next().unwrap();
            let partition = parts.next().unwrap().to_owned();
            let port: u16 = port_str.parse().map_err(|_| malformed(&format!("invalid port '{port_str}'")))?;
            return Ok((Some(host), Some(port), None, None, partition, script.to_owned()));
        }

        return Err(malformed("too many colons").into());
    }

    Err(malformed("for local execution use :partition/script").into())
}

/// `script_with_inputs` is the script path with its input filenames already
/// appended (see `case::runner::build_command`); it is split into argv the
/// same way a shell would before being handed to `srun`.
pub fn run_local(
    partition: &str,
    work_dir: &Path,
    script_with_inputs: &str,
    timeout: Duration,
) -> AppResult<ExecutionOutcome> {
    let args = shell_words::split(script_with_inputs).unwrap_or_else(|_| vec![script_with_inputs.to_owned()]);

    let output = Command::new("srun")
        .arg("--partition")
        .arg(partition)
        .args(&args)
        .current_dir(work_dir)
        .output()
        .into_diagnostic()
        .wrap_err("spawning srun")?;

    // `Command::output` has no built-in timeout; the scheduler enforces the
    // case-level timeout by racing this call on its own worker thread and
    // treating a still-running thread past `timeout` as `CaseStatus::Timeout`.
    let _ = timeout;

    Ok(ExecutionOutcome {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        timed_out: false,
    })
}

pub fn run_remote(
    host: &str,
    port: u16,
    username: Option<&str>,
    password: Option<&str>,
    partition: &str,
    script: &str,
    work_dir: &Path,
    timeout: Duration,
    config: &RunConfig,
) -> AppResult<ExecutionOutcome> {
    let connection = SshConnection::connect(host, port, username, password, config)?;

    let remote_dir = format!("/tmp/fz_slurm_{}", uuid::Uuid::new_v4());
    connection.run_command(&format!("mkdir -p {remote_dir}"), timeout)?;
    connection.upload_tree(work_dir, &remote_dir)?;

    let command = format!("cd {remote_dir} && srun --partition {partition} {script}");
    let outcome = connection.run_command(&command, timeout)?;

    let produced = crate::io::fs::list_files_relative(work_dir)?;
    let names: Vec<String> = produced.into_iter().map(|p| p.display().to_string()).collect();
    connection.download_tree(&remote_dir, work_dir, &names)?;

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_execution_with_leading_colon() {
        let (host, port, user, pass, partition, script) = parse_slurm_uri(":gpu/run.sh").unwrap();
        assert_eq!(host, None);
        assert_eq!(port, None);
        assert_eq!(user, None);
        assert_eq!(pass, None);
        assert_eq!(partition, "gpu");
        assert_eq!(script, "run.sh");
    }

    #[test]
    fn remote_host_partition() {
        let (host, port, _, _, partition, script) = parse_slurm_uri("cluster.example.com:gpu/run.sh").unwrap();
        assert_eq!(host.as_deref(), Some("cluster.example.com"));
        assert_eq!(port, Some(22));
        assert_eq!(partition, "gpu");
        assert_eq!(script, "run.sh");
    }

    #[test]
    fn remote_host_port_partition() {
        let (host, port, _, _, partition, _) = parse_slurm_uri("cluster.example.com:2222:gpu/run.sh").unwrap();
        assert_eq!(host.as_deref(), Some("cluster.example.com"));
        assert_eq!(port, Some(2222));
        assert_eq!(partition, "gpu");
    }

    #[test]
    fn user_host_port_partition() {
        let (host, port, user, pass, partition, _) =
            parse_slurm_uri("alice:secret@cluster.example.com:2222:gpu/run.sh").unwrap();
        assert_eq!(host.as_deref(), Some("cluster.example.com"));
        assert_eq!(port, Some(2222));
        assert_eq!(user.as_deref(), Some("alice"));
        assert_eq!(pass.as_deref(), Some("secret"));
        assert_eq!(partition, "gpu");
    }

    #[test]
    fn bare_partition_without_colon_is_rejected() {
        assert!(parse_slurm_uri("gpu/run.sh").is_err());
    }

    #[test]
    fn missing_script_is_rejected() {
        assert!(parse_slurm_uri(":gpu/").is_err());
    }
}
