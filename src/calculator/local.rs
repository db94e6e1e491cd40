//! Local-shell calculator adapter: runs the case command on this machine.
//!
//! Grounded on `fz/runners.py::run_local_calculation` and the path-rewrite
//! predicate table in `_resolve_paths_in_segment`/`resolve_all_paths_in_command`.
//! The §9 redesign turns that function's inline boolean logic into an
//! explicit, orderered, auditable list of `(name, predicate)` rules so the
//! decision for any one token can be traced to a single named rule instead
//! of a fourteen-branch if/elif chain.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crate::prelude::*;

use super::{ExecutionOutcome, ExecutionRequest};

const DEFAULT_KNOWN_COMMANDS: &[&str] = &[
    "true", "false", "null", "nil", "echo", "cat", "cp", "mv", "rm", "ls", "grep", "awk", "sed",
    "sort", "uniq", "wc", "head", "tail", "tee", "find", "chmod", "chown", "python", "python3",
    "bash", "sh", "perl", "ruby", "java", "gcc", "make", "tar", "gzip", "zip",
];

const SHELL_OPERATORS: &[&str] = &["|", "||", "&&", ";", ">", ">>", "<", "<<", "&1", "&2"];

/// One named rule in the path-rewrite predicate table. Rules are tried in
/// order; the first `Some` wins. `true` keeps the token as-is, `false`
/// converts it to an absolute path rooted at `original_cwd`.
struct Rule {
    name: &'static str,
    matches: fn(&str) -> bool,
    keep_as_is: bool,
}

fn token_rules() -> Vec<Rule> {
    vec![
        Rule { name: "already-absolute", matches: |t| Path::new(t).is_absolute(), keep_as_is: true },
        Rule { name: "shell-operator", matches: |t| SHELL_OPERATORS.contains(&t), keep_as_is: true },
        Rule { name: "flag", matches: |t| t.starts_with('-') && t.len() > 1, keep_as_is: true },
        Rule {
            name: "variable-expansion",
            matches: |t| t.starts_with('$') || (t.starts_with("${") && t.ends_with('}')),
            keep_as_is: true,
        },
        Rule { name: "pure-number", matches: |t| !t.is_empty() && t.chars().all(|c| c.is_ascii_digit()), keep_as_is: true },
        Rule {
            name: "url",
            matches: |t| {
                ["http://", "https://", "ftp://", "ssh://", "file://"]
                    .iter()
                    .any(|scheme| t.starts_with(scheme))
            },
            keep_as_is: true,
        },
        Rule { name: "device-file", matches: |t| t.starts_with("/dev/"), keep_as_is: true },
    ]
}

fn resolve_token(
    token: &str,
    known_commands: &[String],
    original_cwd: &Path,
) -> (String, bool) {
    for rule in token_rules() {
        if (rule.matches)(token) {
            let _ = rule.name;
            return (token.to_owned(), false);
        }
    }

    if known_commands.iter().any(|c| c == token) {
        return (token.to_owned(), false);
    }

    let looks_like_path = token.contains('/')
        || (token.contains('.') && !token.starts_with('.') && has_simple_extension(token))
        || token == "." || token == ".." || token.starts_with("./") || token.starts_with("../")
        || is_simple_filename(token);

    if !looks_like_path {
        return (token.to_owned(), false);
    }

    let absolute = original_cwd.join(token);
    let rendered = absolute.to_string_lossy().into_owned();
    let needs_quoting = rendered.contains(' ') || rendered.contains('\'') || rendered.contains('"');
    let rendered = if needs_quoting {
        shell_words::quote(&rendered).into_owned()
    } else {
        rendered
    };
    (rendered, true)
}

fn has_simple_extension(token: &str) -> bool {
    match token.rsplit_once('.') {
        Some((stem, ext)) => !stem.is_empty() && !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()),
        None => false,
    }
}

fn is_simple_filename(token: &str) -> bool {
    token.len() > 1
        && token.chars().next().map(|c| c.is_ascii_alphanumeric() || c == '_').unwrap_or(false)
        && token.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Rewrites every relative path-looking token in `command` to an absolute
/// path rooted at `original_cwd`, leaving operators, flags, variables, and
/// known command names untouched.
pub fn resolve_all_paths_in_command(command: &str, original_cwd: &Path, known_commands: &[String]) -> String {
    let tokens = match shell_words::split(command) {
        Ok(tokens) => tokens,
        Err(_) => return command.to_owned(),
    };

    let resolved: Vec<String> = tokens
        .iter()
        .map(|t| resolve_token(t, known_commands, original_cwd).0)
        .collect();

    resolved.join(" ")
}

pub fn known_commands_for(model_known: Option<&[String]>) -> Vec<String> {
    match model_known {
        Some(list) => list.to_vec(),
        None => DEFAULT_KNOWN_COMMANDS.iter().map(|s| s.to_string()).collect(),
    }
}

/// Runs `request.command` as a subshell rooted at `request.work_dir`, with
/// a wall-clock timeout enforced by polling `try_wait`. The shell binary
/// itself is always `sh`; `FZ_SHELL_PATH` steers resolution by prefixing
/// `PATH` (see `RunConfig::effective_path`), matching the original's
/// `replace_commands_in_string` behavior rather than swapping interpreters.
pub fn execute(request: &ExecutionRequest, path: &str) -> AppResult<ExecutionOutcome> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(request.command)
        .current_dir(request.work_dir)
        .env("PATH", path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .into_diagnostic()
        .wrap_err_with(|| format!("spawning 'sh -c {}'", request.command))?;

    let start = Instant::now();
    let timed_out = loop {
        match child.try_wait().into_diagnostic()? {
            Some(_) => break false,
            None if request.cancel.load(Ordering::SeqCst) => {
                terminate_then_kill(&mut child);
                break false;
            }
            None if start.elapsed() >= request.timeout => {
                let _ = child.kill();
                let _ = child.wait();
                break true;
            }
            None => std::thread::sleep(Duration::from_millis(50)),
        }
    };

    let output = child.wait_with_output().into_diagnostic()?;

    Ok(ExecutionOutcome {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        timed_out,
    })
}

pub fn working_dir_for(case_dir: &Path) -> PathBuf {
    case_dir.to_path_buf()
}

/// Sends SIGTERM and gives the process 5s to exit before SIGKILL, matching
/// `run_local_calculation`'s interrupt handling (`process.terminate()` then
/// `process.kill()` on timeout).
fn terminate_then_kill(child: &mut std::process::Child) {
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) if Instant::now() >= deadline => break,
            Ok(None) => std::thread::sleep(Duration::from_millis(50)),
            Err(_) => break,
        }
    }

    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known() -> Vec<String> {
        DEFAULT_KNOWN_COMMANDS.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn known_command_name_is_untouched() {
        let resolved = resolve_all_paths_in_command("python3 script.py", Path::new("/work"), &known());
        assert!(resolved.starts_with("python3 "));
        assert!(resolved.ends_with("/work/script.py"));
    }

    #[test]
    fn absolute_path_is_untouched() {
        let resolved = resolve_all_paths_in_command("cat /etc/hosts", Path::new("/work"), &known());
        assert_eq!(resolved, "cat /etc/hosts");
    }

    #[test]
    fn flag_is_untouched() {
        let resolved = resolve_all_paths_in_command("ls -la", Path::new("/work"), &known());
        assert_eq!(resolved, "ls -la");
    }

    #[test]
    fn relative_filename_resolves_to_absolute() {
        let resolved = resolve_all_paths_in_command("run input.dat", Path::new("/work"), &known());
        assert_eq!(resolved, "/work/run /work/input.dat");
    }

    #[test]
    fn variable_expansion_is_untouched() {
        let resolved = resolve_all_paths_in_command("echo $HOME", Path::new("/work"), &known());
        assert_eq!(resolved, "echo $HOME");
    }

    #[test]
    fn cancelled_token_terminates_a_long_running_command() {
        let dir = tempfile::tempdir().unwrap();
        let cancel: crate::calculator::CancellationToken =
            std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
        let request = ExecutionRequest {
            case_dir: dir.path(),
            work_dir: dir.path(),
            command: "sleep 30",
            timeout: Duration::from_secs(30),
            cancel: &cancel,
        };
        let outcome = execute(&request, &std::env::var("PATH").unwrap_or_default()).unwrap();
        assert!(!outcome.timed_out);
        assert_ne!(outcome.exit_code, Some(0));
    }
}
