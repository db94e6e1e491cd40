//! Case runner: the cache -> retry -> copy -> parse pipeline for one case.
//!
//! Grounded on `fz/helpers.py::run_single_case` and
//! `try_calculators_with_retry` (exponential backoff capped at 2s while
//! waiting for a free calculator instance).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use uuid::Uuid;

use crate::calculator::{cache, local, CalculatorSpec, ExecutionOutcome, ExecutionRequest};
use crate::case::hash;
use crate::case::prepare::PreparedCase;
use crate::case::CaseStatus;
use crate::config::RunConfig;
use crate::model::Model;
use crate::prelude::*;
use crate::value::ScalarValue;

pub use crate::calculator::CancellationToken;

#[derive(Debug, Clone)]
pub struct CaseResultRecord {
    pub index: usize,
    pub path: PathBuf,
    pub bindings: Vec<(String, ScalarValue)>,
    pub calculator: Option<String>,
    pub status: CaseStatus,
    pub error: Option<String>,
    pub command: Option<String>,
    pub outputs: HashMap<String, Value>,
}

/// Retries an adapter invocation across the calculator pool up to
/// `config.max_retries` times, backing off exponentially (capped at 2s)
/// while waiting for a free instance.
pub fn run_case(
    case: &PreparedCase,
    model: &Model,
    pool: &crate::calculator::pool::CalculatorPool,
    config: &RunConfig,
    cancel: &CancellationToken,
) -> AppResult<CaseResultRecord> {
    if cancel.load(Ordering::SeqCst) {
        return Ok(interrupted_record(case));
    }

    if let Some(record) = try_cache_hit(case, model, pool, config)? {
        return Ok(record);
    }

    let mut last_error = None;
    let mut last_calculator = None;
    let mut last_command = None;
    let mut attempted_instance_ids: Vec<String> = Vec::new();

    for attempt in 0..config.max_retries.max(1) {
        if cancel.load(Ordering::SeqCst) {
            return Ok(interrupted_record(case));
        }

        let Some(lease) = acquire_with_backoff(pool, case.index, &attempted_instance_ids, cancel) else {
            return Ok(interrupted_record(case));
        };
        let instance_id = lease.instance.id.clone();
        attempted_instance_ids.push(instance_id.clone());

        let work_dir = make_work_dir(case)?;
        crate::io::fs::copy_tree(&case.case_dir, &work_dir)?;

        let outcome = dispatch(&lease.instance.spec, case, model, &work_dir, config, cancel);
        pool.release(lease);

        if cancel.load(Ordering::SeqCst) {
            cleanup_work_dir(&work_dir, config);
            return Ok(interrupted_record(case));
        }

        match outcome {
            Ok((status, exec_outcome, command)) => {
                last_calculator = Some(instance_id);
                last_command = Some(command.clone());

                if status == CaseStatus::Done {
                    let record = finalize_success(case, model, &work_dir, &last_calculator, &command, &exec_outcome)?;
                    cleanup_work_dir(&work_dir, config);
                    return Ok(record);
                }

                last_error = Some(format!("attempt {attempt}: {}", exec_outcome.stderr.trim()));
                if status == CaseStatus::Timeout && !config.retry_on_timeout {
                    cleanup_work_dir(&work_dir, config);
                    break;
                }
            }
            Err(err) => {
                last_calculator = Some(instance_id);
                last_error = Some(err.to_string());
            }
        }

        cleanup_work_dir(&work_dir, config);
    }

    Ok(CaseResultRecord {
        index: case.index,
        path: case.case_dir.clone(),
        bindings: case.bindings.clone(),
        calculator: last_calculator,
        status: CaseStatus::Failed,
        error: last_error,
        command: last_command,
        outputs: HashMap::new(),
    })
}

fn acquire_with_backoff<'a>(
    pool: &'a crate::calculator::pool::CalculatorPool,
    case_index: usize,
    excluded: &[String],
    cancel: &CancellationToken,
) -> Option<crate::calculator::pool::Lease<'a>> {
    let mut backoff = Duration::from_millis(100);
    loop {
        if cancel.load(Ordering::SeqCst) {
            return None;
        }
        if let Some(lease) = pool.acquire_for_case(case_index, excluded) {
            return Some(lease);
        }
        thread::sleep(backoff);
        backoff = (backoff * 2).min(Duration::from_secs(2));
    }
}

fn make_work_dir(case: &PreparedCase) -> AppResult<PathBuf> {
    let base = std::env::current_dir().into_diagnostic()?.join(".fz").join("tmp");
    std::fs::create_dir_all(&base).into_diagnostic()?;
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .into_diagnostic()?
        .as_secs();
    let dir = base.join(format!("fz_temp_{}_{timestamp}", Uuid::new_v4().simple()));
    std::fs::create_dir_all(&dir).into_diagnostic()?;
    Ok(dir)
}

fn cleanup_work_dir(work_dir: &Path, config: &RunConfig) {
    if config.log_level != crate::logging::LogLevel::Debug {
        let _ = std::fs::remove_dir_all(work_dir);
    }
}

/// Step 1 of `run_case`: try every `cache://` entry in the calculator list
/// before leasing anything, per spec.md §4.6. A hit materializes the cached
/// files directly into the case directory and short-circuits the retry
/// loop entirely.
fn try_cache_hit(
    case: &PreparedCase,
    model: &Model,
    pool: &crate::calculator::pool::CalculatorPool,
    config: &RunConfig,
) -> AppResult<Option<CaseResultRecord>> {
    let manifest = hash::create_hash_file(&case.case_dir)?;

    for spec in pool.specs() {
        let CalculatorSpec::Cache { glob } = spec else { continue };

        let Some(cached_dir) = cache::find_cached_case(glob, &manifest)? else { continue };
        cache::materialize_from_cache(&cached_dir, &case.case_dir)?;

        let outputs = parse_outputs(model, &case.case_dir)?;

        if config.cache_strict_validation {
            let missing: Vec<&str> = model
                .output_commands()
                .iter()
                .map(|(name, _)| name.as_str())
                .filter(|name| !matches!(outputs.get(*name), Some(value) if !value.is_null()))
                .collect();
            if !missing.is_empty() {
                tracing::warn!("cache {glob} has null/missing outputs {missing:?}, skipping cache");
                continue;
            }
        }

        return Ok(Some(CaseResultRecord {
            index: case.index,
            path: case.case_dir.clone(),
            bindings: case.bindings.clone(),
            calculator: Some(format!("cache://{glob}")),
            status: CaseStatus::Cached,
            error: None,
            command: None,
            outputs,
        }));
    }

    Ok(None)
}

fn dispatch(
    spec: &CalculatorSpec,
    case: &PreparedCase,
    model: &Model,
    work_dir: &Path,
    config: &RunConfig,
    cancel: &CancellationToken,
) -> AppResult<(CaseStatus, ExecutionOutcome, String)> {
    let timeout = Duration::from_secs(config.run_timeout_secs);

    match spec {
        CalculatorSpec::Cache { glob } => {
            let manifest = hash::compute_manifest(&case.case_dir)?;
            match cache::find_cached_case(glob, &manifest)? {
                Some(cached) => {
                    cache::materialize_from_cache(&cached, work_dir)?;
                    Ok((
                        CaseStatus::Cached,
                        ExecutionOutcome { exit_code: Some(0), stdout: String::new(), stderr: String::new(), timed_out: false },
                        "cache-hit".to_owned(),
                    ))
                }
                None => bail!("no matching cached case under {glob}"),
            }
        }
        CalculatorSpec::Local { command } => {
            let known = local::known_commands_for(model.known_commands().as_deref());
            let full_command = build_command(command.as_deref(), &case.case_dir)?;
            let resolved = local::resolve_all_paths_in_command(&full_command, work_dir, &known);
            let request = ExecutionRequest { case_dir: &case.case_dir, work_dir, command: &resolved, timeout, cancel };
            let outcome = local::execute(&request, &config.effective_path())?;
            let status = classify_outcome(&outcome);
            Ok((status, outcome, resolved))
        }
        CalculatorSpec::Ssh { host, port, username, password, command } => {
            let connection = crate::calculator::ssh::SshConnection::connect(
                host,
                *port,
                username.as_deref(),
                password.as_deref(),
                config,
            )?;
            let remote_dir = format!("~/.fz/tmp/fz_remote_{}", Uuid::new_v4().simple());
            connection.run_command(&format!("mkdir -p {remote_dir}"), timeout)?;
            connection.upload_tree(work_dir, &remote_dir)?;
            let remote_command = build_command(Some(command.as_str()), &case.case_dir)?;
            let full_command = format!("cd {remote_dir} && {remote_command}");
            let outcome = connection.run_command(&full_command, timeout)?;
            let names: Vec<String> = crate::io::fs::list_files_relative(work_dir)?
                .into_iter()
                .map(|p| p.display().to_string())
                .collect();
            let _ = connection.download_tree(&remote_dir, work_dir, &names);
            let status = classify_outcome(&outcome);
            Ok((status, outcome, full_command))
        }
        CalculatorSpec::Slurm { host: None, partition, script, .. } => {
            let srun_command = build_command(Some(script.as_str()), &case.case_dir)?;
            let outcome = crate::calculator::slurm::run_local(partition, work_dir, &srun_command, timeout)?;
            let status = classify_outcome(&outcome);
            Ok((status, outcome, format!("srun --partition {partition} {srun_command}")))
        }
        CalculatorSpec::Slurm { host: Some(host), port, username, password, partition, script } => {
            let srun_command = build_command(Some(script.as_str()), &case.case_dir)?;
            let outcome = crate::calculator::slurm::run_remote(
                host,
                port.unwrap_or(22),
                username.as_deref(),
                password.as_deref(),
                partition,
                &srun_command,
                work_dir,
                timeout,
                config,
            )?;
            let status = classify_outcome(&outcome);
            Ok((status, outcome, format!("srun --partition {partition} {srun_command}")))
        }
        CalculatorSpec::Funz { host, port, code } => {
            let mut session = crate::calculator::funz::FunzSession::connect(host, *port, timeout)?;
            let tagged: Vec<_> = case.bindings.clone();
            session.reserve("fz", &tagged)?;
            session.newcase(&case.bindings)?;
            for relative in crate::io::fs::list_files_relative(work_dir)? {
                let bytes = std::fs::read(work_dir.join(&relative)).into_diagnostic()?;
                session.putfile(&relative.display().to_string(), &bytes)?;
            }
            let info_lines = session.execute(code)?;

            if cancel.load(Ordering::SeqCst) {
                let _ = session.interrupt();
                let _ = session.unreserve();
                return Ok((
                    CaseStatus::Interrupted,
                    ExecutionOutcome { exit_code: None, stdout: String::new(), stderr: "interrupted".to_owned(), timed_out: false },
                    format!("EXECUTE {code}"),
                ));
            }

            session.archive()?;
            let archive_bytes = session.getfile()?;
            extract_zip_into(&archive_bytes, work_dir)?;
            let _ = session.unreserve();
            Ok((
                CaseStatus::Done,
                ExecutionOutcome { exit_code: Some(0), stdout: info_lines.join("\n"), stderr: String::new(), timed_out: false },
                format!("EXECUTE {code}"),
            ))
        }
    }
}

/// Builds the local-shell command line: the calculator's own command (from
/// `sh://<command>`, or a per-model override) with the case's input
/// filenames appended in `.fz_hash` order, per spec.md §4.5/§6.2. Absent a
/// configured command, falls back to running the sole input file directly.
fn build_command(command: Option<&str>, case_dir: &Path) -> AppResult<String> {
    let manifest_path = case_dir.join(hash::MANIFEST_NAME);
    let inputs: Vec<String> = if manifest_path.is_file() {
        hash::read_hash_manifest(&manifest_path)?.into_iter().map(|(_, path)| path).collect()
    } else {
        Vec::new()
    };
    let input_argument = if inputs.is_empty() { ".".to_owned() } else { inputs.join(" ") };

    Ok(match command {
        Some(command) => format!("{command} {input_argument}"),
        None => format!("./{input_argument}"),
    })
}

fn extract_zip_into(bytes: &[u8], dest: &Path) -> AppResult<()> {
    let cursor = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(cursor).into_diagnostic().wrap_err("reading funz results archive")?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).into_diagnostic()?;
        let Some(name) = entry.enclosed_name() else { continue };
        let out_path = dest.join(name);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).into_diagnostic()?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).into_diagnostic()?;
        }
        let mut out_file = std::fs::File::create(&out_path).into_diagnostic()?;
        std::io::copy(&mut entry, &mut out_file).into_diagnostic()?;
    }
    Ok(())
}

fn classify_outcome(outcome: &ExecutionOutcome) -> CaseStatus {
    if outcome.timed_out {
        return CaseStatus::Timeout;
    }
    match outcome.exit_code {
        Some(0) => CaseStatus::Done,
        _ => CaseStatus::Failed,
    }
}

fn finalize_success(
    case: &PreparedCase,
    model: &Model,
    work_dir: &Path,
    calculator: &Option<String>,
    command: &str,
    outcome: &ExecutionOutcome,
) -> AppResult<CaseResultRecord> {
    std::fs::write(work_dir.join("out.txt"), &outcome.stdout).into_diagnostic()?;
    std::fs::write(work_dir.join("err.txt"), &outcome.stderr).into_diagnostic()?;
    write_log_txt(work_dir, command, outcome)?;

    copy_with_retry(work_dir, &case.case_dir)?;
    hash::create_hash_file(&case.case_dir)?;

    let outputs = parse_outputs(model, &case.case_dir)?;

    Ok(CaseResultRecord {
        index: case.index,
        path: case.case_dir.clone(),
        bindings: case.bindings.clone(),
        calculator: calculator.clone(),
        status: CaseStatus::Done,
        error: None,
        command: Some(command.to_owned()),
        outputs,
    })
}

fn write_log_txt(work_dir: &Path, command: &str, outcome: &ExecutionOutcome) -> AppResult<()> {
    let now = jiff::Zoned::now();
    let hostname = hostname_or_unknown();
    let user = std::env::var("USER").or_else(|_| std::env::var("USERNAME")).unwrap_or_else(|_| "unknown".to_owned());

    let body = format!(
        "command: {command}\nexit_code: {}\nstart: {now}\nuser: {user}\nhostname: {hostname}\nos: {os}\ncwd: {cwd}\n",
        outcome.exit_code.unwrap_or(-1),
        os = std::env::consts::OS,
        cwd = work_dir.display(),
    );
    std::fs::write(work_dir.join("log.txt"), body).into_diagnostic()
}

fn hostname_or_unknown() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_owned())
}

fn copy_with_retry(from: &Path, to: &Path) -> AppResult<()> {
    let mut backoff = Duration::from_millis(100);
    let mut last_err = None;

    for _ in 0..3 {
        match crate::io::fs::copy_tree(from, to) {
            Ok(()) => return Ok(()),
            Err(err) => {
                last_err = Some(err);
                thread::sleep(backoff);
                backoff *= 2;
            }
        }
    }

    Err(last_err.unwrap())
}

fn parse_outputs(model: &Model, case_dir: &Path) -> AppResult<HashMap<String, Value>> {
    let mut outputs = HashMap::new();
    for (name, command) in model.output_commands() {
        let started = Instant::now();
        let result = std::process::Command::new("sh").arg("-c").arg(&command).current_dir(case_dir).output();
        let _ = started;

        let Ok(output) = result else { continue };
        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(value) = crate::template::cast_output(&stdout) {
            outputs.insert(name, value);
        }
    }
    Ok(outputs)
}

fn interrupted_record(case: &PreparedCase) -> CaseResultRecord {
    CaseResultRecord {
        index: case.index,
        path: case.case_dir.clone(),
        bindings: case.bindings.clone(),
        calculator: None,
        status: CaseStatus::Interrupted,
        error: Some("interrupted".to_owned()),
        command: None,
        outputs: HashMap::new(),
    }
}

/// Same as `interrupted_record`, exposed to the scheduler, which needs to
/// hand back a result for work items it drains without running after an
/// interrupt is observed.
pub fn interrupted_record_pub(case: &PreparedCase) -> CaseResultRecord {
    interrupted_record(case)
}

/// Used by the scheduler when `run_case` itself returns an `Err` (as opposed
/// to a `Failed` status, which `run_case` already reports as an `Ok` record).
pub fn failed_record(case: &PreparedCase, error: String) -> CaseResultRecord {
    CaseResultRecord {
        index: case.index,
        path: case.case_dir.clone(),
        bindings: case.bindings.clone(),
        calculator: None,
        status: CaseStatus::Failed,
        error: Some(error),
        command: None,
        outputs: HashMap::new(),
    }
}
