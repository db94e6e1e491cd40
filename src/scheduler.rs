//! Parallel scheduler: a bounded worker pool over prepared cases, with a
//! shared interrupt token and best-effort progress callbacks.
//!
//! Grounded on `fz/helpers.py::run_cases_parallel` (ThreadPoolExecutor,
//! sequential fallback, progress/ETA, `as_completed` + cancel on interrupt)
//! and `fz/core.py`'s `_install_signal_handler`/`is_interrupted` (a second
//! Ctrl+C forces immediate termination).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::calculator::pool::CalculatorPool;
use crate::case::prepare::PreparedCase;
use crate::case::runner::{run_case, CancellationToken, CaseResultRecord};
use crate::config::RunConfig;
use crate::model::Model;
use crate::prelude::*;

pub struct Callbacks {
    pub on_start: Option<Box<dyn Fn(usize, usize) + Send + Sync>>,
    pub on_case_start: Option<Box<dyn Fn(usize, usize, &str) + Send + Sync>>,
    pub on_case_complete: Option<Box<dyn Fn(usize, usize, &CaseResultRecord) + Send + Sync>>,
    pub on_progress: Option<Box<dyn Fn(usize, usize, Option<f64>) + Send + Sync>>,
    pub on_complete: Option<Box<dyn Fn(usize, usize, &[CaseResultRecord]) + Send + Sync>>,
}

impl Default for Callbacks {
    fn default() -> Self {
        Callbacks { on_start: None, on_case_start: None, on_case_complete: None, on_progress: None, on_complete: None }
    }
}

/// Installs the process-wide Ctrl+C handler once. First press sets the
/// token; a second press that arrives while the first is still being
/// honored aborts the process immediately, matching the original's
/// double-interrupt escalation.
pub fn install_interrupt_handler() -> AppResult<CancellationToken> {
    let token: CancellationToken = Arc::new(AtomicBool::new(false));
    let handler_token = token.clone();

    ctrlc::set_handler(move || {
        if handler_token.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
    })
    .into_diagnostic()
    .wrap_err("installing interrupt handler")?;

    Ok(token)
}

fn worker_budget(configured: Option<usize>, non_cache_instances: usize, case_count: usize) -> usize {
    let instances = non_cache_instances.max(1);
    let cases = case_count.max(1);
    let configured = configured.unwrap_or(instances);
    configured.min(instances).min(cases).max(1)
}

pub fn run_all(
    cases: Vec<PreparedCase>,
    model: &Model,
    pool: Arc<CalculatorPool>,
    config: &RunConfig,
    cancel: &CancellationToken,
    callbacks: &Callbacks,
) -> Vec<CaseResultRecord> {
    let total = cases.len();
    let non_cache = pool
        .specs()
        .filter(|spec| !matches!(spec, crate::calculator::CalculatorSpec::Cache { .. }))
        .count();
    let workers = worker_budget(config.max_workers, non_cache, total);

    if let Some(cb) = &callbacks.on_start {
        cb(total, pool.len());
    }

    let results = if workers <= 1 || total <= 1 {
        run_sequential(cases, model, &pool, config, cancel, callbacks)
    } else {
        run_pooled(cases, model, pool, config, cancel, callbacks, workers)
    };

    if let Some(cb) = &callbacks.on_complete {
        cb(total, results.len(), &results);
    }

    results
}

fn run_sequential(
    cases: Vec<PreparedCase>,
    model: &Model,
    pool: &CalculatorPool,
    config: &RunConfig,
    cancel: &CancellationToken,
    callbacks: &Callbacks,
) -> Vec<CaseResultRecord> {
    let total = cases.len();
    let mut results = Vec::with_capacity(total);
    let mut durations = Vec::new();

    for case in cases {
        if cancel.load(Ordering::SeqCst) {
            break;
        }
        if let Some(cb) = &callbacks.on_case_start {
            cb(case.index, total, &case.name);
        }

        let started = Instant::now();
        let record = run_case(&case, model, pool, config, cancel).unwrap_or_else(|err| {
            crate::case::runner::failed_record(&case, err.to_string())
        });
        durations.push(started.elapsed());

        if let Some(cb) = &callbacks.on_case_complete {
            cb(case.index, total, &record);
        }
        report_progress(callbacks, results.len() + 1, total, &durations);

        results.push(record);
    }

    results
}

fn run_pooled(
    cases: Vec<PreparedCase>,
    model: &Model,
    pool: Arc<CalculatorPool>,
    config: &RunConfig,
    cancel: &CancellationToken,
    callbacks: &Callbacks,
    workers: usize,
) -> Vec<CaseResultRecord> {
    let total = cases.len();
    let (work_tx, work_rx) = mpsc::channel::<PreparedCase>();
    let work_rx = Arc::new(std::sync::Mutex::new(work_rx));
    let (result_tx, result_rx) = mpsc::channel::<CaseResultRecord>();

    for case in cases {
        if let Some(cb) = &callbacks.on_case_start {
            cb(case.index, total, &case.name);
        }
        let _ = work_tx.send(case);
    }
    drop(work_tx);

    let model = model.clone();
    let mut handles = Vec::with_capacity(workers);

    for _ in 0..workers {
        let work_rx = work_rx.clone();
        let result_tx = result_tx.clone();
        let pool = pool.clone();
        let config = config.clone();
        let model = model.clone();
        let cancel = cancel.clone();

        handles.push(thread::spawn(move || loop {
            let next = { work_rx.lock().expect("work queue mutex poisoned").recv() };
            let Ok(case) = next else { break };

            if cancel.load(Ordering::SeqCst) {
                let _ = result_tx.send(crate::case::runner::interrupted_record_pub(&case));
                continue;
            }

            let record = run_case(&case, &model, &pool, &config, &cancel)
                .unwrap_or_else(|err| crate::case::runner::failed_record(&case, err.to_string()));
            let _ = result_tx.send(record);
        }));
    }
    drop(result_tx);

    let mut durations = Vec::new();
    let mut results = Vec::with_capacity(total);

    while let Ok(record) = result_rx.recv() {
        let started = Instant::now();
        durations.push(started.elapsed());
        if let Some(cb) = &callbacks.on_case_complete {
            cb(record.index, total, &record);
        }
        report_progress(callbacks, results.len() + 1, total, &durations);
        results.push(record);
    }

    for handle in handles {
        let _ = handle.join();
    }

    results.sort_by_key(|r| r.index);
    results
}

fn report_progress(callbacks: &Callbacks, completed: usize, total: usize, durations: &[Duration]) {
    let Some(cb) = &callbacks.on_progress else { return };

    let eta = if completed > 0 && completed < total {
        let avg = durations.iter().sum::<Duration>().as_secs_f64() / durations.len() as f64;
        Some(avg * (total - completed) as f64)
    } else {
        None
    };

    cb(completed, total, eta);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_budget_never_exceeds_case_count() {
        assert_eq!(worker_budget(Some(8), 8, 1), 1);
    }

    #[test]
    fn worker_budget_never_exceeds_instance_count() {
        assert_eq!(worker_budget(Some(8), 2, 100), 2);
    }

    #[test]
    fn worker_budget_respects_explicit_cap() {
        assert_eq!(worker_budget(Some(1), 4, 100), 1);
    }

    #[test]
    fn worker_budget_defaults_to_instance_count() {
        assert_eq!(worker_budget(None, 3, 100), 3);
    }

    #[test]
    fn worker_budget_is_at_least_one() {
        assert_eq!(worker_budget(Some(0), 0, 0), 1);
    }
}
