//! Iterative design driver: propose a batch of cases, run them via the
//! scheduler, project a scalar per case, and repeat until the algorithm is
//! done.
//!
//! Grounded on spec.md §4.9 and `fz/helpers.py::run_design_iteration`. The
//! built-in algorithm is a direct port of
//! `examples/algorithms/randomsampling.py` from the original distribution,
//! shipped the way the original ships bundled `algorithms/*.py` so `fz
//! design` works without installing a plugin.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;

use crate::calculator::pool::CalculatorPool;
use crate::case::prepare::PreparedCase;
use crate::case::runner::{CancellationToken, CaseResultRecord};
use crate::config::RunConfig;
use crate::model::Model;
use crate::prelude::*;
use crate::scheduler::{self, Callbacks};
use crate::template::evaluator::Evaluator;
use crate::value::ScalarValue;

pub type Combo = BTreeMap<String, f64>;

#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub text: String,
    pub data: Value,
    pub html: Option<String>,
}

/// Contract every design algorithm (built-in or plugin) implements. Matches
/// spec.md §4.9's four operations one-to-one.
pub trait Algorithm {
    fn initial_design(&mut self, input_vars: &BTreeMap<String, (f64, f64)>, output_vars: &[String]) -> Vec<Combo>;

    /// Empty return signals the driver to stop.
    fn next_design(&mut self, prev_combos: &[Combo], prev_outputs: &[Option<f64>]) -> Vec<Combo>;

    fn analysis(&mut self, all_combos: &[Combo], all_outputs: &[Option<f64>]) -> AnalysisResult;

    fn analysis_tmp(&mut self, _all_combos: &[Combo], _all_outputs: &[Option<f64>]) -> Option<AnalysisResult> {
        None
    }
}

pub struct RandomSamplingAlgorithm {
    nvalues: usize,
    rng: StdRng,
}

impl RandomSamplingAlgorithm {
    pub fn from_options(options: &Value) -> Self {
        let nvalues = options
            .get("nvalues")
            .and_then(Value::as_u64)
            .unwrap_or(10) as usize;
        let rng = match options.get("seed").and_then(Value::as_u64) {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        RandomSamplingAlgorithm { nvalues, rng }
    }
}

impl Algorithm for RandomSamplingAlgorithm {
    fn initial_design(&mut self, input_vars: &BTreeMap<String, (f64, f64)>, _output_vars: &[String]) -> Vec<Combo> {
        (0..self.nvalues)
            .map(|_| {
                input_vars
                    .iter()
                    .map(|(name, (min, max))| (name.clone(), self.rng.gen_range(*min..=*max)))
                    .collect()
            })
            .collect()
    }

    fn next_design(&mut self, _prev_combos: &[Combo], _prev_outputs: &[Option<f64>]) -> Vec<Combo> {
        Vec::new()
    }

    fn analysis(&mut self, all_combos: &[Combo], all_outputs: &[Option<f64>]) -> AnalysisResult {
        let valid: Vec<(&Combo, f64)> = all_combos
            .iter()
            .zip(all_outputs.iter())
            .filter_map(|(combo, out)| out.map(|v| (combo, v)))
            .collect();

        if valid.is_empty() {
            return AnalysisResult {
                text: "No valid results".to_owned(),
                data: serde_json::json!({"samples": all_combos.len(), "valid_samples": 0}),
                html: None,
            };
        }

        let (best_input, best_output) = valid
            .iter()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(c, v)| ((*c).clone(), *v))
            .unwrap();
        let (worst_input, worst_output) = valid
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(c, v)| ((*c).clone(), *v))
            .unwrap();
        let mean_output = valid.iter().map(|(_, v)| v).sum::<f64>() / valid.len() as f64;

        let text = format!(
            "Random Sampling Results:\n  Total samples: {}\n  Valid samples: {}\n  Best output: {:.6}\n  Best input: {:?}\n  Worst output: {:.6}\n  Mean output: {:.6}\n",
            all_combos.len(),
            valid.len(),
            best_output,
            best_input,
            worst_output,
            mean_output,
        );

        AnalysisResult {
            text,
            data: serde_json::json!({
                "samples": all_combos.len(),
                "valid_samples": valid.len(),
                "best_output": best_output,
                "best_input": best_input,
                "worst_output": worst_output,
                "mean_output": mean_output,
            }),
            html: None,
        }
    }
}

const MAX_ITERATIONS: usize = 100;

/// Runs one combo as a single case directly (not via the cross-product
/// sweep `case::prepare::enumerate_cases` does for `fz run`): each combo in
/// a design batch is already a fully specified case.
fn prepared_cases_for_batch(
    combos: &[Combo],
    batch_offset: usize,
    results_root: &std::path::Path,
) -> Vec<PreparedCase> {
    combos
        .iter()
        .enumerate()
        .map(|(i, combo)| {
            let bindings: Vec<(String, ScalarValue)> =
                combo.iter().map(|(k, v)| (k.clone(), ScalarValue::Float(*v))).collect();
            let name = bindings.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",");
            let index = batch_offset + i;
            PreparedCase { index, case_dir: results_root.join(&name), name, bindings }
        })
        .collect()
}

/// Evaluates `expression` against one case's outputs by seeding each output
/// name as a literal in a subprocess evaluator. Returns `None` on any
/// interpreter or parse failure, matching the original's tolerant "outputs
/// that don't project to a scalar are dropped, not fatal" behavior.
fn project_output(expression: &str, outputs: &std::collections::HashMap<String, Value>, evaluator: &mut dyn Evaluator) -> Option<f64> {
    for (name, value) in outputs {
        let literal = match value {
            Value::Number(n) => n.to_string(),
            Value::String(s) => format!("{s:?}"),
            Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        evaluator.exec_context(&format!("{name} = {literal}")).ok()?;
    }
    let result = evaluator.eval(expression).ok()?;
    result.parse::<f64>().ok()
}

#[allow(clippy::too_many_arguments)]
pub fn run_design(
    input_vars: BTreeMap<String, (f64, f64)>,
    output_vars: Vec<String>,
    model: &Model,
    expression: &str,
    algorithm: &mut dyn Algorithm,
    pool: Arc<CalculatorPool>,
    results_root: &std::path::Path,
    input_template: &std::path::Path,
    config: &RunConfig,
    cancel: &CancellationToken,
    callbacks: &Callbacks,
) -> AppResult<AnalysisResult> {
    let mut all_combos: Vec<Combo> = Vec::new();
    let mut all_outputs: Vec<Option<f64>> = Vec::new();
    let mut batch = algorithm.initial_design(&input_vars, &output_vars);
    let mut offset = 0usize;
    let mut evaluator = crate::template::evaluator::SubprocessEvaluator::spawn_python()?;

    for _ in 0..MAX_ITERATIONS {
        if batch.is_empty() || cancel.load(std::sync::atomic::Ordering::SeqCst) {
            break;
        }

        let cases = prepared_cases_for_batch(&batch, offset, results_root);
        for case in &cases {
            std::fs::create_dir_all(&case.case_dir).into_diagnostic()?;
            crate::case::prepare::materialize_case(input_template, case, model)?;
        }

        let records: Vec<CaseResultRecord> =
            scheduler::run_all(cases, model, pool.clone(), config, cancel, callbacks);

        let mut batch_outputs = Vec::with_capacity(records.len());
        for record in &records {
            batch_outputs.push(project_output(expression, &record.outputs, &mut evaluator));
        }

        offset += batch.len();
        all_outputs.extend(batch_outputs.iter().copied());
        all_combos.extend(batch.drain(..));

        batch = algorithm.next_design(&all_combos, &all_outputs);
    }

    Ok(algorithm.analysis(&all_combos, &all_outputs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_sampling_respects_nvalues_and_seed() {
        let mut algo = RandomSamplingAlgorithm::from_options(&serde_json::json!({"nvalues": 3, "seed": 1}));
        let mut vars = BTreeMap::new();
        vars.insert("x".to_owned(), (0.0, 10.0));
        let combos = algo.initial_design(&vars, &[]);
        assert_eq!(combos.len(), 3);
        for combo in &combos {
            let x = combo["x"];
            assert!((0.0..=10.0).contains(&x));
        }
    }

    #[test]
    fn one_shot_algorithm_stops_after_first_batch() {
        let mut algo = RandomSamplingAlgorithm::from_options(&serde_json::json!({}));
        assert!(algo.next_design(&[], &[]).is_empty());
    }

    #[test]
    fn analysis_reports_no_valid_results_when_all_outputs_missing() {
        let mut algo = RandomSamplingAlgorithm::from_options(&serde_json::json!({}));
        let combos = vec![BTreeMap::from([("x".to_owned(), 1.0)])];
        let result = algo.analysis(&combos, &[None]);
        assert_eq!(result.text, "No valid results");
    }

    #[test]
    fn analysis_picks_best_and_worst_by_output_value() {
        let mut algo = RandomSamplingAlgorithm::from_options(&serde_json::json!({}));
        let combos = vec![
            BTreeMap::from([("x".to_owned(), 1.0)]),
            BTreeMap::from([("x".to_owned(), 2.0)]),
        ];
        let result = algo.analysis(&combos, &[Some(5.0), Some(1.0)]);
        assert_eq!(result.data["best_output"], serde_json::json!(1.0));
        assert_eq!(result.data["worst_output"], serde_json::json!(5.0));
    }
}
