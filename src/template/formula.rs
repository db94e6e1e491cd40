//! Formula evaluation: `#@code` context lines and `@(expr)` inline formulas.
//!
//! Grounded on `fz/engine.py::evaluate_formulas`. Context lines are
//! collected, dedented as a block, and executed once per file per case;
//! formulas are then found and replaced in a second pass. Failures of
//! either step are non-fatal: the text is left verbatim and a warning is
//! logged, matching the original's `print(f"Warning: ...")` behavior.

use regex::Regex;

use crate::prelude::*;
use crate::template::evaluator::Evaluator;
use crate::value::ScalarValue;

/// Collects and dedents `{commentline}{formulaprefix}` context lines.
fn collect_context_block(content: &str, commentline: &str, formulaprefix: &str) -> Option<String> {
    let marker = format!("{commentline}{formulaprefix}");
    let lines: Vec<&str> = content
        .lines()
        .filter_map(|line| line.trim_start().strip_prefix(marker.as_str()))
        .collect();

    if lines.is_empty() {
        return None;
    }

    let min_indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let dedented: Vec<String> = lines
        .iter()
        .map(|l| {
            if l.trim().is_empty() {
                String::new()
            } else if l.len() > min_indent {
                l[min_indent..].to_owned()
            } else {
                l.trim_start().to_owned()
            }
        })
        .collect();

    Some(dedented.join("\n"))
}

fn substitute_var_literals(formula: &str, bindings: &[(String, ScalarValue)]) -> String {
    let mut out = formula.to_owned();
    for (name, value) in bindings {
        let pattern = Regex::new(&format!(r"\${}\b", regex::escape(name))).expect("valid pattern");
        out = pattern.replace_all(&out, regex::NoExpand(&value.to_string())).into_owned();
    }
    out
}

/// Splits an occurrence's captured contents on the first `|` into the
/// expression to evaluate and an optional trailing format-spec, e.g.
/// `x|.2` -> (`x`, Some(`.2`)). Mirrors the original's `formula.split('|', 1)`.
fn split_format_spec(formula: &str) -> (&str, Option<&str>) {
    match formula.split_once('|') {
        Some((expr, spec)) => (expr.trim(), Some(spec.trim())),
        None => (formula, None),
    }
}

/// Formats `value` as a fixed-point decimal with as many digits after the
/// dot as `spec` itself has after its dot (`.2` -> 2 decimals). `spec`
/// without a dot, or a `value` that doesn't parse as a number, is a no-op.
fn apply_format_spec(value: &str, spec: &str) -> String {
    let Some((_, fraction)) = spec.split_once('.') else { return value.to_owned() };
    let decimals = fraction.len();
    match value.parse::<f64>() {
        Ok(number) => format!("{number:.decimals$}"),
        Err(_) => value.to_owned(),
    }
}

fn formula_pattern(formulaprefix: &str, left: char, right: char) -> AppResult<Regex> {
    let prefix = regex::escape(formulaprefix);

    let pattern = if left == '(' && right == ')' {
        format!(r"{prefix}\(([^()]*(?:\([^()]*\)[^()]*)*)\)")
    } else {
        let left = regex::escape(&left.to_string());
        let right_class = regex::escape(&right.to_string());
        format!("{prefix}{left}([^{right_class}]+){right_class}")
    };

    Regex::new(&pattern).into_diagnostic().wrap_err("building formula pattern")
}

/// Executes context lines once, then evaluates every `@(...)` formula
/// occurrence in `content`, replacing it with its stringified result.
pub fn evaluate_formulas(
    content: &str,
    evaluator: &mut dyn Evaluator,
    bindings: &[(String, ScalarValue)],
    formulaprefix: &str,
    delim: &str,
    commentline: &str,
) -> AppResult<String> {
    if delim.chars().count() != 2 {
        bail!("formula delim must be exactly 2 characters, got '{delim}'");
    }
    let mut chars = delim.chars();
    let left = chars.next().unwrap();
    let right = chars.next().unwrap();

    if let Some(block) = collect_context_block(content, commentline, formulaprefix) {
        if let Err(err) = evaluator.exec_context(&block) {
            tracing::warn!("error executing formula context: {err}");
        }
    }

    let pattern = formula_pattern(formulaprefix, left, right)?;
    let mut out = String::with_capacity(content.len());
    let mut last_end = 0;

    for caps in pattern.captures_iter(content) {
        let whole = caps.get(0).unwrap();
        out.push_str(&content[last_end..whole.start()]);

        let formula = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let (expr, format_spec) = split_format_spec(formula);
        let substituted = substitute_var_literals(expr, bindings);

        match evaluator.eval(&substituted) {
            Ok(result) => {
                let result = match format_spec {
                    Some(spec) => apply_format_spec(&result, spec),
                    None => result,
                };
                out.push_str(&result);
            }
            Err(err) => {
                tracing::warn!("error evaluating formula '{formula}': {err}");
                out.push_str(whole.as_str());
            }
        }

        last_end = whole.end();
    }
    out.push_str(&content[last_end..]);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeEvaluator;

    impl Evaluator for FakeEvaluator {
        fn exec_context(&mut self, _code: &str) -> AppResult<()> {
            Ok(())
        }

        fn eval(&mut self, expr: &str) -> AppResult<String> {
            // Only handles simple additions, enough to exercise the formula
            // extraction/replacement plumbing without a real interpreter.
            let parts: Vec<&str> = expr.split('+').map(str::trim).collect();
            if parts.len() == 2 {
                let a: f64 = parts[0].parse().into_diagnostic()?;
                let b: f64 = parts[1].parse().into_diagnostic()?;
                Ok((a + b).to_string())
            } else {
                bail!("unsupported expression in fake evaluator: {expr}")
            }
        }
    }

    #[test]
    fn replaces_simple_formula() {
        let mut eval = FakeEvaluator;
        let out = evaluate_formulas("result = @(1 + 2)", &mut eval, &[], "@", "()", "#").unwrap();
        assert_eq!(out, "result = 3");
    }

    #[test]
    fn leaves_unparseable_formula_verbatim_with_warning() {
        let mut eval = FakeEvaluator;
        let out = evaluate_formulas("x = @(foo())", &mut eval, &[], "@", "()", "#").unwrap();
        assert_eq!(out, "x = @(foo())");
    }

    #[test]
    fn dollar_vars_are_substituted_before_eval() {
        let mut eval = FakeEvaluator;
        let bindings = vec![("n".to_owned(), ScalarValue::Int(4))];
        let out = evaluate_formulas("y = @($n + 1)", &mut eval, &bindings, "@", "()", "#").unwrap();
        assert_eq!(out, "y = 5");
    }

    #[test]
    fn format_spec_truncates_result_to_given_decimals() {
        let mut eval = FakeEvaluator;
        let out = evaluate_formulas("y = @(1 + 2|.2)", &mut eval, &[], "@", "()", "#").unwrap();
        assert_eq!(out, "y = 3.00");
    }

    #[test]
    fn format_spec_without_dot_leaves_result_unchanged() {
        let mut eval = FakeEvaluator;
        let out = evaluate_formulas("y = @(1 + 2|raw)", &mut eval, &[], "@", "()", "#").unwrap();
        assert_eq!(out, "y = 3");
    }
}
