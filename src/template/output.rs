//! Output casting: turn a calculator's raw stdout text into a typed value.
//!
//! Grounded on `fz/engine.py::cast_output`'s four-step ladder: JSON, then a
//! permissive "safe literal" pass (the original uses `ast.literal_eval` to
//! catch Python-ish literals JSON rejects, like single-quoted strings or
//! bare `True`/`False`/`None`), then numeric, then string. Single-element
//! sequences collapse to their lone element.

use serde_json::Value;

pub fn cast_output(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(collapse_singleton(value));
    }

    if let Some(value) = try_safe_literal(trimmed) {
        return Some(collapse_singleton(value));
    }

    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(Value::from(i));
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return Some(Value::from(f));
    }

    Some(Value::String(trimmed.to_owned()))
}

fn collapse_singleton(value: Value) -> Value {
    match value {
        Value::Array(items) if items.len() == 1 => items.into_iter().next().unwrap(),
        other => other,
    }
}

/// A small permissive pass that normalizes Python-flavored literals
/// (`True`/`False`/`None`, single-quoted strings) into JSON before retrying
/// the parse, covering the common cases `ast.literal_eval` handles that
/// strict JSON rejects.
fn try_safe_literal(text: &str) -> Option<Value> {
    if text == "True" {
        return Some(Value::Bool(true));
    }
    if text == "False" {
        return Some(Value::Bool(false));
    }
    if text == "None" {
        return Some(Value::Null);
    }

    if (text.starts_with('[') && text.ends_with(']')) || (text.starts_with('(') && text.ends_with(')')) {
        let normalized = normalize_python_literal(text);
        let bracketed = format!("[{}]", &normalized[1..normalized.len() - 1]);
        if let Ok(value) = serde_json::from_str::<Value>(&bracketed) {
            return Some(value);
        }
    }

    None
}

fn normalize_python_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_single = false;
    for ch in text.chars() {
        match ch {
            '\'' if !in_single => {
                in_single = true;
                out.push('"');
            }
            '\'' if in_single => {
                in_single = false;
                out.push('"');
            }
            '"' if in_single => out.push_str("\\\""),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_is_none() {
        assert_eq!(cast_output(""), None);
        assert_eq!(cast_output("   "), None);
    }

    #[test]
    fn parses_json_object() {
        assert_eq!(cast_output(r#"{"a": 1}"#), Some(json!({"a": 1})));
    }

    #[test]
    fn single_element_array_collapses() {
        assert_eq!(cast_output("[42]"), Some(json!(42)));
    }

    #[test]
    fn multi_element_array_stays_array() {
        assert_eq!(cast_output("[1, 2, 3]"), Some(json!([1, 2, 3])));
    }

    #[test]
    fn plain_integer() {
        assert_eq!(cast_output("17"), Some(json!(17)));
    }

    #[test]
    fn plain_float() {
        assert_eq!(cast_output("3.14"), Some(json!(3.14)));
    }

    #[test]
    fn falls_back_to_string() {
        assert_eq!(cast_output("hello world"), Some(json!("hello world")));
    }

    #[test]
    fn python_booleans_and_none() {
        assert_eq!(cast_output("True"), Some(json!(true)));
        assert_eq!(cast_output("None"), Some(Value::Null));
    }

    #[test]
    fn single_quoted_list_normalizes() {
        assert_eq!(cast_output("['a', 'b']"), Some(json!(["a", "b"])));
    }
}
