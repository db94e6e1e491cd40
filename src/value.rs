//! Scalar/list variable values shared by the template engine, case hasher,
//! and result table.
//!
//! Grounded on spec.md §3's variable-assignment entity; `cast_output`'s
//! four-step ladder in `fz/engine.py` is what `ScalarValue::parse` mirrors.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Int(v) => write!(f, "{v}"),
            ScalarValue::Float(v) => write!(f, "{v}"),
            ScalarValue::Bool(v) => write!(f, "{v}"),
            ScalarValue::Str(v) => write!(f, "{v}"),
        }
    }
}

impl ScalarValue {
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(ScalarValue::Str(s.clone())),
            Value::Bool(b) => Some(ScalarValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(ScalarValue::Int(i))
                } else {
                    n.as_f64().map(ScalarValue::Float)
                }
            }
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ScalarValue::Int(v) => Value::from(*v),
            ScalarValue::Float(v) => Value::from(*v),
            ScalarValue::Bool(v) => Value::from(*v),
            ScalarValue::Str(v) => Value::from(v.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarValue {
    Scalar(ScalarValue),
    List(Vec<ScalarValue>),
}

impl VarValue {
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Array(items) => {
                let scalars: Option<Vec<ScalarValue>> =
                    items.iter().map(ScalarValue::from_json).collect();
                scalars.map(VarValue::List)
            }
            other => ScalarValue::from_json(other).map(VarValue::Scalar),
        }
    }

    /// The values this variable sweeps over, one per case. A scalar sweeps
    /// over exactly one value.
    pub fn levels(&self) -> Vec<ScalarValue> {
        match self {
            VarValue::Scalar(s) => vec![s.clone()],
            VarValue::List(items) => items.clone(),
        }
    }
}

/// Full cross-product expansion of a variable-assignment map into individual
/// per-case scalar bindings, in the deterministic order spec.md's case
/// naming depends on: first variable varies slowest (outer loop).
pub fn expand_cases(
    assignment: &[(String, VarValue)],
) -> Vec<Vec<(String, ScalarValue)>> {
    let mut cases: Vec<Vec<(String, ScalarValue)>> = vec![Vec::new()];

    for (name, value) in assignment {
        let levels = value.levels();
        let mut next = Vec::with_capacity(cases.len() * levels.len());
        for case in &cases {
            for level in &levels {
                let mut extended = case.clone();
                extended.push((name.clone(), level.clone()));
                next.push(extended);
            }
        }
        cases = next;
    }

    cases
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_cases_is_cross_product_in_declared_order() {
        let assignment = vec![
            ("a".to_owned(), VarValue::List(vec![ScalarValue::Int(1), ScalarValue::Int(2)])),
            ("b".to_owned(), VarValue::List(vec![ScalarValue::Int(10), ScalarValue::Int(20)])),
        ];
        let cases = expand_cases(&assignment);
        assert_eq!(cases.len(), 4);
        assert_eq!(
            cases[0],
            vec![("a".to_owned(), ScalarValue::Int(1)), ("b".to_owned(), ScalarValue::Int(10))]
        );
        assert_eq!(
            cases[3],
            vec![("a".to_owned(), ScalarValue::Int(2)), ("b".to_owned(), ScalarValue::Int(20))]
        );
    }

    #[test]
    fn scalar_assignment_yields_single_case() {
        let assignment = vec![("a".to_owned(), VarValue::Scalar(ScalarValue::Int(1)))];
        let cases = expand_cases(&assignment);
        assert_eq!(cases.len(), 1);
    }
}
