//! Result table assembler: merges per-case records into a column-indexed
//! row-major table, ordered by case index.
//!
//! Grounded on spec.md §4.8 and `fz/helpers.py::build_result_table`. The
//! `fzo`-over-glob case (a single `fz output` call against several already
//! materialized directories, with no variable assignment of its own) promotes
//! `k1=v1,k2=v2,...` leaf directory names to first-class columns when every
//! matched directory fits that shape.

use std::collections::BTreeMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::case::runner::CaseResultRecord;
use crate::case::CaseStatus;
use crate::value::ScalarValue;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

const FIXED_COLUMNS: &[&str] = &["path", "calculator", "status", "error", "command"];

/// Assembles a table from case records, ordered by `case_index`. Variable
/// columns come first (in first-declaration order across all records),
/// followed by output columns (alphabetical, since output order isn't
/// otherwise meaningful across a heterogeneous case set), then the fixed
/// columns.
pub fn assemble(records: &[CaseResultRecord]) -> ResultTable {
    let mut ordered = records.to_vec();
    ordered.sort_by_key(|r| r.index);

    let var_columns: Vec<String> = ordered
        .iter()
        .flat_map(|record| record.bindings.iter().map(|(name, _)| name.clone()))
        .unique()
        .collect();

    let output_columns: BTreeMap<String, ()> =
        ordered.iter().flat_map(|record| record.outputs.keys().cloned()).map(|name| (name, ())).collect();

    let mut columns = var_columns.clone();
    columns.extend(output_columns.keys().cloned());
    columns.extend(FIXED_COLUMNS.iter().map(|s| s.to_string()));

    let rows = ordered
        .iter()
        .map(|record| row_for(record, &var_columns, output_columns.keys()))
        .collect();

    ResultTable { columns, rows }
}

fn row_for<'a>(
    record: &CaseResultRecord,
    var_columns: &[String],
    output_names: impl Iterator<Item = &'a String>,
) -> Vec<Value> {
    let mut row = Vec::new();

    for name in var_columns {
        let value = record
            .bindings
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| scalar_to_json(v))
            .unwrap_or(Value::Null);
        row.push(value);
    }

    for name in output_names {
        row.push(record.outputs.get(name).cloned().unwrap_or(Value::Null));
    }

    row.push(Value::String(record.path.display().to_string()));
    row.push(record.calculator.clone().map(Value::String).unwrap_or(Value::Null));
    row.push(Value::String(status_string(&record.status)));
    row.push(record.error.clone().map(Value::String).unwrap_or(Value::Null));
    row.push(record.command.clone().map(Value::String).unwrap_or(Value::Null));

    row
}

fn scalar_to_json(value: &ScalarValue) -> Value {
    value.to_json()
}

fn status_string(status: &CaseStatus) -> String {
    status.as_str().to_owned()
}

/// `k1=v1,k2=v2,...` promotion for a glob of pre-existing directories with
/// no assignment of their own (the `fz output` path). Returns `None` if any
/// directory's leaf name doesn't parse as that shape, in which case the
/// directory's name is left as an opaque `path` value instead.
pub fn promote_directory_names(dirs: &[std::path::PathBuf]) -> Option<Vec<Vec<(String, String)>>> {
    let mut parsed = Vec::with_capacity(dirs.len());

    for dir in dirs {
        let leaf = dir.file_name()?.to_str()?;
        let pairs = parse_kv_leaf(leaf)?;
        parsed.push(pairs);
    }

    Some(parsed)
}

fn parse_kv_leaf(leaf: &str) -> Option<Vec<(String, String)>> {
    if leaf.is_empty() {
        return None;
    }
    leaf.split(',')
        .map(|pair| {
            let (k, v) = pair.split_once('=')?;
            if k.is_empty() {
                None
            } else {
                Some((k.to_owned(), v.to_owned()))
            }
        })
        .collect()
}

/// Casts promoted `k=v` string values with the same four-step ladder used
/// for output extraction, per spec.md §4.8.
pub fn cast_promoted_value(raw: &str) -> Value {
    crate::template::cast_output(raw).unwrap_or_else(|| Value::String(raw.to_owned()))
}

pub fn render_csv(table: &ResultTable) -> Result<String, String> {
    let mut writer = csv::WriterBuilder::new().from_writer(vec![]);
    writer.write_record(&table.columns).map_err(|e| e.to_string())?;
    for row in &table.rows {
        let record: Vec<String> = row.iter().map(json_cell_to_string).collect();
        writer.write_record(&record).map_err(|e| e.to_string())?;
    }
    let bytes = writer.into_inner().map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map_err(|e| e.to_string())
}

fn json_cell_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn render_json(table: &ResultTable) -> Value {
    let rows: Vec<Value> = table
        .rows
        .iter()
        .map(|row| {
            let mut map = serde_json::Map::new();
            for (name, value) in table.columns.iter().zip(row.iter()) {
                map.insert(name.clone(), value.clone());
            }
            Value::Object(map)
        })
        .collect();
    Value::Array(rows)
}

pub fn render_markdown(table: &ResultTable) -> String {
    let mut out = String::new();
    out.push_str("| ");
    out.push_str(&table.columns.join(" | "));
    out.push_str(" |\n|");
    out.push_str(&" --- |".repeat(table.columns.len()));
    out.push('\n');
    for row in &table.rows {
        out.push_str("| ");
        let cells: Vec<String> = row.iter().map(json_cell_to_string).collect();
        out.push_str(&cells.join(" | "));
        out.push_str(" |\n");
    }
    out
}

pub fn render_html(table: &ResultTable) -> String {
    let mut out = String::from("<table>\n<thead><tr>");
    for column in &table.columns {
        out.push_str(&format!("<th>{column}</th>"));
    }
    out.push_str("</tr></thead>\n<tbody>\n");
    for row in &table.rows {
        out.push_str("<tr>");
        for cell in row {
            out.push_str(&format!("<td>{}</td>", json_cell_to_string(cell)));
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</tbody>\n</table>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn record(index: usize, x: i64, status: CaseStatus) -> CaseResultRecord {
        let mut outputs = HashMap::new();
        outputs.insert("y".to_owned(), Value::from(x * 2));
        CaseResultRecord {
            index,
            path: PathBuf::from(format!("results/x={x}")),
            bindings: vec![("x".to_owned(), ScalarValue::Int(x))],
            calculator: Some("sh://".to_owned()),
            status,
            error: None,
            command: Some("true".to_owned()),
            outputs,
        }
    }

    #[test]
    fn rows_ordered_by_case_index_regardless_of_input_order() {
        let records = vec![record(1, 2, CaseStatus::Done), record(0, 1, CaseStatus::Done)];
        let table = assemble(&records);
        assert_eq!(table.rows[0][table.column_index("x").unwrap()], Value::from(1));
        assert_eq!(table.rows[1][table.column_index("x").unwrap()], Value::from(2));
    }

    #[test]
    fn fixed_columns_always_present() {
        let table = assemble(&[record(0, 1, CaseStatus::Failed)]);
        for name in FIXED_COLUMNS {
            assert!(table.columns.contains(&name.to_string()));
        }
    }

    #[test]
    fn kv_leaf_promotion_parses_comma_separated_pairs() {
        let dirs = vec![PathBuf::from("/r/x=1,y=2"), PathBuf::from("/r/x=3,y=4")];
        let parsed = promote_directory_names(&dirs).unwrap();
        assert_eq!(parsed[0], vec![("x".to_owned(), "1".to_owned()), ("y".to_owned(), "2".to_owned())]);
    }

    #[test]
    fn kv_leaf_promotion_fails_if_any_leaf_does_not_match() {
        let dirs = vec![PathBuf::from("/r/x=1"), PathBuf::from("/r/plain")];
        assert!(promote_directory_names(&dirs).is_none());
    }

    #[test]
    fn markdown_render_has_header_separator_row() {
        let table = assemble(&[record(0, 1, CaseStatus::Done)]);
        let md = render_markdown(&table);
        assert!(md.lines().nth(1).unwrap().starts_with("|"));
    }
}
