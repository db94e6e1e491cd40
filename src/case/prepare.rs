//! Case enumeration and materialization: turn an input template plus a
//! variable assignment into one populated directory per case.
//!
//! Grounded on `fz/helpers.py::_get_case_directories`,
//! `compile_to_result_directories`, `prepare_case_directories`.

use std::path::{Path, PathBuf};

use crate::model::Model;
use crate::prelude::*;
use crate::template::{discover_variables, substitute_variables};
use crate::value::{ScalarValue, VarValue};

pub struct PreparedCase {
    pub index: usize,
    pub name: String,
    pub bindings: Vec<(String, ScalarValue)>,
    pub case_dir: PathBuf,
}

/// `k1=v1,k2=v2,...` per spec.md §6.2, in assignment-declared variable
/// order. A single case (no swept variables) uses the bare results root.
fn case_name(bindings: &[(String, ScalarValue)]) -> String {
    bindings.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",")
}

/// Expands `assignment` into every case, computing its directory name and
/// target path under `results_root`.
pub fn enumerate_cases(
    assignment: &[(String, VarValue)],
    results_root: &Path,
) -> Vec<PreparedCase> {
    let combos = crate::value::expand_cases(assignment);
    let total = combos.len();

    combos
        .into_iter()
        .enumerate()
        .map(|(index, bindings)| {
            let case_dir = if total > 1 {
                results_root.join(case_name(&bindings))
            } else {
                results_root.to_path_buf()
            };
            let name = if total > 1 { case_name(&bindings) } else { "single case".to_owned() };
            PreparedCase { index, name, bindings, case_dir }
        })
        .collect()
}

/// Copies `input` (file or directory tree) into `case.case_dir`, then
/// substitutes every discovered variable in every text file. Binary files
/// (non-UTF-8) are copied verbatim, untouched, matching the original's
/// tolerant handling of non-text input.
pub fn materialize_case(input: &Path, case: &PreparedCase, model: &Model) -> AppResult<()> {
    std::fs::create_dir_all(&case.case_dir).into_diagnostic()?;

    if input.is_file() {
        let dest = case.case_dir.join(input.file_name().unwrap());
        materialize_file(input, &dest, &case.bindings, model)?;
    } else {
        crate::io::fs::copy_tree(input, &case.case_dir)?;
        for relative in crate::io::fs::list_files_relative(&case.case_dir)? {
            let path = case.case_dir.join(&relative);
            substitute_in_place(&path, &case.bindings, model)?;
        }
    }

    Ok(())
}

fn materialize_file(
    src: &Path,
    dest: &Path,
    bindings: &[(String, ScalarValue)],
    model: &Model,
) -> AppResult<()> {
    std::fs::copy(src, dest).into_diagnostic()?;
    substitute_in_place(dest, bindings, model)
}

fn substitute_in_place(path: &Path, bindings: &[(String, ScalarValue)], model: &Model) -> AppResult<()> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Ok(());
    };

    let var_prefix = model.var_prefix();
    let var_delim = model.var_delim()?;
    let substituted = substitute_variables(&content, bindings, &var_prefix, &var_delim)?;

    std::fs::write(path, substituted).into_diagnostic()
}

/// Union of variable names discovered across `input`, used by `fz input`.
pub fn discover(input: &Path, model: &Model) -> AppResult<Vec<String>> {
    let names = discover_variables(input, &model.var_prefix(), &model.var_delim()?)?;
    Ok(names.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::VarValue;

    #[test]
    fn single_case_uses_bare_results_root() {
        let assignment = vec![("x".to_owned(), VarValue::Scalar(ScalarValue::Int(1)))];
        let cases = enumerate_cases(&assignment, Path::new("/results"));
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].case_dir, PathBuf::from("/results"));
        assert_eq!(cases[0].name, "single case");
    }

    #[test]
    fn swept_cases_get_kv_named_subdirectories() {
        let assignment = vec![(
            "x".to_owned(),
            VarValue::List(vec![ScalarValue::Int(1), ScalarValue::Int(2)]),
        )];
        let cases = enumerate_cases(&assignment, Path::new("/results"));
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].case_dir, PathBuf::from("/results/x=1"));
        assert_eq!(cases[1].case_dir, PathBuf::from("/results/x=2"));
    }
}
