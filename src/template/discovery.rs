//! Variable discovery: scan template content for `$name` / `$(name)`
//! occurrences.
//!
//! Grounded on `fz/engine.py::parse_variables_from_content` /
//! `parse_variables_from_path`.

use std::collections::BTreeSet;
use std::path::Path;

use regex::Regex;

use crate::prelude::*;

fn variable_pattern(var_prefix: &str, delim: &str) -> AppResult<Regex> {
    let prefix = regex::escape(var_prefix);

    let pattern = if delim.chars().count() == 2 {
        let mut chars = delim.chars();
        let left = regex::escape(&chars.next().unwrap().to_string());
        let right = regex::escape(&chars.next().unwrap().to_string());
        format!("{prefix}(?:{left}([a-zA-Z_][a-zA-Z0-9_]*)(?:~[^{right}]*)?{right}|([a-zA-Z_][a-zA-Z0-9_]*))")
    } else {
        format!("{prefix}([a-zA-Z_][a-zA-Z0-9_]*)")
    };

    Regex::new(&pattern).into_diagnostic().wrap_err("building variable discovery pattern")
}

/// Discovers every distinct variable name referenced in `content`.
pub fn discover_variables_in_content(
    content: &str,
    var_prefix: &str,
    delim: &str,
) -> AppResult<BTreeSet<String>> {
    let re = variable_pattern(var_prefix, delim)?;
    let mut names = BTreeSet::new();

    for caps in re.captures_iter(content) {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_owned());
        if let Some(name) = name {
            names.insert(name);
        }
    }

    Ok(names)
}

/// Discovers variables across a single file or a whole directory tree.
/// Files that aren't valid UTF-8 are skipped, matching the original's
/// tolerant handling of binary input.
pub fn discover_variables(input: &Path, var_prefix: &str, delim: &str) -> AppResult<BTreeSet<String>> {
    if !input.exists() {
        return Err(crate::error::Error::InputPathMissing(input.display().to_string()).into());
    }

    let mut names = BTreeSet::new();

    if input.is_file() {
        if let Ok(content) = std::fs::read_to_string(input) {
            names.extend(discover_variables_in_content(&content, var_prefix, delim)?);
        }
        return Ok(names);
    }

    for entry in walk_files(input)? {
        if let Ok(content) = std::fs::read_to_string(&entry) {
            names.extend(discover_variables_in_content(&content, var_prefix, delim)?);
        }
    }

    Ok(names)
}

fn walk_files(root: &Path) -> AppResult<Vec<std::path::PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).into_diagnostic()? {
            let entry = entry.into_diagnostic()?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_and_delimited_forms_both_match() {
        let names = discover_variables_in_content("value is $x and $(y) done", "$", "()").unwrap();
        assert_eq!(names.len(), 2);
        assert!(names.contains("x"));
        assert!(names.contains("y"));
    }

    #[test]
    fn no_delim_only_matches_bare_prefix() {
        let names = discover_variables_in_content("$alpha plus $beta", "$", "").unwrap();
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn repeated_occurrences_dedupe() {
        let names = discover_variables_in_content("$x $x $x", "$", "()").unwrap();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn delimited_form_with_default_value_matches() {
        let names = discover_variables_in_content("p=${port~8080}", "$", "{}").unwrap();
        assert_eq!(names.len(), 1);
        assert!(names.contains("port"));
    }
}
