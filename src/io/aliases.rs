//! "JSON-or-path-or-alias" argument resolution, per spec.md §6.1: try a JSON
//! literal first, then an existing `.json` path, then an alias lookup under
//! `.fz/<kind>/<name>.json` (falling back to `~/.fz/<kind>/<name>.json`).
//! Each fallback step may emit a single warning.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::prelude::*;

pub fn resolve_json_or_path_or_alias(
    spec: &str,
    project_root: &Path,
    kind: &str,
) -> AppResult<Option<Value>> {
    let trimmed = spec.trim();

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        let value = serde_json::from_str(trimmed)
            .into_diagnostic()
            .wrap_err_with(|| format!("parsing inline JSON for '{spec}'"))?;
        return Ok(Some(value));
    }

    let as_path = Path::new(spec);
    if as_path.extension().map(|e| e == "json").unwrap_or(false) && as_path.is_file() {
        let text = std::fs::read_to_string(as_path)
            .into_diagnostic()
            .wrap_err_with(|| format!("reading {}", as_path.display()))?;
        let value = serde_json::from_str(&text)
            .into_diagnostic()
            .wrap_err_with(|| format!("parsing {}", as_path.display()))?;
        return Ok(Some(value));
    }

    if as_path.extension().map(|e| e == "json").unwrap_or(false) {
        tracing::warn!("'{}' looks like a JSON path but does not exist, trying alias lookup", spec);
    }

    for candidate in alias_candidates(spec, project_root, kind) {
        if candidate.is_file() {
            let text = std::fs::read_to_string(&candidate)
                .into_diagnostic()
                .wrap_err_with(|| format!("reading {}", candidate.display()))?;
            let value = serde_json::from_str(&text)
                .into_diagnostic()
                .wrap_err_with(|| format!("parsing {}", candidate.display()))?;
            return Ok(Some(value));
        }
    }

    tracing::warn!("'{}' did not resolve as JSON, path, or {} alias", spec, kind);
    Ok(None)
}

/// Local project alias, then user-global alias, in that order.
fn alias_candidates(name: &str, project_root: &Path, kind: &str) -> Vec<PathBuf> {
    let mut candidates = vec![project_root.join(".fz").join(kind).join(format!("{name}.json"))];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".fz").join(kind).join(format!("{name}.json")));
    }
    candidates
}

/// Non-JSON plugin lookup (algorithms may be `.py`/`.R`/etc): returns the
/// first matching path under project-local then global `.fz/<kind>/`.
pub fn find_plugin_path(name: &str, project_root: &Path, kind: &str) -> Option<PathBuf> {
    let roots = [
        project_root.join(".fz").join(kind),
        dirs::home_dir().unwrap_or_default().join(".fz").join(kind),
    ];

    for root in roots {
        let Ok(entries) = std::fs::read_dir(&root) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.file_stem().map(|s| s == name).unwrap_or(false) {
                return Some(path);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inline_json_object_parses() {
        let value = resolve_json_or_path_or_alias("{\"a\": 1}", Path::new("."), "models")
            .unwrap()
            .unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn inline_json_array_parses() {
        let value = resolve_json_or_path_or_alias("[1, 2, 3]", Path::new("."), "models")
            .unwrap()
            .unwrap();
        assert_eq!(value, json!([1, 2, 3]));
    }

    #[test]
    fn unresolvable_alias_returns_none() {
        let value = resolve_json_or_path_or_alias("does-not-exist", Path::new("/tmp/fz-test-missing"), "models").unwrap();
        assert!(value.is_none());
    }
}
