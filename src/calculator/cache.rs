//! Cache calculator adapter: satisfies a case from a previously computed
//! result directory instead of running anything, keyed by `.fz_hash`.
//!
//! Grounded on the cache branch of `fz/helpers.py::run_single_case`: before
//! trying any real calculator, look for an existing case directory whose
//! `.fz_hash` manifest matches, and reuse its outputs directly.

use std::path::{Path, PathBuf};

use crate::case::hash::read_hash_manifest;
use crate::prelude::*;

/// Searches `glob_pattern` for a case directory whose `.fz_hash` manifest
/// matches `expected_hash` exactly (same digests for the same relative
/// paths). Returns the first match, or `None` if no cached case is usable,
/// i.e. this is a cache *miss*, not an error — the caller falls through to
/// a real calculator.
pub fn find_cached_case(glob_pattern: &str, expected_hash: &[(String, String)]) -> AppResult<Option<PathBuf>> {
    for entry in glob::glob(glob_pattern).into_diagnostic().wrap_err("evaluating cache glob")? {
        let path = entry.into_diagnostic()?;
        if !path.is_dir() {
            continue;
        }
        let manifest_path = path.join(".fz_hash");
        if !manifest_path.is_file() {
            continue;
        }
        let manifest = read_hash_manifest(&manifest_path)?;
        if manifest == expected_hash {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// Copies every non-manifest file from a cached case directory into the
/// new case's temp work directory, so the runner can treat a cache hit
/// identically to a freshly-run case for the purposes of the copy step.
pub fn materialize_from_cache(cached_dir: &Path, work_dir: &Path) -> AppResult<()> {
    for relative in crate::io::fs::list_files_relative(cached_dir)? {
        if relative == Path::new(".fz_hash") {
            continue;
        }
        let src = cached_dir.join(&relative);
        let dst = work_dir.join(&relative);
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent).into_diagnostic()?;
        }
        std::fs::copy(&src, &dst).into_diagnostic()?;
    }
    Ok(())
}
