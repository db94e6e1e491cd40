//! Unique-directory guard: never silently overwrite a pre-existing results
//! directory.
//!
//! Grounded on spec.md §4.3. A colliding directory is renamed aside with a
//! seconds-resolution timestamp suffix; the fresh run gets an empty
//! directory at the requested path.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::prelude::*;

pub struct GuardedDirectory {
    pub path: PathBuf,
    pub renamed_from: Option<PathBuf>,
}

pub fn ensure_unique(requested: &Path) -> AppResult<GuardedDirectory> {
    let renamed_from = if requested.exists() {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .into_diagnostic()?
            .as_secs();
        let renamed = sibling_with_suffix(requested, timestamp);
        std::fs::rename(requested, &renamed)
            .into_diagnostic()
            .wrap_err_with(|| format!("renaming {} aside to {}", requested.display(), renamed.display()))?;
        Some(renamed)
    } else {
        None
    };

    std::fs::create_dir_all(requested)
        .into_diagnostic()
        .wrap_err_with(|| format!("creating {}", requested.display()))?;

    Ok(GuardedDirectory { path: requested.to_path_buf(), renamed_from })
}

fn sibling_with_suffix(path: &Path, timestamp: u64) -> PathBuf {
    let mut renamed = path.as_os_str().to_owned();
    renamed.push(format!(".{timestamp}"));
    PathBuf::from(renamed)
}

/// Rewrites any `cache://_` calculator URI to point at the directory that
/// was just renamed aside, so a fresh run can cache-match its own previous
/// output. No-op if nothing was renamed or no such sentinel URI is present.
pub fn rewrite_self_cache_uris(calculators: &mut [String], guard: &GuardedDirectory) {
    let Some(renamed) = &guard.renamed_from else { return };
    let glob_pattern = format!("{}/*", renamed.display());

    for uri in calculators.iter_mut() {
        if uri == "cache://_" {
            *uri = format!("cache://{glob_pattern}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_directory_has_no_rename() {
        let parent = tempfile::tempdir().unwrap();
        let target = parent.path().join("results");
        let guard = ensure_unique(&target).unwrap();
        assert_eq!(guard.renamed_from, None);
        assert!(target.is_dir());
    }

    #[test]
    fn colliding_directory_is_renamed_aside() {
        let parent = tempfile::tempdir().unwrap();
        let target = parent.path().join("results");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("marker.txt"), "old").unwrap();

        let guard = ensure_unique(&target).unwrap();
        let renamed = guard.renamed_from.expect("expected a rename");
        assert!(renamed.join("marker.txt").is_file());
        assert!(target.read_dir().unwrap().next().is_none());
    }

    #[test]
    fn self_cache_sentinel_is_rewritten_after_rename() {
        let parent = tempfile::tempdir().unwrap();
        let target = parent.path().join("results");
        std::fs::create_dir(&target).unwrap();

        let guard = ensure_unique(&target).unwrap();
        let mut calculators = vec!["cache://_".to_owned(), "sh://".to_owned()];
        rewrite_self_cache_uris(&mut calculators, &guard);

        assert!(calculators[0].starts_with("cache://"));
        assert!(calculators[0].contains(&guard.renamed_from.unwrap().display().to_string()));
        assert_eq!(calculators[1], "sh://");
    }
}
