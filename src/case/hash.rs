//! Content-addressed case hashing: the `.fz_hash` manifest.
//!
//! Format per spec.md §6.2: UTF-8, LF line endings, each line
//! `<hex-digest> <relative-path>` (one space when writing; one or two
//! spaces accepted when reading). SHA-256 is the concrete digest choice
//! (spec.md leaves this open; any stable choice is acceptable).

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::prelude::*;

pub const MANIFEST_NAME: &str = ".fz_hash";

fn digest_file(path: &Path) -> AppResult<String> {
    let bytes = std::fs::read(path).into_diagnostic().wrap_err_with(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Computes the manifest for every file under `case_dir`, in sorted
/// depth-first order, skipping any pre-existing `.fz_hash` itself.
pub fn compute_manifest(case_dir: &Path) -> AppResult<Vec<(String, String)>> {
    let mut manifest = Vec::new();
    for relative in crate::io::fs::list_files_relative(case_dir)? {
        if relative == Path::new(MANIFEST_NAME) {
            continue;
        }
        let digest = digest_file(&case_dir.join(&relative))?;
        manifest.push((digest, relative.to_string_lossy().into_owned()));
    }
    Ok(manifest)
}

/// Writes the manifest as `<digest> <path>` lines, one space, LF-terminated.
pub fn write_manifest(case_dir: &Path, manifest: &[(String, String)]) -> AppResult<()> {
    let mut body = String::new();
    for (digest, path) in manifest {
        body.push_str(digest);
        body.push(' ');
        body.push_str(path);
        body.push('\n');
    }
    std::fs::write(case_dir.join(MANIFEST_NAME), body).into_diagnostic()
}

/// Reads a manifest, accepting either one or two spaces between digest and
/// path (spec.md §6.2: "both acceptable for parsing").
pub fn read_hash_manifest(manifest_path: &Path) -> AppResult<Vec<(String, String)>> {
    let text = std::fs::read_to_string(manifest_path)
        .into_diagnostic()
        .wrap_err_with(|| format!("reading {}", manifest_path.display()))?;

    let mut entries = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let mut parts = line.splitn(2, ' ');
        let digest = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default();
        let path = rest.trim_start_matches(' ');
        entries.push((digest.to_owned(), path.to_owned()));
    }
    Ok(entries)
}

/// Computes and writes the manifest in one step, returning it for the
/// caller to compare against a cache candidate.
pub fn create_hash_file(case_dir: &Path) -> AppResult<Vec<(String, String)>> {
    let manifest = compute_manifest(case_dir)?;
    write_manifest(case_dir, &manifest)?;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn manifest_is_stable_for_identical_content() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        for dir in [dir_a.path(), dir_b.path()] {
            let mut f = std::fs::File::create(dir.join("input.txt")).unwrap();
            writeln!(f, "x = 1").unwrap();
        }

        let manifest_a = compute_manifest(dir_a.path()).unwrap();
        let manifest_b = compute_manifest(dir_b.path()).unwrap();
        assert_eq!(manifest_a, manifest_b);
    }

    #[test]
    fn manifest_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("input.txt"), "x = 1").unwrap();
        let first = compute_manifest(dir.path()).unwrap();

        std::fs::write(dir.path().join("input.txt"), "x = 2").unwrap();
        let second = compute_manifest(dir.path()).unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn reads_single_and_double_space_separators() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join(MANIFEST_NAME);
        std::fs::write(&manifest_path, "abc123 input.txt\ndef456  nested/out.txt\n").unwrap();

        let entries = read_hash_manifest(&manifest_path).unwrap();
        assert_eq!(entries, vec![
            ("abc123".to_owned(), "input.txt".to_owned()),
            ("def456".to_owned(), "nested/out.txt".to_owned()),
        ]);
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let manifest = create_hash_file(dir.path()).unwrap();
        let read_back = read_hash_manifest(&dir.path().join(MANIFEST_NAME)).unwrap();
        assert_eq!(manifest, read_back);
    }
}
