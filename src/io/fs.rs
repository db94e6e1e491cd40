//! Small filesystem helpers: recursive copy, directory walk, safe removal.
//!
//! Grounded on `fz/helpers.py::prepare_case_directories`'s shutil usage and
//! `fz/installer.py::extract_model_files`'s walk-and-flatten logic.

use std::fs;
use std::path::{Path, PathBuf};

use crate::prelude::*;

/// Recursively copies `src` into `dst`, creating directories as needed.
/// Mirrors `shutil.copytree(..., dirs_exist_ok=True)`.
pub fn copy_tree(src: &Path, dst: &Path) -> AppResult<()> {
    fs::create_dir_all(dst)
        .into_diagnostic()
        .wrap_err_with(|| format!("creating directory {}", dst.display()))?;

    for entry in fs::read_dir(src)
        .into_diagnostic()
        .wrap_err_with(|| format!("reading directory {}", src.display()))?
    {
        let entry = entry.into_diagnostic()?;
        let file_type = entry.file_type().into_diagnostic()?;
        let target = dst.join(entry.file_name());

        if file_type.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else if file_type.is_symlink() {
            let link_target = fs::read_link(entry.path()).into_diagnostic()?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link_target, &target).into_diagnostic()?;
            #[cfg(not(unix))]
            fs::copy(entry.path(), &target).into_diagnostic()?;
        } else {
            fs::copy(entry.path(), &target)
                .into_diagnostic()
                .wrap_err_with(|| format!("copying {} -> {}", entry.path().display(), target.display()))?;
        }
    }

    Ok(())
}

/// Lists regular files under `root`, recursively, relative to `root`, in a
/// stable (sorted) order so hashing and manifest writing are deterministic.
pub fn list_files_relative(root: &Path) -> AppResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    collect_files(root, root, &mut out)?;
    out.sort();
    Ok(out)
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> AppResult<()> {
    for entry in fs::read_dir(dir).into_diagnostic()? {
        let entry = entry.into_diagnostic()?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let relative = path
                .strip_prefix(root)
                .expect("walked path is always under root")
                .to_path_buf();
            out.push(relative);
        }
    }
    Ok(())
}

/// Renames `src` to `dst` falling back to copy+remove across filesystem
/// boundaries, matching shutil.move's behavior that `std::fs::rename` alone
/// doesn't guarantee.
pub fn move_dir(src: &Path, dst: &Path) -> AppResult<()> {
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    copy_tree(src, dst)?;
    fs::remove_dir_all(src).into_diagnostic()?;
    Ok(())
}
