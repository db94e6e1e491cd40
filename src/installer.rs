//! Plugin install/uninstall: GitHub shortname, full URL, or local zip/path,
//! for either a model or an algorithm plugin.
//!
//! Grounded on `fz/installer.py` in its entirety (`normalize_github_url`,
//! `download_model`, `extract_model_files`, `install_model`,
//! `uninstall_model`, `list_installed_models`), generalized over
//! `kind` ("models"/"algorithms") since the original's model-only installer
//! and the spec's `install model|algorithm` subcommands share the same
//! archive-then-copy-`.fz`-subdirectories shape.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::prelude::*;

pub struct InstallOutcome {
    pub name: String,
    pub install_path: PathBuf,
    pub installed_files: Vec<String>,
}

/// Resolves a plugin source to a downloadable GitHub archive URL, or `None`
/// if `source` is a local path that should be used as-is.
pub fn normalize_github_url(source: &str, org: &str, prefix: &str) -> Option<String> {
    if Path::new(source).exists() || source.ends_with(".zip") {
        return None;
    }

    if let Some(rest) = source.strip_prefix("https://").or_else(|| source.strip_prefix("http://")) {
        if rest.starts_with("github.com/") {
            let path = source.trim_end_matches('/');
            return Some(if path.ends_with(".zip") {
                path.to_owned()
            } else {
                format!("{path}/archive/refs/heads/main.zip")
            });
        }
        return Some(source.to_owned());
    }

    let name = if source.starts_with(prefix) { source.to_owned() } else { format!("{prefix}{source}") };
    Some(format!("https://github.com/{org}/{name}/archive/refs/heads/main.zip"))
}

fn download_plugin(source: &str, dest_dir: &Path, org: &str, prefix: &str) -> AppResult<PathBuf> {
    let local = Path::new(source);
    if local.exists() {
        info!(path = %local.display(), "using local plugin source");
        return local.canonicalize().into_diagnostic();
    }

    let url = normalize_github_url(source, org, prefix)
        .ok_or_else(|| Error::InvalidPluginSource(source.to_owned()))?;
    info!(%url, "downloading plugin");

    let filename = url.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or("plugin.zip");
    let dest_file = dest_dir.join(filename);

    let mut response = ureq::get(&url)
        .call()
        .into_diagnostic()
        .wrap_err_with(|| format!("downloading {url}"))?;
    let mut reader = response.body_mut().as_reader();
    let mut file = std::fs::File::create(&dest_file).into_diagnostic()?;
    std::io::copy(&mut reader, &mut file).into_diagnostic()?;

    info!(path = %dest_file.display(), "downloaded plugin archive");
    Ok(dest_file)
}

struct ExtractedPlugin {
    descriptor_path: PathBuf,
    name: String,
    fz_dir: Option<PathBuf>,
}

/// Extracts the zip and locates its descriptor JSON, looking first for a
/// bare `<kind-singular>.json` (model.json / algorithm.json) at the root,
/// then for `.fz/<kind>/*.json` the way a full repository checkout ships.
fn extract_plugin(zip_path: &Path, extract_dir: &Path, kind: &str) -> AppResult<ExtractedPlugin> {
    info!(path = %zip_path.display(), "extracting plugin archive");

    let file = std::fs::File::open(zip_path).into_diagnostic()?;
    let mut archive = zip::ZipArchive::new(file).into_diagnostic().wrap_err("reading plugin archive")?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).into_diagnostic()?;
        let Some(enclosed) = entry.enclosed_name() else { continue };
        let out_path = extract_dir.join(enclosed);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).into_diagnostic()?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).into_diagnostic()?;
        }
        let mut out_file = std::fs::File::create(&out_path).into_diagnostic()?;
        std::io::copy(&mut entry, &mut out_file).into_diagnostic()?;
    }

    let singular = kind.trim_end_matches('s');
    let mut descriptor = find_file_named(extract_dir, &format!("{singular}.json"));

    if descriptor.is_none() {
        descriptor = find_first_under_fz_subdir(extract_dir, kind);
    }

    let descriptor_path = descriptor.ok_or_else(|| {
        Error::InvalidPluginSource(format!("no {singular}.json or .fz/{kind}/*.json found in archive"))
    })?;

    debug!(path = %descriptor_path.display(), "found plugin descriptor");

    let content = std::fs::read_to_string(&descriptor_path).into_diagnostic()?;
    let descriptor: Value = serde_json::from_str(&content).into_diagnostic()?;
    let name = descriptor
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| Error::InvalidPluginSource("plugin descriptor has no 'id' field".to_owned()))?;

    let fz_dir = locate_fz_dir(&descriptor_path, extract_dir);

    Ok(ExtractedPlugin { descriptor_path, name, fz_dir })
}

fn find_file_named(root: &Path, filename: &str) -> Option<PathBuf> {
    walk(root).into_iter().find(|p| p.file_name().and_then(|n| n.to_str()) == Some(filename))
}

fn find_first_under_fz_subdir(root: &Path, kind: &str) -> Option<PathBuf> {
    walk(root)
        .into_iter()
        .find(|p| p.extension().and_then(|e| e.to_str()) == Some("json") && path_contains(p, &format!(".fz/{kind}/")))
}

fn path_contains(path: &Path, needle: &str) -> bool {
    path.to_string_lossy().replace('\\', "/").contains(needle)
}

fn walk(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(root) else { return out };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            out.extend(walk(&path));
        } else {
            out.push(path);
        }
    }
    out
}

/// The descriptor lives at `<extract_dir>/<repo>-main/.fz/<kind>/Name.json`;
/// its `.fz` ancestor is two levels up. Falls back to `<root entry>/.fz` if
/// that ancestor isn't actually named `.fz` (non-standard archive layout).
fn locate_fz_dir(descriptor_path: &Path, extract_dir: &Path) -> Option<PathBuf> {
    let candidate = descriptor_path.parent()?.parent()?;
    if candidate.file_name().and_then(|n| n.to_str()) == Some(".fz") {
        return Some(candidate.to_owned());
    }
    let root_entry = std::fs::read_dir(extract_dir).ok()?.flatten().next()?.path();
    let fallback = root_entry.join(".fz");
    fallback.exists().then_some(fallback)
}

fn install_base(kind: &str, global: bool) -> AppResult<PathBuf> {
    let root = if global {
        dirs::home_dir().ok_or_else(|| miette!("could not determine home directory"))?
    } else {
        std::env::current_dir().into_diagnostic()?
    };
    Ok(root.join(".fz").join(kind))
}

/// Installs a plugin (model or algorithm) from `source` into
/// `./.fz/<kind>/` or `~/.fz/<kind>/`, plus any other `.fz/*` subdirectories
/// the archive ships (calculators bundled alongside a model, for instance).
pub fn install(source: &str, kind: &str, global: bool, org: &str, prefix: &str) -> AppResult<InstallOutcome> {
    let base = install_base(kind, global)?;
    std::fs::create_dir_all(&base).into_diagnostic()?;

    let temp = tempfile::tempdir().into_diagnostic()?;
    let zip_path = download_plugin(source, temp.path(), org, prefix)?;

    let extract_dir = temp.path().join("extract");
    std::fs::create_dir_all(&extract_dir).into_diagnostic()?;
    let plugin = extract_plugin(&zip_path, &extract_dir, kind)?;

    let dest_json = base.join(format!("{}.json", plugin.name));
    std::fs::copy(&plugin.descriptor_path, &dest_json).into_diagnostic()?;
    info!(name = %plugin.name, path = %dest_json.display(), "installed plugin descriptor");

    let mut installed_files = Vec::new();
    if let Some(fz_dir) = &plugin.fz_dir {
        let install_root = if global {
            dirs::home_dir().ok_or_else(|| miette!("could not determine home directory"))?.join(".fz")
        } else {
            std::env::current_dir().into_diagnostic()?.join(".fz")
        };

        let Ok(entries) = std::fs::read_dir(fz_dir) else {
            return Ok(InstallOutcome { name: plugin.name, install_path: dest_json, installed_files });
        };

        for entry in entries.flatten() {
            let subdir = entry.path();
            let Some(subdir_name) = subdir.file_name().and_then(|n| n.to_str()) else { continue };
            if !subdir.is_dir() || subdir_name == kind {
                continue;
            }

            let dest_subdir = install_root.join(subdir_name);
            info!(subdir = subdir_name, "installing bundled .fz subdirectory");
            crate::io::fs::copy_tree(&subdir, &dest_subdir)?;

            for file in walk(&dest_subdir) {
                if let Ok(relative) = file.strip_prefix(&install_root) {
                    installed_files.push(relative.display().to_string());
                }
                make_executable_if_script(&file);
            }
        }
    } else {
        debug!(name = %plugin.name, "no bundled .fz directory found in archive");
    }

    Ok(InstallOutcome { name: plugin.name, install_path: dest_json, installed_files })
}

#[cfg(unix)]
fn make_executable_if_script(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let is_script = matches!(path.extension().and_then(|e| e.to_str()), Some("sh") | Some("bash") | Some("zsh"));
    if !is_script {
        return;
    }
    if let Ok(metadata) = std::fs::metadata(path) {
        let mut perms = metadata.permissions();
        perms.set_mode(0o755);
        let _ = std::fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn make_executable_if_script(_path: &Path) {}

pub fn uninstall(name: &str, kind: &str, global: bool) -> AppResult<bool> {
    let base = install_base(kind, global)?;
    let path = base.join(format!("{name}.json"));

    if !path.exists() {
        warn!(%name, path = %path.display(), "plugin not found");
        return Ok(false);
    }

    std::fs::remove_file(&path).into_diagnostic()?;
    info!(%name, "uninstalled plugin");
    Ok(true)
}

/// Lists installed plugins across both local and global roots, local taking
/// precedence on name collision, each entry tagged with where it came from.
pub fn list_installed(kind: &str) -> AppResult<BTreeMap<String, (Value, bool)>> {
    let mut found = BTreeMap::new();

    if let Ok(local_base) = install_base(kind, false) {
        collect_descriptors(&local_base, false, &mut found);
    }
    if let Ok(global_base) = install_base(kind, true) {
        collect_descriptors(&global_base, true, &mut found);
    }

    Ok(found)
}

fn collect_descriptors(base: &Path, global: bool, found: &mut BTreeMap<String, (Value, bool)>) {
    let Ok(entries) = std::fs::read_dir(base) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
        if found.contains_key(stem) {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else { continue };
        let Ok(value) = serde_json::from_str(&content) else {
            warn!(path = %path.display(), "failed to parse installed descriptor");
            continue;
        };
        found.insert(stem.to_owned(), (value, global));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_zip_path_normalizes_to_none() {
        assert!(normalize_github_url("./fz-moret.zip", "Funz", "fz-").is_none());
    }

    #[test]
    fn short_name_expands_to_funz_archive_url() {
        let url = normalize_github_url("moret", "Funz", "fz-").unwrap();
        assert_eq!(url, "https://github.com/Funz/fz-moret/archive/refs/heads/main.zip");
    }

    #[test]
    fn name_already_prefixed_is_not_double_prefixed() {
        let url = normalize_github_url("fz-moret", "Funz", "fz-").unwrap();
        assert_eq!(url, "https://github.com/Funz/fz-moret/archive/refs/heads/main.zip");
    }

    #[test]
    fn full_github_url_gets_archive_suffix() {
        let url = normalize_github_url("https://github.com/Funz/fz-moret", "Funz", "fz-").unwrap();
        assert_eq!(url, "https://github.com/Funz/fz-moret/archive/refs/heads/main.zip");
    }

    #[test]
    fn non_github_url_passed_through_unchanged() {
        let url = normalize_github_url("https://example.com/plugin.zip", "Funz", "fz-").unwrap();
        assert_eq!(url, "https://example.com/plugin.zip");
    }
}
