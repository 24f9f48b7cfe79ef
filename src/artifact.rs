//! Build-dependency request artifacts.
//!
//! When `rpmbuild -bd` finds unmet dynamic build requirements it writes
//! `<name>-<version>-<release>.buildreqs.nosrc.rpm` into `SRPMS/` and exits 11.
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// File name suffix rpmbuild uses for build-dependency request packages.
pub const ARTIFACT_SUFFIX: &str = ".buildreqs.nosrc.rpm";

/// Regex matching artifact file names produced for `package`.
pub fn artifact_pattern(package: &str) -> Result<Regex> {
    let pattern = format!(
        "^{}-.+{}$",
        regex::escape(package),
        regex::escape(ARTIFACT_SUFFIX)
    );
    Regex::new(&pattern).with_context(|| format!("compile artifact pattern for {package}"))
}

/// List artifacts for `package` in `dir`, sorted by path.
///
/// A missing directory yields an empty list.
pub fn find_artifacts(dir: &Path, package: &str) -> Result<Vec<PathBuf>> {
    let pattern = artifact_pattern(package)?;
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("read dir {}", dir.display())),
    };
    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read dir entry in {}", dir.display()))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if pattern.is_match(name) && entry.path().is_file() {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

/// Like [`find_artifacts`] but an empty result is an error.
pub fn require_artifacts(dir: &Path, package: &str) -> Result<Vec<PathBuf>> {
    let found = find_artifacts(dir, package)?;
    if found.is_empty() {
        return Err(anyhow!(
            "build requested more dependencies but no {package}-*{ARTIFACT_SUFFIX} exists in {}",
            dir.display()
        ));
    }
    Ok(found)
}

/// Remove consumed artifacts. Files that are already gone are skipped.
pub fn remove_artifacts(paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed artifact"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("remove {}", path.display()));
            }
        }
    }
    Ok(())
}
