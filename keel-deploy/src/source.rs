//! Manifest file discovery and loading.

use std::path::{Path, PathBuf};

use crate::error::{io_err, DeployError};
use crate::manifest::ManifestSet;

const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Configured manifest files, directories and glob patterns.
///
/// Directories and patterns are expanded and only files with a manifest
/// extension are kept. Explicitly listed files are always kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestSources {
    paths: Vec<PathBuf>,
}

impl ManifestSources {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Every file to read, in configured order, directories sorted.
    pub fn files(&self) -> Result<Vec<PathBuf>, DeployError> {
        let mut files = Vec::new();
        for path in &self.paths {
            if is_pattern(path) {
                files.extend(expand(path)?);
                continue;
            }
            let meta = std::fs::metadata(path).map_err(|e| io_err(path, e))?;
            if meta.is_dir() {
                let mut found = Vec::new();
                walk(path, &mut found)?;
                found.sort();
                files.extend(found);
            } else {
                files.push(path.clone());
            }
        }
        let mut seen = std::collections::HashSet::new();
        files.retain(|f| seen.insert(f.clone()));
        Ok(files)
    }

    /// Read and parse every file into one set.
    pub fn read(&self) -> Result<ManifestSet, DeployError> {
        let mut manifests = ManifestSet::new();
        for file in self.files()? {
            let text = std::fs::read_to_string(&file).map_err(|e| io_err(&file, e))?;
            manifests.extend(ManifestSet::parse(&text, &file.display().to_string())?);
        }
        Ok(manifests)
    }
}

fn is_pattern(path: &Path) -> bool {
    path.to_string_lossy().contains(['*', '?', '['])
}

/// Expand a glob pattern, keeping manifest files only, sorted.
fn expand(pattern: &Path) -> Result<Vec<PathBuf>, DeployError> {
    let text = pattern.to_string_lossy();
    let matches = glob::glob(&text).map_err(|e| DeployError::Pattern {
        pattern: text.to_string(),
        reason: e.to_string(),
    })?;

    let mut found = Vec::new();
    for entry in matches {
        let path = entry.map_err(|e| {
            let path = e.path().to_path_buf();
            io_err(path, e.into_error())
        })?;
        if path.is_dir() {
            continue;
        }
        if has_manifest_extension(&path) {
            found.push(path);
        } else {
            tracing::info!(
                "refusing to deploy non {{json, yaml}} file {}; list it explicitly to include it",
                path.display()
            );
        }
    }
    if found.is_empty() {
        tracing::warn!(pattern = %text, "manifest pattern matched no files");
    }
    found.sort();
    Ok(found)
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) -> Result<(), DeployError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| io_err(&path, e))?;
        if file_type.is_dir() {
            walk(&path, found)?;
        } else if has_manifest_extension(&path) {
            found.push(path);
        } else {
            tracing::info!(
                "refusing to deploy non {{json, yaml}} file {}; list it explicitly to include it",
                path.display()
            );
        }
    }
    Ok(())
}

fn has_manifest_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MANIFEST_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
