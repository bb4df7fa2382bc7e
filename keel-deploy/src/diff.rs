//! Dry-run unified diff support for `keel diff`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use similar::TextDiff;

use crate::error::{io_err, DeployError};
use crate::manifest::ManifestSet;
use crate::target::DirectoryTarget;

/// A single rendered manifest diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub path: PathBuf,
    pub unified_diff: String,
}

/// Compare rendered manifests with what `target` currently holds.
///
/// Manifests whose file is already identical are omitted. No files are
/// written.
pub fn diff_against_target(
    rendered: &ManifestSet,
    target: &DirectoryTarget,
) -> Result<Vec<FileDiff>, DeployError> {
    let mut diffs = Vec::new();
    for manifest in rendered {
        let path = target.path_for(manifest);
        let rendered = manifest.to_yaml()?;
        let existing = read_existing_or_empty(&path)?;
        if existing == rendered {
            continue;
        }

        let relative = path.strip_prefix(target.root()).unwrap_or(path.as_path());
        let old_header = format!("a/{}", relative.display());
        let new_header = format!("b/{}", relative.display());
        let unified = TextDiff::from_lines(&existing, &rendered)
            .unified_diff()
            .header(&old_header, &new_header)
            .context_radius(3)
            .to_string();

        diffs.push(FileDiff {
            path,
            unified_diff: unified,
        });
    }
    Ok(diffs)
}

fn read_existing_or_empty(path: &Path) -> Result<String, DeployError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content.replace("\r\n", "\n")),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(io_err(path, err)),
    }
}
