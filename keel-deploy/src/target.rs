//! Apply tool seam and the built-in directory target.
//!
//! ## `write_if_changed` protocol
//!
//! 1. SHA-256 hash the new content.
//! 2. Hash the file already on disk, if any → skip if identical.
//! 3. Write to `<path>.keel.tmp`.
//! 4. Rename to final path (atomic on POSIX).

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{io_err, DeployError};
use crate::manifest::{Manifest, ManifestSet};

/// Directory used for cluster-scoped documents (no namespace).
pub const CLUSTER_SCOPE_DIR: &str = "_cluster";

// ---------------------------------------------------------------------------
// ApplyTool
// ---------------------------------------------------------------------------

/// The external tool that makes manifests real.
pub trait ApplyTool: Send + Sync {
    fn apply(&self, manifests: &ManifestSet) -> Result<(), DeployError>;

    /// Remove `manifests`. Objects that are already gone are not an error.
    fn delete(&self, manifests: &ManifestSet) -> Result<(), DeployError>;
}

// ---------------------------------------------------------------------------
// Write result
// ---------------------------------------------------------------------------

/// Outcome of an individual file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// File was written (content changed or did not previously exist).
    Written { path: PathBuf },
    /// File on disk already holds this content.
    Unchanged { path: PathBuf },
}

/// Atomically write `content` to `path` unless the file already holds it.
pub fn write_if_changed(path: &Path, content: &str) -> Result<WriteResult, DeployError> {
    let tmp = PathBuf::from(format!("{}.keel.tmp", path.display()));
    write_if_changed_with_tmp(path, content, &tmp)
}

fn write_if_changed_with_tmp(
    path: &Path,
    content: &str,
    tmp: &Path,
) -> Result<WriteResult, DeployError> {
    match std::fs::read(path) {
        Ok(existing) if sha256_hex(&existing) == sha256_hex(content.as_bytes()) => {
            tracing::debug!("unchanged: {}", path.display());
            return Ok(WriteResult::Unchanged {
                path: path.to_path_buf(),
            });
        }
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(path, e)),
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    if let Some(tmp_parent) = tmp.parent() {
        std::fs::create_dir_all(tmp_parent).map_err(|e| io_err(tmp_parent, e))?;
    }
    std::fs::write(tmp, content).map_err(|e| io_err(tmp, e))?;

    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(path, e));
    }

    tracing::debug!("wrote: {}", path.display());
    Ok(WriteResult::Written {
        path: path.to_path_buf(),
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

// ---------------------------------------------------------------------------
// DirectoryTarget
// ---------------------------------------------------------------------------

/// Applies manifests as files under a root directory:
/// `<root>/<namespace|_cluster>/<kind>--<name>.yaml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryTarget {
    root: PathBuf,
}

impl DirectoryTarget {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File a manifest is applied to.
    pub fn path_for(&self, manifest: &Manifest) -> PathBuf {
        let scope = manifest
            .namespace()
            .filter(|ns| !ns.is_empty())
            .map(sanitize)
            .unwrap_or_else(|| CLUSTER_SCOPE_DIR.to_string());
        let kind = match manifest.kind() {
            "" => "unknown".to_string(),
            kind => sanitize(&kind.to_ascii_lowercase()),
        };
        let name = match manifest.name() {
            "" => "unnamed".to_string(),
            name => sanitize(name),
        };
        self.root.join(scope).join(format!("{kind}--{name}.yaml"))
    }
}

fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect()
}

impl ApplyTool for DirectoryTarget {
    fn apply(&self, manifests: &ManifestSet) -> Result<(), DeployError> {
        let mut written = 0usize;
        for manifest in manifests {
            let path = self.path_for(manifest);
            if let WriteResult::Written { .. } = write_if_changed(&path, &manifest.to_yaml()?)? {
                written += 1;
            }
        }
        tracing::info!(
            root = %self.root.display(),
            written,
            unchanged = manifests.len() - written,
            "applied manifests"
        );
        Ok(())
    }

    fn delete(&self, manifests: &ManifestSet) -> Result<(), DeployError> {
        for manifest in manifests {
            let path = self.path_for(manifest);
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!("deleted: {}", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(&path, e)),
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
