use std::path::{Path, PathBuf};

pub const KEEL_DIR: &str = ".keel";
pub const DEV_SOCKET: &str = "keel.sock";

/// Per-project runtime directory: `<workdir>/.keel`.
pub fn keel_root(workdir: &Path) -> PathBuf {
    workdir.join(KEEL_DIR)
}

pub fn socket_path(workdir: &Path) -> PathBuf {
    keel_root(workdir).join(DEV_SOCKET)
}
