pub mod control;
pub mod dev;
pub mod render;
pub mod status;

use std::path::PathBuf;

use clap::Args;

use keel_core::config::DEFAULT_CONFIG_FILE;

/// Where the project lives.
#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    /// Project directory; the control socket lives under `<workdir>/.keel`.
    #[arg(long, default_value = ".")]
    pub workdir: PathBuf,

    /// Pipeline config file. Defaults to `<workdir>/keel.yaml`.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl ProjectArgs {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| self.workdir.join(DEFAULT_CONFIG_FILE))
    }
}
