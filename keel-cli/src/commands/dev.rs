//! `keel dev`: run the dev loop in the foreground.

use anyhow::{Context, Result};
use clap::Args;

use keel_core::{config::DEFAULT_POLL_INTERVAL_MS, DevOptions, TriggerMode};
use keel_dev::{start_blocking, DevSession};

use super::ProjectArgs;

/// Arguments for `keel dev`.
#[derive(Args, Debug)]
pub struct DevArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// How iterations are triggered: polling, notify or manual.
    #[arg(long, default_value_t = TriggerMode::Notify)]
    pub trigger: TriggerMode,

    /// Rebuild automatically when inputs change.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_build: bool,

    /// Sync files automatically when inputs change.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_sync: bool,

    /// Redeploy automatically when inputs change.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_deploy: bool,

    /// Interval between input checks, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    pub watch_poll_interval: u64,

    /// Only rebuild images whose name contains this (repeatable).
    #[arg(long = "watch-image")]
    pub watch_images: Vec<String>,

    /// Remove deployed resources on exit.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub cleanup: bool,

    /// Prune built images on exit.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub prune: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,
}

impl DevArgs {
    pub fn run(self) -> Result<()> {
        let config_path = self.project.config_path();
        let session = DevSession {
            workdir: self.project.workdir.clone(),
            config_path,
            options: DevOptions {
                trigger: self.trigger,
                auto_build: self.auto_build,
                auto_sync: self.auto_sync,
                auto_deploy: self.auto_deploy,
                watch_poll_interval_ms: self.watch_poll_interval,
                watch_images: self.watch_images,
                cleanup: self.cleanup,
                prune: self.prune,
            },
            json_logs: self.json_logs,
        };
        start_blocking(session).context("dev session exited with error")
    }
}
