//! `keel execute`, `keel auto` and `keel stop`: steer a running session.

use anyhow::{Context, Result};
use clap::Args;

use keel_dev::{request_auto, request_execute, request_stop, DevError};

use super::ProjectArgs;

/// Arguments for `keel execute`.
#[derive(Args, Debug)]
pub struct ExecuteArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// build, sync, deploy or all.
    pub phase: String,
}

impl ExecuteArgs {
    pub fn run(self) -> Result<()> {
        request_execute(&self.project.workdir, &self.phase)
            .with_context(|| format!("failed to request {}", self.phase))?;
        println!("{} requested", self.phase);
        Ok(())
    }
}

/// Arguments for `keel auto`.
#[derive(Args, Debug)]
pub struct AutoArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// build, sync or deploy.
    pub phase: String,

    /// true or false.
    #[arg(action = clap::ArgAction::Set)]
    pub enabled: bool,
}

impl AutoArgs {
    pub fn run(self) -> Result<()> {
        request_auto(&self.project.workdir, &self.phase, self.enabled)
            .with_context(|| format!("failed to toggle auto {}", self.phase))?;
        let state = if self.enabled { "on" } else { "off" };
        println!("auto {}: {state}", self.phase);
        Ok(())
    }
}

/// Arguments for `keel stop`.
#[derive(Args, Debug)]
pub struct StopArgs {
    #[command(flatten)]
    pub project: ProjectArgs,
}

impl StopArgs {
    pub fn run(self) -> Result<()> {
        match request_stop(&self.project.workdir) {
            Ok(()) => println!("dev session stop requested"),
            Err(DevError::DaemonNotRunning { .. }) => println!("dev session is not running"),
            Err(err) => return Err(err).context("failed to stop dev session"),
        }
        Ok(())
    }
}
