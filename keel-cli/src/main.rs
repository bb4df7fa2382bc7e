//! Keel: continuous build, sync and deploy for local development.
//!
//! # Usage
//!
//! ```text
//! keel dev [--trigger polling|notify|manual] [--auto-build=false] [--watch-image <expr>] [--cleanup=false]
//! keel render [--image <name>=<ref>]
//! keel diff [--image <name>=<ref>]
//! keel status [--json]
//! keel events [--from <seq>] [--follow]
//! keel execute build|sync|deploy|all
//! keel auto build|sync|deploy <true|false>
//! keel stop
//! ```
//!
//! Every command takes `--workdir` (default `.`) and `--config`
//! (default `<workdir>/keel.yaml`).

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    control::{AutoArgs, ExecuteArgs, StopArgs},
    dev::DevArgs,
    render::{DiffArgs, RenderArgs},
    status::{EventsArgs, StatusArgs},
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "keel",
    version,
    about = "Build, sync and deploy continuously while you develop",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the dev loop in the foreground.
    Dev(DevArgs),

    /// Print the manifests a deploy would apply.
    Render(RenderArgs),

    /// Show a unified diff of what a deploy would change in the target.
    Diff(DiffArgs),

    /// Show the running dev session's pipeline state.
    Status(StatusArgs),

    /// Print the running dev session's event log.
    Events(EventsArgs),

    /// Ask the running dev session to run an iteration now.
    Execute(ExecuteArgs),

    /// Turn a phase's auto trigger on or off.
    Auto(AutoArgs),

    /// Stop the running dev session.
    Stop(StopArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Dev(args) => args.run(),
        Commands::Render(args) => args.run(),
        Commands::Diff(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Events(args) => args.run(),
        Commands::Execute(args) => args.run(),
        Commands::Auto(args) => args.run(),
        Commands::Stop(args) => args.run(),
    }
}
