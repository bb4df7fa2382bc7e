//! `keel status` and `keel events`: read the running session's state.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use keel_core::{PipelineState, Status};
use keel_dev::{request_events, request_state, DevError};
use keel_event::{Event, Transition};

use super::ProjectArgs;

/// Arguments for `keel status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let state = match request_state(&self.project.workdir) {
            Ok(state) => state,
            Err(DevError::DaemonNotRunning { socket }) => {
                println!("dev session is not running (no socket at {})", socket.display());
                return Ok(());
            }
            Err(err) => return Err(err).context("failed to query dev session state"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&state).context("failed to render state JSON")?
            );
            return Ok(());
        }
        print_table(&state);
        Ok(())
    }
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "phase")]
    phase: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "auto")]
    auto: String,
    #[tabled(rename = "detail")]
    detail: String,
}

fn print_table(state: &PipelineState) {
    let mut rows = Vec::new();
    for (image, status) in &state.build.artifacts {
        rows.push(StatusRow {
            phase: "build".to_string(),
            status: paint(*status),
            auto: on_off(state.build.auto_trigger),
            detail: image.clone(),
        });
    }
    rows.push(StatusRow {
        phase: "sync".to_string(),
        status: paint(state.file_sync.status),
        auto: on_off(state.file_sync.auto_trigger),
        detail: String::new(),
    });
    rows.push(StatusRow {
        phase: "deploy".to_string(),
        status: paint(state.deploy.status),
        auto: on_off(state.deploy.auto_trigger),
        detail: state.deploy.message.clone().unwrap_or_default(),
    });
    rows.push(StatusRow {
        phase: "status-check".to_string(),
        status: paint(state.status_check.status),
        auto: "-".to_string(),
        detail: format!("{} resources", state.status_check.resources.len()),
    });

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    for (port, forward) in &state.forwarded_ports {
        println!(
            "{} localhost:{port} -> {}/{}:{}",
            "forward".cyan(),
            forward.namespace,
            forward.resource_name,
            forward.remote_port
        );
    }
}

fn paint(status: Status) -> String {
    let label = status.to_string();
    match status {
        Status::Complete | Status::Succeeded => label.green().to_string(),
        Status::Failed => label.red().bold().to_string(),
        Status::InProgress | Status::Started => label.yellow().to_string(),
        Status::NotStarted => label.bright_black().to_string(),
    }
}

fn on_off(enabled: bool) -> String {
    let label = if enabled { "on" } else { "off" };
    label.to_string()
}

/// Arguments for `keel events`.
#[derive(Args, Debug)]
pub struct EventsArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// First sequence number to print.
    #[arg(long, default_value_t = 0)]
    pub from: u64,

    /// Emit one JSON object per line.
    #[arg(long)]
    pub json: bool,

    /// Keep printing new events until the session ends.
    #[arg(long, short = 'f')]
    pub follow: bool,

    /// Interval between polls while following, in milliseconds.
    #[arg(long, default_value_t = 500)]
    pub poll_interval: u64,
}

impl EventsArgs {
    pub fn run(self) -> Result<()> {
        if self.follow {
            let workdir = self.project.workdir.clone();
            return follow(
                |from| request_events(&workdir, from),
                self.from,
                Duration::from_millis(self.poll_interval),
                |event| self.print(event),
            );
        }

        let events = request_events(&self.project.workdir, self.from)
            .context("failed to fetch dev session events")?;
        for event in &events {
            self.print(event)?;
        }
        Ok(())
    }

    fn print(&self, event: &Event) -> Result<()> {
        if self.json {
            println!(
                "{}",
                serde_json::to_string(event).context("failed to render event JSON")?
            );
        } else {
            println!("{}", describe(event));
        }
        Ok(())
    }
}

/// Poll for events from `from` onward until the terminating event, or
/// until the session goes away.
fn follow<F, P>(mut fetch: F, mut from: u64, interval: Duration, mut print: P) -> Result<()>
where
    F: FnMut(u64) -> Result<Vec<Event>, DevError>,
    P: FnMut(&Event) -> Result<()>,
{
    let mut connected = false;
    loop {
        let events = match fetch(from) {
            Ok(events) => events,
            Err(DevError::DaemonNotRunning { socket }) => {
                if !connected {
                    println!("dev session is not running (no socket at {})", socket.display());
                }
                return Ok(());
            }
            Err(err) => return Err(err).context("failed to fetch dev session events"),
        };
        connected = true;

        for event in &events {
            print(event)?;
            from = event.seq + 1;
            if event.transition.is_terminated() {
                return Ok(());
            }
        }
        std::thread::sleep(interval);
    }
}

fn describe(event: &Event) -> String {
    let at = event.at.with_timezone(&chrono::Local).format("%H:%M:%S");
    let text = match &event.transition {
        Transition::BuildStatus {
            artifact,
            status,
            error,
        } => with_error(format!("build {artifact}: {}", paint(*status)), error),
        Transition::Deploy { status, message } => {
            with_error(format!("deploy: {}", paint(*status)), message)
        }
        Transition::DeployInfo { message } => format!("deploy: {message}"),
        Transition::StatusCheck { status, message } => {
            with_error(format!("status check: {}", paint(*status)), message)
        }
        Transition::ResourceStatusCheck {
            resource,
            status,
            message,
        } => with_error(format!("resource {resource}: {}", paint(*status)), message),
        Transition::FileSync {
            file_count,
            image,
            status,
            error,
        } => with_error(
            format!("sync {file_count} files to {image}: {}", paint(*status)),
            error,
        ),
        Transition::PortForwarded(forward) => format!(
            "port forward localhost:{} -> {}",
            forward.local_port, forward.resource_name
        ),
        Transition::DebuggingContainerStarted(c) => {
            format!("debugging {} in {}", c.container_name, c.pod_name)
        }
        Transition::DebuggingContainerTerminated(c) => {
            format!("stopped debugging {} in {}", c.container_name, c.pod_name)
        }
        Transition::ResetForNewBuild => "new build".bright_black().to_string(),
        Transition::ResetForNewDeploy => "new deploy".bright_black().to_string(),
        Transition::AutoTrigger { phase, enabled } => {
            format!("auto {phase}: {}", on_off(*enabled))
        }
        Transition::DevLoop {
            iteration,
            status,
            error,
        } => with_error(format!("iteration {iteration}: {}", paint(*status)), error),
        Transition::Log(entry) => format!("[{}] {}", entry.source, entry.message),
        Transition::Terminated => "session ended".bold().to_string(),
    };
    format!("{:>5} {at} {text}", event.seq)
}

fn with_error(text: String, detail: &Option<String>) -> String {
    match detail {
        Some(detail) => format!("{text} ({detail})"),
        None => text,
    }
}
