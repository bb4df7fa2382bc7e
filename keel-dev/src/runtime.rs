use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use keel_core::{config, AutoTriggers, DevOptions, Phase};
use keel_event::StateStore;

use crate::controller::DevLoop;
use crate::error::{io_err, DevError};
use crate::local::{InputProbe, LocalRunnerFactory};
use crate::paths::{keel_root, socket_path};
use crate::protocol::{DevRequest, DevResponse};
use crate::trigger::{Intent, IntentSender, TriggerSource};

/// Everything `keel dev` needs to run a session.
#[derive(Debug, Clone)]
pub struct DevSession {
    pub workdir: PathBuf,
    pub config_path: PathBuf,
    pub options: DevOptions,
    pub json_logs: bool,
}

/// Start the dev session and block the current thread until it exits.
pub fn start_blocking(session: DevSession) -> Result<(), DevError> {
    init_tracing(session.json_logs);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(session))
}

/// Run the dev session: the dev loop, the control socket and the ctrl-c
/// handler, until one of them asks to stop.
pub async fn run(session: DevSession) -> Result<(), DevError> {
    ensure_runtime_dir(&session.workdir)?;

    let pipeline = config::load_at(&session.config_path)?;
    let options = session.options.clone();
    let store = StateStore::new(
        pipeline.image_names(),
        AutoTriggers {
            build: options.auto_build,
            sync: options.auto_sync,
            deploy: options.auto_deploy,
        },
    );

    let (trigger, intents) = TriggerSource::new(options.trigger, options.poll_interval());
    let trigger = trigger.with_probe(InputProbe::new(&session.config_path));
    let cancel = CancellationToken::new();

    tracing::info!(
        workdir = %session.workdir.display(),
        trigger = %options.trigger,
        "starting dev session"
    );

    let socket_handle = {
        let workdir = session.workdir.clone();
        let store = store.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = socket_server_task(workdir, store, intents, cancel.clone()).await;
            cancel.cancel();
            result
        })
    };

    let signal_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => Ok(()),
                signal = tokio::signal::ctrl_c() => match signal {
                    Ok(()) => {
                        tracing::info!("received ctrl-c, stopping dev session");
                        cancel.cancel();
                        Ok(())
                    }
                    Err(err) => Err(DevError::Protocol(format!("ctrl-c handler failed: {err}"))),
                }
            }
        })
    };

    let factory = LocalRunnerFactory::new(&session.config_path, options.clone());
    let loop_result = DevLoop::new(factory, trigger, store.clone(), &options)
        .run(cancel.clone())
        .await;

    store.close();
    cancel.cancel();

    let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);
    let socket_result = handle_join("socket_server", socket_result);
    let signal_result = handle_join("signal_handler", signal_result);

    tracing::info!(events = store.len(), "dev session stopped");
    loop_result.and(socket_result).and(signal_result)
}

// ----------------------------------------------------------------------------
// Control socket
// ----------------------------------------------------------------------------

async fn socket_server_task(
    workdir: PathBuf,
    store: StateStore,
    intents: IntentSender,
    cancel: CancellationToken,
) -> Result<(), DevError> {
    let socket = socket_path(&workdir);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::debug!(socket = %socket.display(), "control socket listening");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let store = store.clone();
                let intents = intents.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, store, intents, cancel).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    store: StateStore,
    intents: IntentSender,
    cancel: CancellationToken,
) -> Result<(), DevError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("dev socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DevRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DevResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = dispatch(&request, &store, &intents, &cancel).await;
        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

/// Answer one control request.
async fn dispatch(
    request: &DevRequest,
    store: &StateStore,
    intents: &IntentSender,
    cancel: &CancellationToken,
) -> DevResponse {
    match request.cmd.as_str() {
        "state" => json_response(&store.snapshot()),
        "events" => json_response(&store.events_since(request.from.unwrap_or(0))),
        "execute" => {
            let Some(phase) = request.phase.as_deref() else {
                return DevResponse::error("execute requires a phase");
            };
            let intent = match Intent::for_phase(phase) {
                Ok(intent) => intent,
                Err(err) => return DevResponse::error(err),
            };
            match intents.send(intent).await {
                Ok(()) => {
                    tracing::info!(phase, "iteration requested");
                    json_response(&intent)
                }
                Err(_) => DevResponse::error(DevError::ChannelClosed("intents").to_string()),
            }
        }
        "auto" => {
            let (Some(phase), Some(enabled)) = (request.phase.as_deref(), request.enabled) else {
                return DevResponse::error("auto requires a phase and enabled");
            };
            let phase = match phase.parse::<Phase>() {
                Ok(Phase::StatusCheck) => {
                    return DevResponse::error("status-check has no auto trigger")
                }
                Ok(phase) => phase,
                Err(err) => return DevResponse::error(err),
            };
            store.toggle_auto_trigger(phase, enabled);
            tracing::info!(%phase, enabled, "auto trigger toggled");
            DevResponse::ok(json!({ "phase": phase, "enabled": enabled }))
        }
        "stop" => {
            cancel.cancel();
            DevResponse::ok(json!({ "stopping": true }))
        }
        other => DevResponse::error(format!("unknown command '{other}'")),
    }
}

fn json_response(data: &impl Serialize) -> DevResponse {
    match serde_json::to_value(data) {
        Ok(value) => DevResponse::ok(value),
        Err(err) => DevResponse::error(format!("encode failed: {err}")),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DevResponse,
) -> Result<(), DevError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("dev socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("dev socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("dev socket flush", e))?;
    Ok(())
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DevError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DevError::Protocol(format!(
                "dev session socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale dev session socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dir(workdir: &Path) -> Result<(), DevError> {
    let root = keel_root(workdir);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DevError>, tokio::task::JoinError>,
) -> Result<(), DevError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DevError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DevError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DevError> {
    Ok(())
}
