use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use keel_core::PipelineState;
use keel_event::Event;

use crate::error::{io_err, DevError};
use crate::paths::socket_path;

/// JSON newline-delimited request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevRequest {
    pub cmd: String,
    /// First event sequence number for `events`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<u64>,
    /// Phase for `execute` and `auto`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl DevRequest {
    fn cmd(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            ..Self::default()
        }
    }

    pub fn state() -> Self {
        Self::cmd("state")
    }

    pub fn events(from: u64) -> Self {
        Self {
            from: Some(from),
            ..Self::cmd("events")
        }
    }

    pub fn execute(phase: impl Into<String>) -> Self {
        Self {
            phase: Some(phase.into()),
            ..Self::cmd("execute")
        }
    }

    pub fn auto(phase: impl Into<String>, enabled: bool) -> Self {
        Self {
            phase: Some(phase.into()),
            enabled: Some(enabled),
            ..Self::cmd("auto")
        }
    }

    pub fn stop() -> Self {
        Self::cmd("stop")
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DevResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Send one JSON request to the dev session socket and return one response.
pub fn send_request(workdir: &Path, request: &DevRequest) -> Result<DevResponse, DevError> {
    let socket = socket_path(workdir);
    if !socket.exists() {
        return Err(DevError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DevError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DevError::Protocol(
            "dev session closed connection before responding".to_string(),
        ));
    }

    let response: DevResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// Current pipeline state. Retries briefly while the session starts up.
pub fn request_state(workdir: &Path) -> Result<PipelineState, DevError> {
    let request = DevRequest::state();

    let mut last_not_running: Option<DevError> = None;
    for attempt in 0..5 {
        match send_request(workdir, &request) {
            Ok(response) => return Ok(serde_json::from_value(response_into_data(response)?)?),
            Err(err @ DevError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DevError::Protocol("state retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_events(workdir: &Path, from: u64) -> Result<Vec<Event>, DevError> {
    let response = send_request(workdir, &DevRequest::events(from))?;
    Ok(serde_json::from_value(response_into_data(response)?)?)
}

pub fn request_execute(workdir: &Path, phase: &str) -> Result<Value, DevError> {
    response_into_data(send_request(workdir, &DevRequest::execute(phase))?)
}

pub fn request_auto(workdir: &Path, phase: &str, enabled: bool) -> Result<Value, DevError> {
    response_into_data(send_request(workdir, &DevRequest::auto(phase, enabled))?)
}

pub fn request_stop(workdir: &Path) -> Result<(), DevError> {
    response_into_data(send_request(workdir, &DevRequest::stop())?).map(|_| ())
}

fn response_into_data(response: DevResponse) -> Result<Value, DevError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DevError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown dev session error".to_string()),
        ))
    }
}
