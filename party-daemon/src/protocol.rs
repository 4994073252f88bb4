use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use party_core::{Rejection, UserId};

use crate::config::DaemonConfig;
use crate::error::{io_err, DaemonError};

/// JSON newline-delimited request. Users are addressed by session name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum DaemonRequest {
    Status,
    Stop,
    /// Open a session. `id` pins the user id, otherwise a fresh one is drawn.
    Connect {
        user: String,
        backend: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<UserId>,
    },
    Switch {
        user: String,
        backend: String,
    },
    Disconnect {
        user: String,
    },
    Create {
        user: String,
    },
    Invite {
        user: String,
        target: String,
    },
    Accept {
        user: String,
        inviter: String,
    },
    Decline {
        user: String,
        inviter: String,
    },
    Join {
        user: String,
        target: String,
    },
    Kick {
        user: String,
        target: String,
    },
    Promote {
        user: String,
        target: String,
    },
    Leave {
        user: String,
    },
    Disband {
        user: String,
    },
    Public {
        user: String,
        enabled: bool,
    },
    Summon {
        user: String,
    },
    List {
        user: String,
    },
    Notices {
        user: String,
    },
}

impl DaemonRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Stop => "stop",
            Self::Connect { .. } => "connect",
            Self::Switch { .. } => "switch",
            Self::Disconnect { .. } => "disconnect",
            Self::Create { .. } => "create",
            Self::Invite { .. } => "invite",
            Self::Accept { .. } => "accept",
            Self::Decline { .. } => "decline",
            Self::Join { .. } => "join",
            Self::Kick { .. } => "kick",
            Self::Promote { .. } => "promote",
            Self::Leave { .. } => "leave",
            Self::Disband { .. } => "disband",
            Self::Public { .. } => "public",
            Self::Summon { .. } => "summon",
            Self::List { .. } => "list",
            Self::Notices { .. } => "notices",
        }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
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

impl From<Rejection> for DaemonResponse {
    fn from(rejection: Rejection) -> Self {
        Self::error(rejection.to_string())
    }
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = DaemonConfig::load(home)?.socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
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
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: DaemonResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// Send `request` and unwrap the response data; a refused request becomes
/// [`DaemonError::Protocol`] carrying the daemon's message.
pub fn request(home: &Path, request: &DaemonRequest) -> Result<Value, DaemonError> {
    response_into_data(send_request(home, request)?)
}

pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &DaemonRequest::Status) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
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
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    request(home, &DaemonRequest::Stop).map(|_| ())
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}
