//! Delivery of sync frames to backend processes.
//!
//! A backend connects to the backend socket, writes one JSON line naming
//! itself (`{"backend":"lobby"}`), and from then on only reads: the daemon
//! writes length-prefixed frames on the `party:sync` channel. Sends to a
//! backend that is not attached are dropped.

use std::collections::HashMap;
use std::io::Write as _;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::{broadcast, mpsc};

use party_core::{wire, BackendId, SubChannel, SyncTransport};

use crate::error::{io_err, DaemonError};

/// First line a backend sends after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub backend: String,
}

#[derive(Debug)]
struct Link {
    id: u64,
    tx: mpsc::UnboundedSender<Bytes>,
}

#[derive(Debug, Default)]
struct Links {
    by_backend: HashMap<BackendId, Link>,
    next_id: u64,
}

#[derive(Debug, Default)]
pub struct BackendRelay {
    links: Mutex<Links>,
}

impl BackendRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Links> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Routes frames for `backend` to the returned receiver, replacing any
    /// earlier connection under the same name. The id is needed to detach.
    pub fn attach(&self, backend: BackendId) -> (u64, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut links = self.lock();
        let id = links.next_id;
        links.next_id += 1;
        if links.by_backend.insert(backend.clone(), Link { id, tx }).is_some() {
            tracing::warn!(backend = %backend, "backend re-attached, previous link replaced");
        } else {
            tracing::info!(backend = %backend, "backend attached");
        }
        (id, rx)
    }

    /// Removes the link only if it is still the one `id` refers to.
    pub fn detach(&self, backend: &BackendId, id: u64) -> bool {
        let mut links = self.lock();
        if links.by_backend.get(backend).is_some_and(|link| link.id == id) {
            links.by_backend.remove(backend);
            tracing::info!(backend = %backend, "backend detached");
            true
        } else {
            false
        }
    }

    pub fn attached(&self) -> Vec<BackendId> {
        let mut names: Vec<BackendId> = self.lock().by_backend.keys().cloned().collect();
        names.sort_by(|a, b| a.0.cmp(&b.0));
        names
    }
}

impl SyncTransport for BackendRelay {
    fn send(&self, backend: &BackendId, channel: SubChannel, payload: &str) {
        let frame = match wire::encode_frame(channel, payload) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(backend = %backend, channel = %channel, error = %err, "cannot frame sync payload");
                return;
            }
        };
        let links = self.lock();
        match links.by_backend.get(backend) {
            Some(link) => {
                if link.tx.send(frame).is_err() {
                    tracing::debug!(backend = %backend, "backend link closed, frame dropped");
                }
            }
            None => tracing::debug!(backend = %backend, channel = %channel, "backend not attached, frame dropped"),
        }
    }
}

/// Serves one backend connection until it closes or the daemon shuts down.
pub(crate) async fn serve_backend(
    stream: UnixStream,
    relay: std::sync::Arc<BackendRelay>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .await
        .map_err(|e| io_err("backend socket read", e))?;
    if read == 0 {
        return Ok(());
    }
    let handshake: Handshake = serde_json::from_str(line.trim_end())?;
    if handshake.backend.is_empty() {
        return Err(DaemonError::Protocol("backend handshake without a name".to_string()));
    }

    let backend = BackendId::from(handshake.backend);
    let (link_id, mut frames) = relay.attach(backend.clone());
    let mut scratch = [0u8; 256];

    let result = loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break Ok(()),
            frame = frames.recv() => {
                // Replaced by a newer connection under the same name.
                let Some(frame) = frame else { break Ok(()) };
                if let Err(err) = writer.write_all(&frame).await {
                    break Err(io_err("backend socket write", err));
                }
            }
            read = reader.read(&mut scratch) => {
                match read {
                    Ok(0) => break Ok(()),
                    Ok(_) => continue,
                    Err(err) => break Err(io_err("backend socket read", err)),
                }
            }
        }
    };

    relay.detach(&backend, link_id);
    result
}

/// Connects to the backend socket and announces `backend`. The returned
/// stream yields sync frames.
pub fn attach_blocking(socket: &Path, backend: &str) -> Result<StdUnixStream, DaemonError> {
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning {
            socket: socket.to_path_buf(),
        });
    }
    let mut stream = StdUnixStream::connect(socket).map_err(|e| io_err(socket, e))?;
    let handshake = serde_json::to_string(&Handshake {
        backend: backend.to_string(),
    })?;
    stream
        .write_all(handshake.as_bytes())
        .map_err(|e| io_err(socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(socket, e))?;
    stream.flush().map_err(|e| io_err(socket, e))?;
    Ok(stream)
}
