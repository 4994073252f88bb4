//! In-memory collaborators for tests: a settable directory and transports
//! that record everything they are asked to deliver.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::collab::{Bridge, Directory, Notifier, PartyNotice, SyncTransport};
use crate::registry::PartyRegistry;
use crate::types::{BackendId, UserId};
use crate::wire::{SubChannel, SyncMessage};

/// Directory whose answers are set by the test.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    online: Mutex<HashMap<UserId, BackendId>>,
}

impl MemoryDirectory {
    pub fn connect(&self, user: UserId, backend: impl Into<BackendId>) {
        self.online
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user, backend.into());
    }

    pub fn disconnect(&self, user: &UserId) {
        self.online
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(user);
    }
}

impl Directory for MemoryDirectory {
    fn is_reachable(&self, user: &UserId) -> bool {
        self.online
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(user)
    }

    fn current_backend(&self, user: &UserId) -> Option<BackendId> {
        self.online
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user)
            .cloned()
    }
}

/// One captured `send` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub backend: BackendId,
    pub channel: SubChannel,
    pub payload: String,
}

impl Sent {
    pub fn decode(&self) -> SyncMessage {
        SyncMessage::parse(self.channel, &self.payload).expect("captured payload parses")
    }
}

#[derive(Debug, Default)]
pub struct CaptureTransport {
    sent: Mutex<Vec<Sent>>,
}

impl CaptureTransport {
    pub fn take(&self) -> Vec<Sent> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn to(&self, backend: &str) -> Vec<Sent> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|sent| sent.backend.0 == backend)
            .cloned()
            .collect()
    }
}

impl SyncTransport for CaptureTransport {
    fn send(&self, backend: &BackendId, channel: SubChannel, payload: &str) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Sent {
                backend: backend.clone(),
                channel,
                payload: payload.to_string(),
            });
    }
}

#[derive(Debug, Default)]
pub struct CaptureNotifier {
    notices: Mutex<Vec<(UserId, PartyNotice)>>,
}

impl CaptureNotifier {
    pub fn take(&self) -> Vec<(UserId, PartyNotice)> {
        std::mem::take(&mut *self.notices.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Notifier for CaptureNotifier {
    fn notify(&self, user: &UserId, notice: &PartyNotice) {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((*user, notice.clone()));
    }
}

/// A registry wired to in-memory collaborators, with handles to inspect them.
pub struct World {
    pub directory: Arc<MemoryDirectory>,
    pub transport: Arc<CaptureTransport>,
    pub notifier: Arc<CaptureNotifier>,
    pub registry: PartyRegistry,
}

impl World {
    pub fn new() -> Self {
        let directory = Arc::new(MemoryDirectory::default());
        let transport = Arc::new(CaptureTransport::default());
        let notifier = Arc::new(CaptureNotifier::default());
        let registry = PartyRegistry::new(Bridge::new(
            directory.clone(),
            transport.clone(),
            notifier.clone(),
        ));
        Self {
            directory,
            transport,
            notifier,
            registry,
        }
    }

    /// A fresh user, online on `backend`.
    pub fn user(&self, backend: &str) -> UserId {
        let user = UserId::random();
        self.directory.connect(user, backend);
        user
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
