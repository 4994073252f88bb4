//! Outward boundary: the services the core calls but does not implement.
//!
//! The host supplies a [`Directory`] (who is online, on which backend), a
//! [`SyncTransport`] (pushes sync frames to one backend) and a [`Notifier`]
//! (delivers informational notices to a user). They travel together as a
//! [`Bridge`], cloned into every party.

use std::sync::Arc;

use serde::Serialize;

use crate::types::{BackendId, PartyId, UserId};
use crate::wire::SubChannel;

/// Liveness and routing lookups for user ids.
pub trait Directory: Send + Sync {
    fn is_reachable(&self, user: &UserId) -> bool;

    fn current_backend(&self, user: &UserId) -> Option<BackendId>;
}

/// Fire-and-forget delivery to a backend process.
pub trait SyncTransport: Send + Sync {
    fn send(&self, backend: &BackendId, channel: SubChannel, payload: &str);
}

/// Delivery of party notices to a single user.
pub trait Notifier: Send + Sync {
    fn notify(&self, user: &UserId, notice: &PartyNotice);
}

/// Informational events raised by the core without a caller to return to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartyNotice {
    /// A pending invite reached its deadline untouched.
    InviteExpired {
        party: PartyId,
        invitee: UserId,
        name: String,
    },
}

/// The collaborators a party needs, bundled for cheap cloning.
#[derive(Clone)]
pub struct Bridge {
    pub directory: Arc<dyn Directory>,
    pub transport: Arc<dyn SyncTransport>,
    pub notifier: Arc<dyn Notifier>,
}

impl Bridge {
    pub fn new(
        directory: Arc<dyn Directory>,
        transport: Arc<dyn SyncTransport>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            directory,
            transport,
            notifier,
        }
    }

    /// Sends `payload` on `channel` to the backend `user` is on, if any.
    /// Returns `false` when the user could not be addressed.
    pub(crate) fn send_to(&self, user: &UserId, channel: SubChannel, payload: &str) -> bool {
        if !self.directory.is_reachable(user) {
            return false;
        }
        match self.directory.current_backend(user) {
            Some(backend) => {
                self.transport.send(&backend, channel, payload);
                true
            }
            None => {
                tracing::warn!(user = %user, channel = %channel, "reachable user has no backend");
                false
            }
        }
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge").finish_non_exhaustive()
    }
}
