//! Live session table: who is online, under which name, on which backend.
//!
//! This is the daemon's [`Directory`]. Names are matched ASCII
//! case-insensitively but stored as given.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use party_core::{BackendId, Directory, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub user: UserId,
    pub name: String,
    pub backend: BackendId,
}

#[derive(Debug, Default)]
pub struct Sessions {
    inner: RwLock<HashMap<UserId, Session>>,
}

impl Sessions {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<UserId, Session>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<UserId, Session>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a session. Refused if another user already holds `name`.
    pub fn connect(
        &self,
        user: UserId,
        name: impl Into<String>,
        backend: impl Into<BackendId>,
    ) -> bool {
        let name = name.into();
        let mut sessions = self.write();
        let taken = sessions
            .values()
            .any(|s| s.user != user && s.name.eq_ignore_ascii_case(&name));
        if taken {
            return false;
        }
        let backend = backend.into();
        tracing::debug!(user = %user, name = %name, backend = %backend, "session connected");
        sessions.insert(
            user,
            Session {
                user,
                name,
                backend,
            },
        );
        true
    }

    /// Moves a connected user to `backend`. Returns `false` if not connected.
    pub fn switch(&self, user: &UserId, backend: impl Into<BackendId>) -> bool {
        match self.write().get_mut(user) {
            Some(session) => {
                session.backend = backend.into();
                true
            }
            None => false,
        }
    }

    pub fn disconnect(&self, user: &UserId) -> Option<Session> {
        let removed = self.write().remove(user);
        if removed.is_some() {
            tracing::debug!(user = %user, "session disconnected");
        }
        removed
    }

    pub fn user_by_name(&self, name: &str) -> Option<UserId> {
        self.read()
            .values()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .map(|s| s.user)
    }

    pub fn name_of(&self, user: &UserId) -> Option<String> {
        self.read().get(user).map(|s| s.name.clone())
    }

    /// Every session, ordered by name.
    pub fn list(&self) -> Vec<Session> {
        let mut all: Vec<Session> = self.read().values().cloned().collect();
        all.sort_by_key(|s| s.name.to_ascii_lowercase());
        all
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Directory for Sessions {
    fn is_reachable(&self, user: &UserId) -> bool {
        self.read().contains_key(user)
    }

    fn current_backend(&self, user: &UserId) -> Option<BackendId> {
        self.read().get(user).map(|s| s.backend.clone())
    }
}
