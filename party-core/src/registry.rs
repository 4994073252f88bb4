//! The set of live parties.
//!
//! [`PartyRegistry`] is the only place parties are created or destroyed. It
//! keeps every party keyed by id plus an index from user to party, both behind
//! a single mutex; the index is what makes "one party per user" exact.
//!
//! Lookups never fail: absence is `None`, because most users are not in a
//! party most of the time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::collab::Bridge;
use crate::error::Rejection;
use crate::party::{Party, Removal};
use crate::types::{PartyId, UserId};

#[derive(Debug, Default)]
pub(crate) struct RegistryState {
    pub(crate) parties: HashMap<PartyId, Arc<Party>>,
    pub(crate) index: HashMap<UserId, PartyId>,
}

#[derive(Debug)]
pub(crate) struct RegistryShared {
    state: Mutex<RegistryState>,
    bridge: Bridge,
}

impl RegistryShared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owner of every active party. Clones share the same set.
#[derive(Debug, Clone)]
pub struct PartyRegistry {
    shared: Arc<RegistryShared>,
}

impl PartyRegistry {
    pub fn new(bridge: Bridge) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                state: Mutex::new(RegistryState::default()),
                bridge,
            }),
        }
    }

    pub fn bridge(&self) -> &Bridge {
        &self.shared.bridge
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Creates a party led by `leader` and syncs it to their backend.
    pub fn create(&self, leader: &UserId) -> Result<Arc<Party>, Rejection> {
        let party = {
            let mut reg = self.shared.lock();
            if reg.index.contains_key(leader) {
                return Err(Rejection::AlreadyInParty);
            }
            let id = PartyId::new();
            let party = Party::new(
                id,
                *leader,
                self.shared.bridge.clone(),
                Arc::downgrade(&self.shared),
            );
            reg.parties.insert(id, party.clone());
            reg.index.insert(*leader, id);
            party
        };
        tracing::info!(party = %party.id(), leader = %leader, "party created");
        party.announce();
        Ok(party)
    }

    /// Removes `party` and sends `disband` to every reachable member.
    ///
    /// Idempotent: returns `false` if the party was already gone.
    pub fn disband(&self, party: &Party) -> bool {
        let members = {
            let mut reg = self.shared.lock();
            party.teardown(&mut reg)
        };
        match members {
            Some(members) => {
                tracing::info!(party = %party.id(), members = members.len(), "party disbanded");
                party.send_disband(&members);
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// The party `user` belongs to.
    pub fn find_by_user(&self, user: &UserId) -> Option<Arc<Party>> {
        let reg = self.shared.lock();
        reg.index
            .get(user)
            .and_then(|id| reg.parties.get(id))
            .cloned()
    }

    /// The party with identifier `id`.
    pub fn find(&self, id: &PartyId) -> Option<Arc<Party>> {
        self.shared.lock().parties.get(id).cloned()
    }

    /// Snapshot of every live party, oldest first.
    pub fn parties(&self) -> Vec<Arc<Party>> {
        let mut parties: Vec<Arc<Party>> = self.shared.lock().parties.values().cloned().collect();
        parties.sort_by_key(|party| party.created_at());
        parties
    }

    pub fn len(&self) -> usize {
        self.shared.lock().parties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -----------------------------------------------------------------------
    // Host hooks
    // -----------------------------------------------------------------------

    /// A user disconnected: drop them from their party. If they led it, the
    /// party is disbanded.
    pub fn on_disconnect(&self, user: &UserId) -> Option<Removal> {
        let party = self.find_by_user(user)?;
        let removal = party.remove_member(user);
        tracing::debug!(user = %user, party = %party.id(), ?removal, "disconnect handled");
        Some(removal)
    }

    /// A user moved to another backend: send that backend the current roster.
    pub fn on_backend_switch(&self, user: &UserId) -> bool {
        match self.find_by_user(user) {
            Some(party) => party.sync_to(user),
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
