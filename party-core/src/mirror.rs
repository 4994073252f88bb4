//! Backend-side view of parties, built only from received sync messages.
//!
//! A backend keeps no party logic of its own: it replaces a roster whenever a
//! `sync` arrives and forgets it on `disband`.

use std::collections::HashMap;

use bytes::BytesMut;

use crate::error::WireError;
use crate::types::{PartyId, UserId};
use crate::wire::{Roster, SyncMessage};

#[derive(Debug, Default)]
pub struct RosterMirror {
    rosters: HashMap<PartyId, Roster>,
    index: HashMap<UserId, PartyId>,
}

impl RosterMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, message: SyncMessage) {
        match message {
            SyncMessage::Roster(roster) => self.replace(roster),
            SyncMessage::Disband(party) => self.forget(&party),
        }
    }

    /// Applies every complete frame in `buf`, leaving any partial tail.
    /// Returns how many messages were applied.
    pub fn apply_frames(&mut self, buf: &mut BytesMut) -> Result<usize, WireError> {
        let mut applied = 0;
        while let Some(message) = SyncMessage::decode_frame(buf)? {
            self.apply(message);
            applied += 1;
        }
        Ok(applied)
    }

    fn replace(&mut self, roster: Roster) {
        self.forget(&roster.party);

        // A user listed here has left whatever party we thought they were in.
        let moved: Vec<(UserId, PartyId)> = roster
            .all_members()
            .filter_map(|user| self.index.get(user).map(|party| (*user, *party)))
            .collect();
        for (user, party) in moved {
            self.drop_member(&party, &user);
        }

        for user in roster.all_members() {
            self.index.insert(*user, roster.party);
        }
        self.rosters.insert(roster.party, roster);
    }

    fn drop_member(&mut self, party: &PartyId, user: &UserId) {
        self.index.remove(user);
        let Some(roster) = self.rosters.get_mut(party) else {
            return;
        };
        if roster.leader == *user {
            // A roster without its leader is stale; the next sync replaces it.
            self.forget(party);
        } else {
            roster.members.retain(|member| member != user);
        }
    }

    fn forget(&mut self, party: &PartyId) {
        if let Some(old) = self.rosters.remove(party) {
            for user in old.all_members() {
                if self.index.get(user) == Some(party) {
                    self.index.remove(user);
                }
            }
        }
    }

    pub fn party_of(&self, user: &UserId) -> Option<PartyId> {
        self.index.get(user).copied()
    }

    pub fn roster(&self, party: &PartyId) -> Option<&Roster> {
        self.rosters.get(party)
    }

    pub fn len(&self) -> usize {
        self.rosters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rosters.is_empty()
    }
}
