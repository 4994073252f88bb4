//! User-facing party verbs and the rank rules that guard them.
//!
//! Each verb checks its preconditions in a fixed order and either performs
//! the change or returns the first [`Rejection`] that applies. Rendering the
//! outcome is left to the caller.

use std::sync::Arc;

use serde::Serialize;

use crate::error::Rejection;
use crate::party::{Party, Promotion, Removal};
use crate::registry::PartyRegistry;
use crate::types::{BackendId, PartyId, Rank, UserId};

/// A successful invite.
#[derive(Debug, Clone)]
pub struct Invited {
    pub party: Arc<Party>,
    /// The inviter had no party, so one was created for them first.
    pub created: bool,
}

/// Where a summoned party should gather, and who should move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summons {
    pub backend: BackendId,
    pub members: Vec<UserId>,
}

/// Reachable view of a party, grouped by rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterView {
    pub party: PartyId,
    pub leader: Option<UserId>,
    pub moderators: Vec<UserId>,
    pub members: Vec<UserId>,
    pub invites: Vec<UserId>,
    pub public: bool,
}

impl PartyRegistry {
    fn party_of(&self, user: &UserId) -> Result<Arc<Party>, Rejection> {
        self.find_by_user(user).ok_or(Rejection::NotInParty)
    }

    fn require_leader(party: &Party, user: &UserId) -> Result<(), Rejection> {
        match party.rank(user) {
            Some(Rank::Leader) => Ok(()),
            Some(_) => Err(Rejection::NotPermitted),
            None => Err(Rejection::NotInParty),
        }
    }

    /// Adds `user` to `party`, naming the reason when the add is refused.
    fn admit(&self, party: &Party, user: &UserId) -> Result<(), Rejection> {
        if party.add_member(user) {
            return Ok(());
        }
        if party.is_disbanded() {
            Err(Rejection::Disbanded)
        } else if !self.bridge().directory.is_reachable(user) {
            Err(Rejection::NoBackend)
        } else {
            Err(Rejection::AlreadyInParty)
        }
    }

    /// Party of a reachable `inviter` that holds an invite for `user`.
    fn inviting_party(&self, user: &UserId, inviter: &UserId) -> Result<Arc<Party>, Rejection> {
        if !self.bridge().directory.is_reachable(inviter) {
            return Err(Rejection::TargetOffline);
        }
        let party = self
            .find_by_user(inviter)
            .ok_or(Rejection::TargetNotInParty)?;
        if !party.has_invite(user) {
            return Err(Rejection::NoInvite);
        }
        Ok(party)
    }

    /// Invites `target` into `actor`'s party, creating one if needed.
    pub fn invite(
        &self,
        actor: &UserId,
        target: &UserId,
        target_name: &str,
    ) -> Result<Invited, Rejection> {
        if !self.bridge().directory.is_reachable(target) {
            return Err(Rejection::TargetOffline);
        }
        if self.find_by_user(target).is_some() {
            return Err(Rejection::TargetInParty);
        }
        if actor == target {
            return Err(Rejection::CannotTargetSelf);
        }

        let (party, created) = match self.find_by_user(actor) {
            Some(party) => (party, false),
            None => (self.create(actor)?, true),
        };

        match party.rank(actor) {
            Some(rank) if rank.can_invite() => {}
            Some(_) => return Err(Rejection::NotPermitted),
            None => return Err(Rejection::NotInParty),
        }
        if party.has_invite(target) {
            return Err(Rejection::AlreadyInvited);
        }
        party.invite(target, target_name)?;

        tracing::debug!(party = %party.id(), inviter = %actor, invitee = %target, "invite sent");
        Ok(Invited { party, created })
    }

    /// `user` accepts the invite they hold from `inviter`'s party.
    pub fn accept(&self, user: &UserId, inviter: &UserId) -> Result<Arc<Party>, Rejection> {
        let party = self.inviting_party(user, inviter)?;
        if self.find_by_user(user).is_some() {
            return Err(Rejection::AlreadyInParty);
        }
        self.admit(&party, user)?;
        Ok(party)
    }

    /// `user` declines the invite they hold from `inviter`'s party.
    pub fn decline(&self, user: &UserId, inviter: &UserId) -> Result<Arc<Party>, Rejection> {
        let party = self.inviting_party(user, inviter)?;
        party.remove_invite(user);
        Ok(party)
    }

    /// `user` joins `target`'s party directly. Only public parties allow it.
    pub fn join(&self, user: &UserId, target: &UserId) -> Result<Arc<Party>, Rejection> {
        if !self.bridge().directory.is_reachable(target) {
            return Err(Rejection::TargetOffline);
        }
        let party = self
            .find_by_user(target)
            .ok_or(Rejection::TargetNotInParty)?;
        if self.find_by_user(user).is_some() {
            return Err(Rejection::AlreadyInParty);
        }
        if !party.is_public() && !party.has_invite(user) {
            return Err(Rejection::NotPublic);
        }
        self.admit(&party, user)?;
        Ok(party)
    }

    /// Removes `target` from `actor`'s party.
    ///
    /// Staff may kick strictly lower ranks; nobody may kick the leader.
    pub fn kick(&self, actor: &UserId, target: &UserId) -> Result<Arc<Party>, Rejection> {
        let party = self.party_of(actor)?;
        party.kick(actor, target)?;
        Ok(party)
    }

    /// Promotes `target` within `actor`'s party. See [`Party::promote`].
    pub fn promote(&self, actor: &UserId, target: &UserId) -> Result<Promotion, Rejection> {
        let party = self.party_of(actor)?;
        Self::require_leader(&party, actor)?;
        if party.rank(target).is_none() {
            return Err(Rejection::TargetNotInParty);
        }
        party.promote(actor, target)
    }

    /// `user` leaves their party. A leaving leader disbands it.
    pub fn leave(&self, user: &UserId) -> Result<Removal, Rejection> {
        let party = self.party_of(user)?;
        match party.remove_member(user) {
            Removal::NotMember => Err(Rejection::NotInParty),
            removal => Ok(removal),
        }
    }

    /// The leader disbands their own party.
    pub fn disband_by(&self, actor: &UserId) -> Result<PartyId, Rejection> {
        let party = self.party_of(actor)?;
        party.disband_by(actor)?;
        Ok(party.id())
    }

    /// The leader opens or closes the party to direct joins.
    pub fn set_public(&self, actor: &UserId, public: bool) -> Result<Arc<Party>, Rejection> {
        let party = self.party_of(actor)?;
        Self::require_leader(&party, actor)?;
        party.set_public(public);
        Ok(party)
    }

    /// The leader calls every other reachable member to their backend.
    pub fn summon(&self, actor: &UserId) -> Result<Summons, Rejection> {
        let party = self.party_of(actor)?;
        Self::require_leader(&party, actor)?;
        let backend = self
            .bridge()
            .directory
            .current_backend(actor)
            .ok_or(Rejection::NoBackend)?;
        let members = party
            .list_members()
            .into_iter()
            .filter(|member| member != actor)
            .collect();
        Ok(Summons { backend, members })
    }

    /// Reachable members of `user`'s party grouped by rank.
    pub fn list(&self, user: &UserId) -> Result<RosterView, Rejection> {
        let party = self.party_of(user)?;
        let directory = &self.bridge().directory;

        let mut view = RosterView {
            party: party.id(),
            leader: None,
            moderators: Vec::new(),
            members: Vec::new(),
            invites: party.list_invites(),
            public: party.is_public(),
        };
        for (member, rank) in party.members_with_ranks() {
            if !directory.is_reachable(&member) {
                continue;
            }
            match rank {
                Rank::Leader => view.leader = Some(member),
                Rank::Moderator => view.moderators.push(member),
                Rank::Member => view.members.push(member),
            }
        }
        view.moderators.sort();
        view.members.sort();
        view.invites.sort();
        Ok(view)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
