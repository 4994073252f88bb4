//! A single party: membership, ranks and pending invites.
//!
//! # Locking
//!
//! All party state sits behind one mutex. Operations that change *who* is a
//! member (`add_member`, `remove_member`, disband) also touch the registry's
//! membership index, so they take the registry lock first and the party lock
//! second. Nothing takes a party lock and then the registry lock, and no code
//! path holds two party locks at once.
//!
//! Sync broadcasts are always sent after every lock is released.
//!
//! # Leadership
//!
//! The leader is stored apart from the other members, so a party has exactly
//! one leader by construction. Rank changes that would leave zero leaders are
//! refused; handing leadership over demotes the old leader in the same
//! critical section.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::collab::{Bridge, PartyNotice};
use crate::error::Rejection;
use crate::registry::{RegistryShared, RegistryState};
use crate::types::{PartyId, Rank, UserId};
use crate::wire::{Roster, SubChannel, SyncMessage};

/// How long an invite stays pending before it expires.
pub const INVITE_TTL: Duration = Duration::from_secs(60);

/// Result of [`Party::remove_member`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// A non-leader left; the remaining members were re-synced.
    Removed,
    /// The leader left, so the whole party was disbanded.
    Disbanded,
    /// The user was not a member. Nothing changed.
    NotMember,
}

/// Result of a successful [`Party::promote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    /// A member became a moderator.
    Moderator,
    /// Leadership moved to the target; the old leader is now a moderator.
    Leader,
}

#[derive(Debug)]
struct PendingInvite {
    name: String,
    generation: u64,
}

#[derive(Debug)]
struct PartyState {
    leader: UserId,
    /// Every member except the leader; ranks are Moderator or Member.
    members: HashMap<UserId, Rank>,
    invites: HashMap<UserId, PendingInvite>,
    public: bool,
    disbanded: bool,
    next_generation: u64,
}

impl PartyState {
    fn rank(&self, user: &UserId) -> Option<Rank> {
        if *user == self.leader {
            Some(Rank::Leader)
        } else {
            self.members.get(user).copied()
        }
    }

    fn member_ids(&self) -> Vec<UserId> {
        std::iter::once(self.leader)
            .chain(self.members.keys().copied())
            .collect()
    }

    fn roster(&self, party: PartyId) -> Roster {
        Roster {
            party,
            leader: self.leader,
            members: self.members.keys().copied().collect(),
        }
    }

    /// Moves leadership to `target`, demoting the current leader.
    fn hand_over(&mut self, target: UserId) {
        self.members.remove(&target);
        self.members.insert(self.leader, Rank::Moderator);
        self.leader = target;
    }
}

pub struct Party {
    id: PartyId,
    created_at: DateTime<Utc>,
    state: Mutex<PartyState>,
    bridge: Bridge,
    registry: Weak<RegistryShared>,
    this: Weak<Party>,
}

impl Party {
    pub(crate) fn new(
        id: PartyId,
        leader: UserId,
        bridge: Bridge,
        registry: Weak<RegistryShared>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Party {
            id,
            created_at: Utc::now(),
            state: Mutex::new(PartyState {
                leader,
                members: HashMap::new(),
                invites: HashMap::new(),
                public: false,
                disbanded: false,
                next_generation: 0,
            }),
            bridge,
            registry,
            this: this.clone(),
        })
    }

    pub fn id(&self) -> PartyId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn lock(&self) -> MutexGuard<'_, PartyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Rank of `user`, or `None` if they are not a member.
    pub fn rank(&self, user: &UserId) -> Option<Rank> {
        let state = self.lock();
        if state.disbanded {
            return None;
        }
        state.rank(user)
    }

    pub fn leader(&self) -> Option<UserId> {
        let state = self.lock();
        (!state.disbanded).then_some(state.leader)
    }

    /// Reachable members, leader first. Unreachable members stay recorded.
    pub fn list_members(&self) -> Vec<UserId> {
        let ids = {
            let state = self.lock();
            if state.disbanded {
                return Vec::new();
            }
            state.member_ids()
        };
        ids.into_iter()
            .filter(|user| self.bridge.directory.is_reachable(user))
            .collect()
    }

    /// Pending invitees that are currently reachable. Stale entries are kept.
    pub fn list_invites(&self) -> Vec<UserId> {
        let ids: Vec<UserId> = self.lock().invites.keys().copied().collect();
        ids.into_iter()
            .filter(|user| self.bridge.directory.is_reachable(user))
            .collect()
    }

    pub fn has_invite(&self, user: &UserId) -> bool {
        self.lock().invites.contains_key(user)
    }

    /// Display name recorded when `user` was invited.
    pub fn invite_name(&self, user: &UserId) -> Option<String> {
        self.lock().invites.get(user).map(|invite| invite.name.clone())
    }

    /// Every recorded member with their rank, reachable or not.
    pub fn members_with_ranks(&self) -> Vec<(UserId, Rank)> {
        let state = self.lock();
        if state.disbanded {
            return Vec::new();
        }
        std::iter::once((state.leader, Rank::Leader))
            .chain(state.members.iter().map(|(user, rank)| (*user, *rank)))
            .collect()
    }

    pub fn member_count(&self) -> usize {
        let state = self.lock();
        if state.disbanded {
            0
        } else {
            1 + state.members.len()
        }
    }

    pub fn roster(&self) -> Option<Roster> {
        let state = self.lock();
        (!state.disbanded).then(|| state.roster(self.id))
    }

    pub fn is_public(&self) -> bool {
        self.lock().public
    }

    pub fn is_disbanded(&self) -> bool {
        self.lock().disbanded
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Adds `user` as a member and clears their pending invite.
    ///
    /// Callers check eligibility (invite or public party) first. Returns
    /// `false` without changing anything if the user already belongs to a
    /// party, is no longer reachable, or this party is gone.
    ///
    /// Reachability is checked under the registry lock. Hosts drop a
    /// session before running [`PartyRegistry::on_disconnect`], so a user
    /// is either added before that hook runs or refused here.
    ///
    /// [`PartyRegistry::on_disconnect`]: crate::registry::PartyRegistry::on_disconnect
    pub fn add_member(&self, user: &UserId) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let roster = {
            let mut reg = registry.lock();
            if reg.index.contains_key(user) || !self.bridge.directory.is_reachable(user) {
                return false;
            }
            let mut state = self.lock();
            if state.disbanded {
                return false;
            }
            state.members.insert(*user, Rank::Member);
            state.invites.remove(user);
            reg.index.insert(*user, self.id);
            state.roster(self.id)
        };
        tracing::debug!(party = %self.id, user = %user, "member added");
        self.broadcast(&roster);
        true
    }

    /// Removes `user`. Removing the leader disbands the party through the
    /// registry instead of touching the member map.
    pub fn remove_member(&self, user: &UserId) -> Removal {
        let Some(registry) = self.registry.upgrade() else {
            return Removal::NotMember;
        };
        let mut reg = registry.lock();
        let mut state = self.lock();
        if state.disbanded {
            return Removal::NotMember;
        }

        match state.rank(user) {
            None => Removal::NotMember,
            Some(Rank::Leader) => {
                let members = self.teardown_locked(&mut reg, &mut state);
                drop(state);
                drop(reg);
                tracing::info!(party = %self.id, leader = %user, "leader left, party disbanded");
                self.send_disband(&members);
                Removal::Disbanded
            }
            Some(_) => {
                let roster = self.drop_member(&mut reg, &mut state, user);
                drop(state);
                drop(reg);
                tracing::debug!(party = %self.id, user = %user, "member removed");
                self.broadcast(&roster);
                Removal::Removed
            }
        }
    }

    /// Removes `target` on behalf of `actor`.
    ///
    /// Both ranks are checked under the same locks that perform the removal,
    /// so a concurrent promotion cannot turn a kick into a disband. Staff may
    /// kick strictly lower ranks; the leader can never be kicked.
    pub fn kick(&self, actor: &UserId, target: &UserId) -> Result<(), Rejection> {
        let registry = self.registry.upgrade().ok_or(Rejection::Disbanded)?;
        let mut reg = registry.lock();
        let mut state = self.lock();
        if state.disbanded {
            return Err(Rejection::Disbanded);
        }

        let actor_rank = state.rank(actor).ok_or(Rejection::NotInParty)?;
        if !actor_rank.can_kick() {
            return Err(Rejection::NotPermitted);
        }
        let target_rank = state.rank(target).ok_or(Rejection::TargetNotInParty)?;
        if target_rank == actor_rank || target_rank == Rank::Leader {
            return Err(Rejection::CannotKick);
        }

        let roster = self.drop_member(&mut reg, &mut state, target);
        drop(state);
        drop(reg);
        tracing::debug!(party = %self.id, user = %target, by = %actor, "member kicked");
        self.broadcast(&roster);
        Ok(())
    }

    /// Disbands the party on behalf of `actor`, who must lead it at the
    /// moment of teardown.
    pub fn disband_by(&self, actor: &UserId) -> Result<(), Rejection> {
        let registry = self.registry.upgrade().ok_or(Rejection::Disbanded)?;
        let mut reg = registry.lock();
        let mut state = self.lock();
        if state.disbanded {
            return Err(Rejection::Disbanded);
        }
        match state.rank(actor) {
            Some(Rank::Leader) => {}
            Some(_) => return Err(Rejection::NotPermitted),
            None => return Err(Rejection::NotInParty),
        }

        let members = self.teardown_locked(&mut reg, &mut state);
        drop(state);
        drop(reg);
        tracing::info!(party = %self.id, leader = %actor, members = members.len(), "party disbanded");
        self.send_disband(&members);
        Ok(())
    }

    /// Drops a non-leader from the member map and the index. Caller holds
    /// both locks and has checked the rank.
    fn drop_member(&self, reg: &mut RegistryState, state: &mut PartyState, user: &UserId) -> Roster {
        state.members.remove(user);
        if reg.index.get(user) == Some(&self.id) {
            reg.index.remove(user);
        }
        state.roster(self.id)
    }

    // -----------------------------------------------------------------------
    // Ranks
    // -----------------------------------------------------------------------

    /// Overwrites the rank of a member.
    ///
    /// Setting [`Rank::Leader`] hands leadership over (the old leader becomes
    /// a moderator) and re-syncs. Demoting the leader directly is refused,
    /// since it would leave the party without one. Returns whether anything
    /// was applied.
    pub fn set_rank(&self, user: &UserId, rank: Rank) -> bool {
        let mut state = self.lock();
        if state.disbanded {
            return false;
        }
        match (state.rank(user), rank) {
            (None, _) => false,
            (Some(Rank::Leader), Rank::Leader) => true,
            (Some(Rank::Leader), _) => false,
            (Some(_), Rank::Leader) => {
                state.hand_over(*user);
                let roster = state.roster(self.id);
                drop(state);
                tracing::debug!(party = %self.id, leader = %user, "leadership transferred");
                self.broadcast(&roster);
                true
            }
            (Some(_), rank) => {
                state.members.insert(*user, rank);
                true
            }
        }
    }

    /// Promotes `target` on behalf of `actor`, who must be the leader.
    ///
    /// A member becomes a moderator. A moderator takes over as leader and the
    /// actor steps down to moderator; both happen under one lock so no reader
    /// ever sees zero or two leaders.
    pub fn promote(&self, actor: &UserId, target: &UserId) -> Result<Promotion, Rejection> {
        let mut state = self.lock();
        if state.disbanded {
            return Err(Rejection::Disbanded);
        }
        match state.rank(actor) {
            None => return Err(Rejection::NotInParty),
            Some(Rank::Leader) => {}
            Some(_) => return Err(Rejection::NotPermitted),
        }
        if actor == target {
            return Err(Rejection::AlreadyLeader);
        }

        match state.rank(target) {
            None => Err(Rejection::TargetNotInParty),
            Some(Rank::Member) => {
                state.members.insert(*target, Rank::Moderator);
                tracing::debug!(party = %self.id, user = %target, "promoted to moderator");
                Ok(Promotion::Moderator)
            }
            Some(_) => {
                state.hand_over(*target);
                let roster = state.roster(self.id);
                drop(state);
                tracing::debug!(party = %self.id, leader = %target, "leadership transferred");
                self.broadcast(&roster);
                Ok(Promotion::Leader)
            }
        }
    }

    pub fn set_public(&self, public: bool) {
        self.lock().public = public;
    }

    // -----------------------------------------------------------------------
    // Invites
    // -----------------------------------------------------------------------

    /// Records a pending invite and schedules its expiry after [`INVITE_TTL`].
    ///
    /// The expiry timer runs on the current tokio runtime; without one the
    /// invite is refused with [`Rejection::Unavailable`] and nothing is
    /// recorded.
    pub fn invite(&self, user: &UserId, name: impl Into<String>) -> Result<(), Rejection> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(party = %self.id, user = %user, "no tokio runtime for invite expiry; invite refused");
            return Err(Rejection::Unavailable);
        };
        let generation = {
            let mut state = self.lock();
            if state.disbanded {
                return Err(Rejection::Disbanded);
            }
            if state.rank(user).is_some() {
                return Err(Rejection::TargetInParty);
            }
            let generation = state.next_generation;
            state.next_generation += 1;
            state.invites.insert(
                *user,
                PendingInvite {
                    name: name.into(),
                    generation,
                },
            );
            generation
        };

        let party = self.this.clone();
        let user = *user;
        runtime.spawn(async move {
            tokio::time::sleep(INVITE_TTL).await;
            if let Some(party) = party.upgrade() {
                party.expire_invite(&user, generation);
            }
        });
        Ok(())
    }

    /// Cancels a pending invite. Idempotent.
    pub fn remove_invite(&self, user: &UserId) -> bool {
        self.lock().invites.remove(user).is_some()
    }

    /// Timer callback: drops the invite only if it is still the one that was
    /// scheduled, then tells every member.
    fn expire_invite(&self, user: &UserId, generation: u64) -> bool {
        let (name, recipients) = {
            let mut state = self.lock();
            if state.disbanded {
                return false;
            }
            let current = state
                .invites
                .get(user)
                .is_some_and(|invite| invite.generation == generation);
            if !current {
                return false;
            }
            let Some(invite) = state.invites.remove(user) else {
                return false;
            };
            (invite.name, state.member_ids())
        };

        tracing::debug!(party = %self.id, user = %user, "invite expired");
        let notice = PartyNotice::InviteExpired {
            party: self.id,
            invitee: *user,
            name,
        };
        for member in recipients
            .iter()
            .filter(|member| self.bridge.directory.is_reachable(member))
        {
            self.bridge.notifier.notify(member, &notice);
        }
        true
    }

    // -----------------------------------------------------------------------
    // Sync
    // -----------------------------------------------------------------------

    /// Re-sends the current roster to `user`'s backend only.
    pub fn sync_to(&self, user: &UserId) -> bool {
        let roster = {
            let state = self.lock();
            if state.disbanded || state.rank(user).is_none() {
                return false;
            }
            state.roster(self.id)
        };
        let payload = SyncMessage::Roster(self.reachable(roster)).payload();
        self.bridge.send_to(user, SubChannel::Sync, &payload)
    }

    /// Snapshots the roster and sends it to every member.
    pub(crate) fn announce(&self) {
        if let Some(roster) = self.roster() {
            self.broadcast(&roster);
        }
    }

    /// Keeps only the non-leader members the directory can still reach.
    fn reachable(&self, mut roster: Roster) -> Roster {
        roster
            .members
            .retain(|member| self.bridge.directory.is_reachable(member));
        roster
    }

    fn broadcast(&self, roster: &Roster) {
        let roster = self.reachable(roster.clone());
        let payload = SyncMessage::Roster(roster.clone()).payload();
        let delivered = roster
            .all_members()
            .filter(|member| self.bridge.send_to(member, SubChannel::Sync, &payload))
            .count();
        tracing::debug!(party = %self.id, delivered, members = roster.headcount(), "roster synced");
    }

    pub(crate) fn send_disband(&self, members: &[UserId]) {
        let payload = SyncMessage::Disband(self.id).payload();
        let delivered = members
            .iter()
            .filter(|member| self.bridge.send_to(member, SubChannel::Disband, &payload))
            .count();
        tracing::debug!(party = %self.id, delivered, "disband sent");
    }

    /// Removes this party from the registry state and marks it dead.
    ///
    /// Returns the members to notify, or `None` if it was already gone.
    /// Caller holds the registry lock.
    pub(crate) fn teardown(&self, reg: &mut RegistryState) -> Option<Vec<UserId>> {
        let mut state = self.lock();
        if state.disbanded {
            return None;
        }
        Some(self.teardown_locked(reg, &mut state))
    }

    /// Teardown with both locks already held. The party must be live.
    fn teardown_locked(&self, reg: &mut RegistryState, state: &mut PartyState) -> Vec<UserId> {
        reg.parties.remove(&self.id);
        state.disbanded = true;
        state.invites.clear();
        let members = state.member_ids();
        for member in &members {
            if reg.index.get(member) == Some(&self.id) {
                reg.index.remove(member);
            }
        }
        members
    }
}

impl std::fmt::Debug for Party {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Party")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
