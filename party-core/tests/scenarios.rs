//! End-to-end party scenarios observed through the captured sync traffic.

use party_core::testing::World;
use party_core::{Promotion, Rank, Removal, SubChannel, SyncMessage, UserId};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn leader_field(payload: &str) -> &str {
    payload.split('~').nth(1).expect("leader field")
}

fn assert_single_leader(world: &World) {
    for party in world.registry.parties() {
        let ranks = party.members_with_ranks();
        assert!(!ranks.is_empty(), "a live party is never empty");
        let leaders = ranks.iter().filter(|(_, r)| *r == Rank::Leader).count();
        assert_eq!(leaders, 1, "party {} has {leaders} leaders", party.id());
    }
}

// ---------------------------------------------------------------------------
// 1. Full lifecycle: invite, accept, promote twice, old leader leaves
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invite_accept_promote_and_leave() {
    let world = World::new();
    let l = world.user("lobby-1");
    let m = world.user("lobby-2");

    let party = world.registry.create(&l).expect("create");
    assert_eq!(world.registry.len(), 1);
    assert_eq!(party.rank(&l), Some(Rank::Leader));

    world.registry.invite(&l, &m, "M").expect("invite");
    world.registry.accept(&m, &l).expect("accept");

    let expected = format!("{}~{}~{}", party.id(), l, m);
    let to_l = world.transport.to("lobby-1");
    let to_m = world.transport.to("lobby-2");
    assert_eq!(to_l.last().expect("sync to L").payload, expected);
    assert_eq!(to_m.last().expect("sync to M").payload, expected);
    world.transport.take();

    assert_eq!(world.registry.promote(&l, &m).unwrap(), Promotion::Moderator);
    assert_eq!(party.rank(&m), Some(Rank::Moderator));
    assert!(
        world.transport.take().is_empty(),
        "moderator promotion leaves the roster payload unchanged"
    );

    assert_eq!(world.registry.promote(&l, &m).unwrap(), Promotion::Leader);
    assert_eq!(party.rank(&l), Some(Rank::Moderator));
    assert_eq!(party.rank(&m), Some(Rank::Leader));
    let sent = world.transport.take();
    assert_eq!(sent.len(), 2);
    for s in &sent {
        assert_eq!(s.channel, SubChannel::Sync);
        assert_eq!(leader_field(&s.payload), m.to_string());
    }
    assert_single_leader(&world);

    assert_eq!(world.registry.leave(&l).unwrap(), Removal::Removed);
    assert_eq!(party.members_with_ranks(), vec![(m, Rank::Leader)]);
    assert!(world.registry.find(&party.id()).is_some());
    assert_single_leader(&world);
}

// ---------------------------------------------------------------------------
// 2. Leader removal is disbandment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn removing_sole_leader_disbands() {
    let world = World::new();
    let l = world.user("lobby");
    let party = world.registry.create(&l).expect("create");
    let id = party.id();
    world.transport.take();

    assert_eq!(party.remove_member(&l), Removal::Disbanded);
    assert!(world.registry.find(&id).is_none());
    assert!(world.registry.find_by_user(&l).is_none());

    let sent = world.transport.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].decode(), SyncMessage::Disband(id));
}

#[tokio::test]
async fn leader_disconnect_disbands_for_every_former_member() {
    let world = World::new();
    let l = world.user("lobby");
    let a = world.user("arena");
    let b = world.user("arena");
    let party = world.registry.create(&l).expect("create");
    party.add_member(&a);
    party.add_member(&b);

    assert_eq!(world.registry.on_disconnect(&l), Some(Removal::Disbanded));
    for user in [l, a, b] {
        assert!(world.registry.find_by_user(&user).is_none());
    }
    assert!(party.is_disbanded());
    assert!(!party.add_member(&UserId::random()), "dead party takes no members");
}

// ---------------------------------------------------------------------------
// 3. Disband reaches exactly the members reachable at that moment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disband_skips_members_already_offline() {
    let world = World::new();
    let l = world.user("lobby");
    let online = world.user("arena");
    let gone = world.user("skywars");
    let party = world.registry.create(&l).expect("create");
    party.add_member(&online);
    party.add_member(&gone);
    world.transport.take();

    world.directory.disconnect(&gone);
    assert!(world.registry.disband(&party));

    let sent = world.transport.take();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|s| s.channel == SubChannel::Disband));
    assert!(world.transport.to("skywars").is_empty());
    assert!(!world.registry.disband(&party), "second disband is a no-op");
    assert!(world.transport.take().is_empty());
}

// ---------------------------------------------------------------------------
// 4. One party per user
// ---------------------------------------------------------------------------

#[tokio::test]
async fn user_cannot_hold_two_memberships() {
    let world = World::new();
    let a = world.user("lobby");
    let b = world.user("lobby");
    let guest = world.user("lobby");

    world.registry.invite(&a, &guest, "guest").expect("invite from a");
    let second = world.registry.create(&b).expect("create b");
    second.invite(&guest, "guest").expect("invite from b");

    world.registry.accept(&guest, &a).expect("accept a");
    assert_eq!(
        world.registry.accept(&guest, &b).unwrap_err(),
        party_core::Rejection::AlreadyInParty
    );
    assert!(!second.add_member(&guest));

    let found: Vec<_> = world
        .registry
        .parties()
        .into_iter()
        .filter(|p| p.rank(&guest).is_some())
        .collect();
    assert_eq!(found.len(), 1);
}

// ---------------------------------------------------------------------------
// 5. Sync payload addressing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn roster_omits_offline_members_until_they_leave() {
    let world = World::new();
    let l = world.user("lobby");
    let away = world.user("arena");
    let party = world.registry.create(&l).expect("create");
    party.add_member(&away);
    world.directory.disconnect(&away);
    world.transport.take();

    let newcomer = world.user("lobby");
    party.add_member(&newcomer);

    let sent = world.transport.take();
    assert_eq!(sent.len(), 2, "leader and newcomer only");
    for s in &sent {
        match s.decode() {
            SyncMessage::Roster(roster) => {
                assert_eq!(roster.leader, l);
                assert_eq!(roster.members, vec![newcomer]);
                assert!(!roster.contains(&away));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
    assert_eq!(party.member_count(), 3, "offline member is still recorded");
}

/// A host drops the session before running the disconnect hook. An accept
/// racing in between is refused, so the user never lingers in a party.
#[tokio::test]
async fn accept_between_session_drop_and_disconnect_hook_is_refused() {
    let world = World::new();
    let ann = world.user("lobby");
    let bo = world.user("arena");
    let invited = world.registry.invite(&ann, &bo, "bo").expect("invite");
    let party = invited.party;

    world.directory.disconnect(&bo);
    assert!(world.registry.accept(&bo, &ann).is_err());
    assert_eq!(world.registry.on_disconnect(&bo), None);

    assert!(world.registry.find_by_user(&bo).is_none());
    assert_eq!(party.rank(&bo), None);

    world.transport.take();
    let cy = world.user("lobby");
    world.registry.invite(&ann, &cy, "cy").expect("invite");
    world.registry.accept(&cy, &ann).expect("accept");
    for s in world.transport.take() {
        if let SyncMessage::Roster(roster) = s.decode() {
            assert!(!roster.contains(&bo), "departed user must not be synced");
        }
    }
}
