//! Party core — membership, ranks, invites and the backend sync protocol.
//!
//! - [`types`] — ids and [`Rank`]
//! - [`collab`] — the [`Directory`], [`SyncTransport`] and [`Notifier`] the host provides
//! - [`party`] — one [`Party`] and its invite timers
//! - [`registry`] — [`PartyRegistry`], the owner of every party, plus host hooks
//! - [`actions`] — user-facing verbs guarded by rank rules
//! - [`wire`] — `sync` / `disband` payloads and stream framing
//! - [`mirror`] — backend-side application of received messages

pub mod actions;
pub mod collab;
pub mod error;
pub mod mirror;
pub mod party;
pub mod registry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;
pub mod wire;

pub use actions::{Invited, RosterView, Summons};
pub use collab::{Bridge, Directory, Notifier, PartyNotice, SyncTransport};
pub use error::{Rejection, WireError};
pub use mirror::RosterMirror;
pub use party::{Party, Promotion, Removal, INVITE_TTL};
pub use registry::PartyRegistry;
pub use types::{BackendId, PartyId, Rank, UserId};
pub use wire::{Roster, SubChannel, SyncMessage, CHANNEL};
