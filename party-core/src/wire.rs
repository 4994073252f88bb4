//! Sync channel wire format.
//!
//! Two sub-channels travel over the custom channel [`CHANNEL`]:
//!
//! ```text
//! sync     <party>~<leader>[~<member>:<member>:...]
//! disband  <party>
//! ```
//!
//! On the byte stream each message is a frame of two length-prefixed UTF-8
//! strings, the sub-channel tag first:
//!
//! ```text
//! +---------+-------------+---------+-------------+
//! | u16 len | tag bytes   | u16 len | payload     |
//! +---------+-------------+---------+-------------+
//! ```
//!
//! Lengths are big-endian byte counts.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;
use crate::types::{PartyId, UserId};

/// Name of the custom channel backends listen on.
pub const CHANNEL: &str = "party:sync";

const FIELD_SEPARATOR: char = '~';
const MEMBER_SEPARATOR: char = ':';
const MAX_FIELD_LEN: usize = u16::MAX as usize;

// ---------------------------------------------------------------------------
// Sub-channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubChannel {
    Sync,
    Disband,
}

impl SubChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            SubChannel::Sync => "sync",
            SubChannel::Disband => "disband",
        }
    }
}

impl fmt::Display for SubChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubChannel {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(SubChannel::Sync),
            "disband" => Ok(SubChannel::Disband),
            other => Err(WireError::UnknownSubChannel(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Membership of one party as carried by a `sync` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    pub party: PartyId,
    pub leader: UserId,
    /// Every member except the leader. Order carries no meaning.
    pub members: Vec<UserId>,
}

impl Roster {
    pub fn contains(&self, user: &UserId) -> bool {
        self.leader == *user || self.members.contains(user)
    }

    /// Leader first, then the rest.
    pub fn all_members(&self) -> impl Iterator<Item = &UserId> {
        std::iter::once(&self.leader).chain(self.members.iter())
    }

    /// Number of people on the roster, leader included. Never zero.
    pub fn headcount(&self) -> usize {
        1 + self.members.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    Roster(Roster),
    Disband(PartyId),
}

impl SyncMessage {
    pub fn sub_channel(&self) -> SubChannel {
        match self {
            SyncMessage::Roster(_) => SubChannel::Sync,
            SyncMessage::Disband(_) => SubChannel::Disband,
        }
    }

    pub fn party(&self) -> PartyId {
        match self {
            SyncMessage::Roster(roster) => roster.party,
            SyncMessage::Disband(party) => *party,
        }
    }

    /// Renders the text payload for [`Self::sub_channel`].
    pub fn payload(&self) -> String {
        match self {
            SyncMessage::Disband(party) => party.to_string(),
            SyncMessage::Roster(roster) => {
                let mut out = format!("{}{FIELD_SEPARATOR}{}", roster.party, roster.leader);
                for (i, member) in roster.members.iter().enumerate() {
                    out.push(if i == 0 { FIELD_SEPARATOR } else { MEMBER_SEPARATOR });
                    out.push_str(&member.to_string());
                }
                out
            }
        }
    }

    /// Parses a payload received on `channel`.
    pub fn parse(channel: SubChannel, payload: &str) -> Result<Self, WireError> {
        match channel {
            SubChannel::Disband => parse_id(payload).map(SyncMessage::Disband),
            SubChannel::Sync => parse_roster(payload).map(SyncMessage::Roster),
        }
    }

    pub fn encode_frame(&self) -> Result<Bytes, WireError> {
        encode_frame(self.sub_channel(), &self.payload())
    }

    /// Decodes the next complete frame in `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched while the frame is still
    /// incomplete. A complete but undecodable frame is consumed before the
    /// error is returned, so the stream stays aligned.
    pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Self>, WireError> {
        let Some((tag, payload)) = decode_raw_frame(buf)? else {
            return Ok(None);
        };
        let channel: SubChannel = tag.parse()?;
        Self::parse(channel, &payload).map(Some)
    }
}

fn parse_roster(payload: &str) -> Result<Roster, WireError> {
    let malformed = |reason| WireError::MalformedPayload {
        channel: "sync",
        reason,
    };

    let mut fields = payload.split(FIELD_SEPARATOR);
    let party = parse_id(fields.next().unwrap_or_default())?;
    let leader = parse_id(fields.next().ok_or_else(|| malformed("missing leader field"))?)?;

    let members = match fields.next() {
        None => Vec::new(),
        Some("") => return Err(malformed("empty member list")),
        Some(list) => list
            .split(MEMBER_SEPARATOR)
            .map(|segment| {
                if segment.is_empty() {
                    Err(malformed("empty member id"))
                } else {
                    parse_id(segment)
                }
            })
            .collect::<Result<Vec<UserId>, _>>()?,
    };

    if fields.next().is_some() {
        return Err(malformed("more than three fields"));
    }

    Ok(Roster {
        party,
        leader,
        members,
    })
}

fn parse_id<T>(value: &str) -> Result<T, WireError>
where
    T: FromStr<Err = uuid::Error>,
{
    value.parse().map_err(|source| WireError::InvalidId {
        value: value.to_string(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Encodes one frame for `channel` carrying `payload`.
pub fn encode_frame(channel: SubChannel, payload: &str) -> Result<Bytes, WireError> {
    let tag = channel.as_str();
    let mut buf = BytesMut::with_capacity(4 + tag.len() + payload.len());
    put_field(&mut buf, tag)?;
    put_field(&mut buf, payload)?;
    Ok(buf.freeze())
}

/// Splits the next complete frame off `buf` without interpreting the tag.
pub fn decode_raw_frame(buf: &mut BytesMut) -> Result<Option<(String, String)>, WireError> {
    let Some(tag_len) = peek_len(buf, 0) else {
        return Ok(None);
    };
    let payload_at = 2 + tag_len;
    let Some(payload_len) = peek_len(buf, payload_at) else {
        return Ok(None);
    };
    let total = payload_at + 2 + payload_len;
    if buf.len() < total {
        return Ok(None);
    }

    let mut frame = buf.split_to(total);
    let tag = take_field(&mut frame)?;
    let payload = take_field(&mut frame)?;
    Ok(Some((tag, payload)))
}

fn put_field(buf: &mut BytesMut, value: &str) -> Result<(), WireError> {
    if value.len() > MAX_FIELD_LEN {
        return Err(WireError::FieldTooLong(value.len()));
    }
    buf.put_u16(value.len() as u16);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn peek_len(buf: &BytesMut, at: usize) -> Option<usize> {
    let bytes = buf.get(at..at + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]) as usize)
}

fn take_field(frame: &mut BytesMut) -> Result<String, WireError> {
    let len = frame.get_u16() as usize;
    let raw = frame.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidUtf8)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn uid(n: u128) -> UserId {
        UserId(uuid::Uuid::from_u128(n))
    }

    fn pid(n: u128) -> PartyId {
        PartyId(uuid::Uuid::from_u128(n))
    }

    #[test]
    fn lone_leader_payload_has_two_fields() {
        let msg = SyncMessage::Roster(Roster {
            party: pid(1),
            leader: uid(2),
            members: vec![],
        });
        assert_eq!(
            msg.payload(),
            "00000000-0000-0000-0000-000000000001~00000000-0000-0000-0000-000000000002"
        );
    }

    #[test]
    fn members_are_colon_joined_without_trailing_separator() {
        let msg = SyncMessage::Roster(Roster {
            party: pid(1),
            leader: uid(2),
            members: vec![uid(3), uid(4)],
        });
        let payload = msg.payload();
        let third = payload.split('~').nth(2).expect("third field");
        assert_eq!(third.split(':').count(), 2);
        assert!(!payload.ends_with(':'));
    }

    #[test]
    fn disband_payload_is_party_id() {
        let msg = SyncMessage::Disband(pid(9));
        assert_eq!(msg.sub_channel(), SubChannel::Disband);
        assert_eq!(msg.payload(), pid(9).to_string());
    }

    #[test]
    fn parse_accepts_upper_case_ids() {
        let payload = format!("{}~{}", pid(7), uid(8)).to_uppercase();
        let msg = SyncMessage::parse(SubChannel::Sync, &payload).expect("parse");
        assert_eq!(msg.party(), pid(7));
    }

    #[rstest]
    #[case::missing_leader("00000000-0000-0000-0000-000000000001")]
    #[case::empty_members("00000000-0000-0000-0000-000000000001~00000000-0000-0000-0000-000000000002~")]
    #[case::empty_segment("00000000-0000-0000-0000-000000000001~00000000-0000-0000-0000-000000000002~00000000-0000-0000-0000-000000000003::00000000-0000-0000-0000-000000000004")]
    #[case::four_fields("00000000-0000-0000-0000-000000000001~00000000-0000-0000-0000-000000000002~00000000-0000-0000-0000-000000000003~x")]
    fn malformed_sync_payloads_are_rejected(#[case] payload: &str) {
        let err = SyncMessage::parse(SubChannel::Sync, payload).unwrap_err();
        assert!(matches!(err, WireError::MalformedPayload { .. }), "got: {err}");
    }

    #[test]
    fn bad_id_reports_value() {
        let err = SyncMessage::parse(SubChannel::Disband, "not-a-uuid").unwrap_err();
        match err {
            WireError::InvalidId { value, .. } => assert_eq!(value, "not-a-uuid"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_sub_channel() {
        let err = "teleport".parse::<SubChannel>().unwrap_err();
        assert_eq!(err, WireError::UnknownSubChannel("teleport".into()));
    }

    #[test]
    fn frame_layout_is_length_prefixed() {
        let frame = encode_frame(SubChannel::Sync, "ab").expect("encode");
        assert_eq!(&frame[..], b"\x00\x04sync\x00\x02ab");
    }

    #[test]
    fn partial_frame_leaves_buffer_untouched() {
        let frame = SyncMessage::Disband(pid(5)).encode_frame().expect("encode");
        let mut buf = BytesMut::from(&frame[..frame.len() - 3]);
        let before = buf.len();
        assert!(SyncMessage::decode_frame(&mut buf).expect("decode").is_none());
        assert_eq!(buf.len(), before);

        buf.extend_from_slice(&frame[frame.len() - 3..]);
        let msg = SyncMessage::decode_frame(&mut buf).expect("decode").expect("frame");
        assert_eq!(msg, SyncMessage::Disband(pid(5)));
        assert!(buf.is_empty());
    }

    #[test]
    fn consecutive_frames_decode_in_order() {
        let first = SyncMessage::Roster(Roster {
            party: pid(1),
            leader: uid(2),
            members: vec![uid(3)],
        });
        let second = SyncMessage::Disband(pid(1));
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&first.encode_frame().expect("encode"));
        buf.extend_from_slice(&second.encode_frame().expect("encode"));

        assert_eq!(SyncMessage::decode_frame(&mut buf).unwrap(), Some(first));
        assert_eq!(SyncMessage::decode_frame(&mut buf).unwrap(), Some(second));
        assert_eq!(SyncMessage::decode_frame(&mut buf).unwrap(), None);
    }

    #[test]
    fn oversized_field_is_refused() {
        let huge = "x".repeat(MAX_FIELD_LEN + 1);
        let err = encode_frame(SubChannel::Sync, &huge).unwrap_err();
        assert_eq!(err, WireError::FieldTooLong(MAX_FIELD_LEN + 1));
    }

    #[test]
    fn invalid_utf8_consumes_frame() {
        let mut buf = BytesMut::from(&b"\x00\x04sync\x00\x02\xff\xfe"[..]);
        let err = decode_raw_frame(&mut buf).unwrap_err();
        assert_eq!(err, WireError::InvalidUtf8);
        assert!(buf.is_empty());
    }
}
