//! Error and rejection types for party-core.

use thiserror::Error;

/// Failures decoding or encoding the sync channel.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// The sub-channel tag is neither `sync` nor `disband`.
    #[error("unknown sub-channel '{0}'")]
    UnknownSubChannel(String),

    /// The payload does not have the `id~leader[~a:b:c]` shape.
    #[error("malformed {channel} payload: {reason}")]
    MalformedPayload {
        channel: &'static str,
        reason: &'static str,
    },

    /// A party or user id did not parse as a UUID.
    #[error("invalid id '{value}': {source}")]
    InvalidId {
        value: String,
        #[source]
        source: uuid::Error,
    },

    /// A frame field does not fit a 16-bit length prefix.
    #[error("frame field is {0} bytes; the limit is 65535")]
    FieldTooLong(usize),

    /// A frame field is not valid UTF-8.
    #[error("frame field is not valid UTF-8")]
    InvalidUtf8,
}

/// A business rule refused the request. Never fatal; the caller renders it.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("you are not in a party")]
    NotInParty,

    #[error("you are already in a party")]
    AlreadyInParty,

    #[error("that player is not online")]
    TargetOffline,

    #[error("that player is already in a party")]
    TargetInParty,

    #[error("that player is not in your party")]
    TargetNotInParty,

    #[error("you cannot target yourself")]
    CannotTargetSelf,

    #[error("your rank does not allow that")]
    NotPermitted,

    #[error("that player already has a pending invite")]
    AlreadyInvited,

    #[error("you do not have an invite to that party")]
    NoInvite,

    #[error("you cannot kick that player")]
    CannotKick,

    #[error("you are already the party leader")]
    AlreadyLeader,

    #[error("that party is not public")]
    NotPublic,

    #[error("you are not connected to a backend")]
    NoBackend,

    #[error("that party has been disbanded")]
    Disbanded,

    #[error("invites cannot be scheduled right now")]
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_messages_are_plain() {
        assert_eq!(Rejection::NotInParty.to_string(), "you are not in a party");
        assert!(Rejection::CannotKick.to_string().contains("kick"));
    }

    #[test]
    fn field_too_long_mentions_limit() {
        assert!(WireError::FieldTooLong(70_000).to_string().contains("65535"));
    }
}
