//! Wire frames exchanged over a namespace channel.
//!
//! Every message on the socket is a JSON text frame
//! `{ "event": "<name>", "data": <payload> }`. Payload fields are camelCase.
//! Inbound payloads are parsed into the typed structs below by whoever
//! handles the event; outbound commands are built from `ClientCommand`.

use std::fmt;

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Namespaces
// ---------------------------------------------------------------------------

/// Logical event namespace. Each namespace gets its own channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    /// Queue, match lifecycle, and round events.
    Matching,
    /// User-level notifications, unrelated to matches.
    User,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Matching => "matching",
            Self::User => "user",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

/// Event names used on the wire.
pub mod events {
    /// Transport lifecycle: the channel (re)connected. No payload.
    pub const CONNECT: &str = "connect";
    /// Transport lifecycle: the channel dropped. No payload.
    pub const DISCONNECT: &str = "disconnect";
    /// Handler-only wildcard matching every inbound event.
    pub const ANY: &str = "*";

    // Inbound, matching namespace
    pub const MATCH_FOUND: &str = "MATCH_FOUND";
    pub const MATCH_STATUS_UPDATE: &str = "MATCH_STATUS_UPDATE";
    pub const MATCHMAKING_FAILED: &str = "MATCHMAKING_FAILED";
    pub const MATCH_CANCELLED: &str = "MATCH_CANCELLED";
    pub const MATCH_ENDED: &str = "MATCH_ENDED";
    pub const ROUND_STARTING: &str = "ROUND_STARTING";
    pub const ROUND_SELECTING_POKEMON: &str = "ROUND_SELECTING_POKEMON";
    pub const ROUND_IN_PROGRESS: &str = "ROUND_IN_PROGRESS";
    pub const ROUND_ENDED: &str = "ROUND_ENDED";

    // Inbound, user namespace
    pub const NOTIFICATION: &str = "notification";

    // Outbound
    pub const JOIN_MATCHING_ROOM: &str = "join-matching-room";
    pub const JOIN_USER_MATCH_ROOM: &str = "join-user-match-room";
    pub const JOIN_USER_ROOM: &str = "join-user-room";
    pub const JOIN_QUEUE: &str = "join-queue";
    pub const LEAVE_QUEUE: &str = "leave-queue";
    pub const ACCEPT_MATCH: &str = "accept-match";
    pub const REJECT_MATCH: &str = "reject-match";
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// A single message on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Parse this frame's payload as `T`. See `parse_payload`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        parse_payload(&self.data)
    }
}

/// Parse an event payload. A missing (`null`) payload is read as `{}` so
/// structs whose fields are all optional accept payload-less events.
pub fn parse_payload<T: DeserializeOwned>(data: &Value) -> Result<T, serde_json::Error> {
    if data.is_null() {
        T::deserialize(&Value::Object(serde_json::Map::new()))
    } else {
        T::deserialize(data)
    }
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

/// The other player in a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opponent {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchFoundPayload {
    pub match_id: String,
    pub opponent: Opponent,
}

/// Server-side match status carried by `MATCH_STATUS_UPDATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
    InProgress,
    Completed,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Accepted => write!(f, "ACCEPTED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchStatusUpdatePayload {
    pub match_id: String,
    pub status: MatchStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchmakingFailedPayload {
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
}

/// `MATCH_CANCELLED`. Without a match id it cancels the queue entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCancelledPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEndedPayload {
    pub match_id: String,
}

/// Payload shared by all round-lifecycle events. Only `ROUND_STARTING`
/// carries the countdown fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundPayload {
    pub match_id: String,
    #[serde(default)]
    pub round_number: u32,
    #[serde(default)]
    pub delay_seconds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Server clock, milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_timestamp: Option<i64>,
}

/// Accept a string or an integer and keep it as a string. Servers are not
/// consistent about id types.
pub(crate) fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }
    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Outbound commands
// ---------------------------------------------------------------------------

/// Commands the client emits. Domain actions outside matchmaking (pokemon
/// choice, answers) are passed through as raw frames instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    JoinMatchingRoom { match_id: String },
    JoinUserMatchRoom { match_id: String },
    JoinUserRoom,
    JoinQueue,
    LeaveQueue,
    AcceptMatch { match_id: String },
    RejectMatch { match_id: String },
}

impl ClientCommand {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::JoinMatchingRoom { .. } => events::JOIN_MATCHING_ROOM,
            Self::JoinUserMatchRoom { .. } => events::JOIN_USER_MATCH_ROOM,
            Self::JoinUserRoom => events::JOIN_USER_ROOM,
            Self::JoinQueue => events::JOIN_QUEUE,
            Self::LeaveQueue => events::LEAVE_QUEUE,
            Self::AcceptMatch { .. } => events::ACCEPT_MATCH,
            Self::RejectMatch { .. } => events::REJECT_MATCH,
        }
    }

    pub fn into_frame(self) -> Frame {
        let event = self.event_name();
        let data = match self {
            Self::JoinMatchingRoom { match_id }
            | Self::JoinUserMatchRoom { match_id }
            | Self::AcceptMatch { match_id }
            | Self::RejectMatch { match_id } => json!({ "matchId": match_id }),
            Self::JoinUserRoom | Self::JoinQueue | Self::LeaveQueue => json!({}),
        };
        Frame::new(event, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_match_found_payload() {
        let frame: Frame = serde_json::from_str(
            r#"{"event":"MATCH_FOUND","data":{"matchId":"m1","opponent":{"id":7,"name":"Ann"}}}"#,
        )
        .unwrap();
        let payload: MatchFoundPayload = frame.parse().unwrap();
        assert_eq!(payload.match_id, "m1");
        assert_eq!(payload.opponent.id, 7);
        assert_eq!(payload.opponent.name, "Ann");
        assert_eq!(payload.opponent.avatar, None);
    }

    #[test]
    fn missing_payload_reads_as_empty_object() {
        let frame: Frame = serde_json::from_str(r#"{"event":"MATCH_CANCELLED"}"#).unwrap();
        let payload: MatchCancelledPayload = frame.parse().unwrap();
        assert_eq!(payload.match_id, None);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let frame = Frame::new(events::MATCH_FOUND, json!({ "matchId": 12 }));
        assert!(frame.parse::<MatchFoundPayload>().is_err());
    }

    #[test]
    fn unknown_match_status_is_tolerated() {
        let payload: MatchStatusUpdatePayload =
            parse_payload(&json!({ "matchId": "m1", "status": "SOMETHING_NEW" })).unwrap();
        assert_eq!(payload.status, MatchStatus::Unknown);
    }

    #[test]
    fn commands_carry_match_id_in_camel_case() {
        let frame = ClientCommand::JoinMatchingRoom {
            match_id: "m1".into(),
        }
        .into_frame();
        assert_eq!(frame.event, "join-matching-room");
        assert_eq!(frame.data, json!({ "matchId": "m1" }));

        let frame = ClientCommand::JoinUserRoom.into_frame();
        assert_eq!(frame.event, "join-user-room");
        assert_eq!(frame.data, json!({}));
    }
}
