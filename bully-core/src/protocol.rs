//! Core types for the election protocol

use serde::{Deserialize, Serialize};

/// Protocol version stamped on every outbound message. Peers speaking a
/// different version never see each other's traffic; the transport drops
/// mismatches outright instead of negotiating.
pub const PROTOCOL_VERSION: &str = "1";

/// Unique identifier for a peer.
///
/// Ordering decides every contest: the lexicographically greater id wins.
/// Ids must be unique across the group; two peers sharing an id would break
/// the strict total order the algorithm relies on.
pub type PeerId = String;

/// The election outcome as one peer currently believes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Leader {
    /// A specific peer holds the leadership.
    Peer(PeerId),
    /// No leader is known; a contest is in progress (or about to be).
    Election,
}

impl Leader {
    /// True when `id` is the believed leader.
    pub fn is(&self, id: &str) -> bool {
        matches!(self, Leader::Peer(p) if p == id)
    }

    /// The leader's id, if one is known.
    pub fn peer(&self) -> Option<&PeerId> {
        match self {
            Leader::Peer(p) => Some(p),
            Leader::Election => None,
        }
    }
}

impl std::fmt::Display for Leader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Leader::Peer(p) => write!(f, "{}", p),
            Leader::Election => write!(f, "(election)"),
        }
    }
}

/// Election events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// "I want to lead, any objections?"
    #[serde(rename = "ELECTION")]
    Election,

    /// "No, you don't get to." Sent directly to an inferior contender.
    #[serde(rename = "DISAGREE")]
    Disagree,

    /// "I am the leader."
    #[serde(rename = "LEADER")]
    Leader,

    /// "I am stepping down."
    #[serde(rename = "DEAD")]
    Dead,
}

/// A single message on the wire. Emitted once, never mutated.
///
/// `from` and `version` are stamped by the transport on emit; senders only
/// choose the event and the addressee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sending peer.
    pub from: PeerId,
    /// Addressee; `None` broadcasts to every other peer.
    pub to: Option<PeerId>,
    /// What the sender wants.
    pub event: Event,
    /// Protocol version of the sender.
    pub version: String,
}

impl Message {
    /// Serialize message to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialization() {
        let msg = Message {
            from: "alpha".to_string(),
            to: Some("beta".to_string()),
            event: Event::Disagree,
            version: PROTOCOL_VERSION.to_string(),
        };

        let bytes = msg.to_bytes().unwrap();
        let parsed = Message::from_bytes(&bytes).unwrap();

        assert_eq!(parsed, msg);
        assert!(String::from_utf8(bytes).unwrap().contains("DISAGREE"));
    }

    #[test]
    fn test_leader_accessors() {
        let led = Leader::Peer("x".to_string());
        assert!(led.is("x"));
        assert!(!led.is("y"));
        assert_eq!(led.peer().map(String::as_str), Some("x"));
        assert_eq!(led.to_string(), "x");

        assert!(!Leader::Election.is("x"));
        assert_eq!(Leader::Election.peer(), None);
        assert_eq!(Leader::Election.to_string(), "(election)");
    }

    #[test]
    fn test_id_ordering_is_lexicographic() {
        assert!(PeerId::from("2") < PeerId::from("3"));
        assert!(PeerId::from("10") < PeerId::from("9"));
    }
}
