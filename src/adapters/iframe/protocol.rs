//! Wire shapes for the iframe handshake and the post-handshake message
//! frames that travel over the negotiated `MessagePort` (spec §6).
//!
//! Handshake: host sends `Syn`, client replies `Ack` on the transferred
//! port, host confirms with `AckConfirm` back over that same port. Only
//! after `AckConfirm` is the connection considered live — this third leg is
//! what stops a client from ever need to guess whether its `Ack` arrived.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HandshakeFrame {
    #[serde(rename = "pubsub-mfe:syn")]
    Syn { session_id: String, version: u32 },
    #[serde(rename = "pubsub-mfe:ack")]
    Ack {
        session_id: String,
        version: u32,
        client_id: String,
        capabilities: Vec<String>,
    },
    #[serde(rename = "pubsub-mfe:ack-confirm")]
    AckConfirm { session_id: String },
}

/// A message carried over the negotiated `MessagePort` once the handshake
/// has completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelFrame {
    #[serde(rename = "pubsub-mfe:message")]
    Message {
        message_id: String,
        topic: String,
        payload: Value,
        timestamp: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        schema_version: Option<String>,
    },
    #[serde(rename = "pubsub-mfe:disconnect")]
    Disconnect { reason: String },
    #[serde(rename = "pubsub-mfe:ping")]
    Ping,
    #[serde(rename = "pubsub-mfe:pong")]
    Pong,
}

/// Connection state for one side of a handshake, host or client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    SynSent,
    AckReceived,
    Connected,
    Failed,
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_frames_round_trip_through_json() {
        let syn = HandshakeFrame::Syn {
            session_id: "s1".into(),
            version: PROTOCOL_VERSION,
        };
        let json = serde_json::to_string(&syn).unwrap();
        assert!(json.contains("pubsub-mfe:syn"));
        let back: HandshakeFrame = serde_json::from_str(&json).unwrap();
        match back {
            HandshakeFrame::Syn { session_id, version } => {
                assert_eq!(session_id, "s1");
                assert_eq!(version, PROTOCOL_VERSION);
            }
            _ => panic!("expected Syn"),
        }
    }

    #[test]
    fn channel_message_frame_round_trips() {
        let frame = ChannelFrame::Message {
            message_id: "m1".into(),
            topic: "t".into(),
            payload: serde_json::json!({"a": 1}),
            timestamp: 42,
            schema_version: None,
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: ChannelFrame = serde_json::from_str(&json).unwrap();
        match back {
            ChannelFrame::Message { message_id, topic, .. } => {
                assert_eq!(message_id, "m1");
                assert_eq!(topic, "t");
            }
            _ => panic!("expected Message"),
        }
    }
}
