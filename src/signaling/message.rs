//! Wire envelopes exchanged over the signaling channel
//!
//! Every envelope is a flat JSON object with a `type` tag. Negotiation
//! payloads (`offer`, `answer`, `ice`) are opaque to the relay and carried
//! as raw JSON values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::SignalingError;

/// Signaling envelope, one variant per `type` tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Envelope {
    // Client -> Server
    Register {
        id: String,
        #[serde(rename = "bubbleId", alias = "roomId")]
        room_id: String,
    },
    Leave {
        id: String,
    },

    // Server -> Client
    UserList {
        users: Vec<String>,
    },
    UserJoined {
        id: String,
    },
    UserLeft {
        id: String,
    },

    // Relayed between peers of the same room
    Offer {
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        offer: Value,
    },
    Answer {
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        answer: Value,
    },
    Ice {
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        ice: Value,
    },

    /// Any `type` tag this build does not know about
    #[serde(other)]
    Unknown,
}

impl Envelope {
    /// Decode an envelope from a JSON text frame
    pub fn parse(text: &str) -> Result<Self, SignalingError> {
        serde_json::from_str(text).map_err(|e| SignalingError::Protocol(e.to_string()))
    }

    /// Encode this envelope as a JSON text frame
    pub fn to_json(&self) -> Result<String, SignalingError> {
        serde_json::to_string(self).map_err(|e| SignalingError::Protocol(e.to_string()))
    }

    /// The wire `type` tag, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Leave { .. } => "leave",
            Self::UserList { .. } => "user-list",
            Self::UserJoined { .. } => "user-joined",
            Self::UserLeft { .. } => "user-left",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Ice { .. } => "ice",
            Self::Unknown => "unknown",
        }
    }

    /// Target peer of a relayed envelope
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Offer { to, .. } | Self::Answer { to, .. } | Self::Ice { to, .. } => Some(to),
            _ => None,
        }
    }

    /// Sender stamped by the relay on a relayed envelope
    pub fn sender(&self) -> Option<&str> {
        match self {
            Self::Offer { from, .. } | Self::Answer { from, .. } | Self::Ice { from, .. } => {
                from.as_deref()
            }
            _ => None,
        }
    }

    /// Overwrite the `from` field of a relayed envelope.
    ///
    /// Envelopes that are not relayed are returned unchanged.
    pub fn with_sender(mut self, sender: &str) -> Self {
        match &mut self {
            Self::Offer { from, .. } | Self::Answer { from, .. } | Self::Ice { from, .. } => {
                *from = Some(sender.to_string());
            }
            _ => {}
        }
        self
    }
}
