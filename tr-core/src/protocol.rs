//! Wire protocol
//!
//! Gameplay messages travel peer-to-peer as JSON text with a `type` tag.
//! Signaling messages travel over the rendezvous WebSocket only.
//! Decoding is exhaustive: anything that does not match a known variant is
//! an error for the receiver to drop.

use crate::error::Result;
use crate::model::{PlayerId, StateSnapshot, TractorConfig};
use serde::{Deserialize, Serialize};

// =============================================================================
// Gameplay envelope
// =============================================================================

/// One throttle sample from a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputMessage {
    pub player_id: PlayerId,
    pub throttle: f64,
    pub sequence: u64,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinMessage {
    pub player_id: PlayerId,
    #[serde(default)]
    pub username: Option<String>,
    pub tractor_config: TractorConfig,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveMessage {
    pub player_id: PlayerId,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub player_id: PlayerId,
    pub message: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GameMessage {
    Input(InputMessage),
    State(StateSnapshot),
    Join(JoinMessage),
    Leave(LeaveMessage),
    Chat(ChatMessage),
}

impl GameMessage {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn timestamp(&self) -> f64 {
        match self {
            GameMessage::Input(m) => m.timestamp,
            GameMessage::State(m) => m.timestamp,
            GameMessage::Join(m) => m.timestamp,
            GameMessage::Leave(m) => m.timestamp,
            GameMessage::Chat(m) => m.timestamp,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GameMessage::Input(_) => "input",
            GameMessage::State(_) => "state",
            GameMessage::Join(_) => "join",
            GameMessage::Leave(_) => "leave",
            GameMessage::Chat(_) => "chat",
        }
    }
}

// =============================================================================
// Signaling
// =============================================================================

/// Relay → peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalServerMessage {
    /// Existing peers, sent once on join
    PeerList { peers: Vec<PlayerId> },
    PlayerJoined {
        #[serde(rename = "playerId")]
        player_id: PlayerId,
    },
    PlayerLeft {
        #[serde(rename = "playerId")]
        player_id: PlayerId,
    },
    /// Opaque negotiation payload relayed from another peer
    Signal {
        from: PlayerId,
        signal: serde_json::Value,
    },
}

/// Peer → relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalClientMessage {
    Signal {
        to: PlayerId,
        signal: serde_json::Value,
    },
}

impl SignalServerMessage {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl SignalClientMessage {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
