//! Peer transport trait definition

use crate::model::PlayerId;
use anyhow::Result;
use std::fmt;

/// Why a peer link went away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// We closed the link
    Closed,
    /// The peer left (signaling `player-left` or orderly shutdown)
    Left,
    /// Nothing heard from the peer within the timeout
    Timeout,
    /// Transport failure
    Error(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Closed => write!(f, "closed"),
            DisconnectReason::Left => write!(f, "left"),
            DisconnectReason::Timeout => write!(f, "timed out"),
            DisconnectReason::Error(e) => write!(f, "error: {}", e),
        }
    }
}

/// Something that happened on the transport since the last poll
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected(PlayerId),
    Message { from: PlayerId, payload: String },
    Disconnected { peer: PlayerId, reason: DisconnectReason },
}

/// Trait for peer-to-peer gameplay transports
///
/// A transport is responsible for:
/// - Establishing direct links to the other peers of a room
/// - Moving opaque text payloads between peers (best effort, possibly unordered)
/// - Reporting link changes as events instead of callbacks
pub trait PeerTransport: Send {
    /// Get the name of this transport (e.g., "mesh", "direct")
    fn name(&self) -> &str;

    /// Id of the local peer
    fn local_id(&self) -> &str;

    /// Peers with an established link
    fn peers(&self) -> Vec<PlayerId>;

    /// Send a payload to one connected peer
    fn send(&mut self, peer: &str, payload: &str) -> Result<()>;

    /// Send a payload to every connected peer
    fn broadcast(&mut self, payload: &str) -> Result<()>;

    /// Drain everything that happened since the last call
    ///
    /// This must never block. An empty vector means nothing new.
    fn poll(&mut self) -> Result<Vec<TransportEvent>>;

    /// Tear down every link. Calling it twice is harmless.
    fn close(&mut self) -> Result<()>;

    /// Get whether the transport is still usable
    fn is_open(&self) -> bool;
}
