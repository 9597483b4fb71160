//! Signaling relay state

use crate::config::ServerConfig;
use axum::extract::ws::{close_code, CloseFrame, Message};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};
use tr_core::model::PlayerId;
use tr_core::protocol::SignalServerMessage;
use tracing::{debug, info, warn};

/// Outbound queue of one connected socket
#[derive(Debug, Clone)]
pub struct PeerHandle {
    conn_id: u64,
    tx: mpsc::UnboundedSender<Message>,
}

impl PeerHandle {
    fn send(&self, message: &SignalServerMessage) {
        match message.encode() {
            Ok(text) => {
                // The writer task is gone once the socket closes; nothing to do then
                let _ = self.tx.send(Message::Text(text));
            }
            Err(e) => warn!("Failed to encode signaling message: {}", e),
        }
    }

    fn close(&self, reason: &'static str) {
        let _ = self.tx.send(Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: Cow::Borrowed(reason),
        })));
    }
}

#[derive(Debug)]
struct RoomEntry {
    peers: BTreeMap<PlayerId, PeerHandle>,
    host_id: PlayerId,
    created_at: Instant,
    /// Set when the last peer leaves
    emptied_at: Option<Instant>,
}

impl RoomEntry {
    fn announce(&self, except: &str, message: &SignalServerMessage) {
        for (id, peer) in &self.peers {
            if id != except {
                peer.send(message);
            }
        }
    }
}

/// Shared relay state
#[derive(Clone)]
pub struct RelayState {
    rooms: Arc<RwLock<HashMap<String, RoomEntry>>>,
    next_conn: Arc<AtomicU64>,
    pub config: Arc<ServerConfig>,
}

impl RelayState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            next_conn: Arc::new(AtomicU64::new(1)),
            config: Arc::new(config),
        }
    }

    /// Register a socket. Returns the connection id to hand back to `leave`.
    pub async fn join(&self, room_id: &str, player_id: &str, tx: mpsc::UnboundedSender<Message>) -> u64 {
        let conn_id = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let handle = PeerHandle { conn_id, tx };

        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(room_id.to_string()).or_insert_with(|| {
            info!("Created room: {}", room_id);
            RoomEntry {
                peers: BTreeMap::new(),
                host_id: player_id.to_string(),
                created_at: Instant::now(),
                emptied_at: None,
            }
        });
        room.emptied_at = None;
        if room.peers.is_empty() {
            room.host_id = player_id.to_string();
        }

        if let Some(previous) = room.peers.remove(player_id) {
            info!("Player {} reconnected to room {}, dropping older socket", player_id, room_id);
            previous.close("Replaced by a newer connection");
            room.announce(
                player_id,
                &SignalServerMessage::PlayerLeft {
                    player_id: player_id.to_string(),
                },
            );
        }

        handle.send(&SignalServerMessage::PeerList {
            peers: room.peers.keys().cloned().collect(),
        });
        room.announce(
            player_id,
            &SignalServerMessage::PlayerJoined {
                player_id: player_id.to_string(),
            },
        );
        room.peers.insert(player_id.to_string(), handle);
        info!("Player {} joined room {} ({} present)", player_id, room_id, room.peers.len());
        conn_id
    }

    /// Unregister a socket. A stale connection id (replaced socket) is ignored.
    pub async fn leave(&self, room_id: &str, player_id: &str, conn_id: u64) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(room_id) else {
            return false;
        };
        match room.peers.get(player_id) {
            Some(peer) if peer.conn_id == conn_id => {}
            _ => return false,
        }
        room.peers.remove(player_id);
        info!("Player {} left room {}", player_id, room_id);

        room.announce(
            player_id,
            &SignalServerMessage::PlayerLeft {
                player_id: player_id.to_string(),
            },
        );

        if room.host_id == player_id {
            if let Some(next) = room.peers.keys().next() {
                room.host_id = next.clone();
            }
        }
        if room.peers.is_empty() {
            room.emptied_at = Some(Instant::now());
            debug!("Room {} is empty", room_id);
        }
        true
    }

    /// Forward a negotiation payload. Returns false when `to` is not in the room.
    pub async fn relay(&self, room_id: &str, from: &str, to: &str, signal: serde_json::Value) -> bool {
        let rooms = self.rooms.read().await;
        let Some(target) = rooms.get(room_id).and_then(|room| room.peers.get(to)) else {
            debug!("Dropping signal from {} to unknown peer {}", from, to);
            return false;
        };
        target.send(&SignalServerMessage::Signal {
            from: from.to_string(),
            signal,
        });
        true
    }

    /// (rooms, connected players)
    pub async fn health(&self) -> (usize, usize) {
        let rooms = self.rooms.read().await;
        let players = rooms.values().map(|room| room.peers.len()).sum();
        (rooms.len(), players)
    }

    pub async fn host_of(&self, room_id: &str) -> Option<PlayerId> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).map(|room| room.host_id.clone())
    }

    /// Delete rooms that have stayed empty past the retention window
    pub async fn sweep(&self, now: Instant) -> usize {
        let retention = self.config.room_retention;
        let mut rooms = self.rooms.write().await;
        let before = rooms.len();
        rooms.retain(|room_id, room| {
            let expired = room.peers.is_empty()
                && room
                    .emptied_at
                    .map(|emptied| now.saturating_duration_since(emptied) >= retention)
                    .unwrap_or(false);
            if expired {
                info!(
                    "Cleaned up room {} (open for {:?})",
                    room_id,
                    now.saturating_duration_since(room.created_at)
                );
            }
            !expired
        });
        before - rooms.len()
    }
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<SignalServerMessage> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let Message::Text(text) = message {
                out.push(SignalServerMessage::decode(&text).unwrap());
            }
        }
        out
    }

    #[tokio::test]
    async fn test_join_sends_peer_list_and_announces() {
        let state = RelayState::default();
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();

        state.join("r1", "alice", a_tx).await;
        state.join("r1", "bob", b_tx).await;

        assert_eq!(
            drain(&mut a_rx),
            vec![
                SignalServerMessage::PeerList { peers: vec![] },
                SignalServerMessage::PlayerJoined {
                    player_id: "bob".into()
                },
            ]
        );
        assert_eq!(
            drain(&mut b_rx),
            vec![SignalServerMessage::PeerList {
                peers: vec!["alice".into()]
            }]
        );
        assert_eq!(state.health().await, (1, 2));
        assert_eq!(state.host_of("r1").await.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_stale_leave_is_ignored() {
        let state = RelayState::default();
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let (new_tx, _new_rx) = mpsc::unbounded_channel();

        let old = state.join("r1", "alice", old_tx).await;
        let new = state.join("r1", "alice", new_tx).await;
        assert_ne!(old, new);

        let closed = std::iter::from_fn(|| old_rx.try_recv().ok()).any(|m| matches!(m, Message::Close(_)));
        assert!(closed);

        assert!(!state.leave("r1", "alice", old).await);
        assert_eq!(state.health().await, (1, 1));
        assert!(state.leave("r1", "alice", new).await);
        assert_eq!(state.health().await, (1, 0));
    }

    #[tokio::test]
    async fn test_host_passes_to_lowest_remaining() {
        let state = RelayState::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let alice = state.join("r1", "alice", tx.clone()).await;
        state.join("r1", "carol", tx.clone()).await;
        state.join("r1", "bob", tx).await;

        state.leave("r1", "alice", alice).await;
        assert_eq!(state.host_of("r1").await.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_relay_to_unknown_peer() {
        let state = RelayState::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.join("r1", "alice", tx).await;
        drain(&mut rx);

        assert!(!state.relay("r1", "alice", "nobody", serde_json::json!({})).await);
        assert!(state.relay("r1", "alice", "alice", serde_json::json!({"kind": "offer"})).await);
        assert_eq!(
            drain(&mut rx),
            vec![SignalServerMessage::Signal {
                from: "alice".into(),
                signal: serde_json::json!({"kind": "offer"}),
            }]
        );
    }

    #[tokio::test]
    async fn test_sweep_respects_retention() {
        let state = RelayState::new(ServerConfig {
            room_retention: Duration::from_secs(60),
            ..ServerConfig::default()
        });
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = state.join("r1", "alice", tx.clone()).await;
        state.join("r2", "bob", tx).await;
        state.leave("r1", "alice", conn).await;

        let now = Instant::now();
        assert_eq!(state.sweep(now).await, 0);
        assert_eq!(state.sweep(now + Duration::from_secs(61)).await, 1);
        // Occupied rooms are never reclaimed
        assert_eq!(state.health().await, (1, 1));
    }
}
