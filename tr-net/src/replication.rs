//! Replication manager
//!
//! Message framing plus the prediction/reconciliation protocol on top of any
//! `PeerTransport`.
//!
//! Client side: every fixed tick the local throttle is sent with a fresh
//! sequence number and remembered in a bounded history. When a host snapshot
//! arrives the local model is rebased onto it and every input the host has
//! not yet acknowledged is replayed. Replay is a pure function of baseline
//! plus buffered inputs, so late, duplicate or reordered snapshots are safe.
//!
//! Host side: the newest input per peer is kept (last value wins) and a
//! snapshot with a strictly increasing tick is broadcast every tick.

use crate::history::InputHistory;
use std::collections::{BTreeMap, BTreeSet};
use tr_core::constants::FIXED_DT;
use tr_core::model::{InputSample, PlayerId, PlayerState, StateSnapshot, TractorConfig};
use tr_core::physics::PhysicsModel;
use tr_core::protocol::{ChatMessage, GameMessage, InputMessage, JoinMessage, LeaveMessage};
use tr_core::transport::{DisconnectReason, PeerTransport, TransportEvent};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Client,
}

/// Something the engine should react to
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationEvent {
    PeerJoined {
        player_id: PlayerId,
        username: Option<String>,
        tractor_config: TractorConfig,
    },
    PeerLeft {
        player_id: PlayerId,
        reason: DisconnectReason,
    },
    Snapshot(StateSnapshot),
    Chat(ChatMessage),
    /// The previous host left and `host_id` took over
    HostChanged { host_id: PlayerId },
}

/// Result of reconciling against one snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Sequence the host acknowledged for us
    pub acknowledged: u64,
    /// Number of buffered inputs replayed on top of the baseline
    pub replayed: usize,
}

#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    pub username: Option<String>,
    pub tractor_config: TractorConfig,
    pub history_capacity: usize,
    pub fixed_step: f64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        let history = InputHistory::default();
        Self {
            username: None,
            tractor_config: TractorConfig::default(),
            history_capacity: history.capacity(),
            fixed_step: FIXED_DT,
        }
    }
}

pub struct ReplicationManager {
    local_id: PlayerId,
    role: Role,
    host_id: Option<PlayerId>,
    transport: Box<dyn PeerTransport>,
    config: ReplicationConfig,

    // Client prediction
    history: InputHistory,
    sequence: u64,

    // Host authority
    tick: u64,
    latest_inputs: BTreeMap<PlayerId, InputMessage>,

    /// Remote peers currently present
    members: BTreeSet<PlayerId>,
    closed: bool,
}

impl ReplicationManager {
    pub fn new(transport: Box<dyn PeerTransport>, role: Role, config: ReplicationConfig) -> Self {
        let local_id = transport.local_id().to_string();
        let host_id = match role {
            Role::Host => Some(local_id.clone()),
            Role::Client => None,
        };
        info!(
            "Replication over {} transport as {} ({:?})",
            transport.name(),
            local_id,
            role
        );
        Self {
            local_id,
            role,
            host_id,
            transport,
            history: InputHistory::new(config.history_capacity),
            config,
            sequence: 0,
            tick: 0,
            latest_inputs: BTreeMap::new(),
            members: BTreeSet::new(),
            closed: false,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }

    /// Current host, once known
    pub fn host_id(&self) -> Option<&str> {
        self.host_id.as_deref()
    }

    pub fn members(&self) -> &BTreeSet<PlayerId> {
        &self.members
    }

    pub fn history(&self) -> &InputHistory {
        &self.history
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn broadcast(&mut self, message: &GameMessage) {
        if self.closed {
            return;
        }
        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode {} message: {}", message.kind(), e);
                return;
            }
        };
        if let Err(e) = self.transport.broadcast(&text) {
            warn!("Broadcast of {} failed: {}", message.kind(), e);
        }
    }

    // === Client ===

    /// Record and transmit one local input sample
    pub fn send_input(&mut self, throttle: f64, timestamp: f64) -> InputSample {
        self.sequence += 1;
        let sample = InputSample {
            sequence: self.sequence,
            throttle,
            timestamp,
        };
        self.history.push(sample);

        self.broadcast(&GameMessage::Input(InputMessage {
            player_id: self.local_id.clone(),
            throttle,
            sequence: self.sequence,
            timestamp,
        }));
        sample
    }

    /// Rebase `model` on our entry of `snapshot` and replay unacknowledged inputs
    ///
    /// Returns `None` when the snapshot does not contain the local player.
    pub fn reconcile(&mut self, snapshot: &StateSnapshot, model: &mut PhysicsModel) -> Option<ReconcileOutcome> {
        let own = snapshot.players.get(&self.local_id)?;
        let acknowledged = own.input_sequence;

        model.rebase(own);

        let replayed = match self.history.first_unacked(acknowledged) {
            None => {
                self.history.clear();
                0
            }
            Some(start) => {
                let mut count = 0;
                for sample in self.history.replay_from(start) {
                    model.update(self.config.fixed_step, sample.throttle);
                    count += 1;
                }
                self.history.trim_before(start);
                count
            }
        };

        debug!(
            "Reconciled at tick {}: ack {}, replayed {}",
            snapshot.tick, acknowledged, replayed
        );
        Some(ReconcileOutcome { acknowledged, replayed })
    }

    // === Host ===

    /// Keep `input` if it is the newest seen from its sender
    pub fn record_input(&mut self, input: InputMessage) {
        match self.latest_inputs.get(&input.player_id) {
            Some(existing) if existing.sequence >= input.sequence => {}
            _ => {
                self.latest_inputs.insert(input.player_id.clone(), input);
            }
        }
    }

    pub fn latest_inputs(&self) -> &BTreeMap<PlayerId, InputMessage> {
        &self.latest_inputs
    }

    pub fn latest_throttle(&self, player_id: &str) -> Option<f64> {
        self.latest_inputs.get(player_id).map(|i| i.throttle)
    }

    /// Highest input sequence incorporated for `player_id`
    pub fn acknowledged_sequence(&self, player_id: &str) -> u64 {
        self.latest_inputs.get(player_id).map(|i| i.sequence).unwrap_or(0)
    }

    /// Tag `players` with the next tick and send it to every peer
    pub fn broadcast_snapshot(&mut self, players: BTreeMap<PlayerId, PlayerState>, timestamp: f64) -> StateSnapshot {
        self.tick += 1;
        let snapshot = StateSnapshot {
            tick: self.tick,
            timestamp,
            players,
        };
        self.broadcast(&GameMessage::State(snapshot.clone()));
        snapshot
    }

    // === Presence / chat ===

    pub fn send_chat(&mut self, message: &str, timestamp: f64) -> ChatMessage {
        let chat = ChatMessage {
            player_id: self.local_id.clone(),
            message: message.to_string(),
            timestamp,
        };
        self.broadcast(&GameMessage::Chat(chat.clone()));
        chat
    }

    fn send_join(&mut self, peer: &str) {
        let join = GameMessage::Join(JoinMessage {
            player_id: self.local_id.clone(),
            username: self.config.username.clone(),
            tractor_config: self.config.tractor_config.clone(),
            timestamp: 0.0,
        });
        match join.encode() {
            Ok(text) => {
                if let Err(e) = self.transport.send(peer, &text) {
                    warn!("Failed to send join to {}: {}", peer, e);
                }
            }
            Err(e) => warn!("Failed to encode join: {}", e),
        }
    }

    /// Take over as host
    pub fn promote(&mut self) {
        if self.role != Role::Host {
            info!("{} is now the host", self.local_id);
        }
        self.role = Role::Host;
        self.host_id = Some(self.local_id.clone());
    }

    fn handle_departure(&mut self, peer: &str, reason: DisconnectReason, events: &mut Vec<ReplicationEvent>) {
        if !self.members.remove(peer) {
            return;
        }
        self.latest_inputs.remove(peer);
        info!("Peer {} left ({})", peer, reason);
        events.push(ReplicationEvent::PeerLeft {
            player_id: peer.to_string(),
            reason,
        });

        if self.host_id.as_deref() == Some(peer) {
            // Lowest remaining id takes over, on every peer alike
            let next = self
                .members
                .iter()
                .chain(std::iter::once(&self.local_id))
                .min()
                .cloned()
                .unwrap_or_else(|| self.local_id.clone());
            if next == self.local_id {
                self.promote();
            } else {
                info!("Host migrated to {}", next);
                self.host_id = Some(next.clone());
            }
            events.push(ReplicationEvent::HostChanged { host_id: next });
        }
    }

    fn handle_message(&mut self, from: PlayerId, payload: &str, events: &mut Vec<ReplicationEvent>) {
        let message = match GameMessage::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping malformed message from {}: {}", from, e);
                return;
            }
        };

        match message {
            GameMessage::Input(input) => {
                if !self.is_host() {
                    return;
                }
                if input.player_id != from {
                    debug!("Ignoring input for {} relayed by {}", input.player_id, from);
                    return;
                }
                self.record_input(input);
            }
            GameMessage::State(snapshot) => {
                if self.is_host() {
                    debug!("Host ignoring snapshot from {}", from);
                    return;
                }
                match &self.host_id {
                    Some(host) if *host != from => {
                        debug!("Ignoring snapshot from non-host {}", from);
                        return;
                    }
                    Some(_) => {}
                    None => {
                        info!("Host identified as {}", from);
                        self.host_id = Some(from);
                    }
                }
                events.push(ReplicationEvent::Snapshot(snapshot));
            }
            GameMessage::Join(join) => {
                self.members.insert(join.player_id.clone());
                events.push(ReplicationEvent::PeerJoined {
                    player_id: join.player_id,
                    username: join.username,
                    tractor_config: join.tractor_config,
                });
            }
            GameMessage::Leave(leave) => {
                self.handle_departure(&leave.player_id, DisconnectReason::Left, events);
            }
            GameMessage::Chat(chat) => events.push(ReplicationEvent::Chat(chat)),
        }
    }

    /// Drain the transport and translate it into replication events
    pub fn poll(&mut self) -> Vec<ReplicationEvent> {
        let mut events = Vec::new();
        if self.closed {
            return events;
        }

        let transport_events = match self.transport.poll() {
            Ok(events) => events,
            Err(e) => {
                warn!("Transport poll failed: {}", e);
                return events;
            }
        };

        for event in transport_events {
            match event {
                TransportEvent::Connected(peer) => {
                    debug!("Link to {} is up", peer);
                    self.members.insert(peer.clone());
                    self.send_join(&peer);
                }
                TransportEvent::Disconnected { peer, reason } => {
                    self.handle_departure(&peer, reason, &mut events);
                }
                TransportEvent::Message { from, payload } => {
                    self.handle_message(from, &payload, &mut events);
                }
            }
        }
        events
    }

    /// Announce departure and release the transport. Idempotent.
    pub fn disconnect(&mut self, timestamp: f64) {
        if self.closed {
            return;
        }
        self.broadcast(&GameMessage::Leave(LeaveMessage {
            player_id: self.local_id.clone(),
            timestamp,
        }));
        if let Err(e) = self.transport.close() {
            warn!("Error closing {} transport: {}", self.transport.name(), e);
        }
        self.closed = true;
        self.members.clear();
    }
}

impl Drop for ReplicationManager {
    fn drop(&mut self) {
        self.disconnect(0.0);
    }
}
