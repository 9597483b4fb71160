//! Direct UDP peer links negotiated over signaling
//!
//! Each peer binds one non-blocking UDP socket. Link setup:
//! 1. A newcomer receives `peer-list` and sends an `offer` with its address
//!    to every listed peer.
//! 2. The peer records the address, replies with an `answer` and says `hello`.
//! 3. A link is up once any datagram arrives from the peer. Until then
//!    `hello` is repeated every keepalive, and an unanswered link is
//!    forgotten after the timeout.
//!
//! Datagrams are JSON. Delivery is best effort and unordered, which the
//! replication layer tolerates by construction.

use crate::error::{NetError, Result};
use crate::signaling::{SignalingClient, SignalingEvent};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};
use tr_core::model::PlayerId;
use tr_core::protocol::SignalServerMessage;
use tr_core::transport::{DisconnectReason, PeerTransport, TransportEvent};
use tracing::{debug, info, warn};

const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug, Clone)]
pub struct DirectConfig {
    /// Local socket address; port 0 picks a free one
    pub bind: SocketAddr,
    /// Address other peers should use to reach this socket
    pub advertise: Option<IpAddr>,
    pub keepalive: Duration,
    pub timeout: Duration,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            advertise: None,
            keepalive: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Negotiation payload carried inside signaling `signal` messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LinkSignal {
    Offer { addr: SocketAddr },
    Answer { addr: SocketAddr },
    Candidate { addr: SocketAddr },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Datagram {
    Hello { from: PlayerId },
    Ping { from: PlayerId },
    Data { from: PlayerId, payload: String },
    Bye { from: PlayerId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Negotiating,
    Connected,
}

#[derive(Debug)]
struct Link {
    addr: Option<SocketAddr>,
    state: LinkState,
    last_heard: Instant,
    last_sent: Instant,
}

impl Link {
    fn new(now: Instant) -> Self {
        Self {
            addr: None,
            state: LinkState::Negotiating,
            last_heard: now,
            last_sent: now,
        }
    }
}

pub struct DirectTransport {
    local_id: PlayerId,
    socket: UdpSocket,
    advertised: SocketAddr,
    signaling: SignalingClient,
    links: BTreeMap<PlayerId, Link>,
    config: DirectConfig,
    events: Vec<TransportEvent>,
    open: bool,
}

impl DirectTransport {
    /// Join `room_id` on the relay at `signaling_addr` and start negotiating
    pub async fn connect(
        signaling_addr: &str,
        room_id: &str,
        local_id: &str,
        config: DirectConfig,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(config.bind)?;
        socket.set_nonblocking(true)?;

        let local = socket.local_addr()?;
        let ip = match config.advertise {
            Some(ip) => ip,
            None if local.ip().is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            None => local.ip(),
        };
        let advertised = SocketAddr::new(ip, local.port());

        let signaling = SignalingClient::connect(signaling_addr, room_id, local_id).await?;
        info!("Direct transport for {} listening on {}", local_id, advertised);

        Ok(Self {
            local_id: local_id.to_string(),
            socket,
            advertised,
            signaling,
            links: BTreeMap::new(),
            config,
            events: Vec::new(),
            open: true,
        })
    }

    pub fn advertised_addr(&self) -> SocketAddr {
        self.advertised
    }

    /// Peers known from signaling whose link is not up yet
    pub fn pending(&self) -> Vec<PlayerId> {
        self.links
            .iter()
            .filter(|(_, l)| l.state == LinkState::Negotiating)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn send_datagram(&self, addr: SocketAddr, datagram: &Datagram) -> Result<()> {
        let bytes = serde_json::to_vec(datagram)?;
        match self.socket.send_to(&bytes, addr) {
            Ok(_) => Ok(()),
            // Full socket buffer: the datagram is lost like any other
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn say_hello(&mut self, peer: &str) {
        let Some(addr) = self.links.get(peer).and_then(|l| l.addr) else {
            return;
        };
        let hello = Datagram::Hello {
            from: self.local_id.clone(),
        };
        if let Err(e) = self.send_datagram(addr, &hello) {
            warn!("Failed to greet {} at {}: {}", peer, addr, e);
        }
        if let Some(link) = self.links.get_mut(peer) {
            link.last_sent = Instant::now();
        }
    }

    fn send_signal(&self, peer: &str, signal: LinkSignal) {
        let value = match serde_json::to_value(&signal) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to encode link signal: {}", e);
                return;
            }
        };
        if let Err(e) = self.signaling.signal(peer, value) {
            warn!("Failed to signal {}: {}", peer, e);
        }
    }

    fn drop_link(&mut self, peer: &str, reason: DisconnectReason) {
        if let Some(link) = self.links.remove(peer) {
            if link.state == LinkState::Connected {
                info!("Peer {} disconnected ({})", peer, reason);
                self.events.push(TransportEvent::Disconnected {
                    peer: peer.to_string(),
                    reason,
                });
            }
        }
    }

    fn handle_signaling(&mut self, message: SignalServerMessage) {
        let now = Instant::now();
        match message {
            SignalServerMessage::PeerList { peers } => {
                for peer in peers {
                    self.links.entry(peer.clone()).or_insert_with(|| Link::new(now));
                    self.send_signal(&peer, LinkSignal::Offer { addr: self.advertised });
                }
            }
            SignalServerMessage::PlayerJoined { player_id } => {
                debug!("Peer {} joined the room, awaiting offer", player_id);
                self.links.entry(player_id).or_insert_with(|| Link::new(now));
            }
            SignalServerMessage::PlayerLeft { player_id } => {
                self.drop_link(&player_id, DisconnectReason::Left);
            }
            SignalServerMessage::Signal { from, signal } => {
                let signal: LinkSignal = match serde_json::from_value(signal) {
                    Ok(signal) => signal,
                    Err(e) => {
                        debug!("Ignoring unrecognised signal from {}: {}", from, e);
                        return;
                    }
                };
                let (addr, reply) = match signal {
                    LinkSignal::Offer { addr } => (addr, true),
                    LinkSignal::Answer { addr } | LinkSignal::Candidate { addr } => (addr, false),
                };
                let link = self.links.entry(from.clone()).or_insert_with(|| Link::new(now));
                link.addr = Some(addr);
                link.last_heard = now;
                if reply {
                    self.send_signal(&from, LinkSignal::Answer { addr: self.advertised });
                }
                self.say_hello(&from);
            }
        }
    }

    fn handle_datagram(&mut self, src: SocketAddr, bytes: &[u8]) {
        let datagram: Datagram = match serde_json::from_slice(bytes) {
            Ok(d) => d,
            Err(e) => {
                debug!("Dropping malformed datagram from {}: {}", src, e);
                return;
            }
        };
        let from = match &datagram {
            Datagram::Hello { from }
            | Datagram::Ping { from }
            | Datagram::Data { from, .. }
            | Datagram::Bye { from } => from.clone(),
        };

        let Some(link) = self.links.get_mut(&from) else {
            debug!("Datagram from unknown peer {} at {}", from, src);
            return;
        };
        link.last_heard = Instant::now();
        link.addr = Some(src);

        // Any datagram from a negotiating peer proves the path
        if link.state == LinkState::Negotiating && !matches!(datagram, Datagram::Bye { .. }) {
            link.state = LinkState::Connected;
            info!("Link to {} established at {}", from, src);
            self.events.push(TransportEvent::Connected(from.clone()));
            self.say_hello(&from);
        }

        match datagram {
            Datagram::Hello { .. } | Datagram::Ping { .. } => {}
            Datagram::Data { payload, .. } => self.events.push(TransportEvent::Message { from, payload }),
            Datagram::Bye { .. } => self.drop_link(&from, DisconnectReason::Left),
        }
    }

    fn drain_socket(&mut self) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, src)) => self.handle_datagram(src, &buf[..len]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                // Windows reports ICMP port-unreachable as a reset on the next read
                Err(e) if e.kind() == ErrorKind::ConnectionReset => continue,
                Err(e) => {
                    warn!("UDP receive error: {}", e);
                    break;
                }
            }
        }
    }

    fn maintain_links(&mut self) {
        let now = Instant::now();
        let timed_out: Vec<PlayerId> = self
            .links
            .iter()
            .filter(|(_, l)| now.duration_since(l.last_heard) > self.config.timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for peer in timed_out {
            if self.links.get(&peer).is_some_and(|l| l.state == LinkState::Negotiating) {
                debug!("Giving up on unanswered link to {}", peer);
            }
            self.drop_link(&peer, DisconnectReason::Timeout);
        }

        let unanswered: Vec<PlayerId> = self
            .links
            .iter()
            .filter(|(_, l)| {
                l.state == LinkState::Negotiating
                    && l.addr.is_some()
                    && now.duration_since(l.last_sent) >= self.config.keepalive
            })
            .map(|(id, _)| id.clone())
            .collect();
        for peer in unanswered {
            self.say_hello(&peer);
        }

        let ping = Datagram::Ping {
            from: self.local_id.clone(),
        };
        let due: Vec<(PlayerId, SocketAddr)> = self
            .links
            .iter()
            .filter(|(_, l)| l.state == LinkState::Connected && now.duration_since(l.last_sent) >= self.config.keepalive)
            .filter_map(|(id, l)| l.addr.map(|a| (id.clone(), a)))
            .collect();
        for (peer, addr) in due {
            if let Err(e) = self.send_datagram(addr, &ping) {
                debug!("Keepalive to {} failed: {}", peer, e);
            }
            if let Some(link) = self.links.get_mut(&peer) {
                link.last_sent = now;
            }
        }
    }

    fn connected_addr(&self, peer: &str) -> Result<SocketAddr> {
        self.links
            .get(peer)
            .filter(|l| l.state == LinkState::Connected)
            .and_then(|l| l.addr)
            .ok_or_else(|| NetError::UnknownPeer(peer.to_string()))
    }
}

impl PeerTransport for DirectTransport {
    fn name(&self) -> &str {
        "direct"
    }

    fn local_id(&self) -> &str {
        &self.local_id
    }

    fn peers(&self) -> Vec<PlayerId> {
        self.links
            .iter()
            .filter(|(_, l)| l.state == LinkState::Connected)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn send(&mut self, peer: &str, payload: &str) -> anyhow::Result<()> {
        if !self.open {
            return Err(NetError::Closed.into());
        }
        let addr = self.connected_addr(peer)?;
        let data = Datagram::Data {
            from: self.local_id.clone(),
            payload: payload.to_string(),
        };
        self.send_datagram(addr, &data)?;
        if let Some(link) = self.links.get_mut(peer) {
            link.last_sent = Instant::now();
        }
        Ok(())
    }

    fn broadcast(&mut self, payload: &str) -> anyhow::Result<()> {
        for peer in self.peers() {
            if let Err(e) = self.send(&peer, payload) {
                warn!("Broadcast to {} failed: {}", peer, e);
            }
        }
        Ok(())
    }

    fn poll(&mut self) -> anyhow::Result<Vec<TransportEvent>> {
        if !self.open {
            return Ok(Vec::new());
        }

        while let Some(event) = self.signaling.try_recv() {
            match event {
                SignalingEvent::Message(message) => self.handle_signaling(message),
                SignalingEvent::Closed => {
                    // Established links keep working without the relay
                    warn!("Signaling relay connection lost; no new peers can join");
                }
            }
        }

        self.drain_socket();
        self.maintain_links();
        Ok(std::mem::take(&mut self.events))
    }

    fn close(&mut self) -> anyhow::Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        let bye = Datagram::Bye {
            from: self.local_id.clone(),
        };
        for (peer, link) in &self.links {
            if let (LinkState::Connected, Some(addr)) = (link.state, link.addr) {
                if let Err(e) = self.send_datagram(addr, &bye) {
                    debug!("Failed to say bye to {}: {}", peer, e);
                }
            }
        }
        self.links.clear();
        self.signaling.close();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for DirectTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
