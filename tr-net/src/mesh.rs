//! In-process peer mesh
//!
//! Every peer of a `LocalMesh` gets a `MeshTransport` backed by a shared
//! inbox table. Optional packet loss and reordering are driven by a seeded
//! RNG so lossy runs are reproducible.

use crate::error::{NetError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tr_core::model::{validate_id, PlayerId};
use tr_core::transport::{DisconnectReason, PeerTransport, TransportEvent};

#[derive(Debug, Clone, Copy)]
pub struct MeshConfig {
    /// Probability that a message is dropped
    pub loss: f64,
    /// Probability that a message overtakes the one queued before it
    pub reorder: f64,
    pub seed: u64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            loss: 0.0,
            reorder: 0.0,
            seed: 0,
        }
    }
}

#[derive(Debug)]
struct Hub {
    inboxes: BTreeMap<PlayerId, VecDeque<TransportEvent>>,
    config: MeshConfig,
    rng: StdRng,
    delivered: u64,
    dropped: u64,
}

impl Hub {
    fn deliver(&mut self, from: &str, to: &str, payload: &str) -> Result<()> {
        if !self.inboxes.contains_key(to) {
            return Err(NetError::UnknownPeer(to.to_string()));
        }
        if self.config.loss > 0.0 && self.rng.random::<f64>() < self.config.loss {
            self.dropped += 1;
            return Ok(());
        }
        let reorder = self.config.reorder > 0.0 && self.rng.random::<f64>() < self.config.reorder;

        let Some(inbox) = self.inboxes.get_mut(to) else {
            return Err(NetError::UnknownPeer(to.to_string()));
        };
        let event = TransportEvent::Message {
            from: from.to_string(),
            payload: payload.to_string(),
        };
        let overtakes = reorder && matches!(inbox.back(), Some(TransportEvent::Message { .. }));
        if overtakes {
            let at = inbox.len() - 1;
            inbox.insert(at, event);
        } else {
            inbox.push_back(event);
        }
        self.delivered += 1;
        Ok(())
    }
}

/// Shared hub; clone it to hand out to more peers
#[derive(Debug, Clone)]
pub struct LocalMesh {
    hub: Arc<Mutex<Hub>>,
}

impl Default for LocalMesh {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(hub: &Mutex<Hub>) -> Result<MutexGuard<'_, Hub>> {
    hub.lock().map_err(|_| NetError::Poisoned)
}

impl LocalMesh {
    pub fn new() -> Self {
        Self::with_config(MeshConfig::default())
    }

    pub fn with_config(config: MeshConfig) -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub {
                inboxes: BTreeMap::new(),
                rng: StdRng::seed_from_u64(config.seed),
                config,
                delivered: 0,
                dropped: 0,
            })),
        }
    }

    /// Attach a new peer. Everyone already present sees `Connected`.
    pub fn join(&self, id: &str) -> Result<MeshTransport> {
        validate_id(id)?;
        let mut hub = lock(&self.hub)?;
        if hub.inboxes.contains_key(id) {
            return Err(NetError::DuplicatePeer(id.to_string()));
        }

        let mut inbox = VecDeque::new();
        for (peer, peer_inbox) in hub.inboxes.iter_mut() {
            peer_inbox.push_back(TransportEvent::Connected(id.to_string()));
            inbox.push_back(TransportEvent::Connected(peer.clone()));
        }
        hub.inboxes.insert(id.to_string(), inbox);

        Ok(MeshTransport {
            id: id.to_string(),
            hub: self.hub.clone(),
            open: true,
        })
    }

    /// (delivered, dropped) message counts
    pub fn stats(&self) -> Result<(u64, u64)> {
        let hub = lock(&self.hub)?;
        Ok((hub.delivered, hub.dropped))
    }
}

#[derive(Debug)]
pub struct MeshTransport {
    id: PlayerId,
    hub: Arc<Mutex<Hub>>,
    open: bool,
}

impl MeshTransport {
    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(NetError::Closed)
        }
    }
}

impl PeerTransport for MeshTransport {
    fn name(&self) -> &str {
        "mesh"
    }

    fn local_id(&self) -> &str {
        &self.id
    }

    fn peers(&self) -> Vec<PlayerId> {
        if !self.open {
            return Vec::new();
        }
        match lock(&self.hub) {
            Ok(hub) => hub.inboxes.keys().filter(|p| **p != self.id).cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn send(&mut self, peer: &str, payload: &str) -> anyhow::Result<()> {
        self.ensure_open()?;
        let mut hub = lock(&self.hub)?;
        hub.deliver(&self.id, peer, payload)?;
        Ok(())
    }

    fn broadcast(&mut self, payload: &str) -> anyhow::Result<()> {
        self.ensure_open()?;
        let mut hub = lock(&self.hub)?;
        let peers: Vec<PlayerId> = hub.inboxes.keys().filter(|p| **p != self.id).cloned().collect();
        for peer in peers {
            hub.deliver(&self.id, &peer, payload)?;
        }
        Ok(())
    }

    fn poll(&mut self) -> anyhow::Result<Vec<TransportEvent>> {
        if !self.open {
            return Ok(Vec::new());
        }
        let mut hub = lock(&self.hub)?;
        let events = match hub.inboxes.get_mut(&self.id) {
            Some(inbox) => inbox.drain(..).collect(),
            None => Vec::new(),
        };
        Ok(events)
    }

    fn close(&mut self) -> anyhow::Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let mut hub = lock(&self.hub)?;
        hub.inboxes.remove(&self.id);
        for inbox in hub.inboxes.values_mut() {
            inbox.push_back(TransportEvent::Disconnected {
                peer: self.id.clone(),
                reason: DisconnectReason::Left,
            });
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for MeshTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
