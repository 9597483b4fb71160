//! Signaling client
//!
//! Connects to the rendezvous relay over WebSocket. The socket is split into
//! a reader task and a writer task; the owner talks to both through
//! unbounded channels, so `send` and `try_recv` never block.

use crate::error::{NetError, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tr_core::model::{validate_id, PlayerId};
use tr_core::protocol::{SignalClientMessage, SignalServerMessage};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    Message(SignalServerMessage),
    /// The relay went away; no further events follow
    Closed,
}

/// Build the relay URL for a (room, player) pair
pub fn signaling_url(addr: &str, room_id: &str, player_id: &str) -> Result<String> {
    validate_id(room_id)?;
    validate_id(player_id)?;
    let sep = if addr.contains('?') { '&' } else { '?' };
    Ok(format!("{addr}{sep}room={room_id}&player={player_id}"))
}

pub struct SignalingClient {
    local_id: PlayerId,
    outbound: Option<mpsc::UnboundedSender<SignalClientMessage>>,
    inbound: mpsc::UnboundedReceiver<SignalingEvent>,
    reader: JoinHandle<()>,
    closed: bool,
}

impl SignalingClient {
    pub async fn connect(addr: &str, room_id: &str, player_id: &str) -> Result<Self> {
        let url = signaling_url(addr, room_id, player_id)?;
        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        info!("Connected to signaling relay {} as {}", addr, player_id);

        let (mut ws_tx, mut ws_rx) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<SignalClientMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let text = match msg.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode signal: {}", e);
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_tx.send(Message::Close(None)).await;
            let _ = ws_tx.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_rx.next().await {
                match frame {
                    Ok(Message::Text(text)) => match SignalServerMessage::decode(&text) {
                        Ok(msg) => {
                            if in_tx.send(SignalingEvent::Message(msg)).is_err() {
                                return;
                            }
                        }
                        Err(e) => debug!("Dropping malformed signaling message: {}", e),
                    },
                    Ok(Message::Close(frame)) => {
                        debug!("Signaling relay closed: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Signaling socket error: {}", e);
                        break;
                    }
                }
            }
            let _ = in_tx.send(SignalingEvent::Closed);
        });

        Ok(Self {
            local_id: player_id.to_string(),
            outbound: Some(out_tx),
            inbound: in_rx,
            reader,
            closed: false,
        })
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Queue a negotiation payload for `to`
    pub fn signal(&self, to: &str, signal: serde_json::Value) -> Result<()> {
        let outbound = self.outbound.as_ref().ok_or(NetError::Closed)?;
        outbound
            .send(SignalClientMessage::Signal {
                to: to.to_string(),
                signal,
            })
            .map_err(|_| NetError::Signaling("writer task has stopped".to_string()))
    }

    /// Next event, if one is ready
    pub fn try_recv(&mut self) -> Option<SignalingEvent> {
        if self.closed {
            return None;
        }
        match self.inbound.try_recv() {
            Ok(SignalingEvent::Closed) => {
                self.closed = true;
                Some(SignalingEvent::Closed)
            }
            Ok(event) => Some(event),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                self.closed = true;
                Some(SignalingEvent::Closed)
            }
        }
    }

    /// Wait for the next event
    pub async fn recv(&mut self) -> Option<SignalingEvent> {
        if self.closed {
            return None;
        }
        let event = self.inbound.recv().await.unwrap_or(SignalingEvent::Closed);
        if event == SignalingEvent::Closed {
            self.closed = true;
        }
        Some(event)
    }

    /// Close the relay connection. The writer sends a close frame on its way out.
    pub fn close(&mut self) {
        self.outbound = None;
        self.reader.abort();
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.close();
    }
}
