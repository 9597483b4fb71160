//! Signaling relay routes
//!
//! `GET /?room=<id>&player=<id>` upgrades to a WebSocket and joins the room.
//! The relay only introduces peers and forwards opaque `signal` payloads;
//! gameplay traffic never passes through it.

use crate::state::RelayState;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tr_core::model::is_valid_id;
use tr_core::protocol::SignalClientMessage;
use tracing::{debug, warn};

/// Create the relay router
pub fn create_router(state: RelayState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// === Health ===

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub rooms: usize,
    pub total_players: usize,
}

async fn health(State(state): State<RelayState>) -> Json<HealthResponse> {
    let (rooms, total_players) = state.health().await;
    Json(HealthResponse {
        status: "ok".to_string(),
        rooms,
        total_players,
    })
}

// === WebSocket ===

#[derive(Debug, Deserialize)]
struct JoinQuery {
    room: Option<String>,
    player: Option<String>,
}

async fn ws_handler(ws: WebSocketUpgrade, Query(query): Query<JoinQuery>, State(state): State<RelayState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, query, state))
}

async fn handle_socket(mut socket: WebSocket, query: JoinQuery, state: RelayState) {
    let (room_id, player_id) = match (query.room, query.player) {
        (Some(room), Some(player)) if is_valid_id(&room) && is_valid_id(&player) => (room, player),
        _ => {
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: Cow::Borrowed("Missing room or player ID"),
                })))
                .await;
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Writer: everything destined for this socket goes through the channel
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let conn_id = state.join(&room_id, &player_id, tx).await;

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match SignalClientMessage::decode(&text) {
                Ok(SignalClientMessage::Signal { to, signal }) => {
                    state.relay(&room_id, &player_id, &to, signal).await;
                }
                Err(e) => debug!("Failed to parse message from {}: {}", player_id, e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket error for player {}: {}", player_id, e);
                break;
            }
        }
    }

    state.leave(&room_id, &player_id, conn_id).await;
}
