//! Client-facing duplex transport (A5): one Axum WebSocket per client
//! connection, multiplexing the `eventRequest` control frame (codes 10
//! TURN_START, 11 PAUSE, 12 RESUME, 13 TURN_END), binary audio frames
//! (raw PCM chunks), and a base64 JSON `audioStream` fallback for
//! clients that can't send native WS binary frames onto a single
//! socket, mirroring the teacher's REST-server bootstrap idiom but
//! swapping the protocol surface for a stateful duplex session.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::session::{SessionCommand, SessionManager};
use crate::stats::Stats;
use crate::types::ServerMessage;

/// `eventRequest` codes, per the external interface contract.
const EVENT_TURN_START: i64 = 10;
const EVENT_PAUSE: i64 = 11;
const EVENT_RESUME: i64 = 12;
const EVENT_TURN_END: i64 = 13;

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ClientMessage {
    #[serde(rename = "eventRequest")]
    EventRequest {
        event: i64,
        #[serde(rename = "sessionId")]
        #[allow(dead_code)]
        session_id: Option<String>,
    },
    /// Non-binary-capable clients send audio as a base64 JSON wrapper
    /// instead of a native WS binary frame; `ttsStatus` is accepted and
    /// ignored, per the external interface contract.
    #[serde(rename = "audioStream")]
    AudioStream {
        content: String,
        #[serde(rename = "ttsStatus")]
        #[allow(dead_code)]
        tts_status: Option<i64>,
    },
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stats: Arc<Stats>,
    pub sessions: Arc<SessionManager>,
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_tx, mut client_rx) = mpsc::channel::<ServerMessage>(state.config.channel_capacity);

    let sender_task = tokio::spawn(async move {
        while let Some(msg) = client_rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "failed to serialize server message");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut cmd_tx: Option<mpsc::Sender<SessionCommand>> = None;
    let mut turn_done_rx: Option<oneshot::Receiver<()>> = None;

    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "client WS read error");
                break;
            }
        };

        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::EventRequest { event: EVENT_TURN_START, .. }) => {
                    let can_start = match (&cmd_tx, turn_done_rx.as_mut()) {
                        (None, _) => true,
                        (Some(_), Some(rx)) => !matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)),
                        (Some(_), None) => false,
                    };
                    if can_start {
                        cmd_tx = None;
                        turn_done_rx = None;
                        let tx = state.sessions.start(session_id, client_tx.clone()).await;
                        let _ = tx.send(SessionCommand::StartTurn).await;
                        cmd_tx = Some(tx);
                    } else {
                        warn!(session_id = %session_id, "TURN_START received for an already-active session");
                    }
                }
                Ok(ClientMessage::EventRequest { event: EVENT_PAUSE, .. }) => {
                    debug!(session_id = %session_id, "PAUSE event accepted as a no-op");
                }
                Ok(ClientMessage::EventRequest { event: EVENT_RESUME, .. }) => {
                    debug!(session_id = %session_id, "RESUME event accepted as a no-op");
                }
                Ok(ClientMessage::EventRequest { event: EVENT_TURN_END, .. }) => {
                    if let Some(tx) = &cmd_tx {
                        let (done_tx, done_rx) = oneshot::channel();
                        let _ = tx.send(SessionCommand::TurnEnd { done: done_tx }).await;
                        turn_done_rx = Some(done_rx);
                    } else {
                        state.stats.record_protocol_error();
                        warn!(session_id = %session_id, "TURN_END received before TURN_START");
                    }
                }
                Ok(ClientMessage::EventRequest { event, .. }) => {
                    state.stats.record_protocol_error();
                    warn!(session_id = %session_id, event, "unknown eventRequest code");
                }
                Ok(ClientMessage::AudioStream { content, .. }) => {
                    if let Some(tx) = &cmd_tx {
                        match BASE64.decode(content) {
                            Ok(pcm) => {
                                if tx.send(SessionCommand::Chunk(pcm)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                state.stats.record_protocol_error();
                                warn!(session_id = %session_id, error = %e, "malformed base64 audioStream content");
                            }
                        }
                    } else {
                        state.stats.record_protocol_error();
                        warn!(session_id = %session_id, "audioStream received before eventRequest");
                    }
                }
                Err(e) => {
                    state.stats.record_protocol_error();
                    warn!(session_id = %session_id, error = %e, "malformed client control frame");
                }
            },
            Message::Binary(pcm) => {
                if let Some(tx) = &cmd_tx {
                    if tx.send(SessionCommand::Chunk(pcm)).await.is_err() {
                        break;
                    }
                } else {
                    state.stats.record_protocol_error();
                    warn!(session_id = %session_id, "audio chunk received before eventRequest");
                }
            }
            Message::Close(_) => {
                debug!(session_id = %session_id, "client closed the connection");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    // Any connection end that wasn't preceded by an explicit turnEnd
    // is treated as an implicit TURN_END for whatever session is live.
    if let Some(tx) = cmd_tx {
        let _ = tx.send(SessionCommand::Disconnect).await;
    }
    sender_task.abort();
    info!(session_id = %session_id, "client connection closed");
}

/// Build the client gateway router: the WebSocket upgrade endpoint
/// plus a health check for the process supervisor / load balancer.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/gateway", get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

pub async fn start_gateway_server(config: &Config, state: AppState) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "client gateway listening");

    let app = build_router(state);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "client gateway server error");
        }
    });

    Ok(handle)
}
