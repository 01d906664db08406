//! Shared duplex WebSocket bridge to the EPD (end-point-detection)
//! engine.
//!
//! One persistent connection multiplexes every session: outbound audio
//! frames are tagged with a 16-byte raw session id prefix; inbound
//! status events carry the session id back out in their JSON body and
//! are demuxed by the caller (the session manager), not here — this
//! module only owns the wire, not the routing table.
//!
//! Grounded on the reader/writer task-pair shape used for the OpenAI
//! Realtime bridge, extended with a supervising reconnect loop and a
//! heartbeat ping, neither of which that single-shot session needed.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::fsm::EpdStatus;
use crate::stats::Stats;

/// One outbound audio chunk, destined for a specific session's EPD
/// state on the wire.
#[derive(Debug, Clone)]
pub struct EpdFrame {
    pub session_id: Uuid,
    pub pcm: Vec<u8>,
}

/// One inbound EPD status event, already parsed and demuxed to a
/// session id.
#[derive(Debug, Clone)]
pub struct EpdEvent {
    pub session_id: Uuid,
    pub status: EpdStatus,
}

#[derive(Deserialize)]
struct RawEpdStatus {
    session_id: Uuid,
    status: i64,
}

/// Handle for submitting outbound audio frames to the EPD bridge.
#[derive(Clone)]
pub struct EpdClient {
    outbound_tx: mpsc::Sender<EpdFrame>,
}

impl EpdClient {
    pub fn sender(&self) -> mpsc::Sender<EpdFrame> {
        self.outbound_tx.clone()
    }

    /// Fire-and-forget: drops the chunk rather than suspending when the
    /// bridge isn't open, per spec's binding "never blocks on
    /// reconnect" contract — a suspended sender here would eventually
    /// block a session's `on_chunk` for the whole outage.
    pub fn send(&self, frame: EpdFrame) -> Result<(), mpsc::error::TrySendError<EpdFrame>> {
        self.outbound_tx.try_send(frame)
    }
}

/// Serialize one outbound frame as `[16-byte session id][pcm bytes]`.
fn encode_frame(frame: &EpdFrame) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + frame.pcm.len());
    buf.extend_from_slice(frame.session_id.as_bytes());
    buf.extend_from_slice(&frame.pcm);
    buf
}

/// Spawn the supervised EPD bridge: connects, runs reader + writer
/// tasks until the connection drops, then waits `ws_reconnect_interval`
/// and reconnects indefinitely. Returns a handle for sending outbound
/// frames and a receiver of demuxed inbound status events.
pub fn spawn(config: Arc<Config>, stats: Arc<Stats>) -> (EpdClient, mpsc::Receiver<EpdEvent>) {
    let (outbound_tx, outbound_rx) = mpsc::channel::<EpdFrame>(config.channel_capacity);
    let (inbound_tx, inbound_rx) = mpsc::channel::<EpdEvent>(config.channel_capacity);

    tokio::spawn(supervisor(config, stats, outbound_rx, inbound_tx));

    (EpdClient { outbound_tx }, inbound_rx)
}

async fn supervisor(
    config: Arc<Config>,
    stats: Arc<Stats>,
    mut outbound_rx: mpsc::Receiver<EpdFrame>,
    inbound_tx: mpsc::Sender<EpdEvent>,
) {
    loop {
        info!(url = %config.ws_url, "connecting to EPD engine");
        match tokio_tungstenite::connect_async(&config.ws_url).await {
            Ok((ws_stream, response)) => {
                info!(status = %response.status(), "EPD WebSocket connected");
                let (ws_sink, ws_reader) = ws_stream.split();
                outbound_rx = run_connection(
                    &config,
                    &stats,
                    ws_sink,
                    ws_reader,
                    outbound_rx,
                    inbound_tx.clone(),
                )
                .await;
            }
            Err(e) => {
                error!(error = %e, "failed to connect to EPD engine");
            }
        }

        warn!(retry_in = ?config.ws_reconnect_interval(), "EPD connection lost, will reconnect");
        tokio::time::sleep(config.ws_reconnect_interval()).await;
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Run reader + writer tasks for one live connection, returning the
/// outbound receiver once either task exits so it can feed the next
/// reconnect attempt.
async fn run_connection(
    config: &Config,
    stats: &Arc<Stats>,
    mut ws_sink: futures_util::stream::SplitSink<WsStream, Message>,
    mut ws_reader: futures_util::stream::SplitStream<WsStream>,
    outbound_rx: mpsc::Receiver<EpdFrame>,
    inbound_tx: mpsc::Sender<EpdEvent>,
) -> mpsc::Receiver<EpdFrame> {
    let heartbeat_interval = config.ws_heartbeat_interval();
    let stats = stats.clone();

    let writer_handle = tokio::spawn(async move {
        let mut outbound_rx = outbound_rx;
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                biased;

                _ = heartbeat.tick() => {
                    if let Err(e) = ws_sink.send(Message::Ping(Vec::new())).await {
                        error!(error = %e, "EPD heartbeat send failed");
                        break;
                    }
                }

                frame = outbound_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            let bytes = encode_frame(&frame);
                            if let Err(e) = ws_sink.send(Message::Binary(bytes)).await {
                                error!(error = %e, "EPD audio send failed");
                                break;
                            }
                        }
                        None => {
                            info!("EPD outbound channel closed");
                            break;
                        }
                    }
                }
            }
        }
        outbound_rx
    });

    let reader_handle = tokio::spawn(async move {
        while let Some(msg) = ws_reader.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    error!(error = %e, "EPD WS read error");
                    break;
                }
            };

            match msg {
                Message::Text(text) => {
                    let raw: RawEpdStatus = match serde_json::from_str(&text) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(error = %e, "malformed EPD status event");
                            continue;
                        }
                    };
                    let Some(status) = EpdStatus::from_code(raw.status) else {
                        warn!(code = raw.status, "unknown EPD status code");
                        continue;
                    };
                    debug!(session_id = %raw.session_id, status = ?status, "EPD status event");
                    stats.record_epd_event();
                    if inbound_tx
                        .send(EpdEvent { session_id: raw.session_id, status })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Message::Close(frame) => {
                    info!(frame = ?frame, "EPD WebSocket closed by server");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {}
            }
        }
    });

    let _ = reader_handle.await;
    writer_handle.await.unwrap_or_else(|e| {
        error!(error = %e, "EPD writer task panicked");
        mpsc::channel(1).1
    })
}
