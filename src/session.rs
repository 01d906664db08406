//! Per-session actor (C5).
//!
//! One task per session owns that session's `RingBuffer`, FSM, and
//! `DeliveryReassembler` exclusively — every mutation is a message
//! processed off `cmd_rx`, so there is never more than one mutator in
//! flight and no lock is ever held across an `.await`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::dispatcher::DispatcherCommand;
use crate::epd_client::{EpdClient, EpdFrame};
use crate::error::Result;
use crate::fsm::{EpdStatus, SegmentationFsm};
use crate::reassembler::DeliveryReassembler;
use crate::ring_buffer::RingBuffer;
use crate::stats::Stats;
use crate::types::{ServerMessage, WorkItem};

/// Commands a session actor accepts. `ReadPcm`/`SttArrived`/`SttSkipped`
/// are sent by the dispatcher; the rest originate from the client
/// gateway transport.
pub enum SessionCommand {
    StartTurn,
    Chunk(Vec<u8>),
    Epd(EpdStatus),
    ReadPcm { start: u64, end: u64, reply: oneshot::Sender<Result<Vec<u8>>> },
    SttArrived { sequence: u64, payload: serde_json::Value, is_final: bool },
    SttSkipped { sequence: u64 },
    /// `done` resolves once this turn's drain has emitted `deliveryEnd`,
    /// so the transport can free the connection for a new `eventRequest`.
    TurnEnd { done: oneshot::Sender<()> },
    Disconnect,
}

/// Registry of live sessions' command channels, shared between the
/// session manager (which owns session lifecycle) and the dispatcher
/// (which needs to reach a session to read its buffer and hand it
/// results).
pub type SessionRegistry = Arc<RwLock<HashMap<Uuid, mpsc::Sender<SessionCommand>>>>;

struct SessionState {
    session_id: Uuid,
    config: Arc<Config>,
    stats: Arc<Stats>,
    ring: RingBuffer,
    fsm: SegmentationFsm,
    reassembler: DeliveryReassembler,
    next_seq: u64,
    epd: EpdClient,
    work_tx: mpsc::Sender<WorkItem>,
    dispatcher_cmd_tx: mpsc::Sender<DispatcherCommand>,
    client_tx: mpsc::Sender<ServerMessage>,
    turn_done: Option<oneshot::Sender<()>>,
}

impl SessionState {
    async fn on_chunk(&mut self, pcm: Vec<u8>) {
        self.ring.append(&pcm);
        self.stats.record_chunk();
        if self.epd.send(EpdFrame { session_id: self.session_id, pcm }).is_err() {
            warn!(session_id = %self.session_id, "EPD bridge unavailable, dropping chunk");
        }
    }

    async fn on_epd(&mut self, status: EpdStatus) {
        let emissions = self.fsm.on_event(status);
        for emission in emissions {
            self.enqueue_work(emission.start, emission.end, emission.is_final).await;
        }
    }

    async fn enqueue_work(&mut self, start: u64, end: u64, is_final: bool) {
        let sequence = self.next_seq;
        self.next_seq += 1;
        let item = WorkItem { session_id: self.session_id, sequence, start, end, is_final };
        self.stats.record_work_item();
        if self.work_tx.send(item).await.is_err() {
            warn!(session_id = %self.session_id, "STT dispatch queue closed, treating as skip");
            self.on_stt_skipped(sequence).await;
        }
    }

    async fn on_stt_arrived(&mut self, sequence: u64, payload: serde_json::Value, is_final: bool) {
        let deliveries = self.reassembler.arrive(sequence, payload, is_final);
        self.emit_deliveries(deliveries).await;
    }

    async fn on_stt_skipped(&mut self, sequence: u64) {
        let deliveries = self.reassembler.skip(sequence);
        self.emit_deliveries(deliveries).await;
    }

    async fn emit_deliveries(&mut self, deliveries: Vec<crate::types::DeliveryRecord>) {
        for d in deliveries {
            self.stats.record_delivery();
            let _ = self
                .client_tx
                .send(ServerMessage::Delivery {
                    session_id: self.session_id,
                    sequence: d.sequence,
                    result: d.result,
                    is_final: d.is_final,
                })
                .await;
        }
    }

    /// Returns `true` if this command is a termination request.
    async fn handle_command(&mut self, cmd: SessionCommand) -> bool {
        match cmd {
            SessionCommand::StartTurn => {
                let _ = self.client_tx.send(ServerMessage::TurnReady { session_id: self.session_id }).await;
                false
            }
            SessionCommand::Chunk(pcm) => {
                self.on_chunk(pcm).await;
                false
            }
            SessionCommand::Epd(status) => {
                self.on_epd(status).await;
                false
            }
            SessionCommand::ReadPcm { start, end, reply } => {
                let _ = reply.send(self.ring.read_range(start, end));
                false
            }
            SessionCommand::SttArrived { sequence, payload, is_final } => {
                self.on_stt_arrived(sequence, payload, is_final).await;
                false
            }
            SessionCommand::SttSkipped { sequence } => {
                self.on_stt_skipped(sequence).await;
                false
            }
            SessionCommand::TurnEnd { done } => {
                self.turn_done = Some(done);
                let _ = self
                    .client_tx
                    .send(ServerMessage::EventResponse {
                        session_id: self.session_id,
                        event: "turnEnd".to_string(),
                        ok: true,
                        message: None,
                    })
                    .await;
                true
            }
            SessionCommand::Disconnect => true,
        }
    }

    /// Poll `cmd_rx` at `drain_idle_interval` cadence, servicing every
    /// command that arrives, until either no command arrives within
    /// one idle interval or `max_wait` has elapsed.
    async fn poll_idle(&mut self, cmd_rx: &mut mpsc::Receiver<SessionCommand>, max_wait: Duration) {
        let deadline = Instant::now() + max_wait;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let wait = (deadline - now).min(self.config.drain_idle_interval());
            match tokio::time::timeout(wait, cmd_rx.recv()).await {
                Ok(Some(cmd)) => {
                    self.handle_command(cmd).await;
                }
                Ok(None) | Err(_) => return,
            }
        }
    }

    /// TURN_END drain: (1) wait for EPD quiescence, (2) close any open
    /// utterance as a leftover final, (3) flush this session's queued
    /// STT items directly rather than waiting on the shared tick, (4)
    /// wait for delivery quiescence, (5) force-skip any holes still
    /// open and emit `deliveryEnd`.
    async fn drain_turn_end(&mut self, cmd_rx: &mut mpsc::Receiver<SessionCommand>) {
        self.poll_idle(cmd_rx, self.config.drain_max_wait()).await;

        if let Some(emission) = self.fsm.leftover_final() {
            self.enqueue_work(emission.start, emission.end, emission.is_final).await;
        }

        let (done_tx, done_rx) = oneshot::channel();
        if self
            .dispatcher_cmd_tx
            .send(DispatcherCommand::FlushSession { session_id: self.session_id, done: done_tx })
            .await
            .is_ok()
        {
            let _ = done_rx.await;
        }

        let deadline = Instant::now() + self.config.delivery_max_wait();
        loop {
            if !self.reassembler.has_pending() || Instant::now() >= deadline {
                break;
            }
            let wait = (deadline - Instant::now()).min(self.config.drain_idle_interval());
            match tokio::time::timeout(wait, cmd_rx.recv()).await {
                Ok(Some(cmd)) => {
                    self.handle_command(cmd).await;
                }
                Ok(None) => break,
                Err(_) => continue,
            }
        }

        if self.reassembler.has_pending() {
            let holes = self.reassembler.count_holes_before(self.next_seq);
            if holes > 0 {
                self.stats.record_holes_skipped(holes);
                warn!(session_id = %self.session_id, holes, "force-skipping undelivered holes at drain deadline");
            }
            let deliveries = self.reassembler.force_advance_to(self.next_seq);
            self.emit_deliveries(deliveries).await;
        }

        let _ = self.client_tx.send(ServerMessage::DeliveryEnd { session_id: self.session_id }).await;

        if let Some(done) = self.turn_done.take() {
            let _ = done.send(());
        }
    }
}

async fn run(mut state: SessionState, mut cmd_rx: mpsc::Receiver<SessionCommand>) {
    state.stats.record_session_started();
    while let Some(cmd) = cmd_rx.recv().await {
        if state.handle_command(cmd).await {
            state.drain_turn_end(&mut cmd_rx).await;
            break;
        }
    }
    state.stats.record_session_ended();
    info!(session_id = %state.session_id, "session ended");
}

/// Owns the session registry and spawns one actor per session.
pub struct SessionManager {
    config: Arc<Config>,
    stats: Arc<Stats>,
    epd: EpdClient,
    work_tx: mpsc::Sender<WorkItem>,
    dispatcher_cmd_tx: mpsc::Sender<DispatcherCommand>,
    registry: SessionRegistry,
}

/// Routes demuxed EPD status events to their owning session actor.
pub fn spawn_epd_router(registry: SessionRegistry, mut epd_events: mpsc::Receiver<crate::epd_client::EpdEvent>) {
    tokio::spawn(async move {
        while let Some(event) = epd_events.recv().await {
            if let Some(tx) = registry.read().await.get(&event.session_id).cloned() {
                let _ = tx.send(SessionCommand::Epd(event.status)).await;
            }
        }
    });
}

impl SessionManager {
    pub fn new(
        config: Arc<Config>,
        stats: Arc<Stats>,
        epd: EpdClient,
        work_tx: mpsc::Sender<WorkItem>,
        dispatcher_cmd_tx: mpsc::Sender<DispatcherCommand>,
    ) -> Self {
        Self { config, stats, epd, work_tx, dispatcher_cmd_tx, registry: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub fn registry(&self) -> SessionRegistry {
        self.registry.clone()
    }

    /// Start a new session, wiring its outbound sink to `client_tx`.
    /// Returns the command channel the transport should forward
    /// inbound frames through.
    pub async fn start(&self, session_id: Uuid, client_tx: mpsc::Sender<ServerMessage>) -> mpsc::Sender<SessionCommand> {
        let (cmd_tx, cmd_rx) = mpsc::channel(self.config.channel_capacity);

        let state = SessionState {
            session_id,
            config: self.config.clone(),
            stats: self.stats.clone(),
            ring: RingBuffer::new(),
            fsm: SegmentationFsm::new(),
            reassembler: DeliveryReassembler::new(session_id),
            next_seq: 0,
            epd: self.epd.clone(),
            work_tx: self.work_tx.clone(),
            dispatcher_cmd_tx: self.dispatcher_cmd_tx.clone(),
            client_tx,
            turn_done: None,
        };

        self.registry.write().await.insert(session_id, cmd_tx.clone());
        info!(session_id = %session_id, "session started");

        let registry = self.registry.clone();
        tokio::spawn(async move {
            run(state, cmd_rx).await;
            registry.write().await.remove(&session_id);
        });

        cmd_tx
    }
}
