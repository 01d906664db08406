//! Global batch STT dispatcher (C6).
//!
//! A single periodic tick drains up to `batch_size` work items across
//! *all* sessions, reads each item's PCM range from its owning
//! session's ring buffer, and fires one multipart batch call at the
//! STT engine. Results are routed back to the owning session's
//! reassembler; anything the engine didn't return for is left as a
//! hole the session's TURN_END drain will eventually force-skip.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::session::{SessionCommand, SessionRegistry};
use crate::stats::Stats;
use crate::stt_client::SttClient;
use crate::types::{SttBatchInput, WorkItem};

/// Control-plane requests the dispatcher task services alongside its
/// tick, since it's the sole consumer of the global work queue.
pub enum DispatcherCommand {
    /// TURN_END drain step 3 / §4.6 "session-specific flush": pull
    /// every currently-queued item for `session_id` out of the global
    /// queue (ascending by sequence, ≤`batch_size` per call) and drive
    /// them through `SttClient` directly, bypassing the tick. Resolves
    /// `done` once no items for that session remain queued.
    FlushSession { session_id: Uuid, done: oneshot::Sender<()> },
}

pub struct BatchDispatcher {
    config: Arc<Config>,
    stats: Arc<Stats>,
    stt: Arc<SttClient>,
    registry: SessionRegistry,
}

impl BatchDispatcher {
    pub fn new(config: Arc<Config>, stats: Arc<Stats>, stt: SttClient, registry: SessionRegistry) -> Self {
        Self { config, stats, stt: Arc::new(stt), registry }
    }

    /// Spawns the dispatcher task. `cmd_rx` is the receiving half of a
    /// channel whose sender was already handed to the session manager,
    /// so sessions can request a flush before the dispatcher exists.
    pub fn spawn(self, work_rx: mpsc::Receiver<WorkItem>, cmd_rx: mpsc::Receiver<DispatcherCommand>) {
        tokio::spawn(self.run(work_rx, cmd_rx));
    }

    async fn run(self, mut work_rx: mpsc::Receiver<WorkItem>, mut cmd_rx: mpsc::Receiver<DispatcherCommand>) {
        let mut ticker = tokio::time::interval(self.config.dispatch_tick());
        let mut pending: VecDeque<WorkItem> = VecDeque::new();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    Self::drain_available(&mut work_rx, &mut pending);
                    if pending.is_empty() {
                        continue;
                    }
                    let take = pending.len().min(self.config.batch_size);
                    let mut batch: Vec<WorkItem> = pending.drain(..take).collect();
                    batch.sort_by_key(|item| item.sequence);
                    self.dispatch_batch(batch).await;
                }
                Some(cmd) = cmd_rx.recv() => {
                    match cmd {
                        DispatcherCommand::FlushSession { session_id, done } => {
                            Self::drain_available(&mut work_rx, &mut pending);
                            self.flush_session(session_id, &mut pending).await;
                            let _ = done.send(());
                        }
                    }
                }
            }
        }
    }

    fn drain_available(work_rx: &mut mpsc::Receiver<WorkItem>, pending: &mut VecDeque<WorkItem>) {
        while let Ok(item) = work_rx.try_recv() {
            pending.push_back(item);
        }
    }

    /// Repeatedly pulls this session's queued items (ascending by
    /// sequence) into ≤`batch_size` batches and dispatches each
    /// directly, until none remain — the drain-time equivalent of the
    /// periodic tick, filtered to one session.
    async fn flush_session(&self, session_id: Uuid, pending: &mut VecDeque<WorkItem>) {
        loop {
            let mut batch = Vec::with_capacity(self.config.batch_size);
            let mut i = 0;
            while i < pending.len() && batch.len() < self.config.batch_size {
                if pending[i].session_id == session_id {
                    batch.push(pending.remove(i).expect("index in bounds"));
                } else {
                    i += 1;
                }
            }
            if batch.is_empty() {
                break;
            }
            batch.sort_by_key(|item| item.sequence);
            self.dispatch_batch(batch).await;
        }
    }

    async fn dispatch_batch(&self, items: Vec<WorkItem>) {
        let mut inputs = Vec::with_capacity(items.len());
        for item in items {
            match self.read_pcm(&item).await {
                Some(pcm) => inputs.push(SttBatchInput { item, pcm }),
                None => self.notify_skip(item.session_id, item.sequence).await,
            }
        }
        if inputs.is_empty() {
            return;
        }

        let batch_size = inputs.len();
        match self.stt.send_batch(&inputs).await {
            Ok(results) => {
                self.stats.record_batch_sent(false);
                let mut by_id: HashMap<String, serde_json::Value> =
                    results.into_iter().map(|r| (r.utterance_id, r.payload)).collect();

                for input in &inputs {
                    let id = input.item.utterance_id();
                    if let Some(payload) = by_id.remove(&id) {
                        self.notify_arrived(input.item.session_id, input.item.sequence, payload, input.item.is_final)
                            .await;
                    } else {
                        debug!(utterance_id = %id, "STT engine omitted utterance from batch response");
                    }
                }
            }
            Err(e) => {
                self.stats.record_batch_sent(true);
                warn!(error = %e, batch_size, "STT batch call failed; items left as holes");
            }
        }
    }

    async fn read_pcm(&self, item: &WorkItem) -> Option<Vec<u8>> {
        let cmd_tx = self.registry.read().await.get(&item.session_id).cloned()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(SessionCommand::ReadPcm { start: item.start, end: item.end, reply: reply_tx })
            .await
            .ok()?;
        match reply_rx.await {
            Ok(Ok(pcm)) => Some(pcm),
            Ok(Err(e)) => {
                debug!(session_id = %item.session_id, error = %e, "buffer range already truncated, skipping item");
                None
            }
            Err(_) => None,
        }
    }

    async fn notify_skip(&self, session_id: Uuid, sequence: u64) {
        if let Some(tx) = self.registry.read().await.get(&session_id).cloned() {
            let _ = tx.send(SessionCommand::SttSkipped { sequence }).await;
        }
    }

    async fn notify_arrived(&self, session_id: Uuid, sequence: u64, payload: serde_json::Value, is_final: bool) {
        if let Some(tx) = self.registry.read().await.get(&session_id).cloned() {
            let _ = tx.send(SessionCommand::SttArrived { sequence, payload, is_final }).await;
        }
    }
}
