//! Shared plain-data types passed between the session actors, the
//! global dispatcher, the STT client, and the delivery reassemblers.

use serde::Serialize;
use uuid::Uuid;

/// An STT work item enqueued by a session's FSM, consumed by the
/// [`crate::dispatcher::BatchDispatcher`].
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub session_id: Uuid,
    pub sequence: u64,
    pub start: u64,
    pub end: u64,
    pub is_final: bool,
}

impl WorkItem {
    /// `(session_id, "start-end")` — the utterance id used on the wire
    /// to the STT engine and as the scratch-file stem.
    pub fn utterance_id(&self) -> String {
        format!("{}_{}-{}", self.session_id, self.start, self.end)
    }
}

/// One item ready for a batch STT call: the work item plus the PCM
/// bytes read from the owning session's ring buffer at dispatch time.
#[derive(Debug, Clone)]
pub struct SttBatchInput {
    pub item: WorkItem,
    pub pcm: Vec<u8>,
}

/// One result returned by the STT engine for a given utterance id.
#[derive(Debug, Clone)]
pub struct SttResult {
    pub utterance_id: String,
    pub payload: serde_json::Value,
}

/// `{session_id, sequence, result, is_final}` — released to the
/// client sink in strict ascending sequence order.
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub session_id: Uuid,
    pub sequence: u64,
    pub result: serde_json::Value,
    pub is_final: bool,
}

/// The gateway's half of the client-facing wire protocol — every
/// message the duplex transport can push down to a connected client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "eventResponse")]
    EventResponse {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
        event: String,
        ok: bool,
        message: Option<String>,
    },
    #[serde(rename = "turnReady")]
    TurnReady {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
    },
    #[serde(rename = "delivery")]
    Delivery {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
        sequence: u64,
        result: serde_json::Value,
        is_final: bool,
    },
    #[serde(rename = "deliveryEnd")]
    DeliveryEnd {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
    },
}
