//! Stateless batch STT caller.
//!
//! Each call WAV-encodes a batch of PCM slices, writes them to the
//! per-day scratch partition, POSTs them as one multipart request to
//! the batch STT endpoint, and removes the scratch files once the
//! response (success or failure) is in hand.

use std::path::{Path, PathBuf};

use reqwest::multipart;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Result;
use crate::types::{SttBatchInput, SttResult};
use crate::wav;

#[derive(Deserialize)]
struct BatchEnvelope {
    content: BatchContent,
}

#[derive(Deserialize)]
struct BatchContent {
    result: BatchResult,
}

#[derive(Deserialize)]
struct BatchResult {
    utterances: Vec<serde_json::Value>,
}

pub struct SttClient {
    http: reqwest::Client,
    batch_url: String,
    token: String,
    result_dir: PathBuf,
}

impl SttClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            batch_url: config.speech_api_batch_url.clone(),
            token: config.speech_api_token.clone(),
            result_dir: PathBuf::from(&config.result_dir),
        }
    }

    /// Send one batch of utterances and return whatever results the
    /// engine returned, keyed by utterance id. Missing ids in the
    /// response are the caller's problem (they become reassembler
    /// holes, not an error here).
    pub async fn send_batch(&self, items: &[SttBatchInput]) -> Result<Vec<SttResult>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let date = chrono::Local::now().format("%Y-%m-%d").to_string();
        let mut form = multipart::Form::new();
        let mut written: Vec<PathBuf> = Vec::with_capacity(items.len());
        let mut meta = Vec::with_capacity(items.len());

        for input in items {
            let id = input.item.utterance_id();
            let wav_bytes = wav::encode(&input.pcm);

            let dir = self.result_dir.join(&date).join(input.item.session_id.to_string());
            tokio::fs::create_dir_all(&dir).await?;
            let path = dir.join(format!("{id}.wav"));
            tokio::fs::write(&path, &wav_bytes).await?;
            written.push(path);

            let part = multipart::Part::bytes(wav_bytes)
                .file_name(format!("{id}.wav"))
                .mime_str("audio/wav")?;
            form = form.part("files", part);

            meta.push(serde_json::json!({
                "id": id,
                "session_id": input.item.session_id,
                "sequence": input.item.sequence,
                "is_final": input.item.is_final,
            }));
        }
        form = form.text("meta", serde_json::to_string(&meta)?);

        debug!(batch_url = %self.batch_url, batch_size = items.len(), "dispatching STT batch");
        let mut req = self.http.post(&self.batch_url).multipart(form);
        if !self.token.is_empty() {
            req = req.bearer_auth(&self.token);
        }
        let response = req.send().await;

        cleanup(&written).await;

        let response = response?.error_for_status()?;
        let envelope: BatchEnvelope = response.json().await?;

        Ok(envelope
            .content
            .result
            .utterances
            .into_iter()
            .filter_map(|v| {
                let id = v.get("id")?.as_str()?.to_string();
                Some(SttResult { utterance_id: id, payload: v })
            })
            .collect())
    }
}

async fn cleanup(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(path = %path_display(path), error = %e, "failed to remove scratch wav");
        }
    }
}

fn path_display(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}
