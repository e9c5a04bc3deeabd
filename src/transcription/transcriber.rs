//! # Transcriber
//!
//! The one shared speech-to-text capability behind every session.
//!
//! ## Concurrency contract:
//! `transcribe` may be called from any number of sessions at once without
//! external locking. Inference itself runs serialized, since the underlying
//! decoder is stateful: calls take an internal mutex, held only on the
//! blocking thread pool for the duration of one decode. Payload parsing and
//! all session I/O proceed concurrently; contention is confined to the
//! inference call.
//!
//! ## Failure contract:
//! Unparseable, empty or oversized input comes back as a distinguishable
//! [`DecodeError`], never garbage text and never a panic that could take a
//! session down.

use crate::audio::{decode_wav_payload, MODEL_SAMPLE_RATE};
use crate::error::DecodeError;
use crate::transcription::model::{ModelId, WhisperModel};
use anyhow::{anyhow, Result};
use candle_core::Device;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Decode behavior knobs; these belong to the transcriber, not the protocol.
#[derive(Debug, Clone)]
pub struct TranscriberConfig {
    /// Which Whisper checkpoint backs the service.
    pub model: ModelId,

    /// ISO 639-1 language hint for multilingual checkpoints.
    pub language: Option<String>,

    /// Clips longer than this are refused before touching the model.
    pub max_clip_seconds: f64,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            model: ModelId::BaseEn,
            language: Some("en".to_string()),
            max_clip_seconds: 30.0,
        }
    }
}

/// Shared, concurrency-safe handle over the loaded acoustic model.
pub struct Transcriber {
    model: Arc<Mutex<WhisperModel>>,
    config: TranscriberConfig,
}

impl Transcriber {
    /// Load the configured checkpoint and verify it can decode.
    ///
    /// Runs a warmup decode over one second of silence so that a broken
    /// checkpoint fails the process at startup instead of failing every
    /// request later.
    pub async fn load(config: TranscriberConfig, device: Device) -> Result<Self> {
        let model =
            WhisperModel::load(config.model, config.language.as_deref(), device).await?;

        let transcriber = Self {
            model: Arc::new(Mutex::new(model)),
            config,
        };

        let silence = vec![0.0f32; MODEL_SAMPLE_RATE as usize];
        let warmup = transcriber
            .run_inference(silence)
            .await
            .map_err(|e| anyhow!("model warmup decode failed: {}", e))?;
        debug!(result = %warmup, "warmup decode complete");
        info!(model = %transcriber.config.model, "transcriber ready");

        Ok(transcriber)
    }

    /// Transcribe one complete audio clip.
    ///
    /// The returned text is whitespace-trimmed. An empty `Ok` string means
    /// the model heard nothing it recognized; on the wire that is
    /// indistinguishable from a decode failure, which is the compatibility
    /// behavior clients of this protocol expect.
    pub async fn transcribe(&self, payload: &[u8]) -> Result<String, DecodeError> {
        let pcm = decode_wav_payload(payload)?;

        let seconds = pcm.len() as f64 / MODEL_SAMPLE_RATE as f64;
        if seconds > self.config.max_clip_seconds {
            return Err(DecodeError::AudioTooLong {
                seconds,
                limit: self.config.max_clip_seconds,
            });
        }

        let text = self.run_inference(pcm).await?;
        Ok(text.trim().to_string())
    }

    /// Run the model on already-normalized samples, off the async executor.
    async fn run_inference(&self, pcm: Vec<f32>) -> Result<String, DecodeError> {
        let model = Arc::clone(&self.model);
        tokio::task::spawn_blocking(move || {
            // Recover the lock if a previous decode panicked; one poisoned
            // request must not wedge every request after it.
            let mut model = model.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            model.transcribe(&pcm)
        })
        .await
        .map_err(|e| DecodeError::Inference(format!("inference task aborted: {}", e)))?
        .map_err(|e| DecodeError::Inference(e.to_string()))
    }

    /// Name of the checkpoint serving requests, for the health surface.
    pub fn model_name(&self) -> String {
        self.config.model.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TranscriberConfig::default();
        assert_eq!(config.model, ModelId::BaseEn);
        assert_eq!(config.language.as_deref(), Some("en"));
        assert_eq!(config.max_clip_seconds, 30.0);
    }
}
