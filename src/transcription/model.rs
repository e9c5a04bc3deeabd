//! # Whisper Model
//!
//! Loads Whisper checkpoints from HuggingFace via Candle-rs and runs the
//! decode loop. Weights, tokenizer and model config are fetched through
//! `hf-hub` (cached locally, `HF_TOKEN`/`HF_HUB_CACHE` honored) and loaded
//! from safetensors.
//!
//! Decoding is greedy: the service trades the last few points of accuracy
//! for latency.

use anyhow::{anyhow, Result};
use candle_core::{Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, audio, Config};
use tokenizers::Tokenizer;

/// The Whisper checkpoints this service knows how to fetch.
///
/// The `.en` variants are English-only and skip the language/task prompt
/// tokens entirely; the rest are multilingual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ModelId {
    Tiny,
    TinyEn,
    Base,
    BaseEn,
    Small,
    SmallEn,
    Medium,
    LargeV3,
}

impl ModelId {
    /// HuggingFace repository holding this checkpoint.
    pub fn repo(&self) -> &'static str {
        match self {
            ModelId::Tiny => "openai/whisper-tiny",
            ModelId::TinyEn => "openai/whisper-tiny.en",
            ModelId::Base => "openai/whisper-base",
            ModelId::BaseEn => "openai/whisper-base.en",
            ModelId::Small => "openai/whisper-small",
            ModelId::SmallEn => "openai/whisper-small.en",
            ModelId::Medium => "openai/whisper-medium",
            ModelId::LargeV3 => "openai/whisper-large-v3",
        }
    }

    /// English-only checkpoints use the reduced prompt without language and
    /// task tokens.
    pub fn is_multilingual(&self) -> bool {
        !matches!(self, ModelId::TinyEn | ModelId::BaseEn | ModelId::SmallEn)
    }
}

impl std::str::FromStr for ModelId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelId::Tiny),
            "tiny.en" => Ok(ModelId::TinyEn),
            "base" => Ok(ModelId::Base),
            "base.en" => Ok(ModelId::BaseEn),
            "small" => Ok(ModelId::Small),
            "small.en" => Ok(ModelId::SmallEn),
            "medium" => Ok(ModelId::Medium),
            "large" | "large-v3" => Ok(ModelId::LargeV3),
            _ => Err(anyhow!("unknown model name: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelId::Tiny => "tiny",
            ModelId::TinyEn => "tiny.en",
            ModelId::Base => "base",
            ModelId::BaseEn => "base.en",
            ModelId::Small => "small",
            ModelId::SmallEn => "small.en",
            ModelId::Medium => "medium",
            ModelId::LargeV3 => "large-v3",
        };
        write!(f, "{}", name)
    }
}

/// A loaded Whisper checkpoint ready to decode audio.
///
/// `transcribe` takes `&mut self` because the decoder keeps a KV cache
/// between steps; callers that share a model across sessions serialize
/// access around it (see [`crate::transcription::Transcriber`]).
pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    device: Device,

    sot_token: u32,
    eot_token: u32,
    no_timestamps_token: u32,
    transcribe_token: Option<u32>,
    language_token: Option<u32>,
}

impl WhisperModel {
    /// Fetch and load a checkpoint.
    ///
    /// Downloads `config.json`, `tokenizer.json` and `model.safetensors`
    /// from the checkpoint's repository (served from the local cache after
    /// the first run), then initializes the weights on `device`.
    pub async fn load(id: ModelId, language: Option<&str>, device: Device) -> Result<Self> {
        tracing::info!(model = %id, "loading Whisper checkpoint");
        let start_time = std::time::Instant::now();

        let mut builder = hf_hub::api::tokio::ApiBuilder::new()
            .with_token(std::env::var("HF_TOKEN").ok())
            .with_progress(false);
        if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
            builder = builder.with_cache_dir(cache_dir.into());
        }
        let api = builder.build()?;
        let repo = api.model(id.repo().to_string());

        let config_path = repo
            .get("config.json")
            .await
            .map_err(|e| anyhow!("failed to fetch config.json from {}: {}", id.repo(), e))?;
        let tokenizer_path = repo
            .get("tokenizer.json")
            .await
            .map_err(|e| anyhow!("failed to fetch tokenizer.json from {}: {}", id.repo(), e))?;
        let weights_path = repo
            .get("model.safetensors")
            .await
            .map_err(|e| anyhow!("failed to fetch weights from {}: {}", id.repo(), e))?;

        let config: Config = serde_json::from_reader(std::fs::File::open(config_path)?)?;
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow!("failed to load tokenizer: {}", e))?;

        let mel_filters =
            mel_filter_bank(m::N_FFT / 2 + 1, config.num_mel_bins, m::SAMPLE_RATE as f32);

        let vb =
            unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        let sot_token = token_id(&tokenizer, m::SOT_TOKEN)?;
        let eot_token = token_id(&tokenizer, m::EOT_TOKEN)?;
        let no_timestamps_token = token_id(&tokenizer, m::NO_TIMESTAMPS_TOKEN)?;

        let (transcribe_token, language_token) = if id.is_multilingual() {
            let task = token_id(&tokenizer, m::TRANSCRIBE_TOKEN)?;
            let lang = match language {
                Some(code) => Some(
                    tokenizer
                        .token_to_id(&format!("<|{}|>", code))
                        .ok_or_else(|| anyhow!("model has no language token for '{}'", code))?,
                ),
                None => None,
            };
            (Some(task), lang)
        } else {
            (None, None)
        };

        tracing::info!(
            model = %id,
            elapsed_s = format!("{:.2}", start_time.elapsed().as_secs_f64()),
            "checkpoint loaded"
        );

        Ok(Self {
            model,
            config,
            tokenizer,
            mel_filters,
            device,
            sot_token,
            eot_token,
            no_timestamps_token,
            transcribe_token,
            language_token,
        })
    }

    /// Decode one clip of mono 16 kHz samples to text.
    ///
    /// Returns the concatenated text of everything the model recognized,
    /// whitespace-trimmed; silence legitimately decodes to an empty string.
    pub fn transcribe(&mut self, pcm: &[f32]) -> Result<String> {
        let mel = audio::pcm_to_mel(&self.config, pcm, &self.mel_filters);
        let n_mels = self.config.num_mel_bins;
        let frames = mel.len() / n_mels;
        let mel = Tensor::from_vec(mel, (1, n_mels, frames), &self.device)?;

        let audio_features = self.model.encoder.forward(&mel, true)?;

        let mut tokens = self.prompt_tokens();
        let mut text_tokens: Vec<u32> = Vec::new();
        let max_steps = self.config.max_target_positions / 2;

        for step in 0..max_steps {
            let input = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let ys = self.model.decoder.forward(&input, &audio_features, step == 0)?;
            let (_, seq_len, _) = ys.dims3()?;
            let logits = self
                .model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?;

            let next = logits.argmax(0)?.to_scalar::<u32>()?;
            if next == self.eot_token {
                break;
            }
            tokens.push(next);

            // Timestamp and other special ids sit above EOT; only plain
            // vocabulary reaches the output text.
            if next < self.eot_token {
                text_tokens.push(next);
            }

            if has_repetition(&text_tokens) {
                tracing::debug!("stopping decode on repetition");
                break;
            }
        }

        let text = self
            .tokenizer
            .decode(&text_tokens, true)
            .map_err(|e| anyhow!("tokenizer decode error: {}", e))?;

        Ok(clean_text(&text))
    }

    /// The forced prompt the decode starts from.
    ///
    /// Multilingual checkpoints expect `sot, language?, task, notimestamps`;
    /// English-only checkpoints were trained on `sot, notimestamps` alone.
    fn prompt_tokens(&self) -> Vec<u32> {
        let mut tokens = vec![self.sot_token];
        if let Some(language) = self.language_token {
            tokens.push(language);
        }
        if let Some(task) = self.transcribe_token {
            tokens.push(task);
        }
        tokens.push(self.no_timestamps_token);
        tokens
    }
}

fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| anyhow!("tokenizer is missing the {} token", token))
}

/// Detect a decode stuck in a loop: the same token three times running, or
/// the last four tokens repeating the four before them.
fn has_repetition(tokens: &[u32]) -> bool {
    let n = tokens.len();
    if n >= 3 && tokens[n - 1] == tokens[n - 2] && tokens[n - 2] == tokens[n - 3] {
        return true;
    }
    if n >= 8 && tokens[n - 4..] == tokens[n - 8..n - 4] {
        return true;
    }
    false
}

/// Strip marker tokens the tokenizer occasionally leaves behind, then trim.
fn clean_text(text: &str) -> String {
    text.replace("<|startoftranscript|>", "")
        .replace("<|endoftext|>", "")
        .replace("<|notimestamps|>", "")
        .trim()
        .to_string()
}

/// Triangular mel filter bank over `n_freqs` FFT bins, slaney-normalized.
///
/// Computed at load time instead of shipping the precomputed table; the
/// result matches the standard HTK mel scale construction.
fn mel_filter_bank(n_freqs: usize, n_mels: usize, sample_rate: f32) -> Vec<f32> {
    let hz_to_mel = |hz: f32| 2595.0 * (1.0 + hz / 700.0).log10();
    let mel_to_hz = |mel: f32| 700.0 * (10f32.powf(mel / 2595.0) - 1.0);

    let mel_max = hz_to_mel(sample_rate / 2.0);
    let band_edges: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
        .collect();

    let mut bank = vec![0.0f32; n_mels * n_freqs];
    for band in 0..n_mels {
        let (lo, center, hi) = (band_edges[band], band_edges[band + 1], band_edges[band + 2]);
        let norm = 2.0 / (hi - lo).max(f32::EPSILON);
        for bin in 0..n_freqs {
            let freq = bin as f32 * sample_rate / 2.0 / (n_freqs - 1) as f32;
            let weight = if freq <= lo || freq >= hi {
                0.0
            } else if freq <= center {
                (freq - lo) / (center - lo).max(f32::EPSILON)
            } else {
                (hi - freq) / (hi - center).max(f32::EPSILON)
            };
            bank[band * n_freqs + bin] = weight * norm;
        }
    }
    bank
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_name_parsing() {
        assert_eq!("base.en".parse::<ModelId>().unwrap(), ModelId::BaseEn);
        assert_eq!("BASE.EN".parse::<ModelId>().unwrap(), ModelId::BaseEn);
        assert_eq!("large".parse::<ModelId>().unwrap(), ModelId::LargeV3);
        assert!("huge".parse::<ModelId>().is_err());
    }

    #[test]
    fn test_model_name_roundtrip() {
        for name in ["tiny", "tiny.en", "base", "base.en", "small", "small.en", "medium"] {
            let id: ModelId = name.parse().unwrap();
            assert_eq!(id.to_string(), name);
        }
    }

    #[test]
    fn test_english_only_variants() {
        assert!(!"base.en".parse::<ModelId>().unwrap().is_multilingual());
        assert!("base".parse::<ModelId>().unwrap().is_multilingual());
        assert!("large-v3".parse::<ModelId>().unwrap().is_multilingual());
    }

    #[test]
    fn test_repetition_detection() {
        assert!(!has_repetition(&[1, 2, 3, 4]));
        assert!(has_repetition(&[1, 7, 7, 7]));
        assert!(has_repetition(&[9, 1, 2, 3, 4, 1, 2, 3, 4]));
        assert!(!has_repetition(&[1, 2, 1, 2, 3]));
    }

    #[test]
    fn test_text_cleanup() {
        assert_eq!(clean_text("  hello world \n"), "hello world");
        assert_eq!(clean_text("hi<|endoftext|>"), "hi");
        assert_eq!(clean_text(""), "");
    }

    #[test]
    fn test_mel_filter_bank_shape() {
        let bank = mel_filter_bank(201, 80, 16_000.0);
        assert_eq!(bank.len(), 80 * 201);

        // Every band must carry at least some weight.
        for band in 0..80 {
            let row = &bank[band * 201..(band + 1) * 201];
            assert!(row.iter().any(|&w| w > 0.0), "band {} is empty", band);
        }

        // Nothing is negative.
        assert!(bank.iter().all(|&w| w >= 0.0));
    }
}
