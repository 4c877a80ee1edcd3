//! Text-to-speech over an OpenAI-compatible `/v1/audio/speech` endpoint
//!
//! The provider is asked for audio already in the call leg's format
//! (μ-law 8 kHz by default), so the bytes go to the transport untouched.

use anyhow::{Result, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::{ReplyChunk, Synthesizer};
use crate::config::SynthesisConfig;

/// Synthesis stage client
pub struct SpeechSynthesizer {
    base_url: String,
    api_key: Option<String>,
    model: String,
    voice: String,
    output_format: String,
    client: Client,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

impl SpeechSynthesizer {
    pub fn new(base_url: &str, model: &str, voice: &str, output_format: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            model: model.to_string(),
            voice: voice.to_string(),
            output_format: output_format.to_string(),
            client: Client::new(),
        }
    }

    pub fn from_config(config: &SynthesisConfig) -> Result<Self> {
        let mut synthesizer = Self::new(&config.base_url, &config.model, &config.voice, &config.output_format);
        synthesizer.api_key = crate::security::keyring::get_provider_key("synthesis").ok();
        Ok(synthesizer)
    }
}

#[async_trait]
impl Synthesizer for SpeechSynthesizer {
    async fn synthesize(&self, chunk: &ReplyChunk) -> Result<Vec<u8>> {
        if chunk.text.trim().is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Interaction {}: TTS chunk {} \"{}\"",
            chunk.interaction_index,
            chunk.response_index,
            crate::truncate_safe(&chunk.text, 80)
        );

        let request = SpeechRequest {
            model: &self.model,
            input: &chunk.text,
            voice: &self.voice,
            response_format: &self.output_format,
        };

        let mut req_builder = self.client.post(format!("{}/v1/audio/speech", self.base_url));
        if let Some(key) = &self.api_key {
            req_builder = req_builder.bearer_auth(key);
        }
        let response = req_builder
            .json(&request)
            .send()
            .await
            .context("Failed to connect to TTS server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("TTS error ({}): {}", status, body));
        }

        let audio = response
            .bytes()
            .await
            .context("Failed to read TTS response")?
            .to_vec();

        debug!("TTS produced {} bytes for chunk {}", audio.len(), chunk.response_index);
        Ok(audio)
    }
}
