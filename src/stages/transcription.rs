//! Streaming speech-to-text over a WebSocket
//!
//! Caller audio is forwarded as binary frames. The provider answers with
//! JSON `Results` messages (`is_final` / `speech_final`) and `UtteranceEnd`
//! markers; [`TranscriptAssembler`] turns those into interim and final
//! utterances.

use anyhow::{Result, Context};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::{Transcriber, TranscriptEvent, TranscriptionHandle};
use crate::config::TranscriptionConfig;

const CLOSE_STREAM: &str = r#"{"type":"CloseStream"}"#;

/// Transcription stage client
pub struct LiveTranscriber {
    url: Url,
    api_key: Option<String>,
}

impl LiveTranscriber {
    pub fn from_config(config: &TranscriptionConfig) -> Result<Self> {
        Ok(Self {
            url: listen_url(config)?,
            api_key: crate::security::keyring::get_provider_key("transcription").ok(),
        })
    }
}

/// Build the streaming endpoint URL with the audio format and interim results enabled
pub fn listen_url(config: &TranscriptionConfig) -> Result<Url> {
    let mut url = Url::parse(&config.url)
        .with_context(|| format!("Invalid transcription URL: {}", config.url))?;
    url.query_pairs_mut()
        .append_pair("model", &config.model)
        .append_pair("encoding", &config.encoding)
        .append_pair("sample_rate", &config.sample_rate.to_string())
        .append_pair("punctuate", "true")
        .append_pair("interim_results", "true")
        .append_pair("endpointing", &config.endpointing_ms.to_string())
        .append_pair("utterance_end_ms", "1000");
    Ok(url)
}

#[async_trait]
impl Transcriber for LiveTranscriber {
    async fn connect(
        &self,
        events: mpsc::UnboundedSender<TranscriptEvent>,
        cancel: CancellationToken,
    ) -> Result<TranscriptionHandle> {
        let mut request = self.url.as_str().into_client_request()
            .context("Failed to build transcription request")?;
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Token {}", key))
                .context("Invalid transcription API key")?;
            request.headers_mut().insert("Authorization", value);
        }

        let (socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .context("Failed to connect to transcription service")?;
        info!("STT -> connected to {}", self.url.host_str().unwrap_or("transcription service"));

        let (mut ws_tx, mut ws_rx) = socket.split();
        let (audio_tx, mut audio_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        tokio::spawn(async move {
            let mut assembler = TranscriptAssembler::default();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    audio = audio_rx.recv() => match audio {
                        Some(payload) => {
                            if let Err(e) = ws_tx.send(Message::Binary(payload.into())).await {
                                warn!("STT -> send failed: {}", e);
                                break;
                            }
                        }
                        None => break,
                    },
                    incoming = ws_rx.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            for event in assembler.handle(text.as_str()) {
                                if events.send(event).is_err() {
                                    return;
                                }
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!("STT -> closed by provider: {:?}", frame);
                            return;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("STT -> receive error: {}", e);
                            return;
                        }
                        None => return,
                    },
                }
            }
            let _ = ws_tx.send(Message::Text(CLOSE_STREAM.into())).await;
            let _ = ws_tx.close().await;
            debug!("STT -> stream closed");
        });

        Ok(TranscriptionHandle::new(audio_tx))
    }
}

#[derive(Debug, Deserialize)]
struct ProviderMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    speech_final: bool,
    #[serde(default)]
    channel: Option<Channel>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

/// Accumulates final segments until the provider signals the end of an utterance
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    final_text: String,
    speech_final: bool,
}

impl TranscriptAssembler {
    pub fn handle(&mut self, raw: &str) -> Vec<TranscriptEvent> {
        let message: ProviderMessage = match serde_json::from_str(raw) {
            Ok(m) => m,
            Err(e) => {
                debug!("STT -> unparsed message: {}", e);
                return Vec::new();
            }
        };

        match message.kind.as_str() {
            "UtteranceEnd" => {
                if !self.speech_final && !self.final_text.trim().is_empty() {
                    info!("STT -> utterance end before speech_final");
                    return vec![self.take_final()];
                }
                Vec::new()
            }
            "Results" => {
                let text = message
                    .channel
                    .and_then(|c| c.alternatives.into_iter().next())
                    .map(|a| a.transcript)
                    .unwrap_or_default();

                if message.is_final {
                    if !text.trim().is_empty() {
                        if !self.final_text.is_empty() {
                            self.final_text.push(' ');
                        }
                        self.final_text.push_str(text.trim());
                    }
                    if message.speech_final {
                        self.speech_final = true;
                        if !self.final_text.trim().is_empty() {
                            return vec![self.take_final()];
                        }
                    } else {
                        self.speech_final = false;
                    }
                    Vec::new()
                } else if !text.trim().is_empty() {
                    vec![TranscriptEvent::Interim(text)]
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }

    fn take_final(&mut self) -> TranscriptEvent {
        TranscriptEvent::Final(std::mem::take(&mut self.final_text))
    }
}
