//! External AI stages consumed by a call session
//!
//! The session core depends only on the traits in this module:
//! - [`Transcriber`]: streaming speech-to-text
//! - [`Completer`]: reply generation, chunked for incremental speech
//! - [`Synthesizer`]: text-to-speech per reply chunk
//! - [`Finalizer`]: receives the call record when a session closes
//!
//! Each trait has a network-backed implementation next to it. Cancellation
//! is expressed with a per-interaction [`CancellationToken`].

pub mod completion;
pub mod finalize;
pub mod synthesis;
pub mod transcription;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{RecordSink, RecordingConfig};
use crate::types::TranscriptEntry;

pub use completion::ChatCompleter;
pub use finalize::{JsonlRecorder, LogFinalizer};
pub use synthesis::SpeechSynthesizer;
pub use transcription::LiveTranscriber;

/// Output of the transcription stage
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEvent {
    /// Partial hypothesis; only used to detect the caller talking over the agent
    Interim(String),
    /// The caller finished an utterance
    Final(String),
}

/// Audio input side of an open transcription stream
#[derive(Debug, Clone)]
pub struct TranscriptionHandle {
    audio_tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl TranscriptionHandle {
    pub fn new(audio_tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self { audio_tx }
    }

    /// Forward caller audio. Returns false once the stream has gone away.
    pub fn send_audio(&self, payload: Vec<u8>) -> bool {
        self.audio_tx.send(payload).is_ok()
    }
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Open a stream for one call. Results go to `events` until `cancel` fires.
    async fn connect(
        &self,
        events: mpsc::UnboundedSender<TranscriptEvent>,
        cancel: CancellationToken,
    ) -> Result<TranscriptionHandle>;
}

/// What the completion stage is asked to answer
#[derive(Debug, Clone)]
pub struct ReplyRequest {
    pub interaction_index: u64,
    pub user_text: String,
    /// Earlier transcript lines, oldest first
    pub context: Vec<TranscriptEntry>,
}

/// One piece of a reply, in emission order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyChunk {
    pub interaction_index: u64,
    pub response_index: i64,
    pub text: String,
}

#[async_trait]
pub trait Completer: Send + Sync {
    /// Stream reply chunks for `request` into `chunks`. Stop early once `cancel` fires.
    async fn request_reply(
        &self,
        request: ReplyRequest,
        chunks: mpsc::UnboundedSender<ReplyChunk>,
        cancel: CancellationToken,
    ) -> Result<()>;
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Produce playable audio for one chunk
    async fn synthesize(&self, chunk: &ReplyChunk) -> Result<Vec<u8>>;
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Stopped,
    TransportFault,
    InvariantViolation,
}

/// Everything handed to the finalize collaborator at session close
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallRecord {
    pub session_id: String,
    pub call_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub interactions: u64,
    pub close_reason: CloseReason,
    pub transcript: Vec<TranscriptEntry>,
}

#[async_trait]
pub trait Finalizer: Send + Sync {
    async fn finalize(&self, record: CallRecord) -> Result<()>;
}

/// The collaborators one session talks to
#[derive(Clone)]
pub struct Stages {
    pub transcriber: Arc<dyn Transcriber>,
    pub completer: Arc<dyn Completer>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub finalizer: Arc<dyn Finalizer>,
}

impl Stages {
    /// Build the network-backed stages from configuration
    pub fn from_config(config: &crate::config::Config) -> Result<Self> {
        Ok(Self {
            transcriber: Arc::new(LiveTranscriber::from_config(&config.transcription)?),
            completer: Arc::new(ChatCompleter::from_config(&config.completion, &config.session)?),
            synthesizer: Arc::new(SpeechSynthesizer::from_config(&config.synthesis)?),
            finalizer: finalizer_from_config(&config.recording)?,
        })
    }
}

/// Pick the call record sink named in configuration
pub fn finalizer_from_config(config: &RecordingConfig) -> Result<Arc<dyn Finalizer>> {
    Ok(match config.sink {
        RecordSink::Jsonl => Arc::new(JsonlRecorder::new(config.resolve_dir()?)),
        RecordSink::Log => Arc::new(LogFinalizer),
    })
}
