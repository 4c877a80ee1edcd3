//! Controllable stage doubles and a session harness for integration tests

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use call_agent::config::SessionConfig;
use call_agent::stages::{
    Completer, Finalizer, ReplyChunk, ReplyRequest, Synthesizer, Transcriber, TranscriptEvent,
    TranscriptionHandle,
};
use call_agent::{
    CallRecord, SessionError, SessionOrchestrator, SessionSnapshot, Stages, TransportCommand,
    TransportEvent, TransportSink,
};

pub const WAIT: Duration = Duration::from_secs(3);

/// Key of one synthesis request: (interaction, response index)
pub type UnitKey = (u64, i64);

// ─── Transcription ───────────────────────────────────────────

/// Relays transcripts pushed by the test into whichever session connects
pub struct ChannelTranscriber {
    events: Mutex<Option<mpsc::UnboundedReceiver<TranscriptEvent>>>,
    audio_tx: mpsc::UnboundedSender<Vec<u8>>,
}

pub struct TranscriptFeed {
    pub events: mpsc::UnboundedSender<TranscriptEvent>,
    pub audio: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl TranscriptFeed {
    pub fn interim(&self, text: &str) {
        self.events.send(TranscriptEvent::Interim(text.to_string())).unwrap();
    }

    pub fn utterance(&self, text: &str) {
        self.events.send(TranscriptEvent::Final(text.to_string())).unwrap();
    }
}

impl ChannelTranscriber {
    pub fn new() -> (Self, TranscriptFeed) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let transcriber = Self { events: Mutex::new(Some(events_rx)), audio_tx };
        (transcriber, TranscriptFeed { events: events_tx, audio: audio_rx })
    }
}

#[async_trait]
impl Transcriber for ChannelTranscriber {
    async fn connect(
        &self,
        events: mpsc::UnboundedSender<TranscriptEvent>,
        cancel: CancellationToken,
    ) -> Result<TranscriptionHandle> {
        let mut source = self
            .events
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow!("transcriber already connected"))?;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = source.recv() => match event {
                        Some(event) => {
                            if events.send(event).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });
        Ok(TranscriptionHandle::new(self.audio_tx.clone()))
    }
}

// ─── Completion ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Reply {
    pub chunks: Vec<(i64, String)>,
    /// Keep the request open after the last chunk until cancelled
    pub hold_open: bool,
}

impl Reply {
    pub fn sequential(texts: &[&str]) -> Self {
        Self {
            chunks: texts.iter().enumerate().map(|(i, t)| (i as i64, t.to_string())).collect(),
            hold_open: false,
        }
    }

    pub fn held(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

/// Answers each utterance from a script, keyed by the caller's text
#[derive(Default)]
pub struct ScriptedCompleter {
    replies: Mutex<HashMap<String, Reply>>,
    requests: Mutex<Vec<ReplyRequest>>,
    open: Arc<Mutex<HashSet<u64>>>,
}

/// Removes a request from the open set when its future finishes or is dropped
struct OpenGuard<K: std::hash::Hash + Eq + Copy> {
    set: Arc<Mutex<HashSet<K>>>,
    key: K,
}

impl<K: std::hash::Hash + Eq + Copy> OpenGuard<K> {
    fn new(set: Arc<Mutex<HashSet<K>>>, key: K) -> Self {
        set.lock().unwrap().insert(key);
        Self { set, key }
    }
}

impl<K: std::hash::Hash + Eq + Copy> Drop for OpenGuard<K> {
    fn drop(&mut self) {
        self.set.lock().unwrap().remove(&self.key);
    }
}

impl ScriptedCompleter {
    pub fn script(&self, utterance: &str, reply: Reply) {
        self.replies.lock().unwrap().insert(utterance.to_string(), reply);
    }

    pub fn requests(&self) -> Vec<ReplyRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn is_open(&self, interaction_index: u64) -> bool {
        self.open.lock().unwrap().contains(&interaction_index)
    }
}

#[async_trait]
impl Completer for ScriptedCompleter {
    async fn request_reply(
        &self,
        request: ReplyRequest,
        chunks: mpsc::UnboundedSender<ReplyChunk>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let _guard = OpenGuard::new(self.open.clone(), request.interaction_index);
        self.requests.lock().unwrap().push(request.clone());

        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(&request.user_text)
            .cloned()
            .unwrap_or_else(|| Reply::sequential(&["Sorry, could you repeat that?"]));

        for (response_index, text) in reply.chunks {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let chunk = ReplyChunk { interaction_index: request.interaction_index, response_index, text };
            if chunks.send(chunk).is_err() {
                return Ok(());
            }
        }
        if reply.hold_open {
            cancel.cancelled().await;
        }
        Ok(())
    }
}

// ─── Synthesis ───────────────────────────────────────────────

/// Holds each synthesis request until the test releases it.
/// Audio is the chunk text as bytes.
pub struct GatedSynthesizer {
    gated: bool,
    gates: Mutex<HashMap<UnitKey, Arc<Notify>>>,
    failing: Mutex<HashSet<UnitKey>>,
    in_flight: Arc<Mutex<HashSet<UnitKey>>>,
}

impl GatedSynthesizer {
    pub fn gated() -> Self {
        Self::with_gates(true)
    }

    /// Returns audio immediately
    pub fn open() -> Self {
        Self::with_gates(false)
    }

    fn with_gates(gated: bool) -> Self {
        Self {
            gated,
            gates: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn gate(&self, key: UnitKey) -> Arc<Notify> {
        self.gates.lock().unwrap().entry(key).or_default().clone()
    }

    /// Let one request finish (also works before the request arrives)
    pub fn release(&self, interaction_index: u64, response_index: i64) {
        self.gate((interaction_index, response_index)).notify_one();
    }

    pub fn fail(&self, interaction_index: u64, response_index: i64) {
        self.failing.lock().unwrap().insert((interaction_index, response_index));
    }

    pub fn in_flight(&self, interaction_index: u64) -> usize {
        self.in_flight.lock().unwrap().iter().filter(|(i, _)| *i == interaction_index).count()
    }
}

#[async_trait]
impl Synthesizer for GatedSynthesizer {
    async fn synthesize(&self, chunk: &ReplyChunk) -> Result<Vec<u8>> {
        let key = (chunk.interaction_index, chunk.response_index);
        let _guard = OpenGuard::new(self.in_flight.clone(), key);
        if self.gated {
            self.gate(key).notified().await;
        }
        if self.failing.lock().unwrap().contains(&key) {
            return Err(anyhow!("voice unavailable"));
        }
        Ok(chunk.text.as_bytes().to_vec())
    }
}

// ─── Finalize ────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingFinalizer {
    records: Mutex<Vec<CallRecord>>,
}

impl RecordingFinalizer {
    pub fn records(&self) -> Vec<CallRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl Finalizer for RecordingFinalizer {
    async fn finalize(&self, record: CallRecord) -> Result<()> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

// ─── Harness ─────────────────────────────────────────────────

pub fn test_config(greeting: &str) -> SessionConfig {
    SessionConfig {
        greeting: greeting.to_string(),
        completion_timeout_ms: 2_000,
        synthesis_timeout_ms: 2_000,
        finalize_timeout_ms: 1_000,
        ..SessionConfig::default()
    }
}

pub struct CallHarness {
    pub events: Option<mpsc::UnboundedSender<TransportEvent>>,
    pub commands: mpsc::UnboundedReceiver<TransportCommand>,
    pub snapshots: watch::Receiver<SessionSnapshot>,
    pub feed: TranscriptFeed,
    pub completer: Arc<ScriptedCompleter>,
    pub synthesizer: Arc<GatedSynthesizer>,
    pub finalizer: Arc<RecordingFinalizer>,
    pub session: JoinHandle<Result<Option<CallRecord>, SessionError>>,
}

impl CallHarness {
    pub fn spawn(config: SessionConfig, synthesizer: GatedSynthesizer) -> Self {
        let (transcriber, feed) = ChannelTranscriber::new();
        let completer = Arc::new(ScriptedCompleter::default());
        let synthesizer = Arc::new(synthesizer);
        let finalizer = Arc::new(RecordingFinalizer::default());
        let stages = Stages {
            transcriber: Arc::new(transcriber),
            completer: completer.clone(),
            synthesizer: synthesizer.clone(),
            finalizer: finalizer.clone(),
        };

        let (sink, commands) = TransportSink::channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let orchestrator = SessionOrchestrator::new(config, stages, sink);
        let snapshots = orchestrator.subscribe();
        let session = tokio::spawn(orchestrator.run(events_rx));

        Self {
            events: Some(events_tx),
            commands,
            snapshots,
            feed,
            completer,
            synthesizer,
            finalizer,
            session,
        }
    }

    pub fn send(&self, event: TransportEvent) {
        // the session may already have closed
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    pub async fn start(&mut self) {
        self.send(TransportEvent::Start {
            stream_id: "MZ0001".to_string(),
            call_id: "CA0001".to_string(),
            parameters: HashMap::new(),
        });
        self.wait_for(|s| s.state == call_agent::SessionState::Streaming).await;
    }

    pub async fn next_command(&mut self) -> TransportCommand {
        tokio::time::timeout(WAIT, self.commands.recv())
            .await
            .expect("timed out waiting for a transport command")
            .expect("transport command channel closed")
    }

    /// Next played unit: its audio and the mark requested right after it
    pub async fn next_played(&mut self) -> (String, String) {
        let audio = match self.next_command().await {
            TransportCommand::SendAudio(audio) => String::from_utf8(audio).unwrap(),
            other => panic!("expected audio, got {:?}", other),
        };
        let mark = match self.next_command().await {
            TransportCommand::RequestMark(label) => label,
            other => panic!("expected mark, got {:?}", other),
        };
        (audio, mark)
    }

    /// Nothing further reaches the transport within a short window
    pub async fn assert_quiet(&mut self) {
        let extra = tokio::time::timeout(Duration::from_millis(150), self.commands.recv()).await;
        assert!(extra.is_err(), "unexpected transport command: {:?}", extra);
    }

    pub async fn wait_for(&mut self, condition: impl Fn(&SessionSnapshot) -> bool) -> SessionSnapshot {
        let snapshot = tokio::time::timeout(WAIT, self.snapshots.wait_for(|s| condition(s)))
            .await
            .expect("timed out waiting for session state")
            .expect("session dropped")
            .clone();
        snapshot
    }

    pub async fn ack(&self, label: &str) {
        self.send(TransportEvent::MarkAck { label: label.to_string() });
    }

    pub async fn finish(mut self) -> Result<Option<CallRecord>, SessionError> {
        self.send(TransportEvent::Stop);
        self.events = None;
        tokio::time::timeout(WAIT, self.session)
            .await
            .expect("session did not close")
            .expect("session task panicked")
    }
}

/// Poll until `condition` holds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
