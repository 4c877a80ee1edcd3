//! Call session orchestrator
//!
//! A [`SessionOrchestrator`] owns one call from stream start to close:
//! - routes caller audio to the transcription stage
//! - opens an interaction per finished utterance and streams its reply
//!   through completion and synthesis
//! - releases synthesized audio in response order and tracks playback marks
//! - clears queued playback when the caller talks over the agent
//!
//! All session state is mutated from the single `run` loop. Stage calls run
//! in spawned tasks and report back over an internal channel, tagged with
//! the interaction they belong to.

use std::collections::HashMap;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::{SessionError, StageError};
use super::interaction::{AudioUnit, Interaction};
use super::sequencer::PlaybackSequencer;
use super::state::{Session, SessionSnapshot, SessionState};
use crate::config::SessionConfig;
use crate::stages::{
    CallRecord, CloseReason, ReplyChunk, ReplyRequest, Stages, TranscriptEvent, TranscriptionHandle,
};
use crate::transport::{TransportEvent, TransportSink};
use crate::types::TranscriptEntry;

/// Stream parameter that overrides the configured greeting for one call
pub const GREETING_PARAMETER: &str = "greeting";

/// Whether an utterance heard during playback is long enough to count as the caller taking over
pub fn is_interruption(text: &str, min_chars: usize) -> bool {
    let text = text.trim();
    !text.is_empty() && text.chars().count() >= min_chars
}

#[derive(Debug)]
enum StageEvent {
    Reply(ReplyChunk),
    ReplyFinished {
        interaction_index: u64,
        result: Result<(), StageError>,
    },
    Synthesized {
        chunk: ReplyChunk,
        result: Result<Vec<u8>, StageError>,
    },
}

enum Input {
    Transport(Option<TransportEvent>),
    Transcript(TranscriptEvent),
    Stage(StageEvent),
}

pub struct SessionOrchestrator {
    config: SessionConfig,
    stages: Stages,
    transport: TransportSink,
    state: SessionState,
    session: Option<Session>,
    active: Option<Interaction>,
    sequencer: PlaybackSequencer,
    /// Parent of every interaction token and of the transcription stream
    cancel: CancellationToken,
    transcription: Option<TranscriptionHandle>,
    transcript_tx: mpsc::UnboundedSender<TranscriptEvent>,
    transcript_rx: mpsc::UnboundedReceiver<TranscriptEvent>,
    stage_tx: mpsc::UnboundedSender<StageEvent>,
    stage_rx: mpsc::UnboundedReceiver<StageEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    transport_lost: Option<&'static str>,
    record: Option<CallRecord>,
}

impl SessionOrchestrator {
    pub fn new(config: SessionConfig, stages: Stages, transport: TransportSink) -> Self {
        let (transcript_tx, transcript_rx) = mpsc::unbounded_channel();
        let (stage_tx, stage_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::initial());

        Self {
            config,
            stages,
            transport,
            state: SessionState::AwaitingStart,
            session: None,
            active: None,
            sequencer: PlaybackSequencer::new(),
            cancel: CancellationToken::new(),
            transcription: None,
            transcript_tx,
            transcript_rx,
            stage_tx,
            stage_rx,
            snapshot_tx,
            transport_lost: None,
            record: None,
        }
    }

    /// Observe the session as it progresses
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let session = self.session.as_ref();
        SessionSnapshot {
            state: self.state,
            interaction_counter: session.map_or(0, |s| s.interaction_counter),
            active_interaction: session.map_or(0, |s| s.active_interaction),
            pending_marks: session.map_or(0, |s| s.pending_marks.len()),
            transcript_lines: session.map_or(0, |s| s.transcript_log.len()),
        }
    }

    /// Drive the session until it closes.
    ///
    /// Returns the call record handed to the finalizer, or `None` when the
    /// stream ended before it started. A broken invariant still closes and
    /// finalizes the session before the error is returned.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Result<Option<CallRecord>, SessionError> {
        let mut violation = None;

        while self.state != SessionState::Closed {
            let input = tokio::select! {
                biased;
                event = events.recv() => Input::Transport(event),
                Some(event) = self.transcript_rx.recv() => Input::Transcript(event),
                Some(event) = self.stage_rx.recv() => Input::Stage(event),
            };

            match self.handle_input(input).await {
                Ok(()) => {
                    if let Some(reason) = self.transport_lost.take() {
                        warn!("Transport lost: {}", reason);
                        self.close(CloseReason::TransportFault).await;
                    }
                }
                Err(err) => {
                    error!("Session invariant violated: {}", err);
                    self.close(CloseReason::InvariantViolation).await;
                    violation = Some(err);
                }
            }
            self.publish();
        }

        match violation {
            Some(err) => Err(err),
            None => Ok(self.record),
        }
    }

    async fn handle_input(&mut self, input: Input) -> Result<(), SessionError> {
        match input {
            Input::Transport(Some(event)) => self.handle_transport_event(event).await,
            Input::Transport(None) => {
                self.handle_transport_event(TransportEvent::Fault {
                    reason: "connection dropped".to_string(),
                })
                .await
            }
            Input::Transcript(event) => {
                self.handle_transcript(event);
                Ok(())
            }
            Input::Stage(event) => self.handle_stage_event(event),
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) -> Result<(), SessionError> {
        match self.state {
            SessionState::AwaitingStart => match event {
                TransportEvent::Start { stream_id, call_id, parameters } => {
                    self.start(stream_id, call_id, parameters).await?;
                }
                TransportEvent::Stop => {
                    info!("Stream stopped before it started");
                    self.close(CloseReason::Stopped).await;
                }
                TransportEvent::Fault { reason } => {
                    warn!("Transport fault before stream start: {}", reason);
                    self.close(CloseReason::TransportFault).await;
                }
                TransportEvent::Audio { .. } | TransportEvent::MarkAck { .. } => {
                    debug!("Ignoring transport event before stream start");
                }
            },
            SessionState::Streaming => match event {
                TransportEvent::Start { stream_id, .. } => {
                    warn!("Duplicate start for stream {}, ignoring", stream_id);
                }
                TransportEvent::Audio { payload } => self.forward_audio(payload),
                TransportEvent::MarkAck { label } => self.acknowledge_mark(&label),
                TransportEvent::Stop => {
                    info!("Media stream stopped");
                    self.close(CloseReason::Stopped).await;
                }
                TransportEvent::Fault { reason } => {
                    warn!("Transport fault: {}", reason);
                    self.close(CloseReason::TransportFault).await;
                }
            },
            SessionState::Closing | SessionState::Closed => {
                debug!("Ignoring transport event on closed session");
            }
        }
        Ok(())
    }

    async fn start(
        &mut self,
        stream_id: String,
        call_id: String,
        parameters: HashMap<String, String>,
    ) -> Result<(), SessionError> {
        info!("Media stream {} started for call {}", stream_id, call_id);
        self.session = Some(Session::new(stream_id, call_id));

        let limit = self.config.transcription_connect_timeout();
        let connect = self.stages.transcriber.connect(self.transcript_tx.clone(), self.cancel.child_token());
        match timeout(limit, connect).await {
            Ok(Ok(handle)) => self.transcription = Some(handle),
            Ok(Err(e)) => warn!("Transcription unavailable, caller audio will be ignored: {:#}", e),
            Err(_) => warn!("Transcription connect timed out after {:?}", limit),
        }

        self.state = SessionState::Streaming;

        let greeting = parameters
            .get(GREETING_PARAMETER)
            .cloned()
            .unwrap_or_else(|| self.config.greeting.clone());
        self.speak_greeting(&greeting)
    }

    /// The greeting is played as interaction 0, a single pre-completed chunk
    fn speak_greeting(&mut self, text: &str) -> Result<(), SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let mut interaction = Interaction::new(0, "", self.cancel.child_token());
        let chunk = ReplyChunk { interaction_index: 0, response_index: 0, text: text.to_string() };
        interaction.record_chunk(&chunk)?;
        interaction.mark_reply_complete();

        info!("Interaction 0: greeting -> TTS: {}", text);
        self.sequencer.start(0);
        self.spawn_synthesis(chunk, interaction.token());
        self.active = Some(interaction);
        Ok(())
    }

    fn forward_audio(&mut self, payload: Vec<u8>) {
        if let Some(handle) = &self.transcription {
            if !handle.send_audio(payload) {
                warn!("Transcription stream closed, caller audio will be ignored");
                self.transcription = None;
            }
        }
    }

    fn acknowledge_mark(&mut self, label: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.pending_marks.acknowledge(label) {
            debug!("Mark {} played ({} pending)", label, session.pending_marks.len());
        } else {
            debug!("Ack for unknown mark {}", label);
        }
    }

    fn handle_transcript(&mut self, event: TranscriptEvent) {
        if self.state != SessionState::Streaming {
            debug!("Dropping transcript on inactive session");
            return;
        }
        match event {
            TranscriptEvent::Interim(text) => {
                self.check_barge_in(&text);
            }
            TranscriptEvent::Final(text) => self.handle_utterance(&text),
        }
    }

    /// Cancel the active reply and flush queued playback if the caller is talking over it.
    /// Returns true if playback was cleared.
    fn check_barge_in(&mut self, text: &str) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if session.pending_marks.is_empty() || !is_interruption(text, self.config.barge_in_min_chars) {
            return false;
        }

        if let Some(active) = &self.active {
            active.cancel();
        }
        let cleared = session.pending_marks.clear();
        self.sequencer.reset();
        info!("Interruption detected, clearing {} queued marks: {}", cleared, text.trim());

        if self.transport.clear_buffer().is_err() {
            self.transport_lost = Some("clear command not delivered");
        }
        true
    }

    fn handle_utterance(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        self.check_barge_in(text);

        let Some(session) = self.session.as_mut() else {
            return;
        };
        let context = session.transcript_log.clone();
        session.transcript_log.push(TranscriptEntry::caller(text));
        let index = session.begin_interaction();
        info!("Interaction {}: STT -> completion: {}", index, text);

        if let Some(previous) = self.active.take() {
            if !previous.is_finished() {
                debug!("Interaction {} superseded by {}", previous.index, index);
            }
            previous.cancel();
        }

        self.sequencer.start(index);
        let interaction = Interaction::new(index, text, self.cancel.child_token());
        let request = ReplyRequest { interaction_index: index, user_text: text.to_string(), context };
        self.spawn_completion(request, interaction.token());
        self.active = Some(interaction);
    }

    fn handle_stage_event(&mut self, event: StageEvent) -> Result<(), SessionError> {
        if self.state != SessionState::Streaming {
            return Ok(());
        }
        match event {
            StageEvent::Reply(chunk) => self.accept_reply_chunk(chunk),
            StageEvent::ReplyFinished { interaction_index, result } => {
                self.finish_reply(interaction_index, result);
                Ok(())
            }
            StageEvent::Synthesized { chunk, result } => self.accept_synthesis(chunk, result),
        }
    }

    fn accept_reply_chunk(&mut self, chunk: ReplyChunk) -> Result<(), SessionError> {
        let Some(active) = self.active.as_mut().filter(|a| a.accepts(chunk.interaction_index)) else {
            debug!(
                "Discarding reply chunk {}/{} from inactive interaction",
                chunk.interaction_index, chunk.response_index
            );
            return Ok(());
        };

        active.record_chunk(&chunk)?;
        info!("Interaction {}: completion -> TTS: {}", chunk.interaction_index, chunk.text);
        let token = active.token();
        self.spawn_synthesis(chunk, token);
        Ok(())
    }

    fn finish_reply(&mut self, interaction_index: u64, result: Result<(), StageError>) {
        let Some(active) = self.active.as_mut().filter(|a| a.index == interaction_index) else {
            return;
        };
        if let Err(err) = result {
            if !active.is_cancelled() {
                warn!("Interaction {}: completion failed: {}", interaction_index, err);
            }
        }
        active.mark_reply_complete();
        self.log_if_finished();
    }

    fn accept_synthesis(
        &mut self,
        chunk: ReplyChunk,
        result: Result<Vec<u8>, StageError>,
    ) -> Result<(), SessionError> {
        if !self.active.as_ref().is_some_and(|a| a.accepts(chunk.interaction_index)) {
            debug!(
                "Discarding audio for {}/{} from inactive interaction",
                chunk.interaction_index, chunk.response_index
            );
            return Ok(());
        }

        let (interaction_index, response_index) = (chunk.interaction_index, chunk.response_index);
        let ready = match result {
            Ok(audio) if !audio.is_empty() => self.sequencer.accept(AudioUnit::new(chunk, audio)),
            Ok(_) => {
                warn!("Interaction {}: no audio for chunk {}, skipping", interaction_index, response_index);
                self.skip_unit(interaction_index, response_index)
            }
            Err(err) => {
                warn!(
                    "Interaction {}: synthesis failed for chunk {}, skipping: {}",
                    interaction_index, response_index, err
                );
                self.skip_unit(interaction_index, response_index)
            }
        };
        self.play(ready)
    }

    fn skip_unit(&mut self, interaction_index: u64, response_index: i64) -> Vec<AudioUnit> {
        if let Some(active) = self.active.as_mut() {
            active.mark_settled(1);
        }
        self.sequencer.skip(interaction_index, response_index)
    }

    /// Hand in-order units to the transport, each followed by its mark
    fn play(&mut self, units: Vec<AudioUnit>) -> Result<(), SessionError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };

        for unit in units {
            session.pending_marks.insert(unit.mark_label.clone())?;
            let sent = self
                .transport
                .send_audio(unit.audio)
                .and_then(|_| self.transport.request_mark(unit.mark_label.as_str()));
            if sent.is_err() {
                self.transport_lost = Some("audio not delivered");
                return Ok(());
            }

            info!(
                "Interaction {}: TTS -> transport: chunk {} ({} marks pending)",
                unit.interaction_index,
                unit.response_index,
                session.pending_marks.len()
            );
            session.transcript_log.push(TranscriptEntry::agent(unit.text));
            if let Some(active) = self.active.as_mut() {
                active.mark_settled(1);
            }
        }

        self.log_if_finished();
        Ok(())
    }

    fn log_if_finished(&self) {
        if let Some(active) = self.active.as_ref() {
            if active.is_finished() && !active.is_cancelled() {
                info!("Interaction {} complete ({} chunks)", active.index, active.reply_chunks.len());
            }
        }
    }

    fn spawn_completion(&self, request: ReplyRequest, cancel: CancellationToken) {
        let completer = self.stages.completer.clone();
        let stage_tx = self.stage_tx.clone();
        let limit = self.config.completion_timeout();
        let interaction_index = request.interaction_index;

        tokio::spawn(async move {
            let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
            let forward_tx = stage_tx.clone();
            let forward = async move {
                while let Some(chunk) = chunk_rx.recv().await {
                    if forward_tx.send(StageEvent::Reply(chunk)).is_err() {
                        break;
                    }
                }
            };
            let reply = async {
                tokio::select! {
                    _ = cancel.cancelled() => Ok(()),
                    result = timeout(limit, completer.request_reply(request, chunk_tx, cancel.clone())) => match result {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(StageError::from(e)),
                        Err(_) => Err(StageError::TimedOut(limit)),
                    },
                }
            };

            // Every forwarded chunk is queued before the finish notice
            let (result, ()) = tokio::join!(reply, forward);
            let _ = stage_tx.send(StageEvent::ReplyFinished { interaction_index, result });
        });
    }

    fn spawn_synthesis(&self, chunk: ReplyChunk, cancel: CancellationToken) {
        let synthesizer = self.stages.synthesizer.clone();
        let stage_tx = self.stage_tx.clone();
        let limit = self.config.synthesis_timeout();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = timeout(limit, synthesizer.synthesize(&chunk)) => match result {
                    Ok(Ok(audio)) => Ok(audio),
                    Ok(Err(e)) => Err(StageError::from(e)),
                    Err(_) => Err(StageError::TimedOut(limit)),
                },
            };
            let _ = stage_tx.send(StageEvent::Synthesized { chunk, result });
        });
    }

    /// Cancel all outstanding work and hand the record to the finalizer once
    async fn close(&mut self, reason: CloseReason) {
        if matches!(self.state, SessionState::Closing | SessionState::Closed) {
            return;
        }

        self.cancel.cancel();
        self.transcription = None;
        self.sequencer.reset();

        let Some(session) = self.session.as_ref() else {
            self.state = SessionState::Closed;
            return;
        };

        self.state = SessionState::Closing;
        self.publish();
        info!("Closing session {} for call {} ({:?})", session.session_id, session.call_id, reason);

        let record = session.record(reason);
        let limit = self.config.finalize_timeout();
        match timeout(limit, self.stages.finalizer.finalize(record.clone())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Finalize failed for call {}: {:#}", record.call_id, e),
            Err(_) => warn!("Finalize timed out after {:?} for call {}", limit, record.call_id),
        }

        self.record = Some(record);
        self.state = SessionState::Closed;
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}
