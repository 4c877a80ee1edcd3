//! Audio transport adapter
//!
//! The session core only sees [`TransportEvent`]s coming in and issues
//! [`TransportCommand`]s going out. [`media_stream`] maps both to the
//! telephony provider's JSON media-stream frames.

pub mod media_stream;

use std::collections::HashMap;
use tokio::sync::mpsc;

/// Events delivered by the transport to a call session
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Media stream opened for a call leg
    Start {
        stream_id: String,
        call_id: String,
        /// Custom parameters attached to the stream by the call placer
        parameters: HashMap<String, String>,
    },
    /// Raw caller audio (already base64-decoded)
    Audio { payload: Vec<u8> },
    /// Playback of the audio preceding this mark finished on the caller's side
    MarkAck { label: String },
    /// Media stream ended normally
    Stop,
    /// Connection dropped or an undecodable frame arrived
    Fault { reason: String },
}

/// Commands the session issues to the transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCommand {
    SendAudio(Vec<u8>),
    RequestMark(String),
    ClearBuffer,
}

/// The transport side went away; nothing more can be sent on this call
#[derive(Debug, Clone, thiserror::Error)]
#[error("transport closed")]
pub struct TransportClosed;

/// Outbound half of the transport as seen by a session
#[derive(Debug, Clone)]
pub struct TransportSink {
    tx: mpsc::UnboundedSender<TransportCommand>,
}

impl TransportSink {
    pub fn new(tx: mpsc::UnboundedSender<TransportCommand>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiver the connection writer drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn send_audio(&self, audio: Vec<u8>) -> Result<(), TransportClosed> {
        self.send(TransportCommand::SendAudio(audio))
    }

    pub fn request_mark(&self, label: impl Into<String>) -> Result<(), TransportClosed> {
        self.send(TransportCommand::RequestMark(label.into()))
    }

    pub fn clear_buffer(&self) -> Result<(), TransportClosed> {
        self.send(TransportCommand::ClearBuffer)
    }

    fn send(&self, command: TransportCommand) -> Result<(), TransportClosed> {
        self.tx.send(command).map_err(|_| TransportClosed)
    }
}
