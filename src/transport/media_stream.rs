//! Media-stream wire codec
//!
//! Inbound frames are JSON text messages tagged by `event`:
//! `connected`, `start`, `media`, `mark`, `stop` (plus `dtmf` and others we
//! ignore). Audio payloads are base64 μ-law. Outbound `media`, `mark` and
//! `clear` frames carry the stream id they belong to.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{TransportCommand, TransportEvent};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid audio payload: {0}")]
    Payload(#[from] base64::DecodeError),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum InboundFrame {
    Connected,
    Start { start: StartPayload },
    Media { media: MediaPayload },
    Mark { mark: MarkPayload },
    Stop,
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartPayload {
    stream_sid: String,
    call_sid: String,
    #[serde(default)]
    custom_parameters: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct MediaPayload {
    payload: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct MarkPayload {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum OutboundFrame<'a> {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        media: MediaPayload,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        mark: MarkPayload,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
    },
}

/// Decode one inbound text frame. `Ok(None)` for frames the session does not care about.
pub fn decode_frame(text: &str) -> Result<Option<TransportEvent>, FrameError> {
    let frame: InboundFrame = serde_json::from_str(text)?;
    let event = match frame {
        InboundFrame::Start { start } => Some(TransportEvent::Start {
            stream_id: start.stream_sid,
            call_id: start.call_sid,
            parameters: start.custom_parameters,
        }),
        InboundFrame::Media { media } => Some(TransportEvent::Audio {
            payload: BASE64.decode(media.payload.as_bytes())?,
        }),
        InboundFrame::Mark { mark } => Some(TransportEvent::MarkAck { label: mark.name }),
        InboundFrame::Stop => Some(TransportEvent::Stop),
        InboundFrame::Connected | InboundFrame::Other => None,
    };
    Ok(event)
}

/// Encode a session command as an outbound text frame for `stream_sid`
pub fn encode_command(command: &TransportCommand, stream_sid: &str) -> String {
    let frame = match command {
        TransportCommand::SendAudio(audio) => OutboundFrame::Media {
            stream_sid,
            media: MediaPayload { payload: BASE64.encode(audio) },
        },
        TransportCommand::RequestMark(label) => OutboundFrame::Mark {
            stream_sid,
            mark: MarkPayload { name: label.clone() },
        },
        TransportCommand::ClearBuffer => OutboundFrame::Clear { stream_sid },
    };
    serde_json::to_string(&frame).unwrap_or_default()
}

/// XML document that tells the telephony provider to connect the call's media here
pub fn connect_stream_document(public_host: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><Response><Connect><Stream url="wss://{}/connection" /></Connect></Response>"#,
        public_host.trim_end_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_start() {
        let text = r#"{"event":"start","sequenceNumber":"1","streamSid":"MZ1",
            "start":{"accountSid":"AC1","streamSid":"MZ1","callSid":"CA1","tracks":["inbound"],
            "mediaFormat":{"encoding":"audio/x-mulaw","sampleRate":8000,"channels":1},
            "customParameters":{"greeting":"Hi there"}}}"#;
        match decode_frame(text).unwrap() {
            Some(TransportEvent::Start { stream_id, call_id, parameters }) => {
                assert_eq!(stream_id, "MZ1");
                assert_eq!(call_id, "CA1");
                assert_eq!(parameters.get("greeting").map(String::as_str), Some("Hi there"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_media_mark_stop() {
        let media = r#"{"event":"media","streamSid":"MZ1","media":{"track":"inbound","chunk":"2","timestamp":"5","payload":"AQID"}}"#;
        assert_eq!(decode_frame(media).unwrap(), Some(TransportEvent::Audio { payload: vec![1, 2, 3] }));

        let mark = r#"{"event":"mark","streamSid":"MZ1","mark":{"name":"abc"}}"#;
        assert_eq!(decode_frame(mark).unwrap(), Some(TransportEvent::MarkAck { label: "abc".to_string() }));

        let stop = r#"{"event":"stop","streamSid":"MZ1","stop":{"callSid":"CA1"}}"#;
        assert_eq!(decode_frame(stop).unwrap(), Some(TransportEvent::Stop));
    }

    #[test]
    fn test_ignored_frames() {
        assert_eq!(decode_frame(r#"{"event":"connected","protocol":"Call","version":"1.0.0"}"#).unwrap(), None);
        assert_eq!(decode_frame(r#"{"event":"dtmf","dtmf":{"digit":"1"}}"#).unwrap(), None);
    }

    #[test]
    fn test_malformed_frames() {
        assert!(decode_frame("not json").is_err());
        assert!(decode_frame(r#"{"event":"media","media":{"payload":"***"}}"#).is_err());
        assert!(decode_frame(r#"{"event":"start","start":{}}"#).is_err());
    }

    #[test]
    fn test_encode_commands() {
        let media: serde_json::Value =
            serde_json::from_str(&encode_command(&TransportCommand::SendAudio(vec![1, 2, 3]), "MZ1")).unwrap();
        assert_eq!(media["event"], "media");
        assert_eq!(media["streamSid"], "MZ1");
        assert_eq!(media["media"]["payload"], "AQID");

        let mark: serde_json::Value =
            serde_json::from_str(&encode_command(&TransportCommand::RequestMark("m1".into()), "MZ1")).unwrap();
        assert_eq!(mark["mark"]["name"], "m1");

        assert_eq!(
            encode_command(&TransportCommand::ClearBuffer, "MZ1"),
            r#"{"event":"clear","streamSid":"MZ1"}"#
        );
    }

    #[test]
    fn test_connect_stream_document() {
        let doc = connect_stream_document("agent.example.com/");
        assert!(doc.contains(r#"<Stream url="wss://agent.example.com/connection" />"#));
    }
}
