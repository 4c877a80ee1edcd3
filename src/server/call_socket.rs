//! Media stream WebSocket handler
//!
//! Bridges one provider media stream to one [`SessionOrchestrator`]:
//! - inbound JSON frames are decoded into transport events
//! - session commands are encoded back into frames by a writer task,
//!   addressed to the stream id learned from the `start` frame

use axum::{
    extract::{ws::{Message, WebSocket, WebSocketUpgrade}, State},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::session::SessionOrchestrator;
use crate::transport::{media_stream, TransportEvent, TransportSink};

use super::ServerState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_upgrade(|socket| handle_call(socket, state))
}

async fn handle_call(ws: WebSocket, state: ServerState) {
    info!("Media stream connected");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (sink, mut commands) = TransportSink::channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (stream_sid_tx, stream_sid_rx) = watch::channel(String::new());

    let orchestrator = SessionOrchestrator::new(state.config.session.clone(), state.stages.clone(), sink);
    let session = tokio::spawn(orchestrator.run(events_rx));

    let writer = tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            let frame = media_stream::encode_command(&command, &stream_sid_rx.borrow());
            if let Err(e) = ws_tx.send(Message::Text(frame.into())).await {
                warn!("Media stream send failed: {}", e);
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(message) = ws_rx.next().await {
        let event = match message {
            Ok(Message::Text(text)) => match media_stream::decode_frame(text.as_str()) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => TransportEvent::Fault { reason: format!("malformed frame: {}", e) },
            },
            Ok(Message::Close(frame)) => {
                debug!("Media stream closed by provider: {:?}", frame);
                break;
            }
            Ok(_) => continue,
            Err(e) => TransportEvent::Fault { reason: e.to_string() },
        };

        if let TransportEvent::Start { stream_id, .. } = &event {
            stream_sid_tx.send_replace(stream_id.clone());
        }
        let terminal = matches!(event, TransportEvent::Stop | TransportEvent::Fault { .. });
        if events_tx.send(event).is_err() || terminal {
            break;
        }
    }
    drop(events_tx);

    match session.await {
        Ok(Ok(Some(record))) => info!(
            "Call {} finished after {} interactions ({:?})",
            record.call_id, record.interactions, record.close_reason
        ),
        Ok(Ok(None)) => info!("Media stream closed before it started"),
        Ok(Err(e)) => error!("Call session aborted: {}", e),
        Err(e) => error!("Call session task failed: {}", e),
    }
    let _ = writer.await;
}
