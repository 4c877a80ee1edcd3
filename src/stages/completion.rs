//! Streaming reply generation over an OpenAI-compatible chat API
//!
//! Deltas from the SSE stream are cut into speakable chunks at sentence
//! ends or at the `•` pause marker the system prompt asks for, so the first
//! chunk can be synthesized while the rest of the reply is still streaming.

use anyhow::{Result, Context, bail};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Completer, ReplyChunk, ReplyRequest};
use crate::config::{CompletionConfig, SessionConfig};
use crate::types::TranscriptEntry;

const PAUSE_MARKER: char = '•';

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Completion stage client
pub struct ChatCompleter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    system_prompt: String,
    context_window: usize,
}

impl ChatCompleter {
    pub fn from_config(config: &CompletionConfig, session: &SessionConfig) -> Result<Self> {
        let api_key = crate::security::keyring::get_provider_key("completion").ok();
        if api_key.is_none() {
            info!("No completion API key configured, sending unauthenticated requests");
        }
        Ok(Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            system_prompt: session.system_prompt.clone(),
            context_window: session.context_window,
        })
    }

    fn build_messages(&self, request: &ReplyRequest) -> Vec<ChatMessage> {
        build_messages(&self.system_prompt, &request.context, self.context_window, &request.user_text)
    }
}

fn build_messages(
    system_prompt: &str,
    context: &[TranscriptEntry],
    window: usize,
    user_text: &str,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage { role: "system", content: system_prompt.to_string() }];
    let skip = context.len().saturating_sub(window);
    messages.extend(context.iter().skip(skip).map(|entry| ChatMessage {
        role: entry.speaker.to_openai_string(),
        content: entry.text.clone(),
    }));
    messages.push(ChatMessage { role: "user", content: user_text.to_string() });
    messages
}

#[async_trait]
impl Completer for ChatCompleter {
    async fn request_reply(
        &self,
        request: ReplyRequest,
        chunks: mpsc::UnboundedSender<ReplyChunk>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let body = ChatRequest {
            model: &self.model,
            messages: self.build_messages(&request),
            max_tokens: self.max_tokens,
            stream: true,
        };

        let mut req_builder = self.client.post(format!("{}/chat/completions", self.base_url));
        if let Some(key) = &self.api_key {
            req_builder = req_builder.bearer_auth(key);
        }
        let response = req_builder
            .json(&body)
            .send()
            .await
            .context("Failed to send streaming request to completion provider")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Completion API error ({}): {}", status, body);
        }

        let mut stream = response.bytes_stream();
        let mut events = SseBuffer::default();
        let mut chunker = ReplyChunker::new(request.interaction_index);

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Interaction {}: completion cancelled", request.interaction_index);
                    return Ok(());
                }
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk.context("Failed to read stream chunk")?;

            for data in events.push(&chunk) {
                if data == "[DONE]" {
                    continue;
                }
                if let Ok(stream_resp) = serde_json::from_str::<StreamResponse>(&data) {
                    if let Some(content) = stream_resp.choices.first().and_then(|c| c.delta.content.as_deref()) {
                        for piece in chunker.push(content) {
                            if chunks.send(piece).is_err() {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }

        if let Some(piece) = chunker.finish() {
            let _ = chunks.send(piece);
        }
        Ok(())
    }
}

/// Raw SSE bytes split into events. Bytes are only decoded once a whole
/// event has arrived, so characters split across reads stay intact.
#[derive(Debug, Default)]
struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    /// Append a network read; returns the `data:` payloads of every completed event
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut data = Vec::new();
        while let Some(pos) = self.pending.windows(2).position(|w| w == b"\n\n") {
            let event: Vec<u8> = self.pending.drain(..pos + 2).collect();
            let Ok(event) = std::str::from_utf8(&event[..pos]) else {
                warn!("Dropping SSE event that is not valid UTF-8");
                continue;
            };
            data.extend(
                event
                    .lines()
                    .filter_map(|line| line.strip_prefix("data: "))
                    .map(str::to_string),
            );
        }
        data
    }
}

/// Cuts a streamed reply into chunks and numbers them in emission order
#[derive(Debug)]
pub struct ReplyChunker {
    interaction_index: u64,
    next_response_index: i64,
    current: String,
}

impl ReplyChunker {
    pub fn new(interaction_index: u64) -> Self {
        Self { interaction_index, next_response_index: 0, current: String::new() }
    }

    /// Feed a delta; returns the chunks it completed
    pub fn push(&mut self, delta: &str) -> Vec<ReplyChunk> {
        let mut ready = Vec::new();
        for ch in delta.chars() {
            if ch == PAUSE_MARKER {
                ready.extend(self.cut());
                continue;
            }
            let sentence_end = ch.is_whitespace()
                && self.current.ends_with(|c: char| matches!(c, '.' | '!' | '?'));
            if sentence_end {
                ready.extend(self.cut());
            }
            self.current.push(ch);
        }
        ready
    }

    /// Flush whatever is left when the stream ends
    pub fn finish(&mut self) -> Option<ReplyChunk> {
        self.cut()
    }

    fn cut(&mut self) -> Option<ReplyChunk> {
        let text = self.current.trim().to_string();
        self.current.clear();
        if text.is_empty() {
            return None;
        }
        let chunk = ReplyChunk {
            interaction_index: self.interaction_index,
            response_index: self.next_response_index,
            text,
        };
        self.next_response_index += 1;
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(chunks: &[ReplyChunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn test_chunker_splits_on_sentences_across_deltas() {
        let mut chunker = ReplyChunker::new(3);
        let mut out = chunker.push("Hi the");
        out.extend(chunker.push("re. How are"));
        out.extend(chunker.push(" you? Pi is 3.14"));
        out.extend(chunker.finish());

        assert_eq!(texts(&out), vec!["Hi there.", "How are you?", "Pi is 3.14"]);
        assert_eq!(out.iter().map(|c| c.response_index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(out.iter().all(|c| c.interaction_index == 3));
    }

    #[test]
    fn test_chunker_splits_on_pause_marker() {
        let mut chunker = ReplyChunker::new(1);
        let mut out = chunker.push("Great to hear • I was calling about • ");
        out.extend(chunker.push("your documents"));
        out.extend(chunker.finish());
        assert_eq!(texts(&out), vec!["Great to hear", "I was calling about", "your documents"]);
    }

    #[test]
    fn test_chunker_skips_empty_pieces() {
        let mut chunker = ReplyChunker::new(1);
        assert!(chunker.push("•  • ").is_empty());
        assert!(chunker.finish().is_none());
    }

    #[test]
    fn test_sse_buffer_keeps_split_characters() {
        let event = "data: {\"text\":\"Great to hear \u{2022} I was calling\"}\n\ndata: [DONE]\n\n".as_bytes();
        let split = event.iter().position(|&b| b == 0xE2).unwrap() + 1;

        let mut buffer = SseBuffer::default();
        assert!(buffer.push(&event[..split]).is_empty());
        let data = buffer.push(&event[split..]);
        assert_eq!(data, vec!["{\"text\":\"Great to hear \u{2022} I was calling\"}", "[DONE]"]);
    }

    /// Serves one chunked SSE response, writing each part separately
    async fn serve_sse(parts: Vec<Vec<u8>>) -> std::net::SocketAddr {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
                        .and_then(|v| v.parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\n\r\n")
                .await
                .unwrap();
            for part in parts {
                socket.write_all(format!("{:x}\r\n", part.len()).as_bytes()).await.unwrap();
                socket.write_all(&part).await.unwrap();
                socket.write_all(b"\r\n").await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            socket.write_all(b"0\r\n\r\n").await.unwrap();
            socket.flush().await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_pause_marker_split_across_reads() {
        let delta = serde_json::json!({ "choices": [{ "delta": { "content": "Great to hear \u{2022} I was calling" } }] });
        let body = format!("data: {}\n\ndata: [DONE]\n\n", delta).into_bytes();
        let split = body.iter().position(|&b| b == 0xE2).unwrap() + 1;
        let addr = serve_sse(vec![body[..split].to_vec(), body[split..].to_vec()]).await;

        let completer = ChatCompleter {
            client: Client::new(),
            base_url: format!("http://{}", addr),
            api_key: None,
            model: "test".to_string(),
            max_tokens: 64,
            system_prompt: "sys".to_string(),
            context_window: 4,
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = ReplyRequest { interaction_index: 2, user_text: "How are you?".to_string(), context: Vec::new() };
        completer.request_reply(request, tx, CancellationToken::new()).await.unwrap();

        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.push(chunk);
        }
        assert_eq!(texts(&out), vec!["Great to hear", "I was calling"]);
        assert_eq!(out.iter().map(|c| c.response_index).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_build_messages_window() {
        let context = vec![
            TranscriptEntry::agent("Hello!"),
            TranscriptEntry::caller("Hi"),
            TranscriptEntry::agent("How can I help?"),
        ];
        let messages = build_messages("sys", &context, 2, "Who is this?");
        let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(messages[1].content, "Hi");
        assert_eq!(messages[3].content, "Who is this?");
    }
}
