//! Call Agent - live phone conversation orchestrator
//!
//! Connects a telephony media stream to three streaming AI stages:
//! - speech-to-text over a WebSocket with interim results
//! - chat completion streamed as speakable chunks
//! - text-to-speech per chunk, played back in order
//!
//! Each call runs in its own [`SessionOrchestrator`], which cancels the
//! agent's reply and flushes queued audio when the caller talks over it.
//!
//! # Example
//!
//! ```ignore
//! use call_agent::{Config, Stages, SessionOrchestrator, TransportSink};
//!
//! let config = Config::load()?;
//! let stages = Stages::from_config(&config)?;
//! let (sink, commands) = TransportSink::channel();
//! let record = SessionOrchestrator::new(config.session.clone(), stages, sink)
//!     .run(events)
//!     .await?;
//! ```

pub mod types;
pub mod config;
pub mod security;
pub mod transport;
pub mod stages;
pub mod session;
pub mod server;
pub mod cli;

pub use config::Config;

pub use session::{
    SessionError,
    SessionOrchestrator,
    SessionSnapshot,
    SessionState,
};

pub use stages::{
    CallRecord,
    CloseReason,
    Stages,
};

pub use transport::{
    TransportCommand,
    TransportEvent,
    TransportSink,
};

pub use server::{
    ServerState,
    start as start_server,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Live phone conversation agent", NAME, VERSION)
}

/// Truncate to at most `max_chars` characters without splitting a UTF-8 sequence
pub fn truncate_safe(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_safe() {
        assert_eq!(truncate_safe("hello", 10), "hello");
        assert_eq!(truncate_safe("hello", 2), "he");
        assert_eq!(truncate_safe("héllo", 2), "hé");
        assert_eq!(truncate_safe("", 3), "");
    }
}
