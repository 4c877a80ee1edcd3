//! Shared types used across modules
//!
//! Types that both the session core and the stage clients need, kept here
//! to avoid circular dependencies between `session` and `stages`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single line of the call transcript
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn caller(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Caller,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Agent,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Who said a transcript line
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Caller,
    Agent,
}

impl Speaker {
    /// Convert to OpenAI-style role string
    pub fn to_openai_string(&self) -> &'static str {
        match self {
            Speaker::Caller => "user",
            Speaker::Agent => "assistant",
        }
    }
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Speaker::Caller => write!(f, "Contact"),
            Speaker::Agent => write!(f, "Agent"),
        }
    }
}

/// Render a transcript as plain `Speaker: text` lines
pub fn render_transcript(entries: &[TranscriptEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{}: {}", e.speaker, e.text))
        .collect::<Vec<_>>()
        .join("\n")
}
