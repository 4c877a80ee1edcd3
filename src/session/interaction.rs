//! One user-utterance / agent-reply cycle

use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::SessionError;
use crate::stages::ReplyChunk;

/// Synthesized audio for one reply chunk, ready for playback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioUnit {
    pub interaction_index: u64,
    pub response_index: i64,
    pub text: String,
    pub audio: Vec<u8>,
    pub mark_label: String,
}

impl AudioUnit {
    pub fn new(chunk: ReplyChunk, audio: Vec<u8>) -> Self {
        Self {
            interaction_index: chunk.interaction_index,
            response_index: chunk.response_index,
            text: chunk.text,
            audio,
            mark_label: Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug)]
pub struct Interaction {
    pub index: u64,
    pub user_text: String,
    pub reply_chunks: Vec<ReplyChunk>,
    seen: HashSet<i64>,
    cancel: CancellationToken,
    reply_complete: bool,
    settled: usize,
}

impl Interaction {
    pub fn new(index: u64, user_text: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            index,
            user_text: user_text.into(),
            reply_chunks: Vec::new(),
            seen: HashSet::new(),
            cancel,
            reply_complete: false,
            settled: 0,
        }
    }

    /// Token handed to every completion / synthesis request of this interaction
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether results tagged with `interaction_index` may still reach the caller
    pub fn accepts(&self, interaction_index: u64) -> bool {
        self.index == interaction_index && !self.is_cancelled()
    }

    pub fn record_chunk(&mut self, chunk: &ReplyChunk) -> Result<(), SessionError> {
        if chunk.response_index < 0 {
            return Err(SessionError::NegativeResponseIndex {
                interaction_index: self.index,
                response_index: chunk.response_index,
            });
        }
        if !self.seen.insert(chunk.response_index) {
            return Err(SessionError::DuplicateResponseIndex {
                interaction_index: self.index,
                response_index: chunk.response_index,
            });
        }
        self.reply_chunks.push(chunk.clone());
        Ok(())
    }

    /// The completion stage will send nothing more
    pub fn mark_reply_complete(&mut self) {
        self.reply_complete = true;
    }

    /// A chunk was played or dropped after a synthesis failure
    pub fn mark_settled(&mut self, count: usize) {
        self.settled += count;
    }

    /// Every chunk of a complete reply has been played or dropped
    pub fn is_finished(&self) -> bool {
        self.reply_complete && self.settled >= self.reply_chunks.len()
    }
}
