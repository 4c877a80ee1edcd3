//! Per-call session data

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::marks::PendingMarks;
use crate::stages::{CallRecord, CloseReason};
use crate::types::TranscriptEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    AwaitingStart,
    Streaming,
    Closing,
    Closed,
}

/// Everything known about a call once its stream has started
#[derive(Debug)]
pub struct Session {
    pub session_id: String,
    pub call_id: String,
    pub started_at: DateTime<Utc>,
    pub interaction_counter: u64,
    pub active_interaction: u64,
    pub pending_marks: PendingMarks,
    pub transcript_log: Vec<TranscriptEntry>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, call_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            call_id: call_id.into(),
            started_at: Utc::now(),
            interaction_counter: 0,
            active_interaction: 0,
            pending_marks: PendingMarks::new(),
            transcript_log: Vec::new(),
        }
    }

    /// Allocate the next interaction index and make it active
    pub fn begin_interaction(&mut self) -> u64 {
        self.interaction_counter += 1;
        self.active_interaction = self.interaction_counter;
        self.interaction_counter
    }

    pub fn record(&self, close_reason: CloseReason) -> CallRecord {
        CallRecord {
            session_id: self.session_id.clone(),
            call_id: self.call_id.clone(),
            started_at: self.started_at,
            ended_at: Utc::now(),
            interactions: self.interaction_counter,
            close_reason,
            transcript: self.transcript_log.clone(),
        }
    }
}

/// Point-in-time view of a session, published after every handled event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub interaction_counter: u64,
    pub active_interaction: u64,
    pub pending_marks: usize,
    pub transcript_lines: usize,
}

impl SessionSnapshot {
    pub fn initial() -> Self {
        Self {
            state: SessionState::AwaitingStart,
            interaction_counter: 0,
            active_interaction: 0,
            pending_marks: 0,
            transcript_lines: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interaction_indices_increase() {
        let mut session = Session::new("MZ1", "CA1");
        assert_eq!(session.begin_interaction(), 1);
        assert_eq!(session.begin_interaction(), 2);
        assert_eq!(session.active_interaction, 2);
    }

    #[test]
    fn test_record_copies_transcript() {
        let mut session = Session::new("MZ1", "CA1");
        session.transcript_log.push(TranscriptEntry::caller("hello"));
        session.begin_interaction();
        let record = session.record(CloseReason::Stopped);
        assert_eq!(record.call_id, "CA1");
        assert_eq!(record.interactions, 1);
        assert_eq!(record.transcript.len(), 1);
    }
}
