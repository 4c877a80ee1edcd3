//! Session error types

use std::time::Duration;
use thiserror::Error;

/// Broken session invariants. Each one ends the affected call only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("interaction {interaction_index}: negative response index {response_index}")]
    NegativeResponseIndex { interaction_index: u64, response_index: i64 },

    #[error("interaction {interaction_index}: response index {response_index} emitted twice")]
    DuplicateResponseIndex { interaction_index: u64, response_index: i64 },

    #[error("mark label {label} is already pending")]
    DuplicateMark { label: String },
}

/// A collaborator call that did not produce a usable result
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

impl From<anyhow::Error> for StageError {
    fn from(err: anyhow::Error) -> Self {
        StageError::Failed(format!("{:#}", err))
    }
}
