//! Outstanding playback marks
//!
//! A label is added when its audio has been handed to the transport and
//! removed when the transport acknowledges it. Acks may arrive in any order.

use super::error::SessionError;

#[derive(Debug, Default, Clone)]
pub struct PendingMarks {
    labels: Vec<String>,
}

impl PendingMarks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>) -> Result<(), SessionError> {
        let label = label.into();
        if self.contains(&label) {
            return Err(SessionError::DuplicateMark { label });
        }
        self.labels.push(label);
        Ok(())
    }

    /// Remove an acknowledged label. False if it was not pending (e.g. dropped by a clear).
    pub fn acknowledge(&mut self, label: &str) -> bool {
        match self.labels.iter().position(|l| l == label) {
            Some(pos) => {
                self.labels.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Drop every pending label, returning how many were discarded
    pub fn clear(&mut self) -> usize {
        let cleared = self.labels.len();
        self.labels.clear();
        cleared
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
