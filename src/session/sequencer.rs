//! Reorder buffer between synthesis and the transport
//!
//! Synthesis requests run concurrently and finish in any order. Units are
//! held here until every lower response index of the same interaction has
//! been released, so the caller always hears a reply in sequence.

use std::collections::BTreeMap;
use tracing::debug;

use super::interaction::AudioUnit;

#[derive(Debug)]
enum Slot {
    Ready(AudioUnit),
    /// Synthesis failed; playback moves past this index
    Gap,
}

#[derive(Debug, Default)]
pub struct PlaybackSequencer {
    interaction_index: Option<u64>,
    next_expected: i64,
    buffer: BTreeMap<i64, Slot>,
}

impl PlaybackSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin sequencing a new interaction, discarding anything buffered
    pub fn start(&mut self, interaction_index: u64) {
        self.interaction_index = Some(interaction_index);
        self.next_expected = 0;
        self.buffer.clear();
    }

    /// Drop buffered units and stop accepting until the next [`start`](Self::start)
    pub fn reset(&mut self) {
        self.interaction_index = None;
        self.next_expected = 0;
        self.buffer.clear();
    }

    pub fn next_expected(&self) -> i64 {
        self.next_expected
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Buffer a unit and return every unit that is now playable, in order
    pub fn accept(&mut self, unit: AudioUnit) -> Vec<AudioUnit> {
        if !self.admits(unit.interaction_index, unit.response_index) {
            return Vec::new();
        }
        self.buffer.insert(unit.response_index, Slot::Ready(unit));
        self.drain()
    }

    /// Record that a response index will never arrive
    pub fn skip(&mut self, interaction_index: u64, response_index: i64) -> Vec<AudioUnit> {
        if !self.admits(interaction_index, response_index) {
            return Vec::new();
        }
        self.buffer.insert(response_index, Slot::Gap);
        self.drain()
    }

    fn admits(&self, interaction_index: u64, response_index: i64) -> bool {
        if self.interaction_index != Some(interaction_index) {
            debug!(
                "Sequencer: dropping unit {}/{} (sequencing {:?})",
                interaction_index, response_index, self.interaction_index
            );
            return false;
        }
        if response_index < self.next_expected || self.buffer.contains_key(&response_index) {
            debug!("Sequencer: response {} already handled", response_index);
            return false;
        }
        true
    }

    fn drain(&mut self) -> Vec<AudioUnit> {
        let mut ready = Vec::new();
        while let Some(slot) = self.buffer.remove(&self.next_expected) {
            if let Slot::Ready(unit) = slot {
                ready.push(unit);
            }
            self.next_expected += 1;
        }
        ready
    }
}
