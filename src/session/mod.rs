//! Per-call conversation session
//!
//! Owns the lifecycle of one call (AWAITING_START -> STREAMING -> CLOSING ->
//! CLOSED), its interactions, the playback reorder buffer and the set of
//! marks still waiting for a transport ack.

pub mod error;
pub mod interaction;
pub mod marks;
pub mod orchestrator;
pub mod sequencer;
pub mod state;

pub use error::{SessionError, StageError};
pub use interaction::{AudioUnit, Interaction};
pub use marks::PendingMarks;
pub use orchestrator::{is_interruption, SessionOrchestrator, GREETING_PARAMETER};
pub use sequencer::PlaybackSequencer;
pub use state::{Session, SessionSnapshot, SessionState};
