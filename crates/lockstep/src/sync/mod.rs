mod config;
mod error;
mod frame;
mod message;
mod pacing;
mod synchronizer;

pub use config::{PeerEntry, SessionConfig};
pub use error::SyncError;
pub use frame::{FrameCommand, FrameRecord, FrameState};
pub use message::{ArchivedFrameMessage, FrameMessage};
pub use pacing::FramePacer;
pub use synchronizer::{
    CommandSynchronizer, EXECUTION_DELAY, FrameTransport, StepOutcome, SyncEvent,
};

/// Identifies one participant of a session. Command ordering inside a frame
/// is by faction id.
pub type FactionId = u8;

/// Command frame number, starting at 0.
pub type FrameNumber = u32;
