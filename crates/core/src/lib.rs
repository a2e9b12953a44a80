pub mod error;
pub mod feedback;
pub mod instructors;
pub mod session;
pub mod storage;
pub mod token;
pub mod transport;

pub use error::CoreError;

use session::EndReason;

/// Signals the session controller emits to the presentation boundary.
///
/// This enum is the primary API for decoupling the session's bookkeeping
/// from whatever renders it (a WebSocket bridge, a native UI, a test).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSignal {
    /// The provider connection is live; the countdown has started.
    Connected,
    /// One second elapsed on the countdown.
    Tick { remaining_seconds: u32 },
    /// The current caption text changed.
    Caption(String),
    /// The session reached its terminal state; the record is in the
    /// handoff store.
    Ended(EndReason),
    /// Transport initialization failed; no record exists. Route the user
    /// back to session setup.
    ConnectionFailed(String),
}

/// External controls a host can feed into a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// End the session now (the learner pressed "end").
    End,
    /// Flip the microphone mute state.
    ToggleMute,
}
