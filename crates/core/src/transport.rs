//! Boundary to the external avatar-conversation provider.
//!
//! The provider's streaming protocol is an opaque collaborator: all the core
//! needs is the stream of events it pushes during a live session and a
//! handful of control calls. Payloads stay untyped (`serde_json::Value`)
//! until the session controller coerces them at the boundary.

use crate::error::CoreError;
use crate::token::SessionToken;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;
use tokio::sync::mpsc;

/// Events the avatar provider pushes during a live session.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The provider finished establishing the media connection.
    ConnectionEstablished,
    /// The provider closed the connection.
    ConnectionClosed,
    /// The provider's model invoked a declared client tool.
    ToolCall { name: String, payload: Value },
    /// A partial or full utterance chunk for caption display.
    MessageStream { content: String },
    /// The full conversation so far; resent complete on every update.
    HistoryUpdated(Value),
}

/// A handle to one live provider session.
///
/// Implementations deliver events through the receiver returned by
/// [`AvatarTransport::connect`]; that single-consumer channel is what keeps
/// all accumulator mutation on the controller task even when the underlying
/// client fires callbacks from multiple threads.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AvatarTransport: Send + Sync {
    /// Establishes the provider connection for the given session token.
    ///
    /// An error here is a setup failure, not a session termination: the
    /// caller must route back to session start and no record is produced.
    async fn connect(
        &mut self,
        token: SessionToken,
    ) -> Result<mpsc::Receiver<TransportEvent>, CoreError>;

    /// Stops sending learner audio upstream.
    async fn mute_input(&mut self) -> Result<(), CoreError>;

    /// Resumes sending learner audio upstream.
    async fn unmute_input(&mut self) -> Result<(), CoreError>;

    /// Tears down the provider connection.
    async fn disconnect(&mut self) -> Result<(), CoreError>;
}
