//! Conversation session controller.
//!
//! Owns the lifecycle of one timed conversation: the connection state
//! machine, the countdown, and the transcript/error accumulators. The
//! controller is a passive event handler; all mutation happens on the task
//! that drives [`SessionController::run`], fed by single-consumer channels,
//! so the accumulators need no locking.

use crate::error::CoreError;
use crate::storage::HandoffStore;
use crate::token::{LOG_ERROR_TOOL, SessionToken};
use crate::transport::{AvatarTransport, TransportEvent};
use crate::{SessionCommand, SessionSignal};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Countdown total used when the host does not supply one.
pub const DEFAULT_SESSION_SECONDS: u32 = 180;

/// Speaker attribution for one conversational turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Unknown,
}

impl Role {
    fn from_provider(role: &str) -> Self {
        match role {
            "user" => Self::User,
            "assistant" => Self::Assistant,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One turn of the conversation, coerced from the provider's history event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    fn from_provider(value: &Value) -> Self {
        Self {
            role: value
                .get("role")
                .and_then(Value::as_str)
                .map(Role::from_provider)
                .unwrap_or(Role::Unknown),
            content: value
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// Error classification used by the live `log_error` tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Grammar,
    Vocabulary,
    Expression,
    PronunciationHint,
}

impl ErrorCategory {
    fn from_provider(category: &str) -> Self {
        match category {
            "vocabulary" => Self::Vocabulary,
            "expression" => Self::Expression,
            "pronunciation_hint" => Self::PronunciationHint,
            _ => Self::Grammar,
        }
    }
}

/// One silently logged language error, created per `log_error` invocation.
/// Entries are append-only and never merged or deduplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub original: String,
    pub corrected: String,
    pub explanation: String,
    pub category: ErrorCategory,
    /// Event-arrival time; the provider does not report one.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl ErrorEntry {
    /// Coerces a raw tool payload into an entry. Missing fields become empty
    /// strings and missing or unrecognized categories become `grammar` —
    /// the tool call is never rejected.
    pub fn from_tool_payload(payload: &Value) -> Self {
        let field = |key: &str| {
            payload
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Self {
            original: field("original"),
            corrected: field("corrected"),
            explanation: field("explanation"),
            category: payload
                .get("category")
                .and_then(Value::as_str)
                .map(ErrorCategory::from_provider)
                .unwrap_or(ErrorCategory::Grammar),
            timestamp: Utc::now(),
        }
    }
}

/// The frozen output of one terminated session. Built exactly once, at
/// termination, and consumed exactly once by feedback synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub conversation_history: Vec<ConversationTurn>,
    pub errors: Vec<ErrorEntry>,
}

/// Connection lifecycle. `Terminated` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Terminated,
}

/// Which of the three independent triggers terminated the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    TimerExpired,
    ConnectionClosed,
    ManualEnd,
}

/// Owns one session's state machine and accumulators.
///
/// The controller is the sole mutator of the transcript, the error list and
/// the termination flag. Event and command delivery is funneled through the
/// channels passed to [`SessionController::run`].
pub struct SessionController {
    state: ConnectionState,
    remaining_seconds: u32,
    transcript: Vec<ConversationTurn>,
    errors: Vec<ErrorEntry>,
    caption: String,
    muted: bool,
    ended: bool,
    transport: Option<Box<dyn AvatarTransport>>,
    store: Arc<dyn HandoffStore>,
    signals: mpsc::Sender<SessionSignal>,
}

impl SessionController {
    pub fn new(
        total_seconds: u32,
        store: Arc<dyn HandoffStore>,
        signals: mpsc::Sender<SessionSignal>,
    ) -> Self {
        Self {
            state: ConnectionState::Connecting,
            remaining_seconds: total_seconds,
            transcript: Vec::new(),
            errors: Vec::new(),
            caption: String::new(),
            muted: false,
            ended: false,
            transport: None,
            store,
            signals,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    pub fn transcript(&self) -> &[ConversationTurn] {
        &self.transcript
    }

    pub fn errors(&self) -> &[ErrorEntry] {
        &self.errors
    }

    pub fn caption(&self) -> &str {
        &self.caption
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_terminated(&self) -> bool {
        self.ended
    }

    /// Performs the explicit transport initialization step and takes
    /// ownership of the handle on success.
    ///
    /// On failure the controller emits [`SessionSignal::ConnectionFailed`]
    /// and stays out of the terminal path: nothing is stored and the caller
    /// must route back to session setup.
    pub async fn connect_transport(
        &mut self,
        mut transport: Box<dyn AvatarTransport>,
        token: SessionToken,
    ) -> Result<mpsc::Receiver<TransportEvent>, CoreError> {
        match transport.connect(token).await {
            Ok(events) => {
                self.transport = Some(transport);
                Ok(events)
            }
            Err(e) => {
                tracing::error!("avatar transport failed to initialize: {e}");
                let reason = e.to_string();
                self.signal(SessionSignal::ConnectionFailed(reason.clone()));
                Err(CoreError::ConnectionFailed(reason))
            }
        }
    }

    /// Drives the session to completion: transport events, external
    /// commands, and the one-second countdown (armed only while connected).
    ///
    /// Returns once the session is terminated. Closure of either channel is
    /// treated as the corresponding hang-up.
    pub async fn run(
        &mut self,
        mut events: mpsc::Receiver<TransportEvent>,
        mut commands: mpsc::Receiver<SessionCommand>,
    ) {
        let mut countdown = tokio::time::interval(Duration::from_secs(1));
        countdown.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.ended {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        let was_connected = self.state == ConnectionState::Connected;
                        self.handle_event(event);
                        if !was_connected && self.state == ConnectionState::Connected {
                            // Arm the countdown so the first decrement lands
                            // a full second after connection.
                            countdown.reset();
                        }
                    }
                    // The transport task went away without a close event.
                    None => self.terminate(EndReason::ConnectionClosed),
                },
                command = commands.recv() => match command {
                    Some(SessionCommand::End) => self.end_session(),
                    Some(SessionCommand::ToggleMute) => {
                        self.toggle_mute().await;
                    }
                    // The host hung up on us.
                    None => self.end_session(),
                },
                _ = countdown.tick(), if self.state == ConnectionState::Connected => {
                    self.tick();
                }
            }
        }
    }

    /// Applies one provider event. No-op once terminated.
    pub fn handle_event(&mut self, event: TransportEvent) {
        if self.ended {
            return;
        }
        match event {
            TransportEvent::ConnectionEstablished => {
                if self.state == ConnectionState::Connecting {
                    self.state = ConnectionState::Connected;
                    self.signal(SessionSignal::Connected);
                }
            }
            TransportEvent::ConnectionClosed => self.terminate(EndReason::ConnectionClosed),
            TransportEvent::ToolCall { name, payload } => {
                if name == LOG_ERROR_TOOL {
                    self.errors.push(ErrorEntry::from_tool_payload(&payload));
                } else {
                    tracing::debug!("ignoring unknown client tool event: {name}");
                }
            }
            TransportEvent::MessageStream { content } => {
                if !content.is_empty() {
                    self.caption = content.clone();
                    self.signal(SessionSignal::Caption(content));
                }
            }
            TransportEvent::HistoryUpdated(history) => {
                // The provider resends the complete history every time, so
                // the stored transcript is replaced, never appended to.
                // Non-array payloads are ignored rather than treated as a
                // clear.
                if let Some(items) = history.as_array() {
                    self.transcript = items.iter().map(ConversationTurn::from_provider).collect();
                }
            }
        }
    }

    /// Advances the countdown by one second. Only meaningful while
    /// connected; reaching zero terminates the session.
    pub fn tick(&mut self) {
        if self.state != ConnectionState::Connected {
            return;
        }
        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        self.signal(SessionSignal::Tick {
            remaining_seconds: self.remaining_seconds,
        });
        if self.remaining_seconds == 0 {
            self.terminate(EndReason::TimerExpired);
        }
    }

    /// Explicit "end session" trigger.
    pub fn end_session(&mut self) {
        self.terminate(EndReason::ManualEnd);
    }

    /// Flips the mute state and best-effort forwards it to the transport.
    /// Without a live handle this is a soft no-op on the transport side:
    /// the local flag still flips.
    pub async fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        if let Some(transport) = self.transport.as_mut() {
            let result = if self.muted {
                transport.mute_input().await
            } else {
                transport.unmute_input().await
            };
            if let Err(e) = result {
                tracing::warn!("failed to forward mute state to transport: {e}");
            }
        }
        self.muted
    }

    /// Releases the transport. Safe to call at any point, including when no
    /// transport was ever established; never panics.
    pub async fn dispose(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            if let Err(e) = transport.disconnect().await {
                tracing::warn!("transport disconnect during disposal failed: {e}");
            }
        }
        self.transport = None;
    }

    /// Terminal transition. The one-shot guard linearizes the three
    /// triggers: the first caller wins, every later call is a no-op.
    fn terminate(&mut self, reason: EndReason) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.state = ConnectionState::Terminated;
        let record = SessionRecord {
            conversation_history: std::mem::take(&mut self.transcript),
            errors: std::mem::take(&mut self.errors),
        };
        self.store.put(&record);
        self.signal(SessionSignal::Ended(reason));
    }

    fn signal(&self, signal: SessionSignal) {
        if let Err(e) = self.signals.try_send(signal) {
            tracing::warn!("presentation boundary dropped a session signal: {e}");
        }
    }
}
