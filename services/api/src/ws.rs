//! Live-lesson WebSocket bridge.
//!
//! The browser owns the avatar provider's media connection and relays its
//! events here as JSON frames; one session controller per socket does the
//! bookkeeping (countdown, transcript, error log) and streams its signals
//! back. When the session terminates the record lands in the handoff store
//! for the feedback page to consume.

use crate::routes::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use eikaiwa_core::session::{DEFAULT_SESSION_SECONDS, EndReason, SessionController};
use eikaiwa_core::storage::HandoffStore;
use eikaiwa_core::transport::TransportEvent;
use eikaiwa_core::{SessionCommand, SessionSignal};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Inbound frames from the lesson page.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    ConnectionEstablished,
    ConnectionClosed,
    ToolCall {
        name: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    MessageStream {
        content: String,
    },
    HistoryUpdated {
        history: serde_json::Value,
    },
    EndSession,
    ToggleMute,
}

/// Outbound frames mirroring the controller's session signals.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Connected,
    Tick { remaining_seconds: u32 },
    Caption { text: String },
    Ended { reason: EndReason },
    ConnectionFailed { reason: String },
}

impl From<SessionSignal> for ServerMessage {
    fn from(signal: SessionSignal) -> Self {
        match signal {
            SessionSignal::Connected => Self::Connected,
            SessionSignal::Tick { remaining_seconds } => Self::Tick { remaining_seconds },
            SessionSignal::Caption(text) => Self::Caption { text },
            SessionSignal::Ended(reason) => Self::Ended { reason },
            SessionSignal::ConnectionFailed(reason) => Self::ConnectionFailed { reason },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LessonParams {
    /// Instructor id used to size the countdown; falls back to the default
    /// session length when absent or unknown.
    instructor: Option<String>,
}

/// `GET /ws/lesson` — upgrades the connection and runs one lesson session.
pub async fn lesson_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<LessonParams>,
    State(state): State<AppState>,
) -> Response {
    let total_seconds = params
        .instructor
        .as_deref()
        .and_then(|id| state.catalog.resolve(id).ok())
        .map(|instructor| instructor.persona_config.max_session_length_seconds)
        .unwrap_or(DEFAULT_SESSION_SECONDS);
    let store = state.store.clone();
    ws.on_upgrade(move |socket| run_lesson(socket, total_seconds, store))
}

async fn run_lesson(socket: WebSocket, total_seconds: u32, store: Arc<dyn HandoffStore>) {
    info!("lesson socket established ({total_seconds}s)");

    let (mut sink, mut stream) = socket.split();
    let (signal_tx, mut signal_rx) = mpsc::channel::<SessionSignal>(64);
    let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(64);
    let (command_tx, command_rx) = mpsc::channel::<SessionCommand>(8);

    let mut controller = SessionController::new(total_seconds, store, signal_tx);
    let session = tokio::spawn(async move {
        controller.run(event_rx, command_rx).await;
        controller.dispose().await;
    });

    // Relay session signals out to the client until the controller drops
    // its sender.
    let writer = tokio::spawn(async move {
        while let Some(signal) = signal_rx.recv().await {
            match serde_json::to_string(&ServerMessage::from(signal)) {
                Ok(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!("failed to serialize session signal: {e}"),
            }
        }
    });

    // Feed inbound frames into the session.
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!("lesson socket error: {e}");
                break;
            }
        };
        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => dispatch(message, &event_tx, &command_tx).await,
                Err(e) => debug!("ignoring unreadable lesson frame: {e}"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    // The socket is gone; make sure the session terminates and flushes its
    // record before we join it.
    let _ = event_tx.send(TransportEvent::ConnectionClosed).await;
    drop(event_tx);
    drop(command_tx);
    if let Err(e) = session.await {
        tracing::error!("lesson session task failed: {e}");
    }
    let _ = writer.await;

    info!("lesson socket closed");
}

async fn dispatch(
    message: ClientMessage,
    events: &mpsc::Sender<TransportEvent>,
    commands: &mpsc::Sender<SessionCommand>,
) {
    let event = match message {
        ClientMessage::EndSession => {
            let _ = commands.send(SessionCommand::End).await;
            return;
        }
        ClientMessage::ToggleMute => {
            let _ = commands.send(SessionCommand::ToggleMute).await;
            return;
        }
        ClientMessage::ConnectionEstablished => TransportEvent::ConnectionEstablished,
        ClientMessage::ConnectionClosed => TransportEvent::ConnectionClosed,
        ClientMessage::ToolCall { name, payload } => TransportEvent::ToolCall { name, payload },
        ClientMessage::MessageStream { content } => TransportEvent::MessageStream { content },
        ClientMessage::HistoryUpdated { history } => TransportEvent::HistoryUpdated(history),
    };
    if events.send(event).await.is_err() {
        debug!("session already terminated; dropping event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_frames_parse_into_transport_shapes() {
        let frame: ClientMessage = serde_json::from_str(
            r#"{"type":"tool_call","name":"log_error","payload":{"original":"I goed"}}"#,
        )
        .unwrap();
        assert!(matches!(
            frame,
            ClientMessage::ToolCall { ref name, .. } if name == "log_error"
        ));

        // A tool call without a payload still parses; the controller
        // defaults the fields.
        let frame: ClientMessage =
            serde_json::from_str(r#"{"type":"tool_call","name":"log_error"}"#).unwrap();
        assert!(matches!(frame, ClientMessage::ToolCall { .. }));

        let frame: ClientMessage = serde_json::from_str(r#"{"type":"end_session"}"#).unwrap();
        assert!(matches!(frame, ClientMessage::EndSession));
    }

    #[test]
    fn server_frames_serialize_with_snake_case_tags() {
        let text =
            serde_json::to_value(ServerMessage::Tick { remaining_seconds: 42 }).unwrap();
        assert_eq!(text, json!({ "type": "tick", "remaining_seconds": 42 }));

        let text = serde_json::to_value(ServerMessage::Ended {
            reason: EndReason::TimerExpired,
        })
        .unwrap();
        assert_eq!(text, json!({ "type": "ended", "reason": "timer_expired" }));
    }
}
