//! HTTP route handlers.
//!
//! Upstream failure detail stays in the server logs; clients receive a
//! generic message plus a stable error code, and every failure leaves the
//! client a recovery path (retry, or return to instructor selection).

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use eikaiwa_core::CoreError;
use eikaiwa_core::feedback::{FeedbackReport, FeedbackSynthesizer};
use eikaiwa_core::instructors::{Instructor, InstructorCatalog, InstructorId};
use eikaiwa_core::session::SessionRecord;
use eikaiwa_core::storage::HandoffStore;
use eikaiwa_core::token::{SessionToken, TokenIssuer};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<InstructorCatalog>,
    pub issuer: Arc<TokenIssuer>,
    pub synthesizer: Arc<dyn FeedbackSynthesizer>,
    pub store: Arc<dyn HandoffStore>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub instructor_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_token: SessionToken,
}

/// `POST /api/session` — exchanges an instructor id for a provider session
/// token.
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let instructor = state.catalog.resolve(&request.instructor_id)?;
    let session_token = state.issuer.request_session_token(instructor).await?;
    Ok(Json(SessionResponse { session_token }))
}

/// `POST /api/feedback` — synthesizes the post-session report from a
/// finished session record.
pub async fn generate_feedback(
    State(state): State<AppState>,
    Json(record): Json<SessionRecord>,
) -> Result<Json<FeedbackReport>, ApiError> {
    if record.conversation_history.is_empty() {
        return Err(ApiError(CoreError::NoConversationData));
    }
    let report = state.synthesizer.synthesize(&record).await?;
    Ok(Json(report))
}

/// Catalog entry exposed to the selection screen. Persona configuration
/// (including the system prompt) never leaves the server.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructorSummary {
    pub id: InstructorId,
    pub name: String,
    pub tagline: String,
    pub description: String,
    pub tags: Vec<String>,
    pub image_src: String,
    pub topic: String,
}

impl From<&Instructor> for InstructorSummary {
    fn from(instructor: &Instructor) -> Self {
        Self {
            id: instructor.id,
            name: instructor.name.clone(),
            tagline: instructor.tagline.clone(),
            description: instructor.description.clone(),
            tags: instructor.tags.clone(),
            image_src: instructor.image_src.clone(),
            topic: instructor.topic.clone(),
        }
    }
}

/// `GET /api/instructors` — lists the selectable instructors.
pub async fn list_instructors(State(state): State<AppState>) -> Json<Vec<InstructorSummary>> {
    Json(state.catalog.all().iter().map(InstructorSummary::from).collect())
}

/// `GET /api/lesson-data` — consumes the handoff slot for the feedback
/// page. An empty or unreadable slot answers 404 so the client returns to
/// the session-start flow.
pub async fn take_lesson_data(State(state): State<AppState>) -> Response {
    match state.store.take() {
        Some(record) => Json(record).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "No lesson data available. Please start a new session.",
                "code": "no_session_data",
            })),
        )
            .into_response(),
    }
}

/// Response wrapper for [`CoreError`].
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            CoreError::InvalidInstructor(_) | CoreError::NoConversationData => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &'static str {
        match self.0 {
            CoreError::InvalidInstructor(_) => "Invalid instructor ID",
            CoreError::NoConversationData => "No conversation data provided",
            CoreError::Timeout { .. } => "The provider took too long to respond. Please try again.",
            _ => "Something went wrong. Please try again.",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {:?}", self.0);
        } else {
            tracing::warn!("request rejected: {}", self.0);
        }
        (
            status,
            Json(json!({ "error": self.message(), "code": self.0.code() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_map_to_bad_request() {
        let err = ApiError(CoreError::InvalidInstructor("nobody".to_string()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let err = ApiError(CoreError::NoConversationData);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn upstream_failures_map_to_internal_error_with_stable_codes() {
        let err = ApiError(CoreError::ProviderError {
            status: 502,
            body: "upstream detail".to_string(),
        });
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.0.code(), "provider_error");
        assert!(
            !err.message().contains("upstream detail"),
            "provider detail must never reach the client"
        );

        let err = ApiError(CoreError::Timeout { seconds: 30 });
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.0.code(), "timeout");
    }

    #[test]
    fn instructor_summary_omits_persona_configuration() {
        let catalog = InstructorCatalog::new();
        let summary = InstructorSummary::from(catalog.resolve("emma").unwrap());
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["id"], "emma");
        assert!(value.get("personaConfig").is_none());
        assert!(value.get("systemPrompt").is_none());
    }
}
