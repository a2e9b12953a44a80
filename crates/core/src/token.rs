//! Session token issuance.
//!
//! Exchanges an instructor's persona configuration for a time-boxed session
//! credential from the avatar provider, declaring the `log_error` client
//! tool the provider's model invokes to report language errors silently.

use crate::error::CoreError;
use crate::instructors::Instructor;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

/// Name of the client tool declared at token-issuance time.
pub const LOG_ERROR_TOOL: &str = "log_error";

const SESSION_TOKEN_URL: &str = "https://api.anam.ai/v1/auth/session-token";
const TOKEN_TIMEOUT_SECS: u64 = 30;

/// Opaque provider-issued credential for one session. Never parsed beyond
/// existence; discarded when the session ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: String) -> Self {
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The fixed `log_error` tool declaration, identical for every instructor.
pub fn log_error_tool() -> Value {
    json!({
        "type": "client",
        "name": LOG_ERROR_TOOL,
        "description": "Log a grammar or expression error made by the user during conversation. Call this whenever you notice an error, but do NOT mention the error in your spoken response.",
        "parameters": {
            "type": "object",
            "properties": {
                "original": {
                    "type": "string",
                    "description": "What the user actually said",
                },
                "corrected": {
                    "type": "string",
                    "description": "Corrected version",
                },
                "explanation": {
                    "type": "string",
                    "description": "Brief explanation in Japanese",
                },
                "category": {
                    "type": "string",
                    "enum": ["grammar", "vocabulary", "expression", "pronunciation_hint"],
                },
            },
            "required": ["original", "corrected", "explanation", "category"],
        },
    })
}

fn session_request_body(instructor: &Instructor) -> Value {
    json!({
        "personaConfig": instructor.persona_config,
        "tools": [log_error_tool()],
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    session_token: Option<String>,
}

/// Client for the avatar provider's session-token endpoint.
pub struct TokenIssuer {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    endpoint: String,
}

impl TokenIssuer {
    pub fn new(api_key: Option<SecretString>) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(TOKEN_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            api_key,
            endpoint: SESSION_TOKEN_URL.to_string(),
        })
    }

    /// Overrides the provider endpoint, e.g. for a staging environment.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Requests one session token for the given instructor.
    ///
    /// Fast-fail: a non-success provider response is logged in full and
    /// surfaced as [`CoreError::ProviderError`] without retrying; retry
    /// policy belongs to the caller.
    pub async fn request_session_token(
        &self,
        instructor: &Instructor,
    ) -> Result<SessionToken, CoreError> {
        let Some(api_key) = self.api_key.as_ref() else {
            return Err(CoreError::ServerMisconfigured("ANAM_API_KEY"));
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key.expose_secret())
            .json(&session_request_body(instructor))
            .send()
            .await
            .map_err(|e| map_request_error(e, TOKEN_TIMEOUT_SECS))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("avatar provider rejected token request: {status} {body}");
            return Err(CoreError::ProviderError {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| CoreError::MalformedProviderResponse(e.to_string()))?;
        parsed
            .session_token
            .map(SessionToken::new)
            .ok_or_else(|| {
                CoreError::MalformedProviderResponse(
                    "token response missing sessionToken".to_string(),
                )
            })
    }
}

pub(crate) fn map_request_error(e: reqwest::Error, timeout_secs: u64) -> CoreError {
    if e.is_timeout() {
        CoreError::Timeout {
            seconds: timeout_secs,
        }
    } else {
        CoreError::Http(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructors::InstructorCatalog;

    #[test]
    fn tool_declaration_matches_the_provider_contract() {
        let tool = log_error_tool();
        assert_eq!(tool["name"], LOG_ERROR_TOOL);
        assert_eq!(tool["type"], "client");

        let required = tool["parameters"]["required"]
            .as_array()
            .expect("required must be an array");
        let required: Vec<_> = required.iter().filter_map(|v| v.as_str()).collect();
        assert_eq!(
            required,
            vec!["original", "corrected", "explanation", "category"]
        );

        let categories = tool["parameters"]["properties"]["category"]["enum"]
            .as_array()
            .expect("category must be an enum");
        assert_eq!(categories.len(), 4);
        assert!(categories.iter().any(|v| v == "pronunciation_hint"));
    }

    #[test]
    fn request_body_carries_persona_and_tool() {
        let catalog = InstructorCatalog::new();
        let body = session_request_body(catalog.resolve("james").unwrap());
        assert_eq!(body["personaConfig"]["name"], "James");
        assert!(body["personaConfig"]["systemPrompt"].is_string());
        assert_eq!(body["tools"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["tools"][0]["name"], LOG_ERROR_TOOL);
    }

    #[tokio::test]
    async fn missing_credential_fails_before_any_request() {
        let issuer = TokenIssuer::new(None).unwrap();
        let catalog = InstructorCatalog::new();
        let err = issuer
            .request_session_token(catalog.resolve("emma").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ServerMisconfigured("ANAM_API_KEY")));
    }
}
