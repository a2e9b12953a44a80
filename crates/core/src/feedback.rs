//! Post-session feedback synthesis.
//!
//! Takes a finished session's record, sends it to a text-generation
//! provider with a strict single-JSON-object output contract, and validates
//! the response into a canonical [`FeedbackReport`]. Malformed output is a
//! hard failure of the attempt — never partially trusted — and the caller
//! may retry the whole operation.

use crate::error::CoreError;
use crate::session::SessionRecord;
use crate::token::map_request_error;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// Client-side deadline for one synthesis call. When it elapses the request
/// future is dropped, which aborts the in-flight connection.
pub const FEEDBACK_TIMEOUT_SECS: u64 = 30;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 2000;

/// Coarse session verdict, derived from the numeric score and never trusted
/// from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverallLabel {
    Great,
    Good,
    #[serde(rename = "Keep Practicing")]
    KeepPracticing,
}

impl OverallLabel {
    /// score >= 8 is "Great", 5..8 is "Good", below 5 is "Keep Practicing".
    pub fn from_score(score: u8) -> Self {
        if score >= 8 {
            Self::Great
        } else if score >= 5 {
            Self::Good
        } else {
            Self::KeepPracticing
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Moderate,
    Major,
}

/// Error categories the report uses; pronunciation hints from the live
/// session are folded into the narrative rather than listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackCategory {
    Grammar,
    Vocabulary,
    Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackError {
    pub original: String,
    pub corrected: String,
    pub explanation: String,
    pub category: FeedbackCategory,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NaturalExpression {
    pub used: String,
    pub comment: String,
}

/// The canonical post-session report. List fields are always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackReport {
    pub overall_score: u8,
    pub overall_label: OverallLabel,
    pub summary: String,
    pub errors: Vec<FeedbackError>,
    pub strengths: Vec<String>,
    pub suggestions: Vec<String>,
    pub natural_expressions: Vec<NaturalExpression>,
}

/// The provider-facing shape: optional lists default to empty, the label is
/// recomputed locally.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFeedback {
    overall_score: u8,
    summary: String,
    #[serde(default)]
    errors: Vec<FeedbackError>,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
    #[serde(default)]
    natural_expressions: Vec<NaturalExpression>,
}

/// Produces a feedback report from a finished session.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FeedbackSynthesizer: Send + Sync {
    async fn synthesize(&self, record: &SessionRecord) -> Result<FeedbackReport, CoreError>;
}

/// Synthesizer backed by the Anthropic Messages API.
pub struct AnthropicSynthesizer {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    model: String,
    endpoint: String,
}

impl AnthropicSynthesizer {
    pub fn new(api_key: Option<SecretString>, model: String) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FEEDBACK_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model,
            endpoint: MESSAGES_URL.to_string(),
        })
    }

    /// Overrides the provider endpoint, e.g. for a gateway deployment.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl FeedbackSynthesizer for AnthropicSynthesizer {
    async fn synthesize(&self, record: &SessionRecord) -> Result<FeedbackReport, CoreError> {
        if record.conversation_history.is_empty() {
            return Err(CoreError::NoConversationData);
        }
        let Some(api_key) = self.api_key.as_ref() else {
            return Err(CoreError::ServerMisconfigured("ANTHROPIC_API_KEY"));
        };

        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{ "role": "user", "content": build_feedback_prompt(record) }],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_request_error(e, FEEDBACK_TIMEOUT_SECS))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("feedback provider rejected the request: {status} {body}");
            return Err(CoreError::ProviderError {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| CoreError::MalformedProviderResponse(e.to_string()))?;
        let text = parsed
            .content
            .iter()
            .find_map(|block| block.text.as_deref())
            .ok_or_else(|| {
                CoreError::MalformedProviderResponse("response contained no text block".to_string())
            })?;

        parse_feedback(text)
    }
}

/// Renders the transcript the way the prompt consumes it: one role-prefixed
/// line per turn.
pub fn render_transcript(record: &SessionRecord) -> String {
    record
        .conversation_history
        .iter()
        .map(|turn| format!("{}: {}", turn.role, turn.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_feedback_prompt(record: &SessionRecord) -> String {
    let errors_json = serde_json::to_string_pretty(&record.errors).unwrap_or_else(|e| {
        tracing::warn!("failed to serialize the detected error list: {e}");
        "[]".to_string()
    });

    format!(
        r#"You write post-lesson feedback for an English conversation school serving advanced Japanese learners. Based on the conversation log below and the errors detected in real time during the lesson, produce a feedback report.

## Conversation log
{transcript}

## Errors detected during the lesson
{errors_json}

## Output format (JSON)
Respond with a single JSON object in exactly this shape and no other text:
{{
  "overallScore": <integer 1-10>,
  "summary": "<overall assessment in Japanese, 2-3 sentences>",
  "errors": [
    {{
      "original": "<what the user said>",
      "corrected": "<corrected version>",
      "explanation": "<explanation in Japanese>",
      "category": "grammar|vocabulary|expression",
      "severity": "minor|moderate|major"
    }}
  ],
  "strengths": ["<what went well, in English>"],
  "suggestions": ["<advice for improvement, in English>"],
  "naturalExpressions": [
    {{
      "used": "<a good expression the user used>",
      "comment": "<why it works, in English>"
    }}
  ]
}}"#,
        transcript = render_transcript(record),
    )
}

/// Validates raw provider text into a report. The text may arrive wrapped in
/// a fenced code block; the wrapping is stripped before parsing.
pub fn parse_feedback(text: &str) -> Result<FeedbackReport, CoreError> {
    let raw: RawFeedback = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| CoreError::MalformedProviderResponse(e.to_string()))?;
    Ok(FeedbackReport {
        overall_score: raw.overall_score,
        overall_label: OverallLabel::from_score(raw.overall_score),
        summary: raw.summary,
        errors: raw.errors,
        strengths: raw.strengths,
        suggestions: raw.suggestions,
        natural_expressions: raw.natural_expressions,
    })
}

/// Returns the contents of the first complete fenced code block, or the
/// trimmed input when no complete fence exists.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after = &trimmed[start + 3..];
    let after = after.strip_prefix("json").unwrap_or(after);
    match after.find("```") {
        Some(end) => after[..end].trim(),
        None => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ConversationTurn, Role};

    const FULL_RESPONSE: &str = r#"{
        "overallScore": 9,
        "summary": "自然な会話ができています。",
        "errors": [
            {
                "original": "I go to Osaka last week.",
                "corrected": "I went to Osaka last week.",
                "explanation": "過去の出来事には過去形を使います。",
                "category": "grammar",
                "severity": "minor"
            }
        ],
        "strengths": ["Good use of follow-up questions"],
        "suggestions": ["Try linking ideas with transition words"],
        "naturalExpressions": [
            { "used": "That sounds amazing", "comment": "Natural enthusiastic response" }
        ]
    }"#;

    fn record_with_turns(turns: &[(&str, Role)]) -> SessionRecord {
        SessionRecord {
            conversation_history: turns
                .iter()
                .map(|(content, role)| ConversationTurn {
                    role: *role,
                    content: content.to_string(),
                })
                .collect(),
            errors: vec![],
        }
    }

    #[test]
    fn label_derivation_covers_the_boundaries() {
        assert_eq!(OverallLabel::from_score(1), OverallLabel::KeepPracticing);
        assert_eq!(OverallLabel::from_score(4), OverallLabel::KeepPracticing);
        assert_eq!(OverallLabel::from_score(5), OverallLabel::Good);
        assert_eq!(OverallLabel::from_score(7), OverallLabel::Good);
        assert_eq!(OverallLabel::from_score(8), OverallLabel::Great);
        assert_eq!(OverallLabel::from_score(10), OverallLabel::Great);
    }

    #[test]
    fn fenced_and_unfenced_responses_parse_identically() {
        let plain = parse_feedback(FULL_RESPONSE).unwrap();
        let fenced = parse_feedback(&format!("```json\n{FULL_RESPONSE}\n```")).unwrap();
        let bare_fence = parse_feedback(&format!("```\n{FULL_RESPONSE}\n```")).unwrap();
        let with_preamble =
            parse_feedback(&format!("Here is the report:\n```json\n{FULL_RESPONSE}\n```")).unwrap();
        assert_eq!(plain, fenced);
        assert_eq!(plain, bare_fence);
        assert_eq!(plain, with_preamble);
        assert_eq!(plain.overall_score, 9);
        assert_eq!(plain.overall_label, OverallLabel::Great);
        assert_eq!(plain.errors.len(), 1);
        assert_eq!(plain.errors[0].severity, Severity::Minor);
    }

    #[test]
    fn unparsable_output_is_a_hard_failure() {
        let err = parse_feedback("I had a great chat with the student!").unwrap_err();
        assert!(matches!(err, CoreError::MalformedProviderResponse(_)));

        // An unclosed fence falls back to the whole text, which is still
        // not JSON.
        let err = parse_feedback("```json\n{\"overallScore\": 9").unwrap_err();
        assert!(matches!(err, CoreError::MalformedProviderResponse(_)));
    }

    #[test]
    fn missing_optional_lists_default_to_empty() {
        let report =
            parse_feedback(r#"{ "overallScore": 6, "summary": "よくできました。" }"#).unwrap();
        assert_eq!(report.overall_label, OverallLabel::Good);
        assert!(report.errors.is_empty());
        assert!(report.strengths.is_empty());
        assert!(report.suggestions.is_empty());
        assert!(report.natural_expressions.is_empty());
    }

    #[test]
    fn report_serializes_with_wire_field_names() {
        let report = parse_feedback(FULL_RESPONSE).unwrap();
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["overallScore"], 9);
        assert_eq!(value["overallLabel"], "Great");
        assert!(value["naturalExpressions"].is_array());
        assert_eq!(value["errors"][0]["severity"], "minor");
    }

    #[test]
    fn keep_practicing_label_serializes_with_a_space() {
        let value = serde_json::to_value(OverallLabel::KeepPracticing).unwrap();
        assert_eq!(value, "Keep Practicing");
    }

    #[test]
    fn transcript_renders_role_prefixed_lines() {
        let record = record_with_turns(&[
            ("Hi! How are you?", Role::Assistant),
            ("I'm fine thanks.", Role::User),
        ]);
        assert_eq!(
            render_transcript(&record),
            "assistant: Hi! How are you?\nuser: I'm fine thanks."
        );
    }

    #[test]
    fn prompt_contains_transcript_and_error_list() {
        let mut record = record_with_turns(&[("I go to Osaka last week.", Role::User)]);
        record.errors = vec![crate::session::ErrorEntry::from_tool_payload(
            &serde_json::json!({
                "original": "I go to Osaka last week.",
                "corrected": "I went to Osaka last week.",
                "explanation": "過去形",
                "category": "grammar",
            }),
        )];
        let prompt = build_feedback_prompt(&record);
        assert!(prompt.contains("user: I go to Osaka last week."));
        assert!(prompt.contains("I went to Osaka last week."));
        assert!(prompt.contains("overallScore"));
    }

    #[tokio::test]
    async fn empty_transcript_is_rejected_before_any_request() {
        let synthesizer = AnthropicSynthesizer::new(
            Some(SecretString::from("test-key".to_string())),
            "test-model".to_string(),
        )
        .unwrap();
        let empty = SessionRecord {
            conversation_history: vec![],
            errors: vec![],
        };
        let err = synthesizer.synthesize(&empty).await.unwrap_err();
        assert!(matches!(err, CoreError::NoConversationData));
    }

    #[tokio::test]
    async fn missing_credential_is_rejected_before_any_request() {
        let synthesizer = AnthropicSynthesizer::new(None, "test-model".to_string()).unwrap();
        let record = record_with_turns(&[("Hello", Role::User)]);
        let err = synthesizer.synthesize(&record).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::ServerMisconfigured("ANTHROPIC_API_KEY")
        ));
    }
}
