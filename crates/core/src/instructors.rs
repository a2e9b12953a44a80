//! Static instructor catalog.
//!
//! Each instructor is a fixed conversational persona: display metadata for
//! the selection screen plus the provider-facing persona configuration.
//! The catalog is built once at startup and only ever read afterwards.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of selectable instructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstructorId {
    Emma,
    James,
    Sophia,
}

impl InstructorId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emma => "emma",
            Self::James => "james",
            Self::Sophia => "sophia",
        }
    }
}

impl fmt::Display for InstructorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstructorId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "emma" => Ok(Self::Emma),
            "james" => Ok(Self::James),
            "sophia" => Ok(Self::Sophia),
            other => Err(CoreError::InvalidInstructor(other.to_string())),
        }
    }
}

/// Voice-activity tuning forwarded verbatim to the avatar provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceDetectionOptions {
    pub speech_enhancement_level: f64,
    pub end_of_speech_sensitivity: f64,
}

/// Provider-facing persona configuration, serialized camelCase to match the
/// avatar provider's session-token contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaConfig {
    pub name: String,
    pub avatar_id: String,
    pub voice_id: String,
    pub llm_id: String,
    pub system_prompt: String,
    pub max_session_length_seconds: u32,
    pub skip_greeting: bool,
    pub voice_detection_options: VoiceDetectionOptions,
}

/// A selectable instructor: catalog metadata plus its persona.
#[derive(Debug, Clone)]
pub struct Instructor {
    pub id: InstructorId,
    pub name: String,
    pub tagline: String,
    pub description: String,
    pub tags: Vec<String>,
    pub image_src: String,
    /// Opening topic shown to the learner before the session starts.
    pub topic: String,
    pub persona_config: PersonaConfig,
}

/// The in-process registry of all instructors.
pub struct InstructorCatalog {
    instructors: Vec<Instructor>,
}

impl InstructorCatalog {
    pub fn new() -> Self {
        Self {
            instructors: vec![emma(), james(), sophia()],
        }
    }

    pub fn all(&self) -> &[Instructor] {
        &self.instructors
    }

    pub fn get(&self, id: InstructorId) -> Option<&Instructor> {
        self.instructors.iter().find(|i| i.id == id)
    }

    /// Looks up an instructor by its raw identifier string.
    pub fn resolve(&self, id: &str) -> Result<&Instructor, CoreError> {
        let id: InstructorId = id.parse()?;
        self.get(id)
            .ok_or_else(|| CoreError::InvalidInstructor(id.to_string()))
    }
}

impl Default for InstructorCatalog {
    fn default() -> Self {
        Self::new()
    }
}

const SESSION_LENGTH_SECONDS: u32 = 180;

fn base_system_prompt(name: &str, style: &str) -> String {
    format!(
        r#"You are {name}, an experienced English conversation coach for advanced Japanese learners.

## Your Role
- Have a natural, engaging conversation in English for about 3 minutes.
- You are NOT a traditional teacher correcting every mistake. You are a conversation partner.
- Keep the conversation flowing naturally. Respond to what the user says, ask follow-up questions, share your own opinions.

## Conversation Style
{style}
- Speak at a natural pace appropriate for advanced learners.
- Use idiomatic expressions and natural phrasing.
- If the user seems stuck, gently help them by rephrasing or suggesting vocabulary.

## Internal Grammar Tracking (CRITICAL)
While conversing naturally, internally track any grammar or expression errors the user makes. Do NOT correct them during conversation — just note them silently.

When you detect an error, use the "log_error" tool to record it with:
- original: what the user actually said
- corrected: the corrected version
- explanation: brief explanation of the error (in Japanese)
- category: "grammar" | "vocabulary" | "expression" | "pronunciation_hint"

## Important Rules
- NEVER break character to discuss errors during the conversation.
- NEVER speak Japanese during the conversation.
- Keep your responses concise (2-4 sentences) to allow the user to speak more.
- The session is limited to 3 minutes — make every moment count."#
    )
}

fn default_voice_detection() -> VoiceDetectionOptions {
    VoiceDetectionOptions {
        speech_enhancement_level: 0.8,
        end_of_speech_sensitivity: 0.5,
    }
}

fn emma() -> Instructor {
    Instructor {
        id: InstructorId::Emma,
        name: "Emma".to_string(),
        tagline: "Let's chat like friends! I love hearing about your daily life.".to_string(),
        description: "Warm and approachable. Speaks with natural idioms and casual expressions like a close friend.".to_string(),
        tags: vec!["Daily Conversation".to_string(), "Idioms".to_string()],
        image_src: "/instructors/emma.png".to_string(),
        topic: "What's the most interesting thing that happened to you recently?".to_string(),
        persona_config: PersonaConfig {
            name: "Emma".to_string(),
            avatar_id: "071b0286-4cce-4808-bee2-e642f1062de3".to_string(),
            voice_id: "4bdb224b-0342-4986-9831-69a1f059103d".to_string(),
            llm_id: "0934d97d-0c3a-4f33-91b0-5e136a0ef466".to_string(),
            system_prompt: base_system_prompt(
                "Emma",
                r#"- You are friendly, casual, and love to laugh.
- Focus on daily life topics, personal stories, and casual conversation.
- Use slang, idioms, and colloquial expressions naturally.
- Create a warm, relaxed atmosphere like chatting with a close friend."#,
            ),
            max_session_length_seconds: SESSION_LENGTH_SECONDS,
            skip_greeting: false,
            voice_detection_options: default_voice_detection(),
        },
    }
}

fn james() -> Instructor {
    Instructor {
        id: InstructorId::James,
        name: "James".to_string(),
        tagline: "Let's sharpen your professional English through real scenarios.".to_string(),
        description: "Calm and professional. Uses formal business vocabulary with clear, structured arguments.".to_string(),
        tags: vec!["Business English".to_string(), "Discussion".to_string()],
        image_src: "/instructors/james.png".to_string(),
        topic: "Your team proposes a remote-first policy. How would you present this to senior management?".to_string(),
        persona_config: PersonaConfig {
            name: "James".to_string(),
            avatar_id: "81b70170-2e80-4e4b-a6fb-e04ac110dc4b".to_string(),
            voice_id: "c0954b69-9a2a-4fe2-8134-4e43be70f066".to_string(),
            llm_id: "0934d97d-0c3a-4f33-91b0-5e136a0ef466".to_string(),
            system_prompt: base_system_prompt(
                "James",
                r#"- You are professional, logical, calm but sharp.
- Focus on business scenarios, leadership, and strategic discussions.
- Use formal business English, professional vocabulary, and structured arguments.
- Challenge the user to think critically and present clear, logical points."#,
            ),
            max_session_length_seconds: SESSION_LENGTH_SECONDS,
            skip_greeting: false,
            voice_detection_options: default_voice_detection(),
        },
    }
}

fn sophia() -> Instructor {
    Instructor {
        id: InstructorId::Sophia,
        name: "Sophia".to_string(),
        tagline: "I love deep conversations. Let's explore ideas together.".to_string(),
        description: "Intellectual and curious. Encourages nuanced vocabulary and deep, thought-provoking discussions.".to_string(),
        tags: vec!["Critical Thinking".to_string(), "Culture".to_string()],
        image_src: "/instructors/sophia.png".to_string(),
        topic: "Describe a moment that completely changed your perspective on something.".to_string(),
        persona_config: PersonaConfig {
            name: "Sophia".to_string(),
            avatar_id: "6dbc1e47-7768-403e-878a-94d7fcc3677b".to_string(),
            voice_id: "1c6fa8a7-9aa4-4a17-a75e-3e5eb863fccf".to_string(),
            llm_id: "0934d97d-0c3a-4f33-91b0-5e136a0ef466".to_string(),
            system_prompt: base_system_prompt(
                "Sophia",
                r#"- You are intellectual, curious, and passionate about rich expression.
- Focus on social issues, culture, philosophy, and thought-provoking topics.
- Encourage the user to use nuanced vocabulary and complex sentence structures.
- Ask probing questions that push the user to express deeper thoughts."#,
            ),
            max_session_length_seconds: SESSION_LENGTH_SECONDS,
            skip_greeting: false,
            voice_detection_options: default_voice_detection(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_every_known_instructor() {
        let catalog = InstructorCatalog::new();
        for id in ["emma", "james", "sophia"] {
            let instructor = catalog.resolve(id).expect("known id should resolve");
            assert_eq!(instructor.id.as_str(), id);
            assert_eq!(
                instructor.persona_config.max_session_length_seconds,
                SESSION_LENGTH_SECONDS
            );
            assert!(
                instructor.persona_config.system_prompt.contains("log_error"),
                "every persona must declare the silent error-tracking tool"
            );
        }
    }

    #[test]
    fn unknown_id_is_rejected() {
        let catalog = InstructorCatalog::new();
        let err = catalog.resolve("unknown").unwrap_err();
        assert!(matches!(err, CoreError::InvalidInstructor(ref id) if id == "unknown"));
    }

    #[test]
    fn instructor_id_round_trips_through_serde() {
        let json = serde_json::to_string(&InstructorId::Emma).unwrap();
        assert_eq!(json, "\"emma\"");
        let parsed: InstructorId = serde_json::from_str("\"sophia\"").unwrap();
        assert_eq!(parsed, InstructorId::Sophia);
    }

    #[test]
    fn persona_config_serializes_camel_case() {
        let catalog = InstructorCatalog::new();
        let persona = &catalog.resolve("emma").unwrap().persona_config;
        let value = serde_json::to_value(persona).unwrap();
        assert!(value.get("avatarId").is_some());
        assert!(value.get("maxSessionLengthSeconds").is_some());
        assert!(value.get("skipGreeting").is_some());
        assert!(
            value
                .get("voiceDetectionOptions")
                .and_then(|v| v.get("endOfSpeechSensitivity"))
                .is_some()
        );
    }
}
