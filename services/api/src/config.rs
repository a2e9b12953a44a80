//! Application configuration.
//!
//! Loads settings from environment variables (and a local `.env` file when
//! present) into a single shareable struct. Provider credentials are
//! optional at startup: a missing key surfaces as a misconfiguration error
//! on the request that needs it, not as a boot failure.

use secrecy::SecretString;
use std::env;
use tracing::Level;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_FEEDBACK_MODEL: &str = "claude-sonnet-4-6";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
}

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Credential for the avatar provider's session-token endpoint.
    pub avatar_api_key: Option<SecretString>,
    /// Credential for the feedback text-generation provider.
    pub anthropic_api_key: Option<SecretString>,
    pub feedback_model: String,
    pub bind_addr: String,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `ANAM_API_KEY`: Secret key for the avatar provider. Required for token issuance.
    // *   `ANTHROPIC_API_KEY`: Secret key for feedback generation.
    // *   `FEEDBACK_MODEL`: (Optional) Model used for feedback generation.
    // *   `BIND_ADDR`: (Optional) Address the server binds to. Defaults to "0.0.0.0:3000".
    // *   `RUST_LOG`: (Optional) Logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env for local development; ignored when not present.
        dotenvy::dotenv().ok();

        let avatar_api_key = env::var("ANAM_API_KEY").ok().map(SecretString::from);
        let anthropic_api_key = env::var("ANTHROPIC_API_KEY").ok().map(SecretString::from);
        let feedback_model =
            env::var("FEEDBACK_MODEL").unwrap_or_else(|_| DEFAULT_FEEDBACK_MODEL.to_string());
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

        let log_level_str = env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            avatar_api_key,
            anthropic_api_key,
            feedback_model,
            bind_addr,
            log_level,
        })
    }
}
