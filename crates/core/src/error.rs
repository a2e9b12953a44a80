/// Failure taxonomy shared by the catalog, token issuer, session
/// controller and feedback synthesizer.
///
/// Each variant maps to a stable machine-readable code via [`CoreError::code`]
/// so the HTTP surface can report failures without leaking upstream detail.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("unknown instructor id: {0}")]
    InvalidInstructor(String),

    /// A required server credential is absent from the environment.
    #[error("missing server credential: {0}")]
    ServerMisconfigured(&'static str),

    /// The upstream provider answered with a non-success status. The body is
    /// kept for server-side diagnostics and must never reach the end user.
    #[error("provider returned status {status}")]
    ProviderError { status: u16, body: String },

    #[error("no conversation data provided")]
    NoConversationData,

    /// The provider answered successfully but the payload could not be
    /// coerced into the expected shape.
    #[error("malformed provider response: {0}")]
    MalformedProviderResponse(String),

    /// The avatar transport failed to initialize. Distinct from a normal
    /// session termination: no session record exists on this path.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A client-side deadline elapsed before the provider answered.
    #[error("provider call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl CoreError {
    /// Stable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInstructor(_) => "invalid_instructor",
            Self::ServerMisconfigured(_) => "server_misconfigured",
            Self::ProviderError { .. } => "provider_error",
            Self::NoConversationData => "no_conversation_data",
            Self::MalformedProviderResponse(_) => "malformed_provider_response",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::Timeout { .. } => "timeout",
            Self::Http(_) => "provider_unreachable",
        }
    }
}
