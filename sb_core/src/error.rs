use thiserror::Error;

/// Failures surfaced by the upstream generative model or its transport.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("upstream returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("upstream timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error("upstream not configured: {0}")]
    NotConfigured(String),
}

impl UpstreamError {
    /// Whether a fallback attempt against another model is worthwhile.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Http { status, .. } => matches!(status, 500 | 503 | 429),
            UpstreamError::Timeout { .. } | UpstreamError::ConnectionReset(_) => true,
            UpstreamError::InvalidResponse(_) | UpstreamError::NotConfigured(_) => false,
        }
    }
}

/// Failures from the history or profile store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Failures from a tool invocation. Surfaced to the model as a structured
/// function response, never as a loop abort.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("tool {tool} failed: {reason}")]
    Failed { tool: String, reason: String },
}
