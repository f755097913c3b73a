use thiserror::Error;

/// JSON-RPC error codes that indicate a temporary condition on the node.
const TRANSIENT_RPC_CODES: &[i64] = &[
    -32603, // internal error
    -32005, // limit exceeded
    429,
];

/// Messages that mark an otherwise generic server error as temporary.
/// Nodes reuse -32000 both for these and for outright transaction rejections.
const TRANSIENT_RPC_MESSAGES: &[&str] = &["header not found", "rate limit", "timeout", "try again"];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("rate limited by provider")]
    RateLimited,

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("missing result for {0}")]
    MissingResult(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("subscription connection not available")]
    NotConnected,

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl ProviderError {
    /// Transient failures are retried by the calling component; permanent
    /// ones are surfaced.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_)
            | Self::Timeout
            | Self::RateLimited
            | Self::MissingResult(_)
            | Self::InvalidResponse(_)
            | Self::NotConnected => true,
            Self::Rpc { code, message } => {
                let message = message.to_ascii_lowercase();
                TRANSIENT_RPC_CODES.contains(code)
                    || TRANSIENT_RPC_MESSAGES.iter().any(|m| message.contains(m))
            }
            Self::Unsupported(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_decode() {
            ProviderError::InvalidResponse(e.to_string())
        } else if e.status().map(|s| s.as_u16()) == Some(429) {
            ProviderError::RateLimited
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}
