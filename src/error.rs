use thiserror::Error;

/// Result type alias used across the client.
pub type Result<T> = std::result::Result<T, MailError>;

/// Errors surfaced by the mail client.
///
/// Throttling responses (429/503) never appear here directly: they are retried
/// by the request executor and only surface as [`MailError::RetryExhausted`].
#[derive(Debug, Error)]
pub enum MailError {
    /// A call parameter or local file failed validation. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The token endpoint rejected the client-credentials exchange.
    #[error("authentication failed: {status}{}", suffix(.description))]
    Authentication {
        /// Status line returned by the token endpoint, e.g. `401 Unauthorized`.
        status: String,
        /// Provider supplied `error_description`, when the body could be parsed.
        description: Option<String>,
    },

    /// Terminal non-success status from the Graph API.
    #[error("graph api returned {status} {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        details: Option<String>,
    },

    /// A nominally successful response carried an unusable body.
    #[error("unexpected response: {0}")]
    Protocol(String),

    /// The retry budget was used up on throttling or auth retries.
    #[error("retries exhausted after {attempts} attempts for {method} {url}")]
    RetryExhausted {
        method: String,
        url: String,
        attempts: u32,
    },

    /// Connection, TLS or timeout failure below the HTTP layer.
    #[error("http transport failed: {0}")]
    Transport(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl MailError {
    /// Provider error code for [`MailError::Api`], e.g. `ErrorItemNotFound`.
    pub fn api_code(&self) -> Option<&str> {
        match self {
            MailError::Api { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        MailError::Validation(message.into())
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        MailError::Protocol(message.into())
    }
}

fn suffix(description: &Option<String>) -> String {
    description
        .as_deref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}
