use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("{provider} returned status {status}: {body}")]
    Provider {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),

    #[error("stream parse error: {0}")]
    StreamParse(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Fieldless discriminant of [`LlmError`], for matching without destructuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    InvalidInput,
    Http,
    Provider,
    ResponseFormat,
    StreamParse,
    Cancelled,
}

impl LlmError {
    pub fn kind(&self) -> LlmErrorKind {
        match self {
            Self::InvalidInput(_) => LlmErrorKind::InvalidInput,
            Self::Http(_) => LlmErrorKind::Http,
            Self::Provider { .. } => LlmErrorKind::Provider,
            Self::ResponseFormat(_) => LlmErrorKind::ResponseFormat,
            Self::StreamParse(_) => LlmErrorKind::StreamParse,
            Self::Cancelled => LlmErrorKind::Cancelled,
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Provider { provider, .. } => Some(provider),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Provider { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}
