use thiserror::Error;

/// Top-level error type for the Slipscan pipeline.
#[derive(Debug, Error)]
pub enum SlipError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("{service} returned {status}: {message}")]
    Upstream {
        service: String,
        status: u16,
        message: String,
    },

    #[error("transport error talking to {service}: {message}")]
    Transport { service: String, message: String },

    #[error("failed to parse receipt data: {0}")]
    Parse(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("dispatch error: {0}")]
    Dispatch(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type SlipResult<T> = Result<T, SlipError>;

impl SlipError {
    pub fn upstream(service: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            service: service.into(),
            status,
            message: message.into(),
        }
    }

    pub fn transport(service: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Transport {
            service: service.into(),
            message: err.to_string(),
        }
    }

    /// Whether a queue should try the job again.
    ///
    /// Upstream 4xx responses other than 408/429 mean the request itself is
    /// wrong and will fail the same way next time.
    pub fn is_retryable(&self) -> bool {
        match self {
            SlipError::Upstream { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            SlipError::Config(_) | SlipError::NotFound(_) => false,
            SlipError::Transport { .. }
            | SlipError::Parse(_)
            | SlipError::Storage(_)
            | SlipError::Ledger(_)
            | SlipError::Dispatch(_)
            | SlipError::Other(_) => true,
        }
    }
}

impl From<std::io::Error> for SlipError {
    fn from(err: std::io::Error) -> Self {
        SlipError::Storage(err.to_string())
    }
}
