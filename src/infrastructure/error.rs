use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Invalid schedule: {0}")]
    Validation(String),
    #[error("google calendar api error: http {status}; body={body}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("calendar payload error: {0}")]
    Calendar(String),
    #[error("Credential error: {0}")]
    Credential(String),
}

impl InfraError {
    /// Rate limiting, server-side failures and dropped connections.
    pub fn is_transient(&self) -> bool {
        match self {
            InfraError::Http { status, .. } => *status == 429 || (500..600).contains(status),
            InfraError::Network(_) => true,
            _ => false,
        }
    }

    /// Failures that will repeat for every remaining call in the run. A 403
    /// is refused per event (for example on events the user does not
    /// organize), so it is not fatal.
    pub fn is_fatal(&self) -> bool {
        match self {
            InfraError::Http { status, .. } => *status == 401,
            InfraError::Credential(_) => true,
            _ => false,
        }
    }
}
