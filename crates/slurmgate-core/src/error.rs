use thiserror::Error;

/// Errors produced by slurmgate components.
#[derive(Debug, Error)]
pub enum GateError {
    /// The username does not map to an operating-system account.
    #[error("identity not found: {0}")]
    IdentityNotFound(String),

    /// Terminal allocation or process spawn failed.
    #[error("launch failed: {0}")]
    LaunchFailure(String),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The session still exists but its terminal has been closed.
    #[error("terminal closed: {0}")]
    TerminalClosed(String),

    #[error("connection upgrade failed: {0}")]
    ConnectionUpgrade(String),

    #[error("token error: {0}")]
    Token(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for GateError {
    fn from(e: serde_json::Error) -> Self {
        GateError::InvalidRequest(e.to_string())
    }
}

pub type GateResult<T> = Result<T, GateError>;
