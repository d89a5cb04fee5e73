//! Error types for the print agent.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Spooler: {0}")]
    Spooler(String),

    #[error("Protocol: {0}")]
    Protocol(String),

    #[error("Config: {0}")]
    Config(String),
}

impl AgentError {
    /// `true` when the API could not be reached at all (refused, unresolvable,
    /// dropped mid-request or timed out).
    pub fn is_connect(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
