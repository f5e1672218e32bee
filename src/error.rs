//! Error types for the chat client

use std::time::Duration;
use thiserror::Error;

/// Reasons a send is refused locally, before anything reaches the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PreconditionFailure {
    #[error("message is empty")]
    EmptyMessage,

    #[error("a message is already being sent")]
    SendPending,

    #[error("daily message limit reached")]
    QuotaExhausted,
}

/// Chat client error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Request exceeded the client timeout
    #[error("Request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Server rejected the platform credentials (HTTP 401)
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Any other non-2xx status, or a network-level fault when `status` is `None`
    #[error("{}", transport_message(.status, .message))]
    Transport { status: Option<u16>, message: String },

    /// Send refused locally
    #[error("Send rejected: {0}")]
    Precondition(#[from] PreconditionFailure),
}

fn transport_message(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(status) => format!("API error ({}): {}", status, message),
        None => format!("Request failed: {}", message),
    }
}

impl ChatError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ChatError::Authentication { .. } => Some(401),
            ChatError::Transport { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, ChatError::Authentication { .. })
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, ChatError::Precondition(_))
    }
}

/// Result type for chat client operations
pub type Result<T> = std::result::Result<T, ChatError>;
