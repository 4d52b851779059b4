//! Error taxonomy for command handlers.
//!
//! Every variant maps to one HTTP status and an `{"error": "..."}` body.
//! Nothing here is allowed to escape a handler as a panic or dropped connection.

use serde::Serialize;
use thiserror::Error;

use crate::server::CommandResponse;

#[derive(Error, Debug)]
pub enum CommandError {
    /// Missing or malformed request fields; no side effects were attempted.
    #[error("{0}")]
    Validation(String),

    /// Host state change failed; earlier side effects are not rolled back.
    #[error("{0}")]
    StateConflict(String),

    #[error("timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// A collaborator call reported failure.
    #[error("{0}")]
    Collaborator(String),

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Unsupported(String),

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

#[derive(Serialize)]
struct TimeoutBody {
    timeout: bool,
}

impl CommandError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CommandError::Validation(msg.into())
    }

    /// Wrap a collaborator failure, keeping its full context chain in the message.
    pub fn collaborator(err: anyhow::Error) -> Self {
        CommandError::Collaborator(format!("{:#}", err))
    }

    pub fn status(&self) -> u16 {
        match self {
            CommandError::Validation(_) => 400,
            CommandError::StateConflict(_) => 500,
            CommandError::Timeout { .. } => 408,
            CommandError::Collaborator(_) => 500,
            CommandError::NotFound => 404,
            CommandError::Unsupported(_) => 501,
            CommandError::PayloadTooLarge { .. } => 413,
            CommandError::Transport(_) => 500,
            CommandError::Internal(_) => 500,
        }
    }

    pub fn to_response(&self) -> CommandResponse {
        if let CommandError::Timeout { .. } = self {
            return CommandResponse::json(self.status(), &TimeoutBody { timeout: true });
        }
        let message = self.to_string();
        CommandResponse::json(self.status(), &ErrorBody { error: &message })
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(err: serde_json::Error) -> Self {
        CommandError::Validation(format!("invalid JSON: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, CommandError>;
