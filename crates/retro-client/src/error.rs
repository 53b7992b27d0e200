use serde::Serialize;
use thiserror::Error;

use retro_types::api::{ErrorBody, ErrorCode};

/// Why a synchronized operation did not take effect.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SyncError {
    /// Durable write or transport call failed for connectivity reasons.
    #[error("network error: {0}")]
    Transient(String),

    /// Caller may not modify this item or board.
    #[error("not allowed: {0}")]
    Unauthorized(String),

    #[error("this session has ended")]
    SessionEnded,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Invalid(String),

    /// The like already existed. The desired end state holds.
    #[error("reaction already recorded")]
    DuplicateReaction,

    /// Another participant ended the board first.
    #[error("board was already ended")]
    ExpiryRaceNoop,

    /// The board view was closed before the request was handled.
    #[error("board view is closed")]
    Closed,
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Whether the user should ever see this.
    pub fn is_surfaced(&self) -> bool {
        !matches!(
            self,
            Self::DuplicateReaction | Self::ExpiryRaceNoop | Self::Closed
        )
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Transient(_) => {
                "Couldn't reach the server, so your change was undone. Please try again.".into()
            }
            Self::Unauthorized(reason) => format!("You can't do that: {}.", reason),
            Self::SessionEnded => "This session has ended. Changes are no longer accepted.".into(),
            Self::NotFound(what) => format!("That {} no longer exists.", what),
            Self::Invalid(reason) => reason.clone(),
            Self::DuplicateReaction | Self::ExpiryRaceNoop | Self::Closed => String::new(),
        }
    }

    /// Map a REST error response onto the taxonomy.
    pub fn from_response(status: u16, body: Option<ErrorBody>) -> Self {
        match body {
            Some(ErrorBody { code, message }) => match code {
                ErrorCode::SessionEnded => Self::SessionEnded,
                ErrorCode::Forbidden => Self::Unauthorized(message),
                ErrorCode::NotFound => Self::NotFound(message.trim_end_matches(" not found").into()),
                ErrorCode::Invalid => Self::Invalid(message),
                ErrorCode::Internal => Self::Transient(message),
            },
            None if status == 401 => Self::Unauthorized("session token was rejected".into()),
            None if status == 403 => Self::Unauthorized(format!("server refused with {}", status)),
            None => Self::Transient(format!("server answered {}", status)),
        }
    }
}

/// A user-facing message produced by a rolled-back or rejected operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub message: String,
    /// Transient failures can simply be dismissed and retried.
    pub dismissible: bool,
    pub cause: SyncError,
}

impl From<SyncError> for Notice {
    fn from(cause: SyncError) -> Self {
        Self {
            message: cause.user_message(),
            dismissible: cause.is_retryable(),
            cause,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ended_is_distinct_from_generic_failure() {
        let ended = Notice::from(SyncError::SessionEnded);
        let flaky = Notice::from(SyncError::Transient("timeout".into()));

        assert!(ended.message.contains("session has ended"));
        assert!(!ended.dismissible);
        assert_ne!(ended.message, flaky.message);
        assert!(flaky.dismissible);
    }

    #[test]
    fn quiet_errors_are_not_surfaced() {
        assert!(!SyncError::DuplicateReaction.is_surfaced());
        assert!(!SyncError::ExpiryRaceNoop.is_surfaced());
        assert!(SyncError::Unauthorized("x".into()).is_surfaced());
        assert!(!SyncError::SessionEnded.is_retryable());
    }

    #[test]
    fn error_bodies_map_onto_taxonomy() {
        let body = |code| {
            Some(ErrorBody {
                code,
                message: "item not found".into(),
            })
        };
        assert_eq!(SyncError::from_response(409, body(ErrorCode::SessionEnded)), SyncError::SessionEnded);
        assert_eq!(
            SyncError::from_response(404, body(ErrorCode::NotFound)),
            SyncError::NotFound("item".into())
        );
        assert!(SyncError::from_response(502, None).is_retryable());
        assert!(matches!(SyncError::from_response(401, None), SyncError::Unauthorized(_)));
    }
}
