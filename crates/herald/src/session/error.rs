//! Session lifecycle errors.

use std::time::Duration;

use thiserror::Error;

/// Errors from session bring-up and lifecycle commands.
///
/// Cloneable so that one initialization outcome can be handed to every
/// caller that coalesced onto the same attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The messaging backend rejected the credentials.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The session did not become ready within the initialization bound.
    #[error("session initialization timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Bring-up failed for any other reason (driver missing, crashed, reset).
    #[error("session initialization failed: {0}")]
    Init(String),

    /// An operation required a ready (logged in) session.
    #[error("session is not logged in")]
    NotReady,

    /// A lifecycle command sent to the external session failed.
    #[error("session command failed: {0}")]
    Command(String),
}

impl SessionError {
    pub fn init(message: impl Into<String>) -> Self {
        Self::Init(message.into())
    }

    pub fn command(message: impl Into<String>) -> Self {
        Self::Command(message.into())
    }

    /// True for the errors produced by a failed initialization attempt.
    pub fn is_initialization(&self) -> bool {
        matches!(self, Self::AuthFailed(_) | Self::Timeout(_) | Self::Init(_))
    }
}

/// Convenience type alias for session results.
pub type SessionResult<T> = Result<T, SessionError>;
