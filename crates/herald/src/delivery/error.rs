//! Delivery errors.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single send attempt. Always retryable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// No ready session to send through.
    #[error("no ready session to send through")]
    SessionUnavailable,

    /// The messaging backend refused the message.
    #[error("send rejected: {0}")]
    Rejected(String),

    /// The external session went away mid-send.
    #[error("session channel closed")]
    ChannelClosed,

    #[error("send timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The sender panicked during the attempt.
    #[error("sender panicked: {0}")]
    Panicked(String),
}

/// Terminal failure of a queued delivery.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Every allowed attempt failed.
    #[error("delivery failed after {attempts} attempt(s): {last_error}")]
    Failed {
        attempts: u32,
        last_error: TransportError,
    },

    /// The item was removed from the backlog before it was sent.
    #[error("delivery discarded before it was sent")]
    Discarded,
}
