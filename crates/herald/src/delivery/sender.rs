//! The send adapter the queue delivers through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::TransportError;

/// Backend acknowledgement of one transmitted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Transmits one message. The queue owns retries; implementations make a
/// single attempt.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, recipient: &str, content: &str) -> Result<SendReceipt, TransportError>;
}
