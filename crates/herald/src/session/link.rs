//! Seam between the state machine and whatever implements the external session.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::delivery::{SendReceipt, TransportError};

use super::error::SessionResult;
use super::events::SessionEvent;

/// Starts external messaging sessions.
///
/// Each call to [`connect`](SessionConnector::connect) creates a brand new
/// external session together with the channel its lifecycle signals arrive
/// on. The state machine guarantees at most one call is in flight.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self) -> SessionResult<Connection>;
}

/// A freshly started external session.
pub struct Connection {
    pub link: Arc<dyn SessionLink>,
    pub events: mpsc::Receiver<SessionEvent>,
}

impl Connection {
    pub fn new(link: Arc<dyn SessionLink>, events: mpsc::Receiver<SessionEvent>) -> Self {
        Self { link, events }
    }
}

/// Operations on one live external session.
#[async_trait]
pub trait SessionLink: Send + Sync {
    /// Transmit one message.
    async fn send(&self, to: &str, content: &str) -> Result<SendReceipt, TransportError>;

    /// Log the account out of the messaging backend.
    async fn logout(&self) -> SessionResult<()>;

    /// Tear the external session down. Must be safe to call more than once.
    async fn shutdown(&self);
}
