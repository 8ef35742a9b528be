//! Outbound delivery queue.
//!
//! Callers hand a [`MessagePayload`] to the [`DeliveryQueue`] and get back a
//! [`DeliveryHandle`] that resolves once the message is sent or has
//! permanently failed. A single background loop drains the backlog in
//! bounded batches through a [`MessageSender`].

mod error;
mod queue;
mod sender;

pub use error::{DeliveryError, TransportError};
pub use queue::{
    Delivery, DeliveryHandle, DeliveryQueue, MessagePayload, Priority, QueueStats, RetryPolicy,
};
pub use sender::{MessageSender, SendReceipt};
