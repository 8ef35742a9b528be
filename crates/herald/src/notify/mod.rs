//! Lifecycle notification sinks.
//!
//! The session state machine reports every externally interesting transition
//! (QR challenge, ready, disconnect, auth failure, lifetime expiry) to a
//! [`LifecycleSink`]. Sinks present the events elsewhere: logs, a webhook, or
//! the latest QR code exposed over HTTP.

mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub use webhook::WebhookSink;

// ============================================================================
// Events
// ============================================================================

/// Lifecycle event reported to sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Loading {
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    QrChallenge {
        data: String,
    },
    Ready {
        #[serde(skip_serializing_if = "Option::is_none")]
        account: Option<String>,
    },
    Disconnected {
        reason: String,
    },
    AuthFailure {
        reason: String,
    },
    InitializationFailed {
        reason: String,
    },
    LifetimeExpired {
        lifetime_seconds: u64,
    },
}

impl LifecycleEvent {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Loading { .. } => "loading",
            Self::QrChallenge { .. } => "qr_challenge",
            Self::Ready { .. } => "ready",
            Self::Disconnected { .. } => "disconnected",
            Self::AuthFailure { .. } => "auth_failure",
            Self::InitializationFailed { .. } => "initialization_failed",
            Self::LifetimeExpired { .. } => "lifetime_expired",
        }
    }
}

// ============================================================================
// Sink trait
// ============================================================================

/// Receives lifecycle events for external presentation.
///
/// Implementations must not block for long: the state machine awaits
/// `notify` inline (the lifetime-expiry path relies on the notification
/// completing before the session is destroyed).
#[async_trait]
pub trait LifecycleSink: Send + Sync {
    async fn notify(&self, event: &LifecycleEvent);
}

// ============================================================================
// LogSink
// ============================================================================

/// Sink that writes lifecycle events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl LifecycleSink for LogSink {
    async fn notify(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Loading { percent, message } => {
                info!(?percent, message = ?message, "Session loading");
            }
            LifecycleEvent::QrChallenge { .. } => {
                info!("QR challenge received, scan it to authenticate the session");
            }
            LifecycleEvent::Ready { account } => {
                info!(account = ?account, "Session ready");
            }
            LifecycleEvent::Disconnected { reason } => {
                warn!(reason = %reason, "Session disconnected");
            }
            LifecycleEvent::AuthFailure { reason } => {
                warn!(reason = %reason, "Session authentication failed");
            }
            LifecycleEvent::InitializationFailed { reason } => {
                warn!(reason = %reason, "Session initialization failed");
            }
            LifecycleEvent::LifetimeExpired { lifetime_seconds } => {
                info!(lifetime_seconds, "Session lifetime expired, destroying session");
            }
        }
    }
}

// ============================================================================
// FanoutSink
// ============================================================================

/// Sink that forwards every event to each of its sinks in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn LifecycleSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: Arc<dyn LifecycleSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl LifecycleSink for FanoutSink {
    async fn notify(&self, event: &LifecycleEvent) {
        for sink in &self.sinks {
            sink.notify(event).await;
        }
    }
}

// ============================================================================
// LatestQr
// ============================================================================

/// Most recent QR challenge, for presentation over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QrChallenge {
    pub data: String,
    pub received_at: DateTime<Utc>,
}

/// Sink that remembers the latest QR challenge until the session settles.
///
/// Any event other than `qr_challenge` or `loading` clears the stored code:
/// once the session is ready, disconnected, or failed, the old code is stale.
#[derive(Clone, Default)]
pub struct LatestQr {
    current: Arc<RwLock<Option<QrChallenge>>>,
}

impl LatestQr {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> Option<QrChallenge> {
        self.current.read().await.clone()
    }
}

#[async_trait]
impl LifecycleSink for LatestQr {
    async fn notify(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::QrChallenge { data } => {
                *self.current.write().await = Some(QrChallenge {
                    data: data.clone(),
                    received_at: Utc::now(),
                });
            }
            LifecycleEvent::Loading { .. } => {}
            _ => {
                self.current.write().await.take();
            }
        }
    }
}
