//! Shared API types used by both server handlers and client.
//!
//! These types define the contract between server and client.
//! Changes here affect both sides, preventing silent drift.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::delivery::{Priority, QueueStats};
use crate::session::{SessionPhase, SessionStatus};

// ============================================================================
// Health
// ============================================================================

/// Response from `GET /readyz`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyzResponse {
    pub status: String,
    pub phase: SessionPhase,
}

// ============================================================================
// Session
// ============================================================================

/// Response from `GET /api/v1/session/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub phase: SessionPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

impl From<SessionStatus> for SessionStatusResponse {
    fn from(status: SessionStatus) -> Self {
        Self {
            phase: status.phase,
            session_id: status.session_id,
            account: status.account,
        }
    }
}

/// Response from `POST /api/v1/session/initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResponse {
    pub phase: SessionPhase,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

/// Response from `POST /api/v1/session/logout`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub logged_out: bool,
}

/// Response from `POST /api/v1/session/destroy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestroyResponse {
    /// False when there was nothing to tear down.
    pub destroyed: bool,
}

/// Response from `GET /api/v1/session/qr`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrResponse {
    pub data: String,
    pub received_at: DateTime<Utc>,
}

// ============================================================================
// Messages
// ============================================================================

/// Body of `POST /api/v1/messages`.
///
/// `title` and `message` are required; they are optional here so that a
/// missing field produces the API's own validation error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Recipient; defaults to the configured admin recipient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

/// Response from `POST /api/v1/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SendMessageResponse {
    /// Delivered within the wait window.
    Sent {
        id: String,
        message_id: String,
        timestamp: DateTime<Utc>,
        attempts: u32,
    },
    /// Still pending; delivery continues in the background.
    Queued { id: String },
}

// ============================================================================
// Queue
// ============================================================================

/// Response from `GET /api/v1/queue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatsResponse {
    pub queued: usize,
    pub in_flight: usize,
    pub sent_total: u64,
    pub failed_total: u64,
    pub queued_total: u64,
    pub is_processing: bool,
}

impl From<QueueStats> for QueueStatsResponse {
    fn from(stats: QueueStats) -> Self {
        Self {
            queued: stats.queued,
            in_flight: stats.in_flight,
            sent_total: stats.sent_total,
            failed_total: stats.failed_total,
            queued_total: stats.queued_total,
            is_processing: stats.is_processing,
        }
    }
}

/// Response from `DELETE /api/v1/queue`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClearQueueResponse {
    pub cleared: usize,
}
