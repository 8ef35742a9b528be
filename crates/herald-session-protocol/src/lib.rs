//! Session driver protocol types for communication between Herald and a session driver.
//!
//! A session driver is an external process that owns the actual messaging
//! client (for example a WhatsApp Web bridge). Herald starts one driver per
//! session bring-up and talks to it with JSON Lines (newline-delimited JSON)
//! over stdio:
//!
//! - **Commands** (Herald → Driver): send a message, log out, shut down
//! - **Events** (Driver → Herald): lifecycle signals and command replies
//!
//! # Example: Minimal Driver
//!
//! ```ignore
//! use herald_session_protocol::{DriverCommand, DriverEvent};
//!
//! // Announce readiness once the client is authenticated
//! println!("{}", serde_json::to_string(&DriverEvent::Ready { account: None })?);
//!
//! // Read commands from stdin
//! let line = read_line_from_stdin();
//! let command: DriverCommand = serde_json::from_str(&line)?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Commands (Herald → Driver)
// ============================================================================

/// Commands sent from Herald to a session driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverCommand {
    /// Send a text message to a recipient.
    SendMessage {
        request_id: String,
        to: String,
        content: String,
    },

    /// Log the authenticated account out of the messaging backend.
    Logout { request_id: String },

    /// Request graceful shutdown of the driver process.
    Shutdown,
}

impl DriverCommand {
    /// Request id carried by the command, if it expects a reply.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            DriverCommand::SendMessage { request_id, .. } | DriverCommand::Logout { request_id } => {
                Some(request_id)
            }
            DriverCommand::Shutdown => None,
        }
    }
}

// ============================================================================
// Events (Driver → Herald)
// ============================================================================

/// Events sent from a session driver to Herald.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverEvent {
    /// The client is starting up or syncing.
    Loading {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        percent: Option<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Authentication requires scanning a QR code.
    Qr { data: String },

    /// The client is authenticated and can send messages.
    Ready {
        /// Account identifier reported by the backend, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        account: Option<String>,
    },

    /// Authentication was rejected by the backend.
    AuthFailure { reason: String },

    /// The connection to the backend was lost.
    Disconnected { reason: String },

    /// A `SendMessage` command completed.
    MessageSent {
        request_id: String,
        message_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A command failed.
    CommandError { request_id: String, message: String },

    /// A `Logout` command completed.
    LoggedOut { request_id: String },
}

impl DriverEvent {
    /// Request id of the command this event replies to, if it is a reply.
    pub fn reply_to(&self) -> Option<&str> {
        match self {
            DriverEvent::MessageSent { request_id, .. }
            | DriverEvent::CommandError { request_id, .. }
            | DriverEvent::LoggedOut { request_id } => Some(request_id),
            _ => None,
        }
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Environment variables Herald sets on a spawned driver.
pub mod env {
    /// Connection string of the persistent session store.
    pub const SESSION_STORE_URL: &str = "HERALD_SESSION_STORE_URL";
}
