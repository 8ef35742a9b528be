//! Lifecycle signals emitted by an external session.

use herald_session_protocol::DriverEvent;

/// Lifecycle signals an external session delivers to the state machine.
///
/// A fresh channel of these is created for every connection attempt, so
/// signals from an abandoned attempt can never reach a newer one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The client is starting or syncing.
    Loading {
        percent: Option<u8>,
        message: Option<String>,
    },
    /// A QR code must be scanned to authenticate.
    QrChallenge(String),
    /// The session is authenticated and can send.
    Ready { account: Option<String> },
    /// The backend rejected authentication.
    AuthFailure(String),
    /// The connection was lost.
    Disconnected(String),
}

impl SessionEvent {
    /// Map a driver event onto a lifecycle signal.
    ///
    /// Returns `None` for command replies, which are routed by request id.
    pub fn from_driver(event: DriverEvent) -> Option<Self> {
        match event {
            DriverEvent::Loading { percent, message } => Some(Self::Loading { percent, message }),
            DriverEvent::Qr { data } => Some(Self::QrChallenge(data)),
            DriverEvent::Ready { account } => Some(Self::Ready { account }),
            DriverEvent::AuthFailure { reason } => Some(Self::AuthFailure(reason)),
            DriverEvent::Disconnected { reason } => Some(Self::Disconnected(reason)),
            DriverEvent::MessageSent { .. }
            | DriverEvent::CommandError { .. }
            | DriverEvent::LoggedOut { .. } => None,
        }
    }
}
