//! The external messaging session and its lifecycle.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────────┐  connect()   ┌─────────────────────┐
//!  │  SessionManager  │─────────────▶│  SessionConnector   │  (driver subprocess,
//!  │  phase, handle,  │              └──────────┬──────────┘   or a fake in tests)
//!  │  pending init    │◀── SessionEvent (mpsc) ─┘
//!  └────────┬─────────┘
//!           │ current_handle()
//!           ▼
//!  ┌──────────────────┐   send()     ┌─────────────────────┐
//!  │  SessionSender   │─────────────▶│  SessionLink        │
//!  └──────────────────┘              └─────────────────────┘
//! ```
//!
//! - **SessionManager**: the state machine. Coalesces concurrent
//!   `ensure_ready` calls onto one bring-up and owns the ready handle.
//! - **SessionConnector / SessionLink**: the seam to the external session.
//! - **SessionSender**: the queue's send adapter, borrowing the ready handle.

mod error;
mod events;
mod handle;
mod link;
mod manager;
mod sender;
mod subprocess;

pub use error::{SessionError, SessionResult};
pub use events::SessionEvent;
pub use handle::SessionHandle;
pub use link::{Connection, SessionConnector, SessionLink};
pub use manager::{DEFAULT_INIT_TIMEOUT, ManagerConfig, SessionManager, SessionPhase, SessionStatus};
pub use sender::{DEFAULT_SEND_TIMEOUT, SessionSender};
pub use subprocess::{DriverConfig, SubprocessConnector};
