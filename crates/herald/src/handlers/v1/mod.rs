//! `/api/v1` handlers.

mod messages;
mod queue;
mod session;

pub use messages::{REQUIRED_FIELDS, compose_content, send_message};
pub use queue::{clear_queue, queue_stats};
pub use session::{destroy_session, initialize_session, logout_session, session_qr, session_status};
