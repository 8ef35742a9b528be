//! Handle to the ready external session.

use std::fmt;
use std::sync::Arc;

use ulid::Ulid;

use crate::delivery::{SendReceipt, TransportError};

use super::error::SessionResult;
use super::link::SessionLink;

/// Handle to one ready external session.
///
/// Owned by the [`SessionManager`](super::SessionManager) and lent out to
/// callers; cheap to clone. Two handles compare equal when they refer to the
/// same bring-up.
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    account: Option<String>,
    link: Arc<dyn SessionLink>,
}

impl SessionHandle {
    pub(crate) fn new(link: Arc<dyn SessionLink>, account: Option<String>) -> Self {
        Self {
            id: Ulid::new().to_string(),
            account,
            link,
        }
    }

    /// Unique id of the bring-up that produced this handle.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Account reported by the backend when the session became ready.
    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    pub async fn send(&self, to: &str, content: &str) -> Result<SendReceipt, TransportError> {
        self.link.send(to, content).await
    }

    pub(crate) async fn logout(&self) -> SessionResult<()> {
        self.link.logout().await
    }

    pub(crate) async fn shutdown(&self) {
        self.link.shutdown().await;
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SessionHandle {}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}
