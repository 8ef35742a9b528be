//! Send adapter backed by the ready session.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::delivery::{MessageSender, SendReceipt, TransportError};

use super::manager::SessionManager;

/// Default bound on a single send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(60);

/// Delivers queued messages through whatever session is ready right now.
///
/// Never starts initialization: a send with no ready session fails with
/// [`TransportError::SessionUnavailable`] and is retried by the queue.
#[derive(Clone)]
pub struct SessionSender {
    session: SessionManager,
    send_timeout: Duration,
}

impl SessionSender {
    pub fn new(session: SessionManager, send_timeout: Duration) -> Self {
        Self {
            session,
            send_timeout,
        }
    }
}

#[async_trait]
impl MessageSender for SessionSender {
    async fn send(&self, recipient: &str, content: &str) -> Result<SendReceipt, TransportError> {
        let handle = self
            .session
            .current_handle()
            .await
            .ok_or(TransportError::SessionUnavailable)?;

        debug!(session_id = %handle.id(), recipient, "Sending message");
        tokio::time::timeout(self.send_timeout, handle.send(recipient, content))
            .await
            .map_err(|_| TransportError::Timeout(self.send_timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use tokio::sync::mpsc;

    use crate::notify::LogSink;
    use crate::session::{
        Connection, ManagerConfig, SessionConnector, SessionEvent, SessionLink, SessionResult,
    };

    struct SlowLink {
        delay: Duration,
    }

    #[async_trait]
    impl SessionLink for SlowLink {
        async fn send(&self, _to: &str, _content: &str) -> Result<SendReceipt, TransportError> {
            tokio::time::sleep(self.delay).await;
            Ok(SendReceipt {
                message_id: "m1".to_string(),
                timestamp: Utc::now(),
            })
        }

        async fn logout(&self) -> SessionResult<()> {
            Ok(())
        }

        async fn shutdown(&self) {}
    }

    struct ReadyConnector {
        delay: Duration,
        keep: std::sync::Mutex<Vec<mpsc::Sender<SessionEvent>>>,
    }

    #[async_trait]
    impl SessionConnector for ReadyConnector {
        async fn connect(&self) -> SessionResult<Connection> {
            let (tx, rx) = mpsc::channel(4);
            tx.send(SessionEvent::Ready { account: None }).await.unwrap();
            self.keep.lock().unwrap().push(tx);
            Ok(Connection::new(Arc::new(SlowLink { delay: self.delay }), rx))
        }
    }

    fn session(send_delay: Duration) -> SessionManager {
        SessionManager::new(
            Arc::new(ReadyConnector {
                delay: send_delay,
                keep: Default::default(),
            }),
            Arc::new(LogSink),
            ManagerConfig::default(),
        )
    }

    #[tokio::test]
    async fn no_ready_session_is_unavailable() {
        let sender = SessionSender::new(session(Duration::ZERO), DEFAULT_SEND_TIMEOUT);
        let err = sender.send("1555", "hi").await.unwrap_err();
        assert_eq!(err, TransportError::SessionUnavailable);
    }

    #[tokio::test]
    async fn sends_through_ready_session() {
        let manager = session(Duration::ZERO);
        manager.ensure_ready().await.unwrap();

        let receipt = SessionSender::new(manager, DEFAULT_SEND_TIMEOUT)
            .send("1555", "hi")
            .await
            .unwrap();
        assert_eq!(receipt.message_id, "m1");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_send_times_out() {
        let manager = session(Duration::from_secs(120));
        manager.ensure_ready().await.unwrap();

        let err = SessionSender::new(manager, Duration::from_secs(60))
            .send("1555", "hi")
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Timeout(Duration::from_secs(60)));
    }
}
