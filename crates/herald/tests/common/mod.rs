//! Common test utilities.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use http_body_util::BodyExt;
use tokio::sync::{Mutex, mpsc};
use tower::ServiceExt;

use herald::background::BackgroundTasks;
use herald::delivery::{RetryPolicy, SendReceipt, TransportError};
use herald::notify::{FanoutSink, LogSink};
use herald::server::{self, AppState, RuntimeServices};
use herald::session::{
    Connection, ManagerConfig, SessionConnector, SessionEvent, SessionLink, SessionResult,
};

pub const ACCOUNT: &str = "15550001111";

// ============================================================================
// Fake session
// ============================================================================

/// What a fake session reports after `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Becomes ready immediately.
    Ready,
    /// Asks for a QR scan and then waits forever.
    Qr,
    /// Rejects authentication.
    AuthFailure,
}

pub const QR_DATA: &str = "2@fake-qr-payload";

/// Connector whose sessions live entirely in memory.
pub struct FakeConnector {
    script: Script,
    fail_sends: bool,
    send_delay: Duration,
    connects: AtomicUsize,
    sent: Arc<Mutex<Vec<(String, String)>>>,
    // Keeps event channels open so sessions are not reported lost.
    events: Mutex<Vec<mpsc::Sender<SessionEvent>>>,
}

impl FakeConnector {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Every `(recipient, content)` the session transmitted.
    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(&self) -> SessionResult<Connection> {
        let n = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel(16);
        let event = match self.script {
            Script::Ready => SessionEvent::Ready {
                account: Some(ACCOUNT.to_string()),
            },
            Script::Qr => SessionEvent::QrChallenge(QR_DATA.to_string()),
            Script::AuthFailure => SessionEvent::AuthFailure("bad credentials".to_string()),
        };
        let _ = tx.send(event).await;
        self.events.lock().await.push(tx);

        let link = FakeLink {
            id: n,
            fail_sends: self.fail_sends,
            send_delay: self.send_delay,
            sent: self.sent.clone(),
        };
        Ok(Connection::new(Arc::new(link), rx))
    }
}

struct FakeLink {
    id: usize,
    fail_sends: bool,
    send_delay: Duration,
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl SessionLink for FakeLink {
    async fn send(&self, to: &str, content: &str) -> Result<SendReceipt, TransportError> {
        tokio::time::sleep(self.send_delay).await;
        if self.fail_sends {
            return Err(TransportError::Rejected("recipient unreachable".to_string()));
        }
        let mut sent = self.sent.lock().await;
        sent.push((to.to_string(), content.to_string()));
        Ok(SendReceipt {
            message_id: format!("msg-{}-{}", self.id, sent.len()),
            timestamp: Utc::now(),
        })
    }

    async fn logout(&self) -> SessionResult<()> {
        Ok(())
    }

    async fn shutdown(&self) {}
}

// ============================================================================
// App builders
// ============================================================================

/// Knobs for [`test_harness`].
#[derive(Debug, Clone)]
pub struct TestOptions {
    pub script: Script,
    pub fail_sends: bool,
    pub send_delay: Duration,
    pub send_wait: Duration,
    pub max_retries: u32,
    pub admin_recipient: Option<String>,
    pub admin_token: Option<String>,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            script: Script::Ready,
            fail_sends: false,
            send_delay: Duration::ZERO,
            send_wait: Duration::from_secs(5),
            max_retries: 3,
            admin_recipient: None,
            admin_token: None,
        }
    }
}

pub struct TestHarness {
    pub app: Router,
    pub state: AppState,
    pub connector: Arc<FakeConnector>,
}

/// Build an app over a fake session, as seen from a loopback peer.
pub fn test_harness(options: TestOptions) -> TestHarness {
    test_harness_from(options, SocketAddr::from(([127, 0, 0, 1], 40000)))
}

pub fn test_harness_from(options: TestOptions, peer: SocketAddr) -> TestHarness {
    let connector = Arc::new(FakeConnector {
        script: options.script,
        fail_sends: options.fail_sends,
        send_delay: options.send_delay,
        connects: AtomicUsize::new(0),
        sent: Arc::new(Mutex::new(Vec::new())),
        events: Mutex::new(Vec::new()),
    });

    let policy = RetryPolicy {
        max_retries: options.max_retries,
        retry_delay: Duration::from_millis(10),
        inter_batch_delay: Duration::ZERO,
        concurrency: 1,
    };
    let manager_config = ManagerConfig {
        init_timeout: Duration::from_secs(5),
        lifetime: Duration::ZERO,
    };
    let services = RuntimeServices::new(
        connector.clone(),
        FanoutSink::new().with(Arc::new(LogSink)),
        manager_config,
        policy,
        Duration::from_secs(5),
    );

    let (shutdown_tx, _shutdown_rx) = server::shutdown_channel();
    let state = AppState {
        services,
        admin_recipient: options.admin_recipient,
        send_wait: options.send_wait,
        expose_errors: true,
        admin_token: options.admin_token,
        max_connections: 16,
        background_tasks: BackgroundTasks::new(),
        shutdown_tx: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    let app = server::build_app(state.clone(), 30).layer(MockConnectInfo(peer));
    TestHarness {
        app,
        state,
        connector,
    }
}

/// Create a test app with default state.
pub async fn test_app() -> Router {
    test_harness(TestOptions::default()).app
}

// ============================================================================
// Request helpers
// ============================================================================

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

pub async fn get(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

pub async fn post(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, Request::post(uri).body(Body::empty()).unwrap()).await
}

pub async fn post_json(
    app: &Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    send(
        app,
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}
