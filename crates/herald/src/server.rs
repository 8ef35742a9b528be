use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tokio::sync::{Mutex, oneshot};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::background::BackgroundTasks;
use crate::delivery::{DeliveryQueue, RetryPolicy};
use crate::handlers;
use crate::notify::{FanoutSink, LatestQr};
use crate::session::{ManagerConfig, SessionConnector, SessionManager, SessionSender};

/// Default cap on concurrently served API requests.
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;

// ============================================================================
// Runtime Services
// ============================================================================

/// The session, its delivery queue, and the QR presenter, wired together.
#[derive(Clone)]
pub struct RuntimeServices {
    pub session: SessionManager,
    pub queue: DeliveryQueue,
    pub latest_qr: LatestQr,
}

impl RuntimeServices {
    /// Wire the state machine to `connector` and the queue to the session.
    ///
    /// `sinks` receive every lifecycle event; the QR presenter is added here.
    pub fn new(
        connector: Arc<dyn SessionConnector>,
        sinks: FanoutSink,
        manager_config: ManagerConfig,
        retry_policy: RetryPolicy,
        send_timeout: Duration,
    ) -> Self {
        let latest_qr = LatestQr::new();
        let sink = sinks.with(Arc::new(latest_qr.clone()));
        let session = SessionManager::new(connector, Arc::new(sink), manager_config);
        let sender = SessionSender::new(session.clone(), send_timeout);
        let queue = DeliveryQueue::new(Arc::new(sender), retry_policy);
        Self {
            session,
            queue,
            latest_qr,
        }
    }
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub services: RuntimeServices,
    /// Recipient for messages that name none.
    pub admin_recipient: Option<String>,
    /// How long `POST /messages` waits for the delivery outcome.
    pub send_wait: Duration,
    /// Include error chains in problem details (non-production only).
    pub expose_errors: bool,
    pub admin_token: Option<String>,
    pub max_connections: usize,
    pub background_tasks: BackgroundTasks,
    pub shutdown_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

// ============================================================================
// Server Setup
// ============================================================================

/// Create a shutdown channel pair.
///
/// Returns (sender for AppState, receiver for shutdown_signal).
pub fn shutdown_channel() -> (oneshot::Sender<()>, oneshot::Receiver<()>) {
    oneshot::channel()
}

pub fn build_app(state: AppState, request_timeout_seconds: u64) -> Router {
    let max_connections = state.max_connections.max(1);

    let api_v1 = Router::new()
        .route("/session/status", get(handlers::v1::session_status))
        .route("/session/initialize", post(handlers::v1::initialize_session))
        .route("/session/logout", post(handlers::v1::logout_session))
        .route("/session/destroy", post(handlers::v1::destroy_session))
        .route("/session/qr", get(handlers::v1::session_qr))
        .route("/messages", post(handlers::v1::send_message))
        .route(
            "/queue",
            get(handlers::v1::queue_stats).delete(handlers::v1::clear_queue),
        )
        .with_state(state.clone())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_seconds),
        ))
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024)) // 2 MB
        .layer(ConcurrencyLimitLayer::new(max_connections));

    // Admin routes (no timeout, state required for shutdown)
    let admin_routes = Router::new()
        .route("/shutdown", post(handlers::shutdown))
        .with_state(state.clone());

    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/version", get(handlers::version))
        .with_state(state)
        .nest("/api/v1", api_v1)
        .nest("/api/admin/v1", admin_routes)
}
