//! The session state machine.
//!
//! One [`SessionManager`] owns the single external session of the process.
//! Every transition happens under one lock on [`SessionState`]; the lock is
//! never held while talking to the external session or to the sink.
//!
//! Each bring-up and each ready session belongs to a *generation*. Any reset
//! (disconnect, logout, destroy, lifetime expiry) bumps the generation and
//! cancels that generation's tasks, so an initialization, event watcher, or
//! lifetime timer from an older generation can never touch a newer session.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::notify::{LifecycleEvent, LifecycleSink};

use super::error::{SessionError, SessionResult};
use super::events::SessionEvent;
use super::handle::SessionHandle;
use super::link::{Connection, SessionConnector};

/// Default bound on a single initialization attempt.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(120);

type PendingInit = Shared<BoxFuture<'static, SessionResult<SessionHandle>>>;

// ============================================================================
// Phase
// ============================================================================

/// Lifecycle phase of the external session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Uninitialized,
    Initializing,
    Ready,
    Disconnected,
    AuthFailed,
    Terminated,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Uninitialized => "uninitialized",
            SessionPhase::Initializing => "initializing",
            SessionPhase::Ready => "ready",
            SessionPhase::Disconnected => "disconnected",
            SessionPhase::AuthFailed => "auth_failed",
            SessionPhase::Terminated => "terminated",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the session for status endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    /// Upper bound on one initialization attempt, connect included.
    pub init_timeout: Duration,
    /// Lifetime armed automatically whenever the session becomes ready.
    /// Zero disables it.
    pub lifetime: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            init_timeout: DEFAULT_INIT_TIMEOUT,
            lifetime: Duration::ZERO,
        }
    }
}

// ============================================================================
// State
// ============================================================================

struct SessionState {
    phase: SessionPhase,
    handle: Option<SessionHandle>,
    pending: Option<PendingInit>,
    generation: u64,
    /// Cancels the bring-up or event watcher of the current generation.
    cancel: Option<CancellationToken>,
    lifetime_timer: Option<CancellationToken>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: SessionPhase::Uninitialized,
            handle: None,
            pending: None,
            generation: 0,
            cancel: None,
            lifetime_timer: None,
        }
    }

    /// Move to `phase`, dropping the handle and any in-flight initialization.
    ///
    /// Returns the handle that was live (for the caller to shut down outside
    /// the lock) and whether an initialization was pending.
    fn reset(&mut self, phase: SessionPhase) -> (Option<SessionHandle>, bool) {
        self.generation += 1;
        self.phase = phase;
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        if let Some(token) = self.lifetime_timer.take() {
            token.cancel();
        }
        let had_pending = self.pending.take().is_some();
        (self.handle.take(), had_pending)
    }
}

// ============================================================================
// SessionManager
// ============================================================================

/// Owns the external session and serializes its lifecycle.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Arc<dyn SessionConnector>,
    sink: Arc<dyn LifecycleSink>,
    config: ManagerConfig,
    state: Mutex<SessionState>,
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn SessionConnector>,
        sink: Arc<dyn LifecycleSink>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                sink,
                config,
                state: Mutex::new(SessionState::new()),
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub async fn phase(&self) -> SessionPhase {
        self.inner.state.lock().await.phase
    }

    /// The ready handle, if there is one. Never starts initialization.
    pub async fn current_handle(&self) -> Option<SessionHandle> {
        let state = self.inner.state.lock().await;
        match state.phase {
            SessionPhase::Ready => state.handle.clone(),
            _ => None,
        }
    }

    pub async fn status(&self) -> SessionStatus {
        let state = self.inner.state.lock().await;
        SessionStatus {
            phase: state.phase,
            session_id: state.handle.as_ref().map(|h| h.id().to_string()),
            account: state
                .handle
                .as_ref()
                .and_then(|h| h.account().map(str::to_string)),
        }
    }

    // ------------------------------------------------------------------------
    // ensure_ready
    // ------------------------------------------------------------------------

    /// Return the ready session, bringing it up first if needed.
    ///
    /// Concurrent callers share one initialization attempt and all observe
    /// its outcome.
    pub async fn ensure_ready(&self) -> SessionResult<SessionHandle> {
        let pending = {
            let mut state = self.inner.state.lock().await;
            if state.phase == SessionPhase::Ready
                && let Some(handle) = &state.handle
            {
                return Ok(handle.clone());
            }
            match &state.pending {
                Some(pending) => {
                    debug!("Joining in-flight session initialization");
                    pending.clone()
                }
                None => self.start_initialization(&mut state),
            }
        };
        pending.await
    }

    fn start_initialization(&self, state: &mut SessionState) -> PendingInit {
        state.generation += 1;
        state.phase = SessionPhase::Initializing;
        let generation = state.generation;

        let cancel = CancellationToken::new();
        state.cancel = Some(cancel.clone());

        info!(generation, "Starting session initialization");

        let manager = self.clone();
        let task = tokio::spawn(async move { manager.initialize(generation, cancel).await });

        let pending = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(SessionError::init(format!(
                    "initialization task failed: {e}"
                ))),
            }
        }
        .boxed()
        .shared();

        state.pending = Some(pending.clone());
        pending
    }

    async fn initialize(
        &self,
        generation: u64,
        cancel: CancellationToken,
    ) -> SessionResult<SessionHandle> {
        match self.bring_up(&cancel).await {
            Ok((connection, account)) => self.finish_ready(generation, connection, account).await,
            Err(err) => {
                self.fail_initialization(generation, &err).await;
                Err(err)
            }
        }
    }

    /// Connect and wait for the ready signal, all within the init timeout.
    async fn bring_up(
        &self,
        cancel: &CancellationToken,
    ) -> SessionResult<(Connection, Option<String>)> {
        let timeout = self.inner.config.init_timeout;
        let deadline = Instant::now() + timeout;

        let connected = tokio::select! {
            () = cancel.cancelled() => return Err(cancelled()),
            result = timeout_at(deadline, self.inner.connector.connect()) => result,
        };
        let mut connection = match connected {
            Ok(result) => result?,
            Err(_) => return Err(SessionError::Timeout(timeout)),
        };

        let outcome = tokio::select! {
            () = cancel.cancelled() => Err(cancelled()),
            result = timeout_at(deadline, self.wait_for_ready(&mut connection.events)) => {
                result.unwrap_or(Err(SessionError::Timeout(timeout)))
            }
        };

        match outcome {
            Ok(account) => Ok((connection, account)),
            Err(err) => {
                connection.link.shutdown().await;
                Err(err)
            }
        }
    }

    async fn wait_for_ready(
        &self,
        events: &mut mpsc::Receiver<SessionEvent>,
    ) -> SessionResult<Option<String>> {
        let sink = &self.inner.sink;
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Loading { percent, message } => {
                    sink.notify(&LifecycleEvent::Loading { percent, message })
                        .await;
                }
                SessionEvent::QrChallenge(data) => {
                    sink.notify(&LifecycleEvent::QrChallenge { data }).await;
                }
                SessionEvent::Ready { account } => return Ok(account),
                SessionEvent::AuthFailure(reason) => {
                    sink.notify(&LifecycleEvent::AuthFailure {
                        reason: reason.clone(),
                    })
                    .await;
                    return Err(SessionError::AuthFailed(reason));
                }
                SessionEvent::Disconnected(reason) => {
                    return Err(SessionError::init(format!(
                        "session disconnected during initialization: {reason}"
                    )));
                }
            }
        }
        Err(SessionError::init("session closed before becoming ready"))
    }

    async fn finish_ready(
        &self,
        generation: u64,
        connection: Connection,
        account: Option<String>,
    ) -> SessionResult<SessionHandle> {
        let Connection { link, events } = connection;

        let mut state = self.inner.state.lock().await;
        if state.generation != generation {
            drop(state);
            debug!(generation, "Discarding session from a superseded initialization");
            link.shutdown().await;
            return Err(cancelled());
        }

        let handle = SessionHandle::new(link, account.clone());
        state.phase = SessionPhase::Ready;
        state.handle = Some(handle.clone());
        state.pending = None;

        let cancel = CancellationToken::new();
        state.cancel = Some(cancel.clone());
        self.spawn_event_watcher(generation, events, cancel);

        let lifetime = self.inner.config.lifetime;
        if !lifetime.is_zero() {
            self.arm_lifetime(&mut state, lifetime);
        }
        drop(state);

        info!(
            session_id = %handle.id(),
            account = ?handle.account(),
            "Session ready"
        );
        self.inner
            .sink
            .notify(&LifecycleEvent::Ready { account })
            .await;
        Ok(handle)
    }

    async fn fail_initialization(&self, generation: u64, err: &SessionError) {
        {
            let mut state = self.inner.state.lock().await;
            if state.generation == generation {
                state.phase = SessionPhase::Uninitialized;
                state.pending = None;
                state.cancel = None;
            }
        }

        warn!(generation, error = %err, "Session initialization failed");
        self.inner
            .sink
            .notify(&LifecycleEvent::InitializationFailed {
                reason: err.to_string(),
            })
            .await;
    }

    // ------------------------------------------------------------------------
    // Event watcher
    // ------------------------------------------------------------------------

    /// Watch a ready session's signals until it is lost or reset.
    fn spawn_event_watcher(
        &self,
        generation: u64,
        mut events: mpsc::Receiver<SessionEvent>,
        cancel: CancellationToken,
    ) {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = cancel.cancelled() => return,
                    event = events.recv() => event,
                };
                match event {
                    Some(SessionEvent::Disconnected(reason)) => {
                        manager
                            .session_lost(generation, SessionPhase::Disconnected, reason)
                            .await;
                        return;
                    }
                    Some(SessionEvent::AuthFailure(reason)) => {
                        manager
                            .session_lost(generation, SessionPhase::AuthFailed, reason)
                            .await;
                        return;
                    }
                    Some(SessionEvent::QrChallenge(data)) => {
                        manager
                            .inner
                            .sink
                            .notify(&LifecycleEvent::QrChallenge { data })
                            .await;
                    }
                    Some(SessionEvent::Loading { .. } | SessionEvent::Ready { .. }) => {
                        debug!(generation, "Ignoring signal from ready session");
                    }
                    None => {
                        manager
                            .session_lost(
                                generation,
                                SessionPhase::Disconnected,
                                "session event stream closed".to_string(),
                            )
                            .await;
                        return;
                    }
                }
            }
        });
    }

    /// The ready session of `generation` went away on its own.
    async fn session_lost(&self, generation: u64, phase: SessionPhase, reason: String) {
        let handle = {
            let mut state = self.inner.state.lock().await;
            if state.generation != generation || state.phase != SessionPhase::Ready {
                return;
            }
            state.reset(phase).0
        };

        warn!(phase = %phase, reason = %reason, "Session lost");
        if let Some(handle) = handle {
            handle.shutdown().await;
        }

        let event = match phase {
            SessionPhase::AuthFailed => LifecycleEvent::AuthFailure { reason },
            _ => LifecycleEvent::Disconnected { reason },
        };
        self.inner.sink.notify(&event).await;
    }

    // ------------------------------------------------------------------------
    // Resets
    // ------------------------------------------------------------------------

    /// Record that the external session disconnected.
    ///
    /// Clears the handle and any in-flight initialization (whose callers then
    /// fail). A later `ensure_ready` brings the session up again.
    pub async fn notify_disconnected(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let (handle, had_pending) = self
            .inner
            .state
            .lock()
            .await
            .reset(SessionPhase::Disconnected);

        warn!(reason = %reason, had_pending, "Session disconnected");
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        self.inner
            .sink
            .notify(&LifecycleEvent::Disconnected { reason })
            .await;
    }

    /// Log the account out of the backend.
    ///
    /// Returns `Ok(false)` when there is no ready session. On success the
    /// phase is `Disconnected` and the session can be brought up again.
    pub async fn logout(&self) -> SessionResult<bool> {
        let (handle, generation) = {
            let state = self.inner.state.lock().await;
            match (state.phase, &state.handle) {
                (SessionPhase::Ready, Some(handle)) => (handle.clone(), state.generation),
                _ => return Ok(false),
            }
        };

        handle.logout().await?;

        let current = {
            let mut state = self.inner.state.lock().await;
            if state.generation == generation {
                state.reset(SessionPhase::Disconnected);
                true
            } else {
                false
            }
        };
        handle.shutdown().await;

        info!(session_id = %handle.id(), "Session logged out");
        if current {
            self.inner
                .sink
                .notify(&LifecycleEvent::Disconnected {
                    reason: "logged out".to_string(),
                })
                .await;
        }
        Ok(true)
    }

    /// Tear the session down regardless of phase.
    ///
    /// Returns `false` when there was neither a session nor a pending
    /// initialization to tear down. The phase is `Terminated` either way.
    pub async fn destroy(&self) -> bool {
        let (handle, had_pending) = self
            .inner
            .state
            .lock()
            .await
            .reset(SessionPhase::Terminated);

        match handle {
            Some(handle) => {
                handle.shutdown().await;
                info!(session_id = %handle.id(), "Session destroyed");
                true
            }
            None if had_pending => {
                info!("Pending session initialization cancelled");
                true
            }
            None => {
                debug!("No session to destroy");
                false
            }
        }
    }

    // ------------------------------------------------------------------------
    // Lifetime
    // ------------------------------------------------------------------------

    /// Arm a one-shot timer that destroys the session once `lifetime` has
    /// elapsed, provided the same session is still ready then.
    ///
    /// A zero duration is ignored. Re-arming replaces the previous timer.
    pub async fn schedule_lifetime_expiry(&self, lifetime: Duration) {
        if lifetime.is_zero() {
            return;
        }
        let mut state = self.inner.state.lock().await;
        self.arm_lifetime(&mut state, lifetime);
    }

    fn arm_lifetime(&self, state: &mut SessionState, lifetime: Duration) {
        if let Some(previous) = state.lifetime_timer.take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        state.lifetime_timer = Some(token.clone());
        let generation = state.generation;

        info!(
            generation,
            lifetime_seconds = lifetime.as_secs(),
            "Session lifetime expiry scheduled"
        );

        let manager = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(lifetime) => {
                    manager.expire_lifetime(generation, lifetime).await;
                }
            }
        });
    }

    async fn expire_lifetime(&self, generation: u64, lifetime: Duration) {
        {
            let state = self.inner.state.lock().await;
            if state.generation != generation || state.phase != SessionPhase::Ready {
                debug!(generation, "Lifetime timer fired for a session that is gone");
                return;
            }
        }

        info!(lifetime_seconds = lifetime.as_secs(), "Session lifetime expired");
        self.inner
            .sink
            .notify(&LifecycleEvent::LifetimeExpired {
                lifetime_seconds: lifetime.as_secs(),
            })
            .await;

        let handle = {
            let mut state = self.inner.state.lock().await;
            if state.generation != generation {
                return;
            }
            state.reset(SessionPhase::Uninitialized).0
        };
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }
}

fn cancelled() -> SessionError {
    SessionError::init("initialization was cancelled by a session reset")
}

// ============================================================================
// Tests
// ============================================================================
