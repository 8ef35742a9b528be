//! Session lifecycle HTTP handlers.

use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::api::{
    DestroyResponse, InitializeResponse, LogoutResponse, QrResponse, SessionStatusResponse,
};
use crate::handlers::problem_details::{self, ProblemDetails};
use crate::server::AppState;
use crate::session::SessionError;

/// GET /api/v1/session/status
pub async fn session_status(State(state): State<AppState>) -> Json<SessionStatusResponse> {
    Json(state.services.session.status().await.into())
}

/// POST /api/v1/session/initialize
///
/// Brings the session up (or joins the bring-up in flight) and waits for it.
pub async fn initialize_session(State(state): State<AppState>) -> Response {
    match state.services.session.ensure_ready().await {
        Ok(handle) => Json(InitializeResponse {
            phase: state.services.session.phase().await,
            session_id: handle.id().to_string(),
            account: handle.account().map(str::to_string),
        })
        .into_response(),
        Err(e) => initialization_failed(&state, &e).into_response(),
    }
}

/// POST /api/v1/session/logout
pub async fn logout_session(State(state): State<AppState>) -> Response {
    match state.services.session.logout().await {
        Ok(true) => Json(LogoutResponse { logged_out: true }).into_response(),
        Ok(false) => session_problem(state.expose_errors, &SessionError::NotReady).into_response(),
        Err(e) => session_problem(state.expose_errors, &e).into_response(),
    }
}

/// POST /api/v1/session/destroy
pub async fn destroy_session(State(state): State<AppState>) -> Json<DestroyResponse> {
    Json(DestroyResponse {
        destroyed: state.services.session.destroy().await,
    })
}

/// GET /api/v1/session/qr
pub async fn session_qr(State(state): State<AppState>) -> Response {
    match state.services.latest_qr.get().await {
        Some(qr) => Json(QrResponse {
            data: qr.data,
            received_at: qr.received_at,
        })
        .into_response(),
        None => problem_details::not_found("No QR challenge is pending").into_response(),
    }
}

/// 500 for a failed `ensure_ready`, shared with the send handler.
pub(super) fn initialization_failed(
    state: &AppState,
    err: &SessionError,
) -> problem_details::ProblemDetails {
    session_problem(state.expose_errors, err)
}

/// Problem response for a failed session operation.
///
/// A session that is not ready is the caller's problem (400); everything
/// else is a server error.
pub(super) fn session_problem(expose_errors: bool, err: &SessionError) -> ProblemDetails {
    match err {
        SessionError::NotReady => problem_details::bad_request("Session is not logged in"),
        e if e.is_initialization() => {
            error!(error = %e, "Session initialization failed");
            problem_details::internal_error(format!("Session initialization failed: {e}"))
                .with_debug(expose_errors, e)
        }
        e => {
            error!(error = %e, "Session command failed");
            problem_details::internal_error("Session command failed").with_debug(expose_errors, e)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::handlers::problem_details::ProblemKind;

    #[test]
    fn not_ready_is_a_client_failure() {
        let problem = session_problem(true, &SessionError::NotReady);
        assert_eq!(problem.status, 400);
        assert_eq!(problem.kind, ProblemKind::Fail);
        assert_eq!(problem.detail.as_deref(), Some("Session is not logged in"));
        assert!(problem.debug.is_none());
    }

    #[test]
    fn initialization_errors_are_server_errors() {
        let problem = session_problem(true, &SessionError::Timeout(Duration::from_secs(120)));
        assert_eq!(problem.status, 500);
        assert_eq!(problem.kind, ProblemKind::Error);
        assert_eq!(
            problem.detail.as_deref(),
            Some("Session initialization failed: session initialization timed out after 120s")
        );
    }

    #[test]
    fn command_errors_hide_detail_in_production() {
        let problem = session_problem(false, &SessionError::command("driver gone"));
        assert_eq!(problem.status, 500);
        assert_eq!(problem.detail.as_deref(), Some("Session command failed"));
        assert!(problem.debug.is_none());
    }
}
