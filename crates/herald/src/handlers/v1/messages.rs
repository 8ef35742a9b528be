//! Outbound message HTTP handler.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error, info};

use crate::api::{SendMessageRequest, SendMessageResponse};
use crate::delivery::MessagePayload;
use crate::handlers::problem_details;
use crate::server::AppState;

use super::session::initialization_failed;

/// Validation message for a request without `title` or `message`.
pub const REQUIRED_FIELDS: &str = "Title and message are required fields";

/// Message text sent to the recipient.
pub fn compose_content(title: &str, message: &str) -> String {
    format!("*{title}*\n\n{message}")
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// POST /api/v1/messages
///
/// Ensures the session is ready, queues the message, and waits up to the
/// configured send wait for the outcome. Answers `queued` if delivery is
/// still pending by then.
pub async fn send_message(
    State(state): State<AppState>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Response {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            debug!(error = %rejection, "Rejected message body");
            return problem_details::bad_request(REQUIRED_FIELDS)
                .with_debug(state.expose_errors, &rejection)
                .into_response();
        }
    };

    let (Some(title), Some(message)) = (non_blank(req.title), non_blank(req.message)) else {
        return problem_details::bad_request(REQUIRED_FIELDS).into_response();
    };
    let Some(recipient) = non_blank(req.to).or_else(|| state.admin_recipient.clone()) else {
        return problem_details::bad_request(
            "No recipient given and no admin recipient is configured",
        )
        .into_response();
    };

    if let Err(e) = state.services.session.ensure_ready().await {
        return initialization_failed(&state, &e).into_response();
    }

    let payload = MessagePayload::new(recipient, compose_content(&title, &message))
        .with_priority(req.priority.unwrap_or_default());
    let handle = state.services.queue.enqueue(payload);
    let id = handle.id().to_string();

    match tokio::time::timeout(state.send_wait, handle).await {
        Ok(Ok(delivery)) => Json(SendMessageResponse::Sent {
            id,
            message_id: delivery.message_id,
            timestamp: delivery.timestamp,
            attempts: delivery.attempts,
        })
        .into_response(),
        Ok(Err(e)) => {
            error!(item_id = %id, error = %e, "Message delivery failed");
            problem_details::internal_error(format!("Message delivery failed: {e}"))
                .with_debug(state.expose_errors, &e)
                .into_response()
        }
        Err(_) => {
            info!(item_id = %id, "Delivery still pending, answering queued");
            Json(SendMessageResponse::Queued { id }).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_puts_title_in_bold() {
        assert_eq!(
            compose_content("Deploy", "v1.2 is live"),
            "*Deploy*\n\nv1.2 is live"
        );
    }

    #[test]
    fn blank_fields_are_missing() {
        assert_eq!(non_blank(Some("  ".to_string())), None);
        assert_eq!(non_blank(None), None);
        assert_eq!(non_blank(Some("x".to_string())), Some("x".to_string()));
    }
}
