//! Integration tests for the HTTP API.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

mod common;

use common::{
    ACCOUNT, QR_DATA, Script, TestOptions, get, post, post_json, send, test_app, test_harness,
    test_harness_from,
};

const REQUIRED_FIELDS: &str = "Title and message are required fields";

fn with_admin() -> TestOptions {
    TestOptions {
        admin_recipient: Some("admin@c.us".to_string()),
        ..TestOptions::default()
    }
}

// ============================================================================
// Health Endpoints
// ============================================================================

#[tokio::test]
async fn test_livez() {
    let app = test_app().await;

    let response = app
        .oneshot(Request::get("/livez").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn test_readyz_reports_phase() {
    let app = test_app().await;

    let (status, json) = get(&app, "/readyz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["phase"], "uninitialized");
}

#[tokio::test]
async fn test_version() {
    let app = test_app().await;

    let (status, json) = get(&app, "/version").await;

    assert_eq!(status, StatusCode::OK);
    assert!(json.get("version").is_some());
}

// ============================================================================
// Session API
// ============================================================================

#[tokio::test]
async fn test_status_before_initialize() {
    let app = test_app().await;

    let (status, json) = get(&app, "/api/v1/session/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["phase"], "uninitialized");
    assert!(json.get("session_id").is_none());
}

#[tokio::test]
async fn test_initialize_brings_session_up() {
    let h = test_harness(TestOptions::default());

    let (status, json) = post(&h.app, "/api/v1/session/initialize").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["phase"], "ready");
    assert_eq!(json["account"], ACCOUNT);
    let session_id = json["session_id"].as_str().unwrap().to_string();

    let (_, json) = get(&h.app, "/api/v1/session/status").await;
    assert_eq!(json["phase"], "ready");
    assert_eq!(json["session_id"], session_id);

    // Already ready: same session, no second bring-up
    let (_, json) = post(&h.app, "/api/v1/session/initialize").await;
    assert_eq!(json["session_id"], session_id);
    assert_eq!(h.connector.connects(), 1);
}

#[tokio::test]
async fn test_initialize_auth_failure_is_server_error() {
    let h = test_harness(TestOptions {
        script: Script::AuthFailure,
        ..TestOptions::default()
    });

    let (status, json) = post(&h.app, "/api/v1/session/initialize").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["kind"], "error");
    assert!(json["detail"].as_str().unwrap().contains("authentication failed"));
    assert!(json.get("debug").is_some());
}

#[tokio::test]
async fn test_logout_when_not_ready() {
    let app = test_app().await;

    let (status, json) = post(&app, "/api/v1/session/logout").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["detail"], "Session is not logged in");
    assert_eq!(json["kind"], "fail");
}

#[tokio::test]
async fn test_logout_after_initialize() {
    let h = test_harness(TestOptions::default());
    post(&h.app, "/api/v1/session/initialize").await;

    let (status, json) = post(&h.app, "/api/v1/session/logout").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["logged_out"], true);

    let (_, json) = get(&h.app, "/api/v1/session/status").await;
    assert_eq!(json["phase"], "disconnected");
}

#[tokio::test]
async fn test_destroy_before_initialize() {
    let app = test_app().await;

    let (status, json) = post(&app, "/api/v1/session/destroy").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["destroyed"], false);
}

#[tokio::test]
async fn test_destroy_ready_session() {
    let h = test_harness(TestOptions::default());
    post(&h.app, "/api/v1/session/initialize").await;

    let (_, json) = post(&h.app, "/api/v1/session/destroy").await;
    assert_eq!(json["destroyed"], true);

    let (_, json) = get(&h.app, "/api/v1/session/status").await;
    assert_eq!(json["phase"], "terminated");
}

#[tokio::test]
async fn test_qr_not_found_without_challenge() {
    let app = test_app().await;

    let (status, json) = get(&app, "/api/v1/session/qr").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], 404);
}

#[tokio::test]
async fn test_qr_challenge_is_presented_during_initialize() {
    let h = test_harness(TestOptions {
        script: Script::Qr,
        ..TestOptions::default()
    });

    let app = h.app.clone();
    let init = tokio::spawn(async move { post(&app, "/api/v1/session/initialize").await });

    let mut qr = None;
    for _ in 0..100 {
        let (status, json) = get(&h.app, "/api/v1/session/qr").await;
        if status == StatusCode::OK {
            qr = Some(json);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let qr = qr.expect("QR challenge never appeared");
    assert_eq!(qr["data"], QR_DATA);

    let (_, json) = get(&h.app, "/api/v1/session/status").await;
    assert_eq!(json["phase"], "initializing");

    // Tearing down abandons the bring-up
    post(&h.app, "/api/v1/session/destroy").await;
    let (status, _) = init.await.unwrap();
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

// ============================================================================
// Messages API
// ============================================================================

#[tokio::test]
async fn test_send_missing_title() {
    let h = test_harness(with_admin());

    let (status, json) = post_json(&h.app, "/api/v1/messages", json!({"message": "hi"})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["detail"], REQUIRED_FIELDS);
    assert_eq!(json["kind"], "fail");

    // Nothing was queued and the session was never touched
    let (_, stats) = get(&h.app, "/api/v1/queue").await;
    assert_eq!(stats["queued_total"], 0);
    assert_eq!(h.connector.connects(), 0);
}

#[tokio::test]
async fn test_send_blank_message() {
    let h = test_harness(with_admin());

    let (status, json) = post_json(
        &h.app,
        "/api/v1/messages",
        json!({"title": "Deploy", "message": "   "}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["detail"], REQUIRED_FIELDS);
}

#[tokio::test]
async fn test_send_malformed_body() {
    let h = test_harness(with_admin());

    let (status, json) = send(
        &h.app,
        Request::post("/api/v1/messages")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["detail"], REQUIRED_FIELDS);
}

#[tokio::test]
async fn test_send_without_any_recipient() {
    let h = test_harness(TestOptions::default());

    let (status, json) = post_json(
        &h.app,
        "/api/v1/messages",
        json!({"title": "Deploy", "message": "v1.2 is live"}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["detail"].as_str().unwrap().contains("recipient"));
}

#[tokio::test]
async fn test_send_delivers_to_admin_recipient() {
    let h = test_harness(with_admin());

    let (status, json) = post_json(
        &h.app,
        "/api/v1/messages",
        json!({"title": "Deploy", "message": "v1.2 is live"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "sent");
    assert_eq!(json["attempts"], 1);
    assert!(json["message_id"].as_str().unwrap().starts_with("msg-"));

    let sent = h.connector.sent().await;
    assert_eq!(
        sent,
        vec![(
            "admin@c.us".to_string(),
            "*Deploy*\n\nv1.2 is live".to_string()
        )]
    );

    let (_, stats) = get(&h.app, "/api/v1/queue").await;
    assert_eq!(stats["sent_total"], 1);
    assert_eq!(stats["queued_total"], 1);
}

#[tokio::test]
async fn test_send_explicit_recipient() {
    let h = test_harness(with_admin());

    let (status, _) = post_json(
        &h.app,
        "/api/v1/messages",
        json!({"title": "Hi", "message": "there", "to": "ops@c.us", "priority": "high"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.connector.sent().await[0].0, "ops@c.us");
}

#[tokio::test]
async fn test_send_initializes_session_once() {
    let h = test_harness(with_admin());
    let body = json!({"title": "t", "message": "m"});

    let (a, b) = tokio::join!(
        post_json(&h.app, "/api/v1/messages", body.clone()),
        post_json(&h.app, "/api/v1/messages", body.clone()),
    );

    assert_eq!(a.0, StatusCode::OK);
    assert_eq!(b.0, StatusCode::OK);
    assert_eq!(h.connector.connects(), 1);
    assert_eq!(h.connector.sent().await.len(), 2);
}

#[tokio::test]
async fn test_send_initialization_failure() {
    let h = test_harness(TestOptions {
        script: Script::AuthFailure,
        ..with_admin()
    });

    let (status, json) = post_json(
        &h.app,
        "/api/v1/messages",
        json!({"title": "t", "message": "m"}),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        json["detail"]
            .as_str()
            .unwrap()
            .starts_with("Session initialization failed")
    );

    let (_, stats) = get(&h.app, "/api/v1/queue").await;
    assert_eq!(stats["queued_total"], 0);
}

#[tokio::test]
async fn test_send_exhausts_retries() {
    let h = test_harness(TestOptions {
        fail_sends: true,
        max_retries: 2,
        ..with_admin()
    });

    let (status, json) = post_json(
        &h.app,
        "/api/v1/messages",
        json!({"title": "t", "message": "m"}),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["kind"], "error");
    let detail = json["detail"].as_str().unwrap();
    assert!(detail.contains("after 2 attempt(s)"), "detail: {detail}");

    let (_, stats) = get(&h.app, "/api/v1/queue").await;
    assert_eq!(stats["failed_total"], 1);
    assert_eq!(stats["sent_total"], 0);
}

#[tokio::test]
async fn test_send_answers_queued_when_slow() {
    let h = test_harness(TestOptions {
        send_delay: Duration::from_millis(500),
        send_wait: Duration::from_millis(20),
        ..with_admin()
    });

    let (status, json) = post_json(
        &h.app,
        "/api/v1/messages",
        json!({"title": "t", "message": "m"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "queued");
    assert!(json["id"].as_str().is_some());

    // Delivery continues in the background
    for _ in 0..100 {
        if !h.connector.sent().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(h.connector.sent().await.len(), 1);
}

// ============================================================================
// Queue API
// ============================================================================

#[tokio::test]
async fn test_queue_stats_empty() {
    let app = test_app().await;

    let (status, json) = get(&app, "/api/v1/queue").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["queued"], 0);
    assert_eq!(json["in_flight"], 0);
    assert_eq!(json["is_processing"], false);
}

#[tokio::test]
async fn test_clear_empty_queue() {
    let app = test_app().await;

    let response = app
        .oneshot(
            Request::delete("/api/v1/queue")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["cleared"], 0);
}

// ============================================================================
// Admin API
// ============================================================================

#[tokio::test]
async fn test_shutdown_from_loopback() {
    let h = test_harness(TestOptions::default());

    let (status, _) = post(&h.app, "/api/admin/v1/shutdown").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post(&h.app, "/api/admin/v1/shutdown").await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_shutdown_from_remote_without_token() {
    let peer = SocketAddr::from(([10, 0, 0, 7], 50000));
    let h = test_harness_from(TestOptions::default(), peer);

    let (status, _) = post(&h.app, "/api/admin/v1/shutdown").await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_shutdown_with_token() {
    let peer = SocketAddr::from(([10, 0, 0, 7], 50000));
    let h = test_harness_from(
        TestOptions {
            admin_token: Some("s3cret".to_string()),
            ..TestOptions::default()
        },
        peer,
    );

    let (status, _) = send(
        &h.app,
        Request::post("/api/admin/v1/shutdown")
            .header("authorization", "Bearer s3cret")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(h.state.shutdown_tx.lock().await.is_none());
}
