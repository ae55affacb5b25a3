//! API integration tests: authentication, CORS, app management and fallbacks.

use std::sync::atomic::Ordering;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;
use common::{basic_auth, test_harness};

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn body_json(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn assert_cors(response: &Response) {
    let headers = response.headers();
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_METHODS],
        "GET, POST, PUT, DELETE, OPTIONS"
    );
    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
        "Content-Type, Authorization"
    );
}

fn jwt(exp_offset_secs: i64) -> String {
    let exp = chrono::Utc::now().timestamp() + exp_offset_secs;
    encode(
        &Header::default(),
        &json!({"sub": "bearer-user", "exp": exp}),
        &EncodingKey::from_secret(b"test-secret"),
    )
    .unwrap()
}

fn app_request(body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/app")
        .header(header::AUTHORIZATION, basic_auth("alice", "key"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_missing_auth_is_rejected_with_cors() {
    let h = test_harness().await;

    let response = send(
        &h.app,
        Request::builder()
            .method(Method::POST)
            .uri("/wd/hub/session")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_cors(&response);
    assert_eq!(body_json(response).await["status"], "Unauthorized");
    assert!(h.backend.requests().is_empty());
}

#[tokio::test]
async fn test_options_short_circuits() {
    let h = test_harness().await;

    let response = send(
        &h.app,
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/wd/hub/session")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_cors(&response);
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let h = test_harness().await;

    let response = send(
        &h.app,
        Request::builder()
            .uri("/status")
            .header(header::AUTHORIZATION, basic_auth("alice", "key"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_cors(&response);
    assert_eq!(body_json(response).await["status"], "not found");
}

#[tokio::test]
async fn test_rejected_basic_credentials() {
    let h = test_harness().await;

    let response = send(
        &h.app,
        Request::builder()
            .uri("/status")
            .header(header::AUTHORIZATION, basic_auth("alice", "wrong"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_basic_credentials_are_cached() {
    let h = test_harness().await;

    for _ in 0..3 {
        let response = send(
            &h.app,
            Request::builder()
                .uri("/status")
                .header(header::AUTHORIZATION, basic_auth("alice", "key"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
    assert_eq!(h.accounts.basic_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_bearer_token_validated_once() {
    let h = test_harness().await;
    let token = jwt(3600);

    for _ in 0..2 {
        let response = send(
            &h.app,
            Request::builder()
                .uri("/status")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
    assert_eq!(h.accounts.bearer_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.ctx.auth.cached_bearer_tokens(), 1);
}

#[tokio::test]
async fn test_bearer_from_other_org_is_rejected() {
    let h = test_harness().await;

    let response = send(
        &h.app,
        Request::builder()
            .uri("/status")
            .header(header::AUTHORIZATION, "Bearer other-org-token")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.ctx.auth.cached_bearer_tokens(), 0);
}

#[tokio::test]
async fn test_list_apps() {
    let h = test_harness().await;

    let response = send(
        &h.app,
        app_request(json!({"os": "android", "udid": "X", "action": "apps"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
    assert_eq!(json["apps"][0]["package"], "com.example.app");
    assert_eq!(json["apps"][0]["version"], "1.2.3");
}

#[tokio::test]
async fn test_app_actions_report_status() {
    let h = test_harness().await;

    let cases = [
        (json!({"os": "android", "udid": "X", "package": "com.example.app", "action": "launch"}), "success"),
        (json!({"os": "android", "udid": "X", "package": "com.example.app", "action": "kill"}), "success"),
        (json!({"os": "android", "udid": "X", "package": "com.missing", "action": "uninstall"}), "failed"),
        (json!({"os": "windows", "udid": "X", "package": "com.example.app", "action": "launch"}), "failed"),
        (json!({"os": "android", "udid": "X", "action": "reboot"}), "failed"),
    ];
    for (body, expected) in cases {
        let response = send(&h.app, app_request(body.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], expected, "{body}");
    }
}

#[tokio::test]
async fn test_validate_ios_is_bad_gateway() {
    let h = test_harness().await;

    let response = send(
        &h.app,
        Request::builder()
            .method(Method::POST)
            .uri("/validate")
            .header(header::AUTHORIZATION, basic_auth("alice", "key"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"os": "ios", "udid": "X", "package": "com.example.app", "action": "find"})
                    .to_string(),
            ))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_cors(&response);
}
