//! Admin login, session validation and the edge gateway.

mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, TestApp, ADMIN_EMAIL, ADMIN_PASSWORD};
use serde_json::json;
use wiremock::{
    matchers::{body_json, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

#[tokio::test]
async fn login_validate_logout() {
    let app = TestApp::new().await;

    let response = app
        .public(
            Method::POST,
            "/auth/login",
            Some(json!({ "email": ADMIN_EMAIL, "password": "wrong-password" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = response_json(response).await;
    assert_eq!(body["error"]["code"], "AUTH_INVALID_CREDENTIALS");

    let response = app
        .public(
            Method::POST,
            "/auth/login",
            Some(json!({ "email": ADMIN_EMAIL.to_uppercase(), "password": ADMIN_PASSWORD })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let login = response_json(response).await;
    assert_eq!(login["token_type"], "Bearer");
    assert_eq!(login["session"]["email"], ADMIN_EMAIL);
    let token = login["token"].as_str().unwrap().to_string();

    let response = app
        .request(Method::GET, "/auth/validate", None, Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["valid"], true);

    let response = app
        .request(Method::POST, "/auth/logout", None, Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(Method::GET, "/auth/validate", None, Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // The revoked token no longer opens dashboard routes either.
    let response = app
        .request(Method::GET, "/api/v1/orders", None, Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_without_configured_admin_is_unavailable() {
    let app = TestApp::with_config(|cfg| {
        cfg.session.admin_email = None;
        cfg.session.admin_password_hash = None;
    })
    .await;
    assert!(app.token().is_empty());
    let response = app
        .public(
            Method::POST,
            "/auth/login",
            Some(json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response_json(response).await["error"]["code"], "AUTH_NOT_CONFIGURED");
}

#[tokio::test]
async fn gateway_forwards_with_admin_identity() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/reports"))
        .and(query_param("range", "7d"))
        .and(header("x-admin-email", ADMIN_EMAIL))
        .and(body_json(json!({ "kind": "sales" })))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "queued": true })))
        .expect(1)
        .mount(&upstream)
        .await;

    let uri = upstream.uri();
    let app = TestApp::with_config(move |cfg| cfg.gateway.upstream_url = Some(uri)).await;

    let response = app
        .admin(
            Method::POST,
            "/edge/api/v1/reports?range=7d",
            Some(json!({ "kind": "sales" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(response_json(response).await["queued"], true);

    let response = app
        .public(Method::POST, "/edge/api/v1/reports?range=7d", None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn gateway_relays_upstream_errors() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "error": "nope" })))
        .mount(&upstream)
        .await;

    let uri = upstream.uri();
    let app = TestApp::with_config(move |cfg| cfg.gateway.upstream_url = Some(uri)).await;

    let response = app.admin(Method::GET, "/edge/missing", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response_json(response).await["error"], "nope");
}

#[tokio::test]
async fn gateway_without_upstream_is_unavailable() {
    let app = TestApp::new().await;
    let response = app.admin(Method::GET, "/edge/api/v1/anything", None).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn health_and_status_are_public() {
    let app = TestApp::new().await;

    let response = app.public(Method::GET, "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["data"]["status"], "healthy");

    let response = app.public(Method::GET, "/api/v1/status", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let status = response_json(response).await;
    assert_eq!(status["data"]["integrations"]["shiprocket"], false);
    assert!(status["meta"]["request_id"].is_string());
}
