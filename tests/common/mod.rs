#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Method, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use storefront_api::{
    auth::{hash_password, LoginCredentials},
    config::AppConfig,
    db::{self, DbConfig},
    events::{self, EventSender},
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;

pub const ADMIN_EMAIL: &str = "admin@storefront.test";
pub const ADMIN_PASSWORD: &str = "correct-horse-battery";
const SESSION_SECRET: &str = "integration-test-session-secret-0123456789";

/// Application wired to a fresh in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    token: String,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Like [`TestApp::new`], letting the caller tweak configuration first.
    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            SESSION_SECRET.to_string(),
            "test".to_string(),
        );
        cfg.session.admin_email = Some(ADMIN_EMAIL.to_string());
        cfg.session.admin_password_hash =
            Some(hash_password(ADMIN_PASSWORD).expect("hash admin password"));
        customize(&mut cfg);

        let pool = db::establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let state = AppState::new(Arc::new(pool), cfg, EventSender::new(event_tx))
            .expect("build app state");
        let router = storefront_api::app_router(state.clone());

        // Empty when the customization removed the admin credentials.
        let token = state
            .auth
            .login(&LoginCredentials {
                email: ADMIN_EMAIL.to_string(),
                password: ADMIN_PASSWORD.to_string(),
            })
            .await
            .map(|login| login.token)
            .unwrap_or_default();

        Self {
            router,
            state,
            token,
            _event_task: event_task,
        }
    }

    /// Bearer token for the logged-in admin.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        self.request_with_headers(method, uri, body, token, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Storefront (unauthenticated) request.
    pub async fn public(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        self.request(method, uri, body, None).await
    }

    /// Dashboard request carrying the admin session.
    pub async fn admin(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        self.request(method, uri, body, Some(self.token())).await
    }

    /// Sends an admin request and returns `data` from the envelope, asserting the status.
    pub async fn admin_data(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        expected: StatusCode,
    ) -> Value {
        let response = self.admin(method, uri, body).await;
        let status = response.status();
        let payload = response_json(response).await;
        assert_eq!(status, expected, "unexpected status for {}: {}", uri, payload);
        payload["data"].clone()
    }

    pub async fn seed_customer(&self, email: &str) -> Value {
        self.admin_data(
            Method::POST,
            "/api/v1/customers",
            Some(json!({ "email": email, "name": "Test Shopper", "phone": "9876543210" })),
            StatusCode::CREATED,
        )
        .await
    }

    pub async fn seed_product(&self, sku: &str, category: &str, price_cents: i64, stock: i32) -> Value {
        self.admin_data(
            Method::POST,
            "/api/v1/products",
            Some(json!({
                "sku": sku,
                "name": format!("Product {}", sku),
                "category": category,
                "price_cents": price_cents,
                "inventory_quantity": stock,
                "low_stock_threshold": 2
            })),
            StatusCode::CREATED,
        )
        .await
    }

    pub async fn seed_coupon(&self, body: Value) -> Value {
        self.admin_data(Method::POST, "/api/v1/coupons", Some(body), StatusCode::CREATED)
            .await
    }

    /// Places an order through the storefront route and returns its JSON.
    pub async fn place_order(&self, body: Value) -> Response {
        self.public(Method::POST, "/api/v1/orders", Some(body)).await
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).expect("json response")
}

pub fn shipping_address() -> Value {
    json!({
        "name": "Asha Rao",
        "line1": "12 MG Road",
        "city": "Bengaluru",
        "state": "Karnataka",
        "postal_code": "560001",
        "phone": "9876543210"
    })
}

pub fn id_of(value: &Value) -> String {
    value["id"].as_str().expect("id field").to_string()
}
