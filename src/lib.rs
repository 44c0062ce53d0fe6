//! Storefront API Library
//!
//! Catalog, customers, orders, the coupon engine, returns processing and the
//! admin edge gateway of an e-commerce storefront, served over HTTP with axum.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod integrations;
pub mod middleware_helpers;
pub mod migrator;
pub mod models;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::auth::{gateway::EdgeGateway, AdminRouterExt, AuthService};
use crate::events::EventSender;

/// Base64 inflates uploads by a third; leave room above the decoded limit.
const UPLOAD_BODY_LIMIT: usize = 16 * 1024 * 1024;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub event_sender: Arc<EventSender>,
    pub services: handlers::AppServices,
    pub auth: Arc<AuthService>,
    pub gateway: Arc<EdgeGateway>,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: EventSender,
    ) -> Result<Self, errors::ServiceError> {
        let event_sender = Arc::new(event_sender);
        let services = handlers::AppServices::new(db.clone(), event_sender.clone(), &config)?;
        let auth = Arc::new(AuthService::new(&config.session).with_events(event_sender.clone()));
        let gateway = Arc::new(EdgeGateway::new(&config.gateway)?);
        Ok(Self {
            db,
            config: Arc::new(config),
            event_sender,
            services,
            auth,
            gateway,
        })
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, limit: u64) -> Self {
        let total_pages = if limit == 0 {
            0
        } else {
            (total + limit - 1) / limit
        };
        Self {
            items,
            total,
            page,
            limit,
            total_pages,
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// `/api/v1` routes. Storefront routes are public; dashboard routes require
/// an admin session.
pub fn api_v1_routes(auth: Arc<AuthService>) -> Router<AppState> {
    let storefront = Router::new()
        .route("/status", get(api_status))
        .route("/products", get(handlers::products::list_products))
        .route("/products/{id}", get(handlers::products::get_product))
        .route(
            "/coupons/validate",
            post(handlers::coupons::validate_coupon),
        )
        .route(
            "/coupons/recommend",
            post(handlers::coupons::recommend_coupons),
        )
        .route("/orders", post(handlers::orders::create_order))
        .route("/returns", post(handlers::returns::create_return))
        .route("/carts/{customer_id}", put(handlers::carts::upsert_cart))
        .route(
            "/shipping/track/{awb}",
            get(handlers::shipping::track_shipment),
        );

    let catalog_admin = Router::new()
        .route("/products", post(handlers::products::create_product))
        .route(
            "/products/{id}",
            put(handlers::products::update_product).delete(handlers::products::archive_product),
        )
        .route(
            "/products/{id}/inventory",
            post(handlers::products::adjust_inventory),
        )
        .route("/inventory/low-stock", get(handlers::products::low_stock));

    let customers_admin = Router::new()
        .route(
            "/customers",
            get(handlers::customers::list_customers).post(handlers::customers::create_customer),
        )
        .route("/customers/{id}", get(handlers::customers::get_customer))
        .route(
            "/customers/{id}/segments",
            get(handlers::coupons::customer_segments),
        )
        .route(
            "/customers/{id}/cart",
            get(handlers::customers::get_customer_cart),
        );

    let orders_admin = Router::new()
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/{id}", get(handlers::orders::get_order))
        .route(
            "/orders/{id}/status",
            put(handlers::orders::update_order_status),
        )
        .route("/orders/{id}/ship", post(handlers::orders::ship_order));

    let coupons_admin = Router::new()
        .route(
            "/coupons",
            get(handlers::coupons::list_coupons).post(handlers::coupons::create_coupon),
        )
        .route(
            "/coupons/{id}",
            get(handlers::coupons::get_coupon)
                .put(handlers::coupons::update_coupon)
                .delete(handlers::coupons::deactivate_coupon),
        )
        .route("/coupons/{id}/usages", get(handlers::coupons::list_usages));

    let returns_admin = Router::new()
        .route("/returns", get(handlers::returns::list_returns))
        .route("/returns/stats", get(handlers::returns::return_stats))
        .route("/returns/{id}", get(handlers::returns::get_return))
        .route(
            "/returns/{id}/status",
            put(handlers::returns::update_return_status),
        );

    let uploads_admin = Router::new()
        .route(
            "/uploads/signature",
            post(handlers::uploads::sign_upload),
        )
        .route(
            "/uploads",
            post(handlers::uploads::upload_media).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        );

    let admin = Router::new()
        .merge(catalog_admin)
        .merge(customers_admin)
        .merge(orders_admin)
        .merge(coupons_admin)
        .merge(returns_admin)
        .merge(uploads_admin)
        .with_admin_session(auth);

    storefront.merge(admin)
}

/// Full application router: health, `/api/v1`, `/auth`, `/edge` and the API docs.
pub fn app_router(state: AppState) -> Router {
    let auth_service = state.auth.clone();
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1_routes(auth_service.clone()))
        .nest("/auth", auth::auth_routes().with_state(auth_service.clone()))
        .nest(
            "/edge",
            auth::gateway::gateway_routes()
                .with_state(state.gateway.clone())
                .with_admin_session(auth_service),
        )
        .merge(openapi::swagger_ui())
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}

async fn api_status(State(state): State<AppState>) -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let status_data = json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "currency": state.config.currency,
        "integrations": {
            "shiprocket": state.services.shiprocket.is_some(),
            "cloudinary": state.services.cloudinary.is_some(),
            "edge_upstream": state.config.gateway.upstream_url.is_some(),
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<ApiResponse<Value>>) {
    let db_ok = db::check_connection(&state.db).await.is_ok();
    let status = if db_ok {
        StatusCode::OK
    } else {
        ::tracing::warn!("health check failed: database unreachable");
        StatusCode::SERVICE_UNAVAILABLE
    };

    let health_data = json!({
        "status": if db_ok { "healthy" } else { "unhealthy" },
        "checks": {
            "database": if db_ok { "healthy" } else { "unhealthy" },
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    (status, Json(ApiResponse::success(health_data)))
}
