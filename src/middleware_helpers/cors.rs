//! CORS policy built from the application config.

use crate::{config::AppConfig, handlers::coupons::DEVICE_ID_HEADER};
use http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use super::REQUEST_ID_HEADER;

const ALLOWED_METHODS: [Method; 6] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
];

fn allowed_headers() -> Vec<HeaderName> {
    vec![
        header::AUTHORIZATION,
        header::CONTENT_TYPE,
        header::ACCEPT,
        HeaderName::from_static(REQUEST_ID_HEADER),
        HeaderName::from_static(DEVICE_ID_HEADER),
    ]
}

fn configured_origins(cfg: &AppConfig) -> Option<Vec<HeaderValue>> {
    let origins: Vec<HeaderValue> = cfg
        .cors_allowed_origins
        .as_deref()?
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    (!origins.is_empty()).then_some(origins)
}

/// Explicit origins get an explicit method and header list, which keeps
/// credentialed CORS valid. Without origins only development or an explicit
/// override gets the permissive policy.
pub fn cors_layer(cfg: &AppConfig) -> anyhow::Result<CorsLayer> {
    if let Some(origins) = configured_origins(cfg) {
        return Ok(CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(ALLOWED_METHODS.to_vec())
            .allow_headers(allowed_headers())
            .allow_credentials(cfg.cors_allow_credentials));
    }

    if cfg.should_allow_permissive_cors() {
        info!(
            "Using permissive CORS because explicit origins were not configured ({})",
            if cfg.is_development() {
                "development environment"
            } else {
                "explicit override enabled"
            }
        );
        if cfg.cors_allow_credentials {
            warn!("APP__CORS_ALLOW_CREDENTIALS is ignored without APP__CORS_ALLOWED_ORIGINS");
        }
        return Ok(CorsLayer::permissive());
    }

    error!("Missing CORS configuration detected; set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true");
    anyhow::bail!(
        "Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true"
    )
}
