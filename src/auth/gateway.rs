//! Edge gateway: forwards admin requests to the upstream backend once the
//! session middleware has accepted them.

use axum::{
    body::{Body, Bytes},
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::Response,
    routing::any,
    Extension, Router,
};
use std::{sync::Arc, time::Duration};
use tracing::{info, instrument, warn};

use super::AdminSession;
use crate::{config::GatewayConfig, errors::ServiceError};

pub const ADMIN_EMAIL_HEADER: &str = "x-admin-email";
pub const SESSION_ID_HEADER: &str = "x-session-id";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct EdgeGateway {
    client: reqwest::Client,
    upstream_url: Option<String>,
}

impl EdgeGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(
                config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("gateway client: {}", e)))?;
        Ok(Self {
            client,
            upstream_url: config
                .upstream_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
        })
    }

    /// Target URL for `path` and an optional raw query string.
    pub fn target_url(&self, path: &str, query: Option<&str>) -> Result<String, ServiceError> {
        let base = self.upstream_url.as_deref().ok_or_else(|| {
            ServiceError::ServiceUnavailable("edge gateway upstream is not configured".into())
        })?;
        let path = path.trim_start_matches('/');
        if path.split('/').any(|segment| segment == "..") {
            return Err(ServiceError::InvalidInput("path traversal is not allowed".into()));
        }
        Ok(match query.filter(|q| !q.is_empty()) {
            Some(q) => format!("{}/{}?{}", base, path, q),
            None => format!("{}/{}", base, path),
        })
    }

    #[instrument(skip(self, session, headers, body), fields(session_id = %session.sid))]
    pub async fn forward(
        &self,
        session: &AdminSession,
        method: Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response, ServiceError> {
        let url = self.target_url(path, query)?;

        let mut upstream = self
            .client
            .request(method.clone(), &url)
            .header(ADMIN_EMAIL_HEADER, session.email.as_str())
            .header(SESSION_ID_HEADER, session.sid.as_str());
        if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
            upstream = upstream.header(header::CONTENT_TYPE, content_type.clone());
        }
        if let Some(accept) = headers.get(header::ACCEPT) {
            upstream = upstream.header(header::ACCEPT, accept.clone());
        }
        if !body.is_empty() {
            upstream = upstream.body(body);
        }

        let reply = upstream.send().await.map_err(|e| {
            warn!(error = %e, %url, "upstream request failed");
            ServiceError::ExternalServiceError(format!("upstream request failed: {}", e))
        })?;

        let status = StatusCode::from_u16(reply.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let content_type = reply.headers().get(header::CONTENT_TYPE).cloned();
        let bytes = reply.bytes().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("upstream body unreadable: {}", e))
        })?;

        info!(%method, %url, status = status.as_u16(), "forwarded admin request");

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        if let Some(content_type) = content_type {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
        }
        Ok(response)
    }
}

async fn forward_handler(
    State(gateway): State<Arc<EdgeGateway>>,
    Extension(session): Extension<AdminSession>,
    method: Method,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ServiceError> {
    gateway
        .forward(&session, method, &path, query.as_deref(), &headers, body)
        .await
}

/// `ANY /{*path}`; nest under `/edge` behind the admin session layer.
pub fn gateway_routes() -> Router<Arc<EdgeGateway>> {
    Router::new().route("/{*path}", any(forward_handler))
}
