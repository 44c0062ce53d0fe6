/*!
 * # Admin session authentication
 *
 * Admin users log in with the credentials configured under `[session]` and
 * receive a signed session token (see [`session`]). The token is presented as
 * a Bearer token on admin routes and on the edge gateway; logout revokes the
 * session id until the token would have expired anyway.
 */

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::SessionConfig,
    events::{Event, EventSender},
};

pub mod gateway;
pub mod session;

pub use session::{AdminSession, SessionSigner, ADMIN_ROLE};

/// Authentication error types
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Missing token")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token has been revoked")]
    RevokedToken,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),

    #[error("Admin login is not configured")]
    NotConfigured,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "AUTH_INVALID_CREDENTIALS",
            Self::MissingToken => "AUTH_MISSING_TOKEN",
            Self::InvalidToken => "AUTH_INVALID_TOKEN",
            Self::TokenExpired => "AUTH_TOKEN_EXPIRED",
            Self::RevokedToken => "AUTH_REVOKED_TOKEN",
            Self::TokenCreation(_) => "AUTH_TOKEN_CREATION_FAILED",
            Self::NotConfigured => "AUTH_NOT_CONFIGURED",
            Self::InternalError(_) => "AUTH_INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::TokenCreation(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::MissingToken => "No authentication token provided".to_string(),
            Self::TokenCreation(_) | Self::InternalError(_) => {
                tracing::error!(error = %self, "auth failure");
                "Internal authentication error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(serde_json::json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Login credentials
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub session: AdminSession,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ValidateResponse {
    pub valid: bool,
    pub session: AdminSession,
}

/// Hashes a password into an argon2 PHC string suitable for `session.admin_password_hash`.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::InternalError(format!("password hashing failed: {}", e)))
}

fn verify_password(password: &str, phc: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(phc)
        .map_err(|e| AuthError::InternalError(format!("stored admin hash is invalid: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Issues, validates and revokes admin sessions.
#[derive(Debug, Clone)]
pub struct AuthService {
    signer: SessionSigner,
    ttl: ChronoDuration,
    admin_email: Option<String>,
    admin_password_hash: Option<String>,
    /// Revoked session ids with their token expiry (unix seconds).
    revoked: Arc<DashMap<String, i64>>,
    event_sender: Option<Arc<EventSender>>,
}

impl AuthService {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            signer: SessionSigner::new(&config.secret),
            ttl: ChronoDuration::seconds(config.ttl_secs as i64),
            admin_email: config
                .admin_email
                .as_ref()
                .map(|e| e.trim().to_lowercase()),
            admin_password_hash: config.admin_password_hash.clone(),
            revoked: Arc::new(DashMap::new()),
            event_sender: None,
        }
    }

    pub fn with_events(mut self, event_sender: Arc<EventSender>) -> Self {
        self.event_sender = Some(event_sender);
        self
    }

    #[instrument(skip(self, credentials), fields(email = %credentials.email))]
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<LoginResponse, AuthError> {
        let (Some(admin_email), Some(hash)) = (&self.admin_email, &self.admin_password_hash) else {
            return Err(AuthError::NotConfigured);
        };

        let email = credentials.email.trim().to_lowercase();
        // Always run the hash check so unknown emails cost the same.
        let password_ok = verify_password(&credentials.password, hash)?;
        if email != *admin_email || !password_ok {
            warn!("admin login rejected");
            return Err(AuthError::InvalidCredentials);
        }

        self.issue(email).await
    }

    async fn issue(&self, email: String) -> Result<LoginResponse, AuthError> {
        let now = Utc::now();
        let expires_at = now + self.ttl;
        let session = AdminSession {
            sid: Uuid::new_v4().to_string(),
            email,
            role: ADMIN_ROLE.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = self.signer.sign(&session)?;

        info!(session_id = %session.sid, "admin session started");
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::AdminSessionStarted {
                    session_id: session.sid.clone(),
                    email: session.email.clone(),
                    at: now,
                })
                .await;
        }

        Ok(LoginResponse {
            token,
            token_type: "Bearer".to_string(),
            expires_at,
            session,
        })
    }

    pub fn validate(&self, token: &str) -> Result<AdminSession, AuthError> {
        self.validate_at(token, Utc::now())
    }

    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<AdminSession, AuthError> {
        let session = self.signer.verify(token)?;
        if session.is_expired_at(now) {
            return Err(AuthError::TokenExpired);
        }
        if self.revoked.contains_key(&session.sid) {
            return Err(AuthError::RevokedToken);
        }
        Ok(session)
    }

    /// Revokes the session behind `token`. Revoking twice is an error because
    /// the second call no longer presents a valid session.
    pub async fn logout(&self, token: &str) -> Result<AdminSession, AuthError> {
        let session = self.validate(token)?;
        self.revoked.insert(session.sid.clone(), session.exp);
        self.purge_revoked(Utc::now());

        info!(session_id = %session.sid, "admin session ended");
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::AdminSessionEnded {
                    session_id: session.sid.clone(),
                })
                .await;
        }
        Ok(session)
    }

    fn purge_revoked(&self, now: DateTime<Utc>) {
        let now = now.timestamp();
        self.revoked.retain(|_, exp| *exp > now);
    }
}

/// Extracts a Bearer token from the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingToken)?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .ok_or(AuthError::MissingToken)?;
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}

/// Rejects the request unless it carries a valid admin session, which is
/// then available to handlers as `Extension<AdminSession>`.
pub async fn admin_session_middleware(
    State(auth): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let session = auth.validate(bearer_token(request.headers())?)?;
    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}

/// Extension methods for Router to add the admin session check
pub trait AdminRouterExt {
    fn with_admin_session(self, auth: Arc<AuthService>) -> Self;
}

impl<S> AdminRouterExt for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_admin_session(self, auth: Arc<AuthService>) -> Self {
        self.layer(axum::middleware::from_fn_with_state(
            auth,
            admin_session_middleware,
        ))
    }
}

/// Authentication routes
pub fn auth_routes() -> Router<Arc<AuthService>> {
    Router::new()
        .route("/login", post(login_handler))
        .route("/validate", get(validate_handler))
        .route("/logout", post(logout_handler))
        .layer(DefaultBodyLimit::max(1024 * 16))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginCredentials,
    responses(
        (status = 200, description = "Session issued", body = LoginResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 503, description = "Admin login not configured")
    ),
    tag = "Auth"
)]
pub async fn login_handler(
    State(auth): State<Arc<AuthService>>,
    Json(credentials): Json<LoginCredentials>,
) -> Result<Json<LoginResponse>, AuthError> {
    Ok(Json(auth.login(&credentials).await?))
}

#[utoipa::path(
    get,
    path = "/auth/validate",
    responses(
        (status = 200, description = "Session is valid", body = ValidateResponse),
        (status = 401, description = "Missing, invalid, expired or revoked token")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn validate_handler(
    State(auth): State<Arc<AuthService>>,
    headers: HeaderMap,
) -> Result<Json<ValidateResponse>, AuthError> {
    let session = auth.validate(bearer_token(&headers)?)?;
    Ok(Json(ValidateResponse {
        valid: true,
        session,
    }))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Session revoked"),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn logout_handler(
    State(auth): State<Arc<AuthService>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AuthError> {
    let session = auth.logout(bearer_token(&headers)?).await?;
    Ok(Json(serde_json::json!({
        "message": "Successfully logged out",
        "session_id": session.sid,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::http::HeaderValue;

    fn service() -> AuthService {
        AuthService::new(&SessionConfig {
            secret: "s".repeat(32),
            ttl_secs: 3600,
            admin_email: Some("Admin@Example.com".into()),
            admin_password_hash: Some(hash_password("hunter22").unwrap()),
        })
    }

    fn creds(email: &str, password: &str) -> LoginCredentials {
        LoginCredentials {
            email: email.into(),
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn login_validate_logout_cycle() {
        let auth = service();
        let login = auth.login(&creds("admin@example.com", "hunter22")).await.unwrap();
        assert_eq!(login.session.email, "admin@example.com");
        assert_eq!(login.session.role, ADMIN_ROLE);

        let session = auth.validate(&login.token).unwrap();
        assert_eq!(session.sid, login.session.sid);

        auth.logout(&login.token).await.unwrap();
        assert_matches!(auth.validate(&login.token), Err(AuthError::RevokedToken));
        assert_matches!(auth.logout(&login.token).await, Err(AuthError::RevokedToken));
    }

    #[tokio::test]
    async fn wrong_password_or_email_is_rejected() {
        let auth = service();
        assert_matches!(
            auth.login(&creds("admin@example.com", "nope")).await,
            Err(AuthError::InvalidCredentials)
        );
        assert_matches!(
            auth.login(&creds("other@example.com", "hunter22")).await,
            Err(AuthError::InvalidCredentials)
        );
    }

    #[tokio::test]
    async fn unconfigured_admin_cannot_log_in() {
        let auth = AuthService::new(&SessionConfig {
            secret: "s".repeat(32),
            ttl_secs: 3600,
            admin_email: None,
            admin_password_hash: None,
        });
        let err = auth.login(&creds("a@b.c", "x")).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn expired_session_is_rejected() {
        let auth = service();
        let login = auth.login(&creds("admin@example.com", "hunter22")).await.unwrap();
        let later = login.expires_at + ChronoDuration::seconds(1);
        assert_matches!(auth.validate_at(&login.token, later), Err(AuthError::TokenExpired));
    }

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_matches!(bearer_token(&headers), Err(AuthError::MissingToken));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_matches!(bearer_token(&headers), Err(AuthError::MissingToken));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def");
    }
}
