use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "INR";
const DEV_DEFAULT_SESSION_SECRET: &str = "development-only-session-secret-replace-me-in-production";

/// Customer segmentation thresholds and coupon fraud limits
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(default)]
pub struct CouponConfig {
    /// Lifetime spend (minor units) that makes a customer high value
    #[validate(range(min = 1))]
    pub high_value_spend_cents: i64,
    /// Order count that makes a customer loyal
    #[validate(range(min = 1))]
    pub loyal_order_count: u64,
    /// Days since the last order after which a customer is dormant
    #[validate(range(min = 1))]
    pub dormant_after_days: i64,
    /// Hours of inactivity after which an open cart counts as abandoned
    #[validate(range(min = 1))]
    pub cart_abandon_after_hours: i64,
    /// Segment whose members get auto-applied coupons
    pub auto_apply_segment: String,
    /// Sliding window for redemption frequency checks
    #[validate(range(min = 1))]
    pub fraud_window_hours: i64,
    pub max_uses_per_ip: u64,
    pub max_uses_per_device: u64,
    pub max_uses_per_customer: u64,
}

impl Default for CouponConfig {
    fn default() -> Self {
        Self {
            high_value_spend_cents: 1_000_000,
            loyal_order_count: 5,
            dormant_after_days: 90,
            cart_abandon_after_hours: 24,
            auto_apply_segment: "new_user".to_string(),
            fraud_window_hours: 24,
            max_uses_per_ip: 5,
            max_uses_per_device: 3,
            max_uses_per_customer: 3,
        }
    }
}

/// Flat shipping charged on orders
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(default)]
pub struct ShippingConfig {
    #[validate(range(min = 0))]
    pub flat_rate_cents: i64,
    /// Subtotal at or above which shipping is waived
    #[validate(range(min = 0))]
    pub free_shipping_threshold_cents: i64,
}

impl ShippingConfig {
    /// Shipping charged for a given subtotal.
    pub fn charge_for(&self, subtotal_cents: i64) -> i64 {
        if subtotal_cents >= self.free_shipping_threshold_cents {
            0
        } else {
            self.flat_rate_cents
        }
    }
}

impl Default for ShippingConfig {
    fn default() -> Self {
        Self {
            flat_rate_cents: 4_900,
            free_shipping_threshold_cents: 49_900,
        }
    }
}

/// Admin session signing and credentials
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct SessionConfig {
    /// HMAC key for session tokens (minimum 32 characters)
    #[validate(length(min = 32))]
    pub secret: String,
    /// Session lifetime in seconds
    #[serde(default = "default_session_ttl_secs")]
    #[validate(range(min = 60, max = 604800))]
    pub ttl_secs: u64,
    /// Admin login email
    #[serde(default)]
    pub admin_email: Option<String>,
    /// Argon2 PHC string for the admin password
    #[serde(default)]
    pub admin_password_hash: Option<String>,
}

/// Backend that the edge gateway forwards admin requests to
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub upstream_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct ShiprocketConfig {
    #[serde(default = "default_shiprocket_base_url")]
    pub base_url: String,
    #[validate(email)]
    pub email: String,
    pub password: String,
    #[serde(default = "default_pickup_location")]
    pub pickup_location: String,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CloudinaryConfig {
    #[validate(length(min = 1))]
    pub cloud_name: String,
    #[validate(length(min = 1))]
    pub api_key: String,
    #[validate(length(min = 1))]
    pub api_secret: String,
    #[serde(default = "default_cloudinary_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub upload_folder: Option<String>,
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// CORS: allow credentials
    #[serde(default)]
    pub cors_allow_credentials: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,

    /// Default page size for paginated API responses
    #[serde(default = "default_api_page_size")]
    pub api_default_page_size: u64,

    /// Maximum page size allowed for paginated API responses
    #[serde(default = "default_api_max_page_size")]
    pub api_max_page_size: u64,

    /// Currency code used for all money amounts
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    pub session: SessionConfig,

    #[serde(default)]
    pub coupons: CouponConfig,

    #[serde(default)]
    pub shipping: ShippingConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub shiprocket: Option<ShiprocketConfig>,

    #[serde(default)]
    pub cloudinary: Option<CloudinaryConfig>,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials.
    pub fn new(database_url: String, session_secret: String, environment: String) -> Self {
        Self {
            database_url,
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            cors_allow_credentials: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            api_default_page_size: default_api_page_size(),
            api_max_page_size: default_api_max_page_size(),
            currency: default_currency(),
            session: SessionConfig {
                secret: session_secret,
                ttl_secs: default_session_ttl_secs(),
                admin_email: None,
                admin_password_hash: None,
            },
            coupons: CouponConfig::default(),
            shipping: ShippingConfig::default(),
            gateway: GatewayConfig::default(),
            shiprocket: None,
            cloudinary: None,
        }
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    /// Clamps a requested page size to the configured bounds.
    pub fn page_limit(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.api_default_page_size)
            .clamp(1, self.api_max_page_size)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() && self.session.secret.trim() == DEV_DEFAULT_SESSION_SECRET {
            let mut err = ValidationError::new("session_secret_default_dev");
            err.message = Some(
                "The bundled development session secret must not be used outside development. Set APP__SESSION__SECRET."
                    .into(),
            );
            errors.add("session", err);
        }

        if self.session.admin_email.is_some() != self.session.admin_password_hash.is_some() {
            let mut err = ValidationError::new("admin_credentials_incomplete");
            err.message = Some("admin_email and admin_password_hash must be set together".into());
            errors.add("session", err);
        }

        if self.api_default_page_size == 0 || self.api_default_page_size > self.api_max_page_size
        {
            let mut err = ValidationError::new("api_default_page_size");
            err.message = Some("api_default_page_size must be within 1..=api_max_page_size".into());
            errors.add("api_default_page_size", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_sections(&self) -> Result<(), ValidationErrors> {
        self.session.validate()?;
        self.coupons.validate()?;
        self.shipping.validate()?;
        if let Some(shiprocket) = &self.shiprocket {
            shiprocket.validate()?;
        }
        if let Some(cloudinary) = &self.cloudinary {
            cloudinary.validate()?;
        }
        Ok(())
    }

    /// Runs field validation, section validation and cross-field checks.
    pub fn validate_all(&self) -> Result<(), ValidationErrors> {
        self.validate()?;
        self.validate_sections()?;
        self.validate_additional_constraints()
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_api_page_size() -> u64 {
    20
}

fn default_api_max_page_size() -> u64 {
    100
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_session_ttl_secs() -> u64 {
    8 * 60 * 60
}

fn default_shiprocket_base_url() -> String {
    "https://apiv2.shiprocket.in/v1/external".to_string()
}

fn default_pickup_location() -> String {
    "Primary".to_string()
}

fn default_cloudinary_base_url() -> String {
    "https://api.cloudinary.com/v1_1".to_string()
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*, nested with `__`)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let mut builder = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    if run_env.eq_ignore_ascii_case(DEFAULT_ENV) {
        builder = builder.set_default("session.secret", DEV_DEFAULT_SESSION_SECRET)?;
    }

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("session.secret").is_err() {
        error!("Session secret is not configured. Set APP__SESSION__SECRET to a random string of at least 32 characters.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "session.secret is required but not configured".into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate_all().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "a-sufficiently-long-session-secret-for-tests".into(),
            "production".into(),
        )
    }

    #[test]
    fn non_dev_requires_cors_origins() {
        let cfg = base_config();
        assert!(cfg.validate_all().is_err());
    }

    #[test]
    fn non_dev_with_origins_passes() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://shop.example.com".into());
        assert!(cfg.validate_all().is_ok());
    }

    #[test]
    fn development_allows_permissive_by_default() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        assert!(cfg.validate_all().is_ok());
    }

    #[test]
    fn short_session_secret_is_rejected() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        cfg.session.secret = "short".into();
        assert!(cfg.validate_all().is_err());
    }

    #[test]
    fn dev_secret_rejected_outside_development() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        cfg.session.secret = DEV_DEFAULT_SESSION_SECRET.into();
        assert!(cfg.validate_all().is_err());
    }

    #[test]
    fn admin_credentials_must_come_in_pairs() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        cfg.session.admin_email = Some("ops@example.com".into());
        assert!(cfg.validate_all().is_err());
    }

    #[test]
    fn page_limit_is_clamped() {
        let cfg = base_config();
        assert_eq!(cfg.page_limit(None), 20);
        assert_eq!(cfg.page_limit(Some(0)), 1);
        assert_eq!(cfg.page_limit(Some(500)), 100);
    }
}
