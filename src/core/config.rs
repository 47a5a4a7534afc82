//! # Configuration Module
//!
//! Process-wide configuration for the admission gateway. It is loaded once at
//! startup, validated, and then turned into immutable values (verifier, path
//! matcher, resolver) that are injected into the pipeline. Nothing here is
//! re-read per request.
//!
//! ## Sources
//! - YAML file (`GATEWAY_CONFIG_PATH`, default `config/gateway.yaml`)
//! - Environment overrides of the form `GATEWAY_<SECTION>_<FIELD>`
//! - Built-in defaults for anything left unset

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::info;
use url::Url;

use crate::auth::identity::IdentityMode;
use crate::auth::role::UserRole;
use crate::auth::token::TokenVerifier;
use crate::config_error;
use crate::core::error::{GatewayError, GatewayResult};
use crate::routing::path_pattern::PathMatcher;
use crate::routing::router::RouteTable;

/// Main gateway configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener settings
    pub server: ServerConfig,

    /// Admission settings
    pub auth: AuthConfig,

    /// Routes for admitted requests
    pub routes: Vec<RouteDefinition>,

    /// Logging and metrics
    pub observability: ObservabilityConfig,
}

impl GatewayConfig {
    /// Load configuration from a YAML file, apply env overrides and validate
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| config_error!("Failed to read config file: {}", e))?;

        let mut config = Self::from_yaml_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise start from defaults
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        if tokio::fs::try_exists(path.as_ref()).await.unwrap_or(false) {
            return Self::load_from_file(path).await;
        }

        info!(path = %path.as_ref().display(), "Config file not found, using defaults");
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML without overrides or validation
    pub fn from_yaml_str(content: &str) -> GatewayResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> GatewayResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("GATEWAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Some(port) = lookup("GATEWAY_SERVER_HTTP_PORT") {
            self.server.http_port = port
                .parse()
                .map_err(|e| config_error!("Invalid GATEWAY_SERVER_HTTP_PORT: {}", e))?;
        }

        if let Some(timeout) = lookup("GATEWAY_SERVER_REQUEST_TIMEOUT") {
            self.server.request_timeout = parse_duration("GATEWAY_SERVER_REQUEST_TIMEOUT", &timeout)?;
        }

        if let Some(key) = lookup("GATEWAY_AUTH_SIGNING_KEY") {
            self.auth.signing_key = SigningKey::new(key);
        }

        if let Some(role) = lookup("GATEWAY_AUTH_PRIVILEGED_ROLE") {
            self.auth.privileged_role = UserRole::parse(&role);
        }

        if let Some(mode) = lookup("GATEWAY_AUTH_IDENTITY_MODE") {
            self.auth.identity_mode = mode.parse()?;
        }

        if let Some(url) = lookup("GATEWAY_AUTH_RESOLVER_BASE_URL") {
            self.auth.resolver.base_url = url;
        }

        if let Some(timeout) = lookup("GATEWAY_AUTH_RESOLVER_TIMEOUT") {
            self.auth.resolver.timeout = parse_duration("GATEWAY_AUTH_RESOLVER_TIMEOUT", &timeout)?;
        }

        if let Some(level) = lookup("GATEWAY_LOG_LEVEL") {
            self.observability.logging.level = level;
        }

        if let Some(format) = lookup("GATEWAY_LOG_FORMAT") {
            self.observability.logging.format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(config_error!("Invalid GATEWAY_LOG_FORMAT: {}", other))
                }
            };
        }

        if let Some(enabled) = lookup("GATEWAY_METRICS_ENABLED") {
            self.observability.metrics.enabled = enabled
                .parse()
                .map_err(|e| config_error!("Invalid GATEWAY_METRICS_ENABLED: {}", e))?;
        }

        Ok(())
    }

    /// Validate the configuration, reporting every problem at once
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        if self.server.bind_address.is_empty() {
            errors.push("bind_address cannot be empty".to_string());
        }
        if self.server.http_port == 0 {
            errors.push("http_port must be greater than 0".to_string());
        }
        if self.server.max_request_size == 0 {
            errors.push("max_request_size must be greater than 0".to_string());
        }
        if self.server.request_timeout.is_zero() {
            errors.push("request_timeout must be greater than 0".to_string());
        }

        if let Err(e) = self.auth.token_verifier() {
            errors.push(describe(e));
        }
        if let Err(e) = self.auth.path_matcher() {
            errors.push(describe(e));
        }
        if !self.auth.privileged_role.is_known() {
            errors.push("privileged_role must name a known role".to_string());
        }

        if self.auth.identity_mode == IdentityMode::RemoteLookup {
            if let Err(e) = Url::parse(&self.auth.resolver.base_url) {
                errors.push(format!(
                    "resolver.base_url '{}' is invalid: {}",
                    self.auth.resolver.base_url, e
                ));
            }
        }
        if self.auth.resolver.timeout.is_zero() {
            errors.push("resolver.timeout must be greater than 0".to_string());
        } else if self.auth.resolver.timeout >= self.server.request_timeout {
            errors.push("resolver.timeout must be shorter than server.request_timeout".to_string());
        }

        if let Err(e) = RouteTable::from_definitions(&self.routes) {
            errors.push(describe(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::config(errors.join("; ")))
        }
    }
}

fn parse_duration(name: &str, value: &str) -> GatewayResult<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| config_error!("Invalid {}: {}", name, e))
}

fn describe(error: GatewayError) -> String {
    match error {
        GatewayError::Configuration { message } => message,
        other => other.to_string(),
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: String,

    /// HTTP port
    pub http_port: u16,

    /// Overall request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Maximum request body size forwarded upstream
    pub max_request_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 8080,
            request_timeout: Duration::from_secs(30),
            max_request_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Base64-encoded HMAC key material; redacted in debug output
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SigningKey(String);

impl SigningKey {
    pub fn new<S: Into<String>>(encoded: S) -> Self {
        Self(encoded.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

/// Authentication and authorization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Symmetric signing key (base64)
    pub signing_key: SigningKey,

    /// Paths that bypass authentication
    pub exempt_paths: Vec<String>,

    /// Paths that require the privileged role
    pub privileged_paths: Vec<String>,

    /// The designated top-tier role
    pub privileged_role: UserRole,

    /// Where the authoritative identity comes from
    pub identity_mode: IdentityMode,

    /// User service settings for remote lookup
    pub resolver: ResolverConfig,
}

impl AuthConfig {
    /// Build the token verifier from the configured key
    pub fn token_verifier(&self) -> GatewayResult<TokenVerifier> {
        if self.signing_key.expose().trim().is_empty() {
            return Err(GatewayError::config("signing_key must be set"));
        }
        TokenVerifier::from_base64_secret(self.signing_key.expose())
    }

    /// Compile the exempt and privileged pattern sets
    pub fn path_matcher(&self) -> GatewayResult<PathMatcher> {
        PathMatcher::new(&self.exempt_paths, &self.privileged_paths)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            signing_key: SigningKey::default(),
            exempt_paths: vec!["/auth/**".to_string()],
            privileged_paths: vec!["/admin/**".to_string(), "/backoffice/**".to_string()],
            privileged_role: UserRole::Master,
            identity_mode: IdentityMode::LocalClaims,
            resolver: ResolverConfig::default(),
        }
    }
}

/// Identity collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Base URL of the user service
    pub base_url: String,

    /// Lookup timeout, independent of the request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            base_url: "http://user-service".to_string(),
            timeout: Duration::from_secs(2),
        }
    }
}

/// Route definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDefinition {
    /// Path pattern, same syntax as the admission patterns
    pub path: String,

    /// Upstream base URL
    pub upstream: String,
}

/// Observability configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// Log output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Install the Prometheus exporter
    pub enabled: bool,

    /// Exporter listen address
    pub listen_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: "0.0.0.0:9090".to_string(),
        }
    }
}
