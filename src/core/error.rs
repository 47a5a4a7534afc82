//! # Error Handling Module
//!
//! This module defines every failure that can surface while a request is being
//! admitted, using the `thiserror` crate. Each variant maps onto exactly one
//! [`FailureKind`], and each kind onto one fixed HTTP status. The
//! [`ErrorTranslator`](crate::middleware::error_handling::ErrorTranslator) is
//! the only place that turns these errors into responses.
//!
//! ## Failure taxonomy
//!
//! | Kind                  | Status | Raised by                                   |
//! |-----------------------|--------|---------------------------------------------|
//! | `InvalidToken`        | 401    | missing, malformed, expired or forged token  |
//! | `Forbidden`           | 403    | privileged path with an insufficient role    |
//! | `UpstreamUnavailable` | 503    | identity collaborator unreachable or failing |
//! | `RouteNotFound`       | 404    | no route for an admitted request             |
//! | `Unclassified`        | 500    | everything else                              |
//!
//! Unclassified failures never leak their internal text to the client; the
//! message is logged and replaced by a generic one.

use axum::http::StatusCode;
use std::fmt;
use thiserror::Error;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Generic client-facing message for unclassified failures
pub const UNCLASSIFIED_MESSAGE: &str = "Internal server error.";

/// Why a bearer credential was rejected.
///
/// The distinction only matters for diagnostics: every rejection is reported to
/// the client as the same `InvalidToken` failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    /// No credential, or a blank one
    Empty,
    /// Not a structurally valid token (bad segments, base64, JSON)
    Malformed,
    /// Signature does not verify against the configured key
    BadSignature,
    /// Header names an algorithm outside the accepted HMAC family
    UnsupportedAlgorithm,
    /// `exp` is at or before the current time
    Expired,
    /// A required claim (`exp`, `sub`) is absent or empty
    MissingClaim,
}

impl TokenRejection {
    /// Stable name used in log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Malformed => "malformed",
            Self::BadSignature => "bad_signature",
            Self::UnsupportedAlgorithm => "unsupported_algorithm",
            Self::Expired => "expired",
            Self::MissingClaim => "missing_claim",
        }
    }
}

impl fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-visible classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    InvalidToken,
    Forbidden,
    UpstreamUnavailable,
    RouteNotFound,
    Unclassified,
}

impl FailureKind {
    /// The fixed HTTP status for this kind
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::RouteNotFound => StatusCode::NOT_FOUND,
            Self::Unclassified => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The fixed client-facing message for this kind
    pub fn message(&self) -> &'static str {
        match self {
            Self::InvalidToken => "Invalid access token.",
            Self::Forbidden => "Insufficient permission for the request.",
            Self::UpstreamUnavailable => "User service is unavailable.",
            Self::RouteNotFound => "No route matches the request path.",
            Self::Unclassified => UNCLASSIFIED_MESSAGE,
        }
    }

    /// Label value used for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidToken => "invalid_token",
            Self::Forbidden => "forbidden",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::RouteNotFound => "route_not_found",
            Self::Unclassified => "unclassified",
        }
    }
}

/// Error types for the admission gateway
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// Credential absent, malformed, expired or badly signed
    #[error("Invalid access token: {rejection}")]
    InvalidToken { rejection: TokenRejection },

    /// Authenticated, but the role is insufficient for a privileged path
    #[error("Forbidden for role {role}")]
    Forbidden { role: String },

    /// Identity collaborator unreachable, timed out, or answered with an error
    #[error("User service unavailable: {reason}")]
    UpstreamUnavailable { reason: String },

    /// Request path cannot be normalized (climbs above the root, encoded separator)
    #[error("Invalid request path {path}")]
    InvalidPath { path: String },

    /// No route is configured for an admitted request
    #[error("No route for path {path}")]
    RouteNotFound { path: String },

    /// The routing collaborator failed to reach the backend
    #[error("Forwarding failed: {message}")]
    Forwarding { message: String },

    /// Invalid or contradictory configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal failure with no better classification
    #[error("Internal server error: {message}")]
    Internal { message: String },

    /// A failure arrived after the response was already committed
    #[error("Response already committed: {source}")]
    ResponseCommitted {
        #[source]
        source: Box<GatewayError>,
    },
}

impl GatewayError {
    /// Create an invalid-token error
    pub fn invalid_token(rejection: TokenRejection) -> Self {
        Self::InvalidToken { rejection }
    }

    /// Create a forbidden error for the given role name
    pub fn forbidden<S: Into<String>>(role: S) -> Self {
        Self::Forbidden { role: role.into() }
    }

    /// Create an upstream-unavailable error
    pub fn upstream_unavailable<S: Into<String>>(reason: S) -> Self {
        Self::UpstreamUnavailable {
            reason: reason.into(),
        }
    }

    /// Create an invalid-path error
    pub fn invalid_path<S: Into<String>>(path: S) -> Self {
        Self::InvalidPath { path: path.into() }
    }

    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a forwarding error with a custom message
    pub fn forwarding<S: Into<String>>(message: S) -> Self {
        Self::Forwarding {
            message: message.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidToken { .. } => FailureKind::InvalidToken,
            Self::Forbidden { .. } => FailureKind::Forbidden,
            Self::UpstreamUnavailable { .. } => FailureKind::UpstreamUnavailable,
            Self::RouteNotFound { .. } => FailureKind::RouteNotFound,
            Self::InvalidPath { .. }
            | Self::Forwarding { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. }
            | Self::ResponseCommitted { .. } => FailureKind::Unclassified,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        self.kind().status_code()
    }

    /// Get a string representation of the error type for logs
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidToken { .. } => "invalid_token",
            Self::Forbidden { .. } => "forbidden",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::RouteNotFound { .. } => "route_not_found",
            Self::InvalidPath { .. } => "invalid_path",
            Self::Forwarding { .. } => "forwarding_error",
            Self::Configuration { .. } => "configuration_error",
            Self::Internal { .. } => "internal_error",
            Self::ResponseCommitted { .. } => "response_committed",
        }
    }

    /// Whether a client may reasonably retry the same request later.
    ///
    /// The pipeline itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. })
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Configuration {
            message: format!("Failed to parse config: {}", err),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::Forwarding {
            message: err.to_string(),
        }
    }
}

/// Convenience macro for creating internal errors
///
/// Usage: `internal_error!("Failed to build header: {}", name)`
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::core::error::GatewayError::internal(format!($($arg)*))
    };
}

/// Convenience macro for creating configuration errors
///
/// Usage: `config_error!("Invalid port: {}", port)`
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::core::error::GatewayError::config(format!($($arg)*))
    };
}
