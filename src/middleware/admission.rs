//! # Admission Pipeline
//!
//! Decides, for every inbound request, whether it may proceed to routing.
//! The stages always run in this fixed order:
//!
//! 1. **Path check**: normalize and classify the path. Exempt paths are
//!    forwarded without touching the credential. The normalized path replaces
//!    the request path, so routing and the backend see exactly what was
//!    classified.
//! 2. **Authenticate**: extract the `Bearer` credential and verify it.
//! 3. **Resolve identity**: claims → identity, locally or through the user
//!    service, depending on the configured [`IdentityMode`].
//! 4. **Authorize**: privileged paths require the designated role exactly.
//!
//! On success the verified identity is written to `X-User-Id` /
//! `X-User-Role`; any caller-supplied values for those headers are stripped
//! first, on every path. On failure the request never reaches routing and the
//! [`ErrorTranslator`] produces the response. No stage is retried.
//!
//! ## Cancellation
//!
//! The pipeline is a plain future. If the connection drops (or the outer
//! request timeout fires) the future is dropped, which cancels an in-flight
//! identity lookup and guarantees nothing is written afterwards.

use axum::extract::{Request, State};
use axum::http::uri::PathAndQuery;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Uri};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::auth::identity::{build_identity_resolver, Identity, IdentityMode, IdentityResolver};
use crate::auth::role::UserRole;
use crate::auth::token::TokenVerifier;
use crate::core::config::AuthConfig;
use crate::core::error::{FailureKind, GatewayError, GatewayResult, TokenRejection};
use crate::internal_error;
use crate::middleware::error_handling::ErrorTranslator;
use crate::observability::metrics::AdmissionMetrics;
use crate::routing::path_pattern::{normalize_path, PathClassification, PathMatcher};

/// Prefix of the `Authorization` header value
pub const BEARER_PREFIX: &str = "Bearer ";

/// Propagated user id
pub static USER_ID_HEADER: HeaderName = HeaderName::from_static("x-user-id");

/// Propagated user role
pub static USER_ROLE_HEADER: HeaderName = HeaderName::from_static("x-user-role");

/// A denied admission
#[derive(Debug, Clone)]
pub struct Denial {
    pub kind: FailureKind,
    pub status: axum::http::StatusCode,
    pub message: String,
    error: GatewayError,
}

impl Denial {
    fn from_error(error: GatewayError) -> Self {
        let kind = error.kind();
        Self {
            kind,
            status: kind.status_code(),
            message: kind.message().to_string(),
            error,
        }
    }

    /// The underlying failure
    pub fn error(&self) -> &GatewayError {
        &self.error
    }

    pub fn into_error(self) -> GatewayError {
        self.error
    }
}

/// Exactly one outcome per request
#[derive(Debug, Clone)]
pub enum AdmissionOutcome {
    /// Forward the request on the normalized `path`; `identity` is `None`
    /// only for exempt paths
    Allow {
        identity: Option<Identity>,
        path: String,
    },
    /// Stop and answer with an error envelope
    Deny(Denial),
}

impl AdmissionOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

/// The ordered admission pipeline
pub struct AdmissionPipeline {
    matcher: Arc<PathMatcher>,
    verifier: Arc<TokenVerifier>,
    resolver: Arc<dyn IdentityResolver>,
    privileged_role: UserRole,
    metrics: AdmissionMetrics,
}

impl std::fmt::Debug for AdmissionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPipeline")
            .field("matcher", &self.matcher)
            .field("resolver", &self.resolver.name())
            .field("privileged_role", &self.privileged_role)
            .finish()
    }
}

impl AdmissionPipeline {
    pub fn new(
        matcher: PathMatcher,
        verifier: TokenVerifier,
        resolver: Arc<dyn IdentityResolver>,
        privileged_role: UserRole,
    ) -> Self {
        Self {
            matcher: Arc::new(matcher),
            verifier: Arc::new(verifier),
            resolver,
            privileged_role,
            metrics: AdmissionMetrics::new(),
        }
    }

    /// Build the pipeline from configuration
    pub fn from_config(config: &AuthConfig) -> GatewayResult<Self> {
        let pipeline = Self::new(
            config.path_matcher()?,
            config.token_verifier()?,
            build_identity_resolver(config)?,
            config.privileged_role,
        );

        info!(
            identity_mode = ?config.identity_mode,
            privileged_role = %config.privileged_role,
            exempt = ?config.exempt_paths,
            privileged = ?config.privileged_paths,
            "Admission pipeline ready"
        );
        if config.identity_mode == IdentityMode::RemoteLookup {
            info!(
                base_url = %config.resolver.base_url,
                timeout_ms = config.resolver.timeout.as_millis() as u64,
                "Identity resolved through user service"
            );
        }

        Ok(pipeline)
    }

    pub fn privileged_role(&self) -> UserRole {
        self.privileged_role
    }

    /// Run every stage for one request and report the outcome
    #[instrument(name = "admission", skip_all, fields(method = %method, path = %path))]
    pub async fn evaluate(&self, method: &Method, path: &str, headers: &HeaderMap) -> AdmissionOutcome {
        match self.run(path, headers).await {
            Ok((path, None)) => {
                self.metrics.record_exempt();
                debug!(stage = "path_check", normalized = %path, "Exempt path, skipping authentication");
                AdmissionOutcome::Allow { identity: None, path }
            }
            Ok((path, Some(identity))) => {
                self.metrics.record_allowed();
                debug!(
                    stage = "authorize",
                    user_id = %identity.user_id,
                    role = %identity.role_name,
                    "Admitted"
                );
                AdmissionOutcome::Allow {
                    identity: Some(identity),
                    path,
                }
            }
            Err(error) => {
                let denial = Denial::from_error(error);
                self.metrics.record_denied(denial.kind);
                warn!(kind = denial.kind.as_str(), reason = %denial.error, "Denied");
                AdmissionOutcome::Deny(denial)
            }
        }
    }

    async fn run(&self, raw_path: &str, headers: &HeaderMap) -> GatewayResult<(String, Option<Identity>)> {
        let path = normalize_path(raw_path)?;
        let classification = self.matcher.classify(&path);
        if classification.exempt && classification.privileged {
            return Err(GatewayError::config(format!(
                "path '{}' is both exempt and privileged",
                path
            )));
        }
        if classification.exempt {
            return Ok((path, None));
        }

        let credential = extract_bearer(headers)
            .ok_or(GatewayError::invalid_token(TokenRejection::Empty))?;
        let claims = self.verifier.verify(credential)?;
        debug!(stage = "authenticate", subject = %claims.sub, "Token verified");

        let identity = self.resolver.resolve(&claims).await?;
        debug!(stage = "resolve_identity", resolver = self.resolver.name(), "Identity resolved");

        self.authorize(classification, &identity)?;
        Ok((path, Some(identity)))
    }

    /// Privileged paths require the designated role; everything else passes
    pub fn authorize(&self, classification: PathClassification, identity: &Identity) -> GatewayResult<()> {
        if classification.privileged && identity.role != self.privileged_role {
            return Err(GatewayError::forbidden(identity.role_name.as_str()));
        }
        Ok(())
    }

    /// Evaluate a request and, when admitted, rewrite its path and identity headers
    pub async fn admit(&self, request: Request) -> GatewayResult<Request> {
        let (mut parts, body) = request.into_parts();

        match self.evaluate(&parts.method, parts.uri.path(), &parts.headers).await {
            AdmissionOutcome::Allow { identity, path } => {
                if path != parts.uri.path() {
                    parts.uri = with_path(&parts.uri, &path)?;
                }
                propagate_identity(&mut parts.headers, identity.as_ref())?;
                Ok(Request::from_parts(parts, body))
            }
            AdmissionOutcome::Deny(denial) => Err(denial.into_error()),
        }
    }
}

/// Replace the path of `uri`, keeping its query
fn with_path(uri: &Uri, path: &str) -> GatewayResult<Uri> {
    let path_and_query = match uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(
        PathAndQuery::try_from(path_and_query)
            .map_err(|e| internal_error!("normalized path is not a valid URI path: {}", e))?,
    );
    Uri::from_parts(parts).map_err(|e| internal_error!("failed to rebuild request URI: {}", e))
}

/// Extract a non-blank bearer credential from the `Authorization` header
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Replace caller-supplied identity headers with the verified identity
pub fn propagate_identity(headers: &mut HeaderMap, identity: Option<&Identity>) -> GatewayResult<()> {
    headers.remove(&USER_ID_HEADER);
    headers.remove(&USER_ROLE_HEADER);

    if let Some(identity) = identity {
        let user_id = HeaderValue::from_str(&identity.user_id)
            .map_err(|e| internal_error!("user id is not a valid header value: {}", e))?;
        let role = HeaderValue::from_str(&identity.role_name)
            .map_err(|e| internal_error!("role is not a valid header value: {}", e))?;
        headers.insert(USER_ID_HEADER.clone(), user_id);
        headers.insert(USER_ROLE_HEADER.clone(), role);
    }
    Ok(())
}

/// State for [`admission_middleware`]
#[derive(Debug, Clone)]
pub struct AdmissionState {
    pub pipeline: Arc<AdmissionPipeline>,
    pub translator: ErrorTranslator,
}

impl AdmissionState {
    pub fn new(pipeline: Arc<AdmissionPipeline>) -> Self {
        Self {
            pipeline,
            translator: ErrorTranslator::new(),
        }
    }
}

/// Axum middleware running the admission pipeline in front of `next`.
///
/// Use with `axum::middleware::from_fn_with_state`.
pub async fn admission_middleware(
    State(state): State<AdmissionState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    match state.pipeline.admit(request).await {
        Ok(request) => {
            info!(method = %method, path = %path, stage = "forward", "Forwarding admitted request");
            next.run(request).await
        }
        Err(error) => state.translator.respond(&method, &path, error),
    }
}
