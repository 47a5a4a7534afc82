//! # Identity Resolution
//!
//! Turns verified [`Claims`] into the authoritative [`Identity`] used for
//! authorization and propagation. Two deployment modes exist behind one trait:
//!
//! - [`IdentityMode::LocalClaims`] (default): trust the token. User id comes
//!   from `sub`, role from the `role` claim. No network round trip.
//! - [`IdentityMode::RemoteLookup`]: the token subject is only a lookup key.
//!   User id and role come from the user service profile
//!   (`GET /internal/users/{userId}`).
//!
//! The pipeline holds an `Arc<dyn IdentityResolver>` built once from
//! configuration, so the mode is a single switch and not a second code path.
//!
//! The remote call is bounded by its own timeout. Dropping the returned
//! future (client disconnect, outer request timeout) drops the in-flight
//! `reqwest` call and releases its connection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::auth::role::UserRole;
use crate::auth::token::Claims;
use crate::core::config::AuthConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::observability::metrics::AdmissionMetrics;

/// Authoritative (user id, role) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,

    /// Role used for the privilege check
    pub role: UserRole,

    /// Role as issued, trimmed and uppercased; propagated downstream
    pub role_name: String,
}

impl Identity {
    pub fn new<S: Into<String>>(user_id: S, role: UserRole) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            role_name: role.as_str().to_string(),
        }
    }

    /// Build from an issued role string, keeping roles the gateway does not know.
    ///
    /// A missing or blank role becomes `UNKNOWN`.
    pub fn from_role_name<S: Into<String>>(user_id: S, role_name: Option<&str>) -> Self {
        let name = role_name.map(|r| r.trim().to_ascii_uppercase()).unwrap_or_default();
        if name.is_empty() {
            return Self::new(user_id, UserRole::Unknown);
        }

        Self {
            user_id: user_id.into(),
            role: UserRole::parse(&name),
            role_name: name,
        }
    }
}

/// Where the authoritative identity comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    #[default]
    LocalClaims,
    RemoteLookup,
}

impl std::str::FromStr for IdentityMode {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "local_claims" | "local" => Ok(Self::LocalClaims),
            "remote_lookup" | "remote" => Ok(Self::RemoteLookup),
            other => Err(GatewayError::config(format!("unknown identity mode '{}'", other))),
        }
    }
}

/// Resolves verified claims into an identity
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    async fn resolve(&self, claims: &Claims) -> GatewayResult<Identity>;
}

/// Trusts the token claims directly
#[derive(Debug, Default, Clone)]
pub struct ClaimsIdentityResolver;

#[async_trait]
impl IdentityResolver for ClaimsIdentityResolver {
    fn name(&self) -> &'static str {
        "local_claims"
    }

    async fn resolve(&self, claims: &Claims) -> GatewayResult<Identity> {
        Ok(Identity::from_role_name(claims.sub.clone(), claims.role.as_deref()))
    }
}

/// Profile returned by the user service
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserProfile {
    user_id: String,
    role: String,
}

/// Fetches the profile from the user service
#[derive(Debug, Clone)]
pub struct RemoteIdentityResolver {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    metrics: AdmissionMetrics,
}

impl RemoteIdentityResolver {
    pub fn new<S: Into<String>>(base_url: S, timeout: Duration) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::config(format!("failed to build user service client: {}", e)))?;

        Ok(Self::with_client(client, base_url, timeout))
    }

    pub fn with_client<S: Into<String>>(client: reqwest::Client, base_url: S, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            metrics: AdmissionMetrics::new(),
        }
    }

    fn profile_url(&self, user_id: &str) -> String {
        format!(
            "{}/internal/users/{}",
            self.base_url,
            urlencoding::encode(user_id)
        )
    }

    async fn fetch(&self, user_id: &str) -> GatewayResult<UserProfile> {
        let response = self
            .client
            .get(self.profile_url(user_id))
            .send()
            .await
            .map_err(|e| GatewayError::upstream_unavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::upstream_unavailable(format!(
                "user service answered {}",
                status
            )));
        }

        response
            .json::<UserProfile>()
            .await
            .map_err(|e| GatewayError::upstream_unavailable(format!("invalid profile body: {}", e)))
    }
}

#[async_trait]
impl IdentityResolver for RemoteIdentityResolver {
    fn name(&self) -> &'static str {
        "remote_lookup"
    }

    async fn resolve(&self, claims: &Claims) -> GatewayResult<Identity> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, self.fetch(&claims.sub)).await;
        self.metrics.record_identity_lookup(started.elapsed());

        let profile = match outcome {
            Ok(result) => result?,
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "User service lookup timed out");
                return Err(GatewayError::upstream_unavailable(format!(
                    "lookup timed out after {}ms",
                    self.timeout.as_millis()
                )));
            }
        };

        if profile.user_id != claims.sub {
            return Err(GatewayError::upstream_unavailable(
                "profile user id does not match token subject",
            ));
        }

        debug!(user_id = %profile.user_id, "Resolved identity from user service");
        Ok(Identity::from_role_name(profile.user_id, Some(&profile.role)))
    }
}

/// Build the resolver selected by configuration
pub fn build_identity_resolver(config: &AuthConfig) -> GatewayResult<Arc<dyn IdentityResolver>> {
    Ok(match config.identity_mode {
        IdentityMode::LocalClaims => Arc::new(ClaimsIdentityResolver),
        IdentityMode::RemoteLookup => Arc::new(RemoteIdentityResolver::new(
            config.resolver.base_url.clone(),
            config.resolver.timeout,
        )?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn claims(sub: &str, role: &str) -> Claims {
        Claims {
            sub: sub.to_string(),
            role: Some(role.to_string()),
            exp: Some(i64::MAX),
            iat: None,
        }
    }

    #[tokio::test]
    async fn test_local_claims_trusts_token() {
        let identity = ClaimsIdentityResolver
            .resolve(&claims("42", "master"))
            .await
            .unwrap();
        assert_eq!(identity, Identity::new("42", UserRole::Master));
    }

    #[tokio::test]
    async fn test_unrecognised_role_name_is_kept() {
        let identity = ClaimsIdentityResolver
            .resolve(&claims("42", " seller "))
            .await
            .unwrap();
        assert_eq!(identity.role, UserRole::Unknown);
        assert_eq!(identity.role_name, "SELLER");
    }

    #[test]
    fn test_missing_role_name_is_unknown() {
        let identity = Identity::from_role_name("42", None);
        assert_eq!(identity, Identity::new("42", UserRole::Unknown));
        assert_eq!(Identity::from_role_name("42", Some("  ")).role_name, "UNKNOWN");
    }

    #[tokio::test]
    async fn test_remote_lookup_uses_profile_role() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/users/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "userId": "42",
                "role": "MANAGER"
            })))
            .mount(&server)
            .await;

        let resolver = RemoteIdentityResolver::new(server.uri(), Duration::from_secs(2)).unwrap();
        let identity = resolver.resolve(&claims("42", "MASTER")).await.unwrap();
        assert_eq!(identity, Identity::new("42", UserRole::Manager));
    }

    #[tokio::test]
    async fn test_remote_lookup_error_status_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/users/42"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let resolver = RemoteIdentityResolver::new(server.uri(), Duration::from_secs(2)).unwrap();
        let err = resolver.resolve(&claims("42", "USER")).await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_remote_lookup_timeout_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/users/42"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "userId": "42", "role": "USER" }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let resolver = RemoteIdentityResolver::new(server.uri(), Duration::from_millis(50)).unwrap();
        let err = resolver.resolve(&claims("42", "USER")).await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_remote_lookup_unreachable_is_unavailable() {
        let resolver =
            RemoteIdentityResolver::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = resolver.resolve(&claims("42", "USER")).await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_remote_lookup_subject_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/internal/users/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "userId": "43",
                "role": "MASTER"
            })))
            .mount(&server)
            .await;

        let resolver = RemoteIdentityResolver::new(server.uri(), Duration::from_secs(2)).unwrap();
        let err = resolver.resolve(&claims("42", "USER")).await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamUnavailable { .. }));
    }

    #[test]
    fn test_identity_mode_parsing() {
        assert_eq!("remote-lookup".parse::<IdentityMode>().unwrap(), IdentityMode::RemoteLookup);
        assert_eq!("LOCAL_CLAIMS".parse::<IdentityMode>().unwrap(), IdentityMode::LocalClaims);
        assert!("ldap".parse::<IdentityMode>().is_err());
    }

    #[test]
    fn test_profile_url_encodes_user_id() {
        let resolver =
            RemoteIdentityResolver::new("http://user-service/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            resolver.profile_url("a b/c"),
            "http://user-service/internal/users/a%20b%2Fc"
        );
    }
}
