//! # Token Verifier
//!
//! Validates a bearer credential against the symmetric signing key and decodes
//! it into [`Claims`]. The key is decoded once at startup and held immutably;
//! verification is a pure function of the credential and the current time.
//!
//! Every rejection is reported as [`GatewayError::InvalidToken`]. The attached
//! [`TokenRejection`] only feeds diagnostics.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::auth::role::UserRole;
use crate::core::error::{GatewayError, GatewayResult, TokenRejection};

/// Minimum HMAC key length accepted for HS256
pub const MIN_KEY_BYTES: usize = 32;

/// HMAC algorithms accepted for the configured key
const ACCEPTED_ALGORITHMS: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Decoded token payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id
    pub sub: String,

    /// Role name as issued; absent roles are treated as unknown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Expiration, seconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Issued-at, seconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

impl Claims {
    /// The role claim parsed into a [`UserRole`]
    pub fn user_role(&self) -> UserRole {
        self.role
            .as_deref()
            .map(UserRole::parse)
            .unwrap_or(UserRole::Unknown)
    }
}

/// Verifies HMAC-signed access tokens
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

impl TokenVerifier {
    /// Build a verifier from raw key bytes
    pub fn from_secret(secret: &[u8]) -> GatewayResult<Self> {
        if secret.len() < MIN_KEY_BYTES {
            return Err(GatewayError::config(format!(
                "signing key must be at least {} bytes, got {}",
                MIN_KEY_BYTES,
                secret.len()
            )));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = ACCEPTED_ALGORITHMS.to_vec();
        validation.set_required_spec_claims(&["exp", "sub"]);
        // Expiry is checked in `check` against the caller-supplied clock.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;

        Ok(Self {
            key: DecodingKey::from_secret(secret),
            validation,
        })
    }

    /// Build a verifier from base64-encoded key material
    pub fn from_base64_secret(encoded: &str) -> GatewayResult<Self> {
        let secret = STANDARD
            .decode(encoded.trim())
            .map_err(|e| GatewayError::config(format!("signing key is not valid base64: {}", e)))?;
        Self::from_secret(&secret)
    }

    /// Verify a credential against the current time
    pub fn verify(&self, credential: &str) -> GatewayResult<Claims> {
        self.verify_at(credential, chrono::Utc::now().timestamp())
    }

    /// Verify a credential against an explicit `now` (seconds since epoch).
    ///
    /// A token is valid only when `exp > now`.
    pub fn verify_at(&self, credential: &str, now: i64) -> GatewayResult<Claims> {
        self.check(credential, now).map_err(|rejection| {
            warn!(rejection = %rejection, "Rejected access token");
            GatewayError::invalid_token(rejection)
        })
    }

    fn check(&self, credential: &str, now: i64) -> Result<Claims, TokenRejection> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(TokenRejection::Empty);
        }

        if decode_header(credential).is_err() {
            return Err(classify_header(credential));
        }

        let data = decode::<Claims>(credential, &self.key, &self.validation)
            .map_err(|e| rejection_for(e.kind()))?;
        let claims = data.claims;

        match claims.exp {
            None => return Err(TokenRejection::MissingClaim),
            Some(exp) if exp <= now => return Err(TokenRejection::Expired),
            Some(_) => {}
        }

        if claims.sub.trim().is_empty() {
            return Err(TokenRejection::MissingClaim);
        }

        Ok(claims)
    }
}

/// Map a `jsonwebtoken` failure onto the rejection taxonomy
fn rejection_for(kind: &ErrorKind) -> TokenRejection {
    match kind {
        ErrorKind::InvalidSignature => TokenRejection::BadSignature,
        ErrorKind::ExpiredSignature => TokenRejection::Expired,
        ErrorKind::MissingRequiredClaim(_) => TokenRejection::MissingClaim,
        ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::MissingAlgorithm => TokenRejection::UnsupportedAlgorithm,
        _ => TokenRejection::Malformed,
    }
}

/// Distinguish an unparseable header from one naming an algorithm we do not know.
fn classify_header(credential: &str) -> TokenRejection {
    let Some(segment) = credential.split('.').next() else {
        return TokenRejection::Malformed;
    };

    let header = URL_SAFE_NO_PAD
        .decode(segment)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok());

    match header {
        Some(value) if value.get("alg").and_then(|alg| alg.as_str()).is_some() => {
            TokenRejection::UnsupportedAlgorithm
        }
        _ => TokenRejection::Malformed,
    }
}
