//! # Error Translator
//!
//! Converts any failure surfaced during admission (or forwarding) into a
//! stable JSON error envelope and writes it to the exchange response. This is
//! the only component that writes error responses; pipeline stages return
//! [`GatewayError`]s and never touch the response themselves.
//!
//! ## Commit guard
//!
//! An [`ExchangeResponse`] is committed at most once. If a failure arrives for a
//! response that is already committed, the translator leaves it untouched and
//! hands the original failure back wrapped in
//! [`GatewayError::ResponseCommitted`] for the transport layer to deal with.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use tracing::{error, warn};

use crate::core::error::{FailureKind, GatewayError, GatewayResult};
use crate::internal_error;

/// Wire-level shape of a denial
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    /// Numeric HTTP status
    #[serde(serialize_with = "serialize_status")]
    pub status: StatusCode,

    /// Client-facing message
    pub message: String,

    /// Originating request method
    pub method: String,

    /// Originating request path
    pub request_path: String,

    /// When the envelope was built
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl ErrorEnvelope {
    /// Serialize to JSON bytes
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} {}][{}] {}",
            self.method,
            self.request_path,
            self.status.as_u16(),
            self.message
        )
    }
}

fn serialize_status<S: Serializer>(status: &StatusCode, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u16(status.as_u16())
}

fn serialize_timestamp<S: Serializer>(
    timestamp: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Response under construction for one exchange
#[derive(Debug)]
pub struct ExchangeResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    committed: bool,
}

impl Default for ExchangeResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl ExchangeResponse {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            committed: false,
        }
    }

    /// Whether status, headers and body are final
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Mark the response as committed without writing to it
    pub fn mark_committed(&mut self) {
        self.committed = true;
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

impl IntoResponse for ExchangeResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Maps failures to envelopes and commits them
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorTranslator;

impl ErrorTranslator {
    pub fn new() -> Self {
        Self
    }

    /// Build the envelope for a failure.
    ///
    /// Pure apart from the timestamp: the same failure always yields the same
    /// status and message. Unclassified failures get a generic message.
    pub fn translate(&self, error: &GatewayError, method: &Method, path: &str) -> ErrorEnvelope {
        let kind = error.kind();
        ErrorEnvelope {
            status: kind.status_code(),
            message: kind.message().to_string(),
            method: method.as_str().to_string(),
            request_path: path.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Write an envelope into an uncommitted response.
    ///
    /// A serialization failure degrades to an empty body with the envelope's
    /// status; the response is committed either way.
    pub fn commit(&self, response: &mut ExchangeResponse, envelope: &ErrorEnvelope) -> GatewayResult<()> {
        if response.is_committed() {
            return Err(internal_error!(
                "cannot write envelope {} to a committed response",
                envelope
            ));
        }

        response.status = envelope.status;
        match envelope.to_json() {
            Ok(json) => {
                response.headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                response.body = Bytes::from(json);
            }
            Err(e) => {
                error!(error = %e, "Failed to serialize error envelope, closing without body");
                response.headers.remove(header::CONTENT_TYPE);
                response.body = Bytes::new();
            }
        }
        response.committed = true;
        Ok(())
    }

    /// Translate and commit a failure, honouring the commit guard
    pub fn handle(
        &self,
        response: &mut ExchangeResponse,
        method: &Method,
        path: &str,
        failure: GatewayError,
    ) -> GatewayResult<()> {
        if response.is_committed() {
            error!(
                method = %method,
                path = %path,
                error = %failure,
                "Failure after response commit, leaving response untouched"
            );
            return Err(GatewayError::ResponseCommitted {
                source: Box::new(failure),
            });
        }

        let envelope = self.translate(&failure, method, path);
        match failure.kind() {
            FailureKind::Unclassified => error!(
                method = %method,
                path = %path,
                error = %failure,
                error_type = failure.error_type(),
                "{}",
                envelope
            ),
            kind => warn!(
                method = %method,
                path = %path,
                kind = kind.as_str(),
                reason = %failure,
                "{}",
                envelope
            ),
        }

        self.commit(response, &envelope)
    }

    /// Build a complete error response for a fresh exchange
    pub fn respond(&self, method: &Method, path: &str, failure: GatewayError) -> Response {
        let mut response = ExchangeResponse::new();
        if let Err(e) = self.handle(&mut response, method, path, failure) {
            error!(error = %e, "Error response could not be written");
        }
        response.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{TokenRejection, UNCLASSIFIED_MESSAGE};
    use serde_json::Value;

    fn body_json(response: &ExchangeResponse) -> Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    #[test]
    fn test_status_mapping() {
        let translator = ErrorTranslator::new();
        let cases = [
            (GatewayError::invalid_token(TokenRejection::Expired), 401),
            (GatewayError::forbidden("USER"), 403),
            (GatewayError::upstream_unavailable("timeout"), 503),
            (GatewayError::internal("boom"), 500),
        ];
        for (error, status) in cases {
            let envelope = translator.translate(&error, &Method::GET, "/orders/5");
            assert_eq!(envelope.status.as_u16(), status);
        }
    }

    #[test]
    fn test_unclassified_message_does_not_leak() {
        let translator = ErrorTranslator::new();
        let envelope = translator.translate(
            &GatewayError::internal("db password is hunter2"),
            &Method::POST,
            "/orders",
        );
        assert_eq!(envelope.message, UNCLASSIFIED_MESSAGE);
        assert!(!envelope.to_string().contains("hunter2"));
    }

    #[test]
    fn test_translation_is_stable_except_timestamp() {
        let translator = ErrorTranslator::new();
        let error = GatewayError::forbidden("USER");
        let mut first = translator.translate(&error, &Method::GET, "/admin/reports");
        let second = translator.translate(&error, &Method::GET, "/admin/reports");
        first.timestamp = second.timestamp;
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    }

    #[test]
    fn test_commit_writes_json_envelope() {
        let translator = ErrorTranslator::new();
        let mut response = ExchangeResponse::new();
        translator
            .handle(
                &mut response,
                &Method::GET,
                "/orders/5",
                GatewayError::invalid_token(TokenRejection::Expired),
            )
            .unwrap();

        assert!(response.is_committed());
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let json = body_json(&response);
        assert_eq!(json["status"], 401);
        assert_eq!(json["method"], "GET");
        assert_eq!(json["requestPath"], "/orders/5");
        assert_eq!(json["message"], "Invalid access token.");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_committed_response_is_not_overwritten() {
        let translator = ErrorTranslator::new();
        let mut response = ExchangeResponse::new();
        translator
            .handle(&mut response, &Method::GET, "/a", GatewayError::forbidden("USER"))
            .unwrap();
        let original_body = response.body().clone();

        let err = translator
            .handle(
                &mut response,
                &Method::GET,
                "/a",
                GatewayError::upstream_unavailable("late"),
            )
            .unwrap_err();

        match err {
            GatewayError::ResponseCommitted { source } => {
                assert!(matches!(*source, GatewayError::UpstreamUnavailable { .. }))
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.body(), &original_body);
    }

    #[test]
    fn test_commit_rejects_committed_response() {
        let translator = ErrorTranslator::new();
        let mut response = ExchangeResponse::new();
        response.mark_committed();
        let envelope = translator.translate(&GatewayError::forbidden("USER"), &Method::GET, "/a");
        assert!(translator.commit(&mut response, &envelope).is_err());
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.body().is_empty());
    }

    #[test]
    fn test_display_format() {
        let translator = ErrorTranslator::new();
        let envelope = translator.translate(&GatewayError::forbidden("USER"), &Method::DELETE, "/admin/x");
        assert_eq!(
            envelope.to_string(),
            "[DELETE /admin/x][403] Insufficient permission for the request."
        );
    }

    #[test]
    fn test_respond_builds_axum_response() {
        let response = ErrorTranslator::new().respond(
            &Method::GET,
            "/orders/5",
            GatewayError::upstream_unavailable("down"),
        );
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
