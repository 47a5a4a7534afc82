//! # Upstream Forwarding
//!
//! The routing collaborator behind the admission layer. An admitted request
//! is matched against the [`RouteTable`] and proxied to the route's upstream
//! with its method, path, query, headers and body intact. Hop-by-hop headers
//! are dropped in both directions.

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, Method};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use crate::core::config::GatewayConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::internal_error;
use crate::middleware::error_handling::ErrorTranslator;
use crate::routing::router::RouteTable;

/// Connection-scoped headers that must not be proxied
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Proxies admitted requests to their upstream
#[derive(Debug, Clone)]
pub struct UpstreamForwarder {
    client: reqwest::Client,
    routes: RouteTable,
    max_body_size: usize,
    translator: ErrorTranslator,
}

impl UpstreamForwarder {
    pub fn new(routes: RouteTable, max_body_size: usize, timeout: Duration) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| internal_error!("Failed to build upstream client: {}", e))?;

        Ok(Self {
            client,
            routes,
            max_body_size,
            translator: ErrorTranslator::new(),
        })
    }

    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        Self::new(
            RouteTable::from_definitions(&config.routes)?,
            config.server.max_request_size,
            config.server.request_timeout,
        )
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Forward one request and relay the upstream response
    #[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
    pub async fn forward(&self, request: Request) -> GatewayResult<Response> {
        let (parts, body) = request.into_parts();
        let route = self.routes.resolve(parts.uri.path())?;
        let target = upstream_url(&route.upstream, parts.uri.path(), parts.uri.query());

        let body = to_bytes(body, self.max_body_size)
            .await
            .map_err(|e| GatewayError::forwarding(format!("Failed to read request body: {}", e)))?;

        let mut headers = parts.headers;
        headers.remove(header::HOST);
        strip_hop_by_hop(&mut headers);

        debug!(stage = "forward", upstream = %target, "Proxying request");
        let upstream = self
            .client
            .request(parts.method, target.clone())
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| GatewayError::forwarding(format!("Upstream {} failed: {}", target, e)))?;

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut response_headers);
        response_headers.remove(header::CONTENT_LENGTH);

        let bytes = upstream.bytes().await?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

/// Join the upstream base path with the request path and carry the query over
pub fn upstream_url(base: &Url, path: &str, query: Option<&str>) -> Url {
    let mut url = base.clone();
    let joined = format!("{}{}", base.path().trim_end_matches('/'), path);
    url.set_path(&joined);
    url.set_query(query);
    url
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Fallback handler proxying every admitted request
pub async fn forward_request(
    State(forwarder): State<Arc<UpstreamForwarder>>,
    request: Request,
) -> Response {
    let method: Method = request.method().clone();
    let path = request.uri().path().to_string();

    match forwarder.forward(request).await {
        Ok(response) => response.into_response(),
        Err(error) => forwarder.translator.respond(&method, &path, error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RouteDefinition;
    use axum::http::StatusCode;
    use wiremock::matchers::{header as header_is, method, path as path_is, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn forwarder(upstream: &str) -> UpstreamForwarder {
        let routes = RouteTable::from_definitions(&[RouteDefinition {
            path: "/orders/**".to_string(),
            upstream: upstream.to_string(),
        }])
        .unwrap();
        UpstreamForwarder::new(routes, 1024 * 1024, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_upstream_url_joins_paths() {
        let base = Url::parse("http://orders:8080/api/").unwrap();
        let url = upstream_url(&base, "/orders/5", Some("expand=items"));
        assert_eq!(url.as_str(), "http://orders:8080/api/orders/5?expand=items");

        let base = Url::parse("http://orders:8080").unwrap();
        let url = upstream_url(&base, "/orders/5", None);
        assert_eq!(url.as_str(), "http://orders:8080/orders/5");
    }

    #[tokio::test]
    async fn test_forward_relays_request_and_response() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_is("/orders/5"))
            .and(query_param("dry", "true"))
            .and(header_is("x-user-id", "42"))
            .respond_with(ResponseTemplate::new(201).set_body_string("created"))
            .expect(1)
            .mount(&upstream)
            .await;

        let request = Request::builder()
            .method(Method::POST)
            .uri("/orders/5?dry=true")
            .header("x-user-id", "42")
            .header(header::CONNECTION, "keep-alive")
            .body(Body::from("{}"))
            .unwrap();

        let response = forwarder(&upstream.uri()).forward(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"created");
    }

    #[tokio::test]
    async fn test_unrouted_path_is_not_found() {
        let err = forwarder("http://127.0.0.1:9")
            .forward(Request::builder().uri("/unknown").body(Body::empty()).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_unclassified() {
        let err = forwarder("http://127.0.0.1:9")
            .forward(Request::builder().uri("/orders/1").body(Body::empty()).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Forwarding { .. }));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
