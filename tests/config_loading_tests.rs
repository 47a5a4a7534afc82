//! # Configuration Loading Tests
//!
//! Loads the bundled sample configuration and checks validation and
//! environment overrides against it.

use admission_gateway::auth::identity::IdentityMode;
use admission_gateway::auth::role::UserRole;
use admission_gateway::core::config::{GatewayConfig, LogFormat};
use admission_gateway::GatewayServer;
use std::collections::HashMap;
use std::time::Duration;

const SAMPLE: &str = include_str!("../config/gateway.yaml");
const KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";

fn overrides(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[test]
fn test_sample_config_parses() {
    let config = GatewayConfig::from_yaml_str(SAMPLE).unwrap();

    assert_eq!(config.server.http_port, 8080);
    assert_eq!(config.server.request_timeout, Duration::from_secs(30));
    assert_eq!(config.auth.privileged_role, UserRole::Master);
    assert_eq!(config.auth.identity_mode, IdentityMode::LocalClaims);
    assert_eq!(config.auth.resolver.timeout, Duration::from_secs(2));
    assert_eq!(config.routes.len(), 4);
    assert_eq!(config.observability.logging.format, LogFormat::Json);
}

#[test]
fn test_sample_config_needs_signing_key() {
    let config = GatewayConfig::from_yaml_str(SAMPLE).unwrap();
    assert!(config.validate().is_err());
}

#[tokio::test]
async fn test_sample_config_with_env_key_builds_server() {
    let mut config = GatewayConfig::from_yaml_str(SAMPLE).unwrap();
    let env = overrides(&[
        ("GATEWAY_AUTH_SIGNING_KEY", KEY),
        ("GATEWAY_SERVER_HTTP_PORT", "9443"),
        ("GATEWAY_AUTH_IDENTITY_MODE", "remote_lookup"),
        ("GATEWAY_AUTH_RESOLVER_TIMEOUT", "750ms"),
    ]);
    config.apply_overrides(|key| env.get(key).cloned()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.auth.identity_mode, IdentityMode::RemoteLookup);
    assert_eq!(config.auth.resolver.timeout, Duration::from_millis(750));

    let server = GatewayServer::new(&config).unwrap();
    assert_eq!(server.bind_addr().port(), 9443);
}

#[test]
fn test_overlapping_exempt_and_privileged_is_rejected() {
    let mut config = GatewayConfig::from_yaml_str(SAMPLE).unwrap();
    let env = overrides(&[("GATEWAY_AUTH_SIGNING_KEY", KEY)]);
    config.apply_overrides(|key| env.get(key).cloned()).unwrap();
    config.auth.exempt_paths.push("/admin/public/**".to_string());

    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("/admin/public/**"));
}

#[test]
fn test_resolver_timeout_must_be_shorter_than_request_timeout() {
    let mut config = GatewayConfig::from_yaml_str(SAMPLE).unwrap();
    let env = overrides(&[
        ("GATEWAY_AUTH_SIGNING_KEY", KEY),
        ("GATEWAY_SERVER_REQUEST_TIMEOUT", "1s"),
        ("GATEWAY_AUTH_RESOLVER_TIMEOUT", "1s"),
    ]);
    config.apply_overrides(|key| env.get(key).cloned()).unwrap();
    assert!(config.validate().is_err());
}
