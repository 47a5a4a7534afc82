//! # Admission Gateway Library - Core Library Crate
//!
//! The request-admission layer of an API gateway. Every inbound request passes
//! through a fixed pipeline before it may reach a backend:
//!
//! 1. the **Path Matcher** decides whether the path is exempt or privileged,
//! 2. the **Token Verifier** checks the bearer credential (HMAC-signed JWT),
//! 3. the **Identity Resolver** turns verified claims into an identity, either
//!    straight from the claims or through the user service,
//! 4. privileged paths are checked against the designated top-tier role,
//! 5. the verified identity is propagated as `X-User-Id` / `X-User-Role`.
//!
//! Any failure short-circuits to the **Error Translator**, which writes a JSON
//! error envelope; the request is never forwarded.
//!
//! ## Example
//!
//! ```no_run
//! use admission_gateway::{GatewayConfig, GatewayServer};
//!
//! # async fn run() -> admission_gateway::GatewayResult<()> {
//! let config = GatewayConfig::load_or_default("config/gateway.yaml").await?;
//! let server = GatewayServer::new(&config)?;
//! server.serve(async { let _ = tokio::signal::ctrl_c().await; }).await
//! # }
//! ```

/// Error types and configuration
pub mod core;

/// Token verification, roles and identity resolution
pub mod auth;

/// Path patterns, exempt/privileged classification and the route table
pub mod routing;

/// The admission pipeline and the error translator
pub mod middleware;

/// Upstream forwarding and server assembly
pub mod gateway;

/// Structured logging and admission metrics
pub mod observability;

pub use core::error::{FailureKind, GatewayError, GatewayResult};

pub use core::config::GatewayConfig;

pub use middleware::admission::{AdmissionOutcome, AdmissionPipeline};
pub use middleware::error_handling::{ErrorEnvelope, ErrorTranslator};

pub use gateway::server::GatewayServer;
