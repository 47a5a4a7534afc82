// Upstream forwarding for admitted requests
pub mod forward;

// Application assembly and serving
pub mod server;

pub use forward::UpstreamForwarder;
pub use server::{build_app, GatewayServer};
