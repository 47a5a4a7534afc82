//! # Route Table
//!
//! Maps admitted request paths to an upstream base URL. Routes are evaluated
//! in configuration order and the first matching pattern wins. This is the
//! minimal routing collaborator used by the bundled binary; admission does not
//! depend on it.

use url::Url;

use crate::core::config::RouteDefinition;
use crate::core::error::{GatewayError, GatewayResult};
use crate::routing::path_pattern::PathPattern;

/// A compiled route
#[derive(Debug, Clone)]
pub struct Route {
    pub pattern: PathPattern,
    pub upstream: Url,
}

/// Ordered, immutable route table
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Compile route definitions
    pub fn from_definitions(definitions: &[RouteDefinition]) -> GatewayResult<Self> {
        let routes = definitions
            .iter()
            .map(|definition| {
                let pattern = PathPattern::parse(&definition.path)?;
                let upstream = Url::parse(&definition.upstream).map_err(|e| {
                    GatewayError::config(format!(
                        "route '{}': invalid upstream '{}': {}",
                        definition.path, definition.upstream, e
                    ))
                })?;
                if upstream.cannot_be_a_base() {
                    return Err(GatewayError::config(format!(
                        "route '{}': upstream '{}' is not an absolute base URL",
                        definition.path, definition.upstream
                    )));
                }
                Ok(Route { pattern, upstream })
            })
            .collect::<GatewayResult<Vec<_>>>()?;

        Ok(Self { routes })
    }

    /// Find the first route matching `path`
    pub fn resolve(&self, path: &str) -> GatewayResult<&Route> {
        self.routes
            .iter()
            .find(|route| route.pattern.matches(path))
            .ok_or_else(|| GatewayError::RouteNotFound {
                path: path.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
