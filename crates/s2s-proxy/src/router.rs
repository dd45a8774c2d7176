//! Endpoint router.
//!
//! Maps request paths to a typed [`HandlerSpec`]. Routes are registered at
//! startup from each role's endpoint list and the table is read-only
//! afterwards. The first matching route wins.

use regex::Regex;
use s2s_protocol_saml::{EntityRole, SamlBinding};
use thiserror::Error;

/// Route registration errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The pattern is not a valid regular expression.
    #[error("invalid route pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// Offending pattern.
        pattern: String,
        /// Regex compiler message.
        reason: String,
    },

    /// The pattern's capture groups disagree with the declared arity.
    #[error("route pattern '{pattern}' has {actual} capture groups, {declared} declared")]
    ArityMismatch {
        /// Offending pattern.
        pattern: String,
        /// Declared arity.
        declared: usize,
        /// Capture groups in the pattern.
        actual: usize,
    },
}

/// Operation a route invokes on a role instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// IdP: receive an authentication request.
    SingleSignOn,
    /// SP: receive an authentication response.
    AssertionConsumer,
    /// SP: receive the discovery service's choice.
    DiscoveryResponse,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SingleSignOn => f.write_str("single_sign_on"),
            Self::AssertionConsumer => f.write_str("assertion_consumer"),
            Self::DiscoveryResponse => f.write_str("discovery_response"),
        }
    }
}

/// What a matched route dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerSpec {
    /// Role instance to build.
    pub role: EntityRole,
    /// Operation to run on it.
    pub operation: Operation,
    /// Binding the message arrives with, if any.
    pub binding: Option<SamlBinding>,
}

/// Arguments extracted from the matched path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteArgs {
    /// Capture groups, in order. Unmatched optional groups are empty.
    Captures(Vec<String>),
    /// The whole matched path, for routes without captures.
    Path(String),
}

/// Result of resolving a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A route matched.
    Matched(HandlerSpec, RouteArgs),
    /// The path tries to traverse upwards.
    Unauthorized,
    /// No route matched.
    NotFound,
}

#[derive(Debug)]
struct Route {
    regex: Regex,
    arity: usize,
    spec: HandlerSpec,
}

/// Ordered route table.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a route. `pattern` is matched against the whole path
    /// without its leading `/`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPattern` or `ArityMismatch`.
    pub fn register(&mut self, pattern: &str, arity: usize, spec: HandlerSpec) -> Result<(), RouterError> {
        let anchored = format!("^(?:{pattern})$");
        let regex = Regex::new(&anchored).map_err(|e| RouterError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        let actual = regex.captures_len() - 1;
        if actual != arity {
            return Err(RouterError::ArityMismatch {
                pattern: pattern.to_string(),
                declared: arity,
                actual,
            });
        }

        tracing::debug!(
            pattern,
            role = %spec.role,
            operation = %spec.operation,
            "route registered"
        );
        self.routes.push(Route { regex, arity, spec });
        Ok(())
    }

    /// Resolves `path`. Any `..` yields `Unauthorized` before a pattern is
    /// consulted.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Resolution {
        if path.contains("..") {
            return Resolution::Unauthorized;
        }
        let path = path.strip_prefix('/').unwrap_or(path);

        for route in &self.routes {
            let Some(captures) = route.regex.captures(path) else {
                continue;
            };
            let args = if route.arity == 0 {
                RouteArgs::Path(path.to_string())
            } else {
                RouteArgs::Captures(
                    captures
                        .iter()
                        .skip(1)
                        .map(|m| m.map_or_else(String::new, |m| m.as_str().to_string()))
                        .collect(),
                )
            };
            return Resolution::Matched(route.spec, args);
        }
        Resolution::NotFound
    }

    /// Number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no route is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Route pattern matching exactly the literal `path`.
#[must_use]
pub fn literal_pattern(path: &str) -> String {
    regex::escape(path.trim_start_matches('/'))
}
