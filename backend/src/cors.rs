//! Origin policy and the CORS security middleware.
//!
//! Every request to the MCP endpoint passes through [`security_middleware`]
//! before any session handling happens. Requests without an `Origin` header
//! are treated as same-origin or non-browser clients and are never rejected
//! for lacking one.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::ConfigError;

/// Origin prefixes accepted in development mode (loopback with any port).
const LOOPBACK_PREFIXES: [&str; 6] = [
    "http://localhost:",
    "https://localhost:",
    "http://127.0.0.1:",
    "https://127.0.0.1:",
    "http://[::1]:",
    "https://[::1]:",
];

/// Value of `Access-Control-Allow-Methods`.
pub const ALLOW_METHODS: &str = "GET, POST, OPTIONS";

/// Value of `Access-Control-Allow-Headers`.
pub const ALLOW_HEADERS: &str = "Content-Type, Mcp-Session-Id";

/// Value of `Access-Control-Max-Age` in seconds.
pub const MAX_AGE: &str = "3600";

/// Body of the 403 response for a rejected origin.
pub const REJECTION_BODY: &str = "Origin not allowed";

/// How strictly the `Origin` header is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorsMode {
    /// Only exact allow-list matches.
    #[default]
    Strict,
    /// Allow-list matches plus any loopback origin.
    Development,
    /// No origin enforcement.
    Disabled,
}

impl CorsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorsMode::Strict => "strict",
            CorsMode::Development => "development",
            CorsMode::Disabled => "disabled",
        }
    }
}

impl fmt::Display for CorsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorsMode {
    type Err = ConfigError;

    /// Parse a mode name. An empty value resolves to [`CorsMode::Strict`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "strict" => Ok(CorsMode::Strict),
            "development" => Ok(CorsMode::Development),
            "disabled" => Ok(CorsMode::Disabled),
            _ => Err(ConfigError::InvalidCorsMode(s.to_string())),
        }
    }
}

/// Decide whether `origin` is permitted under `mode` and `allowed_origins`.
pub fn is_allowed(origin: &str, allowed_origins: &[String], mode: CorsMode) -> bool {
    let listed = || allowed_origins.iter().any(|allowed| allowed == origin);

    match mode {
        CorsMode::Disabled => true,
        CorsMode::Strict => listed(),
        CorsMode::Development => {
            listed()
                || LOOPBACK_PREFIXES
                    .iter()
                    .any(|prefix| origin.starts_with(prefix))
        }
    }
}

/// Immutable origin policy, resolved once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginPolicy {
    mode: CorsMode,
    allowed_origins: Vec<String>,
}

impl OriginPolicy {
    /// Create a policy. Entries are trimmed and empty entries dropped.
    pub fn new<I, S>(mode: CorsMode, allowed_origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed_origins = allowed_origins
            .into_iter()
            .map(|origin| origin.as_ref().trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Self {
            mode,
            allowed_origins,
        }
    }

    /// Build a policy from a comma-separated allow-list.
    pub fn from_list(mode: CorsMode, raw: &str) -> Self {
        Self::new(mode, raw.split(','))
    }

    pub fn mode(&self) -> CorsMode {
        self.mode
    }

    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed_origins
    }

    /// Check an origin against this policy.
    pub fn is_allowed(&self, origin: &str) -> bool {
        is_allowed(origin, &self.allowed_origins, self.mode)
    }

    /// Log the resolved policy at startup.
    pub fn log_summary(&self) {
        match self.mode {
            CorsMode::Disabled => {
                warn!("CORS mode is disabled - origin checks are off for the MCP endpoint!");
            }
            CorsMode::Strict if self.allowed_origins.is_empty() => {
                warn!(
                    "CORS mode is strict with an empty MCP_ALLOWED_ORIGINS - all cross-origin requests will be rejected"
                );
            }
            mode => {
                info!(
                    mode = %mode,
                    allowed_origins = ?self.allowed_origins,
                    "CORS origin policy configured"
                );
            }
        }
    }
}

/// Set the CORS response headers for an allowed origin.
fn apply_cors_headers(headers: &mut HeaderMap, origin: HeaderValue) {
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static(MAX_AGE),
    );
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
}

/// Security middleware for the MCP endpoint.
///
/// Rejects disallowed origins with `403`, echoes allowed origins in the CORS
/// headers and answers `OPTIONS` preflight directly without invoking the
/// wrapped handler.
pub async fn security_middleware(
    State(policy): State<Arc<OriginPolicy>>,
    request: Request,
    next: Next,
) -> Response {
    let allowed_origin = match request.headers().get(header::ORIGIN) {
        Some(value) => match value.to_str() {
            Ok(origin) if policy.is_allowed(origin) => Some(value.clone()),
            Ok(origin) => {
                warn!(
                    origin = %origin,
                    mode = %policy.mode(),
                    "Rejecting MCP request from disallowed origin"
                );
                return (StatusCode::FORBIDDEN, REJECTION_BODY).into_response();
            }
            Err(_) => {
                debug!("Ignoring unreadable Origin header");
                None
            }
        },
        None => None,
    };

    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(request).await
    };

    if let Some(origin) = allowed_origin {
        apply_cors_headers(response.headers_mut(), origin);
    }

    response
}
