//! Session id resolution at the request boundary.

use axum::extract::OptionalFromRequestParts;
use axum::http::{request::Parts, HeaderMap};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use std::convert::Infallible;
use terraform_mcp_types::MCP_SESSION_ID_HEADER;

/// Length of a generated session id.
pub const SESSION_ID_LEN: usize = 32;

/// Generate a session id: 32 random bytes, URL-safe base64, truncated.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut id = URL_SAFE_NO_PAD.encode(bytes);
    id.truncate(SESSION_ID_LEN);
    id
}

/// The session id attached to a request.
///
/// Inserted into request extensions by the session layer so the endpoint
/// can tell a client-supplied id from one the server just issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpSessionId {
    id: String,
    generated: bool,
}

impl McpSessionId {
    /// Read a client-supplied id from the `mcp-session-id` header.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| Self {
                id: id.to_string(),
                generated: false,
            })
    }

    /// Issue a fresh server-generated id.
    pub fn generate() -> Self {
        Self {
            id: generate_session_id(),
            generated: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the server issued this id on the current request.
    pub fn is_generated(&self) -> bool {
        self.generated
    }
}

impl<S> OptionalFromRequestParts<S> for McpSessionId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<McpSessionId>()
            .cloned()
            .or_else(|| Self::from_headers(&parts.headers)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_generated_ids_are_url_safe_and_distinct() {
        let a = generate_session_id();
        let b = generate_session_id();

        assert_eq!(a.len(), SESSION_ID_LEN);
        assert_ne!(a, b);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert!(HeaderValue::from_str(&a).is_ok());
    }

    #[test]
    fn test_header_lookup() {
        let mut headers = HeaderMap::new();
        assert!(McpSessionId::from_headers(&headers).is_none());

        headers.insert(MCP_SESSION_ID_HEADER, HeaderValue::from_static("  "));
        assert!(McpSessionId::from_headers(&headers).is_none());

        headers.insert(MCP_SESSION_ID_HEADER, HeaderValue::from_static("abc123"));
        let session = McpSessionId::from_headers(&headers).unwrap();
        assert_eq!(session.id(), "abc123");
        assert!(!session.is_generated());
    }
}
