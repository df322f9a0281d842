//! Liveness check payload.

use serde::{Deserialize, Serialize};

/// Body returned by `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub transport: String,
}

impl HealthResponse {
    /// The static payload for the streamable-HTTP transport.
    pub fn streamable_http() -> Self {
        Self {
            status: "ok".to_string(),
            service: crate::SERVICE_NAME.to_string(),
            transport: "streamable-http".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_payload_shape() {
        let value = serde_json::to_value(HealthResponse::streamable_http()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "status": "ok",
                "service": "terraform-mcp-server",
                "transport": "streamable-http"
            })
        );
    }
}
