//! Liveness check.

use axum::Json;
use terraform_mcp_types::HealthResponse;

/// GET /health - Static liveness payload, no downstream dependency.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::streamable_http())
}
