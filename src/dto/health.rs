use serde::Serialize;
use utoipa::ToSchema;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Whether the document store answered the last health check.
    pub store_reachable: bool,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            store_reachable: true,
        }
    }

    /// Create a health response indicating the system is in degraded mode.
    pub fn degraded(store_reachable: bool) -> Self {
        Self {
            status: "degraded".to_string(),
            store_reachable,
        }
    }
}
