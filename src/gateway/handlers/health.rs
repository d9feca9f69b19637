//! Health check handler

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use utoipa::ToSchema;

use super::super::state::AppState;
use super::super::types::{ApiResponse, error_codes};

/// Health check response data
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// Build revision
    #[schema(example = "a1b2c3d")]
    pub version: String,
    /// Server timestamp in milliseconds
    #[schema(example = 1703494800000_i64)]
    pub timestamp_ms: i64,
    /// "postgres" or "memory"
    pub storage: String,
}

/// Health check endpoint
///
/// - Healthy: 200 OK + {code: 0, data: {...}}
/// - Database unreachable: 503 + {code: 5001, msg: "unavailable"}
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse, content_type = "application/json"),
        (status = 503, description = "Service unavailable")
    ),
    tag = "System"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let storage = match &state.db {
        Some(db) => {
            if let Err(e) = db.health_check().await {
                tracing::error!(error = %e, "PostgreSQL ping failed");
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(ApiResponse {
                        code: error_codes::SERVICE_UNAVAILABLE,
                        msg: "unavailable".to_string(),
                        data: None,
                    }),
                );
            }
            "postgres"
        }
        None => "memory",
    };

    (
        StatusCode::OK,
        Json(ApiResponse::success(HealthResponse {
            version: env!("GIT_HASH").to_string(),
            timestamp_ms: state.ledger.clock().now().timestamp_millis(),
            storage: storage.to_string(),
        })),
    )
}
