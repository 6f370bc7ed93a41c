// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

/// Health check response with individual component status.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Overall health status ("ok" or "degraded").
    pub status: String,
    /// Individual health checks and their results.
    pub checks: HealthChecks,
}

/// Individual health check results.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthChecks {
    /// Whether the service process is running.
    pub service: String,
    /// Entitlement database availability.
    pub database: String,
    /// StoreKit signing key availability.
    /// Only present in production mode (APPLE_STOREKIT_JWKS_URL configured).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storekit_keys: Option<String>,
}

/// Simple health check response for liveness probes.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

/// Check that the entitlement database answers a read transaction.
fn check_database(state: &AppState) -> String {
    match state.db.ping() {
        Ok(()) => "ok".to_string(),
        Err(_) => "unavailable".to_string(),
    }
}

/// Check if the StoreKit key set is available (production verify mode).
async fn check_storekit_keys(state: &AppState) -> Option<String> {
    if let Some(jwks) = state.receipts.jwks() {
        // Check if we have cached keys
        if jwks.is_cached().await {
            Some("ok".to_string())
        } else {
            // Try to fetch keys
            match jwks.refresh().await {
                Ok(_) => Some("ok".to_string()),
                Err(_) => Some("unavailable".to_string()),
            }
        }
    } else {
        // Development mode - signatures are not checked
        None
    }
}

/// Health check endpoint handler.
///
/// Returns 200 if all checks pass, 503 if any check fails.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = ReadyResponse),
        (status = 503, description = "Service is unhealthy", body = ReadyResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let database = check_database(&state);
    let storekit_keys = check_storekit_keys(&state).await;

    let database_ok = database == "ok";
    let keys_ok = storekit_keys.as_ref().map(|s| s == "ok").unwrap_or(true);
    let all_ok = database_ok && keys_ok;

    let response = ReadyResponse {
        status: if all_ok { "ok" } else { "degraded" }.to_string(),
        checks: HealthChecks {
            service: "ok".to_string(),
            database,
            storekit_keys,
        },
    };

    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}

/// Liveness probe handler.
///
/// Always returns 200 if the process is running.
/// Does not check dependencies - use readiness for that.
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness probe handler.
///
/// Returns 200 only if all dependencies are available.
/// Use for Kubernetes readiness probes.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse),
        (status = 503, description = "Service is not ready", body = ReadyResponse)
    )
)]
pub async fn readiness(state: State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    health(state).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_response_omits_storekit_check_in_dev_mode() {
        let response = ReadyResponse {
            status: "ok".to_string(),
            checks: HealthChecks {
                service: "ok".to_string(),
                database: "ok".to_string(),
                storekit_keys: None,
            },
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("database"));
        assert!(!json.contains("storekit_keys"));
    }

    #[test]
    fn ready_response_reports_storekit_check_in_production_mode() {
        let response = ReadyResponse {
            status: "degraded".to_string(),
            checks: HealthChecks {
                service: "ok".to_string(),
                database: "ok".to_string(),
                storekit_keys: Some("unavailable".to_string()),
            },
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""storekit_keys":"unavailable""#));
    }
}
