// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Entitlement status endpoint.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::auth::Auth;
use crate::error::ApiError;
use crate::iap::{EntitlementSnapshot, DEFAULT_HISTORY_LIMIT};
use crate::state::AppState;

/// Query parameters for GET /v1/entitlements.
#[derive(Debug, Deserialize, IntoParams)]
pub struct EntitlementQuery {
    /// Maximum number of recent transactions to include (default 20, max 100).
    pub limit: Option<usize>,
}

/// Get the caller's current entitlement state.
///
/// Returns subscription lineages with their effective status, non-consumable
/// grants, the consumable credit balance, and recent transaction history.
#[utoipa::path(
    get,
    path = "/v1/entitlements",
    tag = "Entitlements",
    params(EntitlementQuery),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current entitlement snapshot", body = EntitlementSnapshot),
        (status = 401, description = "Not authenticated"),
        (status = 503, description = "Store unavailable"),
    )
)]
pub async fn get_entitlements(
    Auth(user): Auth,
    Query(params): Query<EntitlementQuery>,
    State(state): State<AppState>,
) -> Result<Json<EntitlementSnapshot>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let snapshot = state.aggregator().snapshot(&user.user_id, limit)?;
    Ok(Json(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parses_with_and_without_limit() {
        let with: EntitlementQuery = serde_json::from_str(r#"{"limit": 5}"#).unwrap();
        assert_eq!(with.limit, Some(5));

        let without: EntitlementQuery = serde_json::from_str("{}").unwrap();
        assert!(without.limit.is_none());
    }
}
