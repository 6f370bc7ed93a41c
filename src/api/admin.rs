// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Admin-only API endpoints for system management.
//!
//! These endpoints require the Admin role and provide:
//! - Product catalog management
//! - System statistics
//! - Audit log queries

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    audit_log,
    auth::AdminOnly,
    error::ApiError,
    state::AppState,
    storage::{AuditEvent, AuditEventType, ProductKind, StoreStats, StoredProduct},
};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response for the product catalog listing.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProductListResponse {
    /// Registered products.
    pub products: Vec<StoredProduct>,
    /// Total count.
    pub total: usize,
}

/// Request body for registering or updating a product.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpsertProductRequest {
    /// Store product identifier.
    pub product_id: String,
    /// Product kind: `consumable`, `non_consumable`, or `subscription`.
    pub kind: ProductKind,
    /// Credit delta granted per purchase (consumables only).
    #[serde(default)]
    pub credits: Option<i64>,
    /// Human-readable name.
    #[serde(default)]
    pub display_name: Option<String>,
}

/// System statistics response.
#[derive(Debug, Serialize, ToSchema)]
pub struct SystemStatsResponse {
    /// Row counts per collection.
    pub store: StoreStats,
    /// Server uptime in seconds.
    pub uptime_seconds: u64,
    /// Current timestamp.
    pub timestamp: String,
}

/// Query parameters for audit log queries.
#[derive(Debug, Deserialize, IntoParams)]
pub struct AuditQueryParams {
    /// Range start (RFC 3339); defaults to 24 hours ago.
    pub from: Option<DateTime<Utc>>,
    /// Range end (RFC 3339); defaults to now.
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of results (default 100, max 1000).
    pub limit: Option<usize>,
}

/// Response for audit log queries, newest first.
#[derive(Debug, Serialize, ToSchema)]
pub struct AuditLogResponse {
    /// Audit events in the requested range.
    pub events: Vec<AuditEvent>,
    /// Number of events returned.
    pub count: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// List the product catalog.
#[utoipa::path(
    get,
    path = "/v1/admin/products",
    tag = "Admin",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Registered products", body = ProductListResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn list_products(
    AdminOnly(user): AdminOnly,
    State(state): State<AppState>,
) -> Result<Json<ProductListResponse>, ApiError> {
    let products = state.db.list_products()?;
    let total = products.len();

    audit_log!(&state.db, AuditEventType::AdminAccess, &user);

    Ok(Json(ProductListResponse { products, total }))
}

/// Register or update a product.
///
/// Classification of future receipts for this `product_id` follows the
/// catalog entry instead of structural inference.
#[utoipa::path(
    put,
    path = "/v1/admin/products",
    tag = "Admin",
    security(("bearer_auth" = [])),
    request_body = UpsertProductRequest,
    responses(
        (status = 200, description = "Product stored", body = StoredProduct),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn upsert_product(
    AdminOnly(user): AdminOnly,
    State(state): State<AppState>,
    Json(request): Json<UpsertProductRequest>,
) -> Result<Json<StoredProduct>, ApiError> {
    let product = StoredProduct {
        product_id: request.product_id,
        kind: request.kind,
        credits: request.credits,
        display_name: request.display_name,
        updated_at: Utc::now(),
    };
    state.db.upsert_product(&product)?;

    let event = AuditEvent::new(AuditEventType::ProductUpserted)
        .with_user(&user.user_id)
        .with_resource("product", &product.product_id)
        .with_details(serde_json::json!({ "kind": product.kind }));
    let _ = state.db.append_audit(&event);

    Ok(Json(product))
}

/// Get system statistics.
///
/// Returns row counts for every collection plus process uptime. Admin only.
#[utoipa::path(
    get,
    path = "/v1/admin/stats",
    tag = "Admin",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "System statistics", body = SystemStatsResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn get_system_stats(
    AdminOnly(user): AdminOnly,
    State(state): State<AppState>,
) -> Result<Json<SystemStatsResponse>, ApiError> {
    let store = state.db.stats()?;

    audit_log!(&state.db, AuditEventType::AdminAccess, &user);

    Ok(Json(SystemStatsResponse {
        store,
        uptime_seconds: state.uptime_secs(),
        timestamp: Utc::now().to_rfc3339(),
    }))
}

/// Query audit logs.
///
/// Returns events in the requested time range, newest first. Admin only.
#[utoipa::path(
    get,
    path = "/v1/admin/audit/events",
    tag = "Admin",
    params(AuditQueryParams),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Audit events", body = AuditLogResponse),
        (status = 400, description = "Invalid query parameters"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn query_audit_logs(
    AdminOnly(admin_user): AdminOnly,
    Query(params): Query<AuditQueryParams>,
    State(state): State<AppState>,
) -> Result<Json<AuditLogResponse>, ApiError> {
    let to = params.to.unwrap_or_else(Utc::now);
    let from = params.from.unwrap_or_else(|| to - Duration::hours(24));
    if from > to {
        return Err(ApiError::bad_request("`from` must not be later than `to`"));
    }

    let limit = params.limit.unwrap_or(100).min(1000);
    let events = state.db.list_audit_range(from, to, limit)?;
    let count = events.len();

    audit_log!(&state.db, AuditEventType::AdminAccess, &admin_user);

    Ok(Json(AuditLogResponse { events, count }))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_stats_response_serializes() {
        let stats = SystemStatsResponse {
            store: StoreStats {
                transactions: 10,
                subscriptions: 3,
                grants: 2,
                ledger_entries: 5,
                notifications: 7,
                identities: 4,
                products: 6,
            },
            uptime_seconds: 3600,
            timestamp: "2026-01-28T12:00:00Z".to_string(),
        };

        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains(r#""transactions":10"#));
        assert!(json.contains(r#""uptime_seconds":3600"#));
    }

    #[test]
    fn upsert_product_request_deserializes() {
        let request: UpsertProductRequest = serde_json::from_str(
            r#"{"product_id": "com.app.credits10", "kind": "consumable", "credits": 10}"#,
        )
        .unwrap();

        assert_eq!(request.product_id, "com.app.credits10");
        assert_eq!(request.kind, ProductKind::Consumable);
        assert_eq!(request.credits, Some(10));
        assert!(request.display_name.is_none());
    }

    #[test]
    fn audit_query_params_deserialize_with_rfc3339_range() {
        let params: AuditQueryParams = serde_json::from_str(
            r#"{
                "from": "2026-01-01T00:00:00Z",
                "to": "2026-01-31T00:00:00Z",
                "limit": 50
            }"#,
        )
        .unwrap();

        assert!(params.from.is_some());
        assert!(params.to.is_some());
        assert_eq!(params.limit, Some(50));
    }

    #[test]
    fn audit_query_params_tolerate_empty_query() {
        let params: AuditQueryParams = serde_json::from_str("{}").unwrap();
        assert!(params.from.is_none());
        assert!(params.to.is_none());
        assert!(params.limit.is_none());
    }
}
