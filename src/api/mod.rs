// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    appstore::Environment,
    auth::Role,
    iap::{EntitlementSnapshot, TransactionSummary, VerifiedReceipt},
    state::AppState,
    storage::{
        AuditEvent, AuditEventType, EntitlementStatus, ProductKind, StoreStats, StoredGrant,
        StoredProduct, StoredSubscription,
    },
};

pub mod admin;
pub mod entitlements;
pub mod health;
pub mod notifications;
pub mod receipts;
pub mod users;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/receipts/verify", post(receipts::verify_receipt))
        .route("/entitlements", get(entitlements::get_entitlements))
        .route(
            "/notifications/appstore",
            post(notifications::handle_appstore_notification),
        )
        .route("/auth/exchange", post(users::exchange_token))
        .route("/users/me", get(users::get_current_user))
        .route(
            "/admin/products",
            get(admin::list_products).put(admin::upsert_product),
        )
        .route("/admin/stats", get(admin::get_system_stats))
        .route("/admin/audit/events", get(admin::query_audit_logs))
        .with_state(state.clone());

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state);

    Router::new()
        .nest("/v1", v1_routes)
        .merge(health_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(CorsLayer::permissive()),
        )
}

#[derive(OpenApi)]
#[openapi(
    paths(
        receipts::verify_receipt,
        entitlements::get_entitlements,
        notifications::handle_appstore_notification,
        users::exchange_token,
        users::get_current_user,
        admin::list_products,
        admin::upsert_product,
        admin::get_system_stats,
        admin::query_audit_logs,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            receipts::VerifyReceiptRequest,
            VerifiedReceipt,
            EntitlementSnapshot,
            TransactionSummary,
            StoredSubscription,
            StoredGrant,
            StoredProduct,
            StoreStats,
            EntitlementStatus,
            ProductKind,
            Environment,
            Role,
            AuditEvent,
            AuditEventType,
            notifications::NotificationAck,
            users::ExchangeRequest,
            users::ExchangeResponse,
            users::UserMeResponse,
            admin::ProductListResponse,
            admin::UpsertProductRequest,
            admin::SystemStatsResponse,
            admin::AuditLogResponse,
            health::HealthResponse,
            health::ReadyResponse,
            health::HealthChecks
        )
    ),
    tags(
        (name = "Receipts", description = "Receipt verification"),
        (name = "Entitlements", description = "Per-user entitlement state"),
        (name = "Notifications", description = "App Store server notifications"),
        (name = "Auth", description = "Sign-in token exchange"),
        (name = "Users", description = "User identity"),
        (name = "Admin", description = "Product catalog, statistics, audit"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;
