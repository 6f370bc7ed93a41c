// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Receipt verification endpoint.
//!
//! Clients submit either the signed transaction JWS straight from StoreKit 2
//! or a bare transaction id. The bare-id form is resolved to a signed payload
//! through the App Store Server API, then both forms take the same pipeline:
//! verify, classify, derive status, persist idempotently.

use axum::{extract::State, Json};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::appstore::Environment;
use crate::auth::Auth;
use crate::error::ApiError;
use crate::iap::VerifiedReceipt;
use crate::state::AppState;
use crate::storage::{AuditEvent, AuditEventType};
use crate::audit_log;

/// Request body for POST /v1/receipts/verify.
///
/// Exactly one of `signed_transaction` or `transaction_id` is required;
/// when both are present the signed transaction wins.
#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyReceiptRequest {
    /// Signed transaction JWS from StoreKit 2
    #[serde(default)]
    pub signed_transaction: Option<String>,
    /// Bare transaction id; the server fetches the signed payload
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// Environment to query for the bare-id form (defaults to the
    /// configured environment)
    #[serde(default)]
    pub environment: Option<Environment>,
}

/// Verify a purchase and apply it to the caller's entitlements.
///
/// Idempotent: redelivering the same transaction converges to the same
/// stored state and the same response.
#[utoipa::path(
    post,
    path = "/v1/receipts/verify",
    tag = "Receipts",
    security(("bearer_auth" = [])),
    request_body = VerifyReceiptRequest,
    responses(
        (status = 200, description = "Receipt verified and applied", body = VerifiedReceipt),
        (status = 400, description = "Malformed request or claim set"),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Transaction id unknown to the App Store"),
        (status = 422, description = "Receipt failed authenticity checks"),
        (status = 503, description = "Store or key set unavailable"),
    )
)]
pub async fn verify_receipt(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<VerifyReceiptRequest>,
) -> Result<Json<VerifiedReceipt>, ApiError> {
    let token = resolve_signed_transaction(&state, &request).await?;

    let claims = match state.receipts.verify_transaction(&token).await {
        Ok(claims) => claims,
        Err(err) => {
            let event = AuditEvent::new(AuditEventType::ReceiptRejected)
                .with_user(&user.user_id)
                .failed(err.to_string());
            let _ = state.db.append_audit(&event);
            return Err(err.into());
        }
    };

    let receipt = match state.engine().process_claims(&user.user_id, &claims) {
        Ok(receipt) => receipt,
        Err(err) => {
            let event = AuditEvent::new(AuditEventType::ReceiptRejected)
                .with_user(&user.user_id)
                .failed(err.to_string());
            let _ = state.db.append_audit(&event);
            return Err(err.into());
        }
    };

    audit_log!(
        &state.db,
        AuditEventType::ReceiptVerified,
        &user,
        "transaction",
        &receipt.transaction_id
    );

    Ok(Json(receipt))
}

/// Obtain the signed transaction JWS for the request, fetching from the App
/// Store Server API when only a transaction id was supplied.
async fn resolve_signed_transaction(
    state: &AppState,
    request: &VerifyReceiptRequest,
) -> Result<String, ApiError> {
    if let Some(token) = &request.signed_transaction {
        return Ok(token.clone());
    }

    let transaction_id = request.transaction_id.as_deref().ok_or_else(|| {
        ApiError::bad_request("one of signed_transaction or transaction_id is required")
    })?;

    let client = state.appstore.as_ref().ok_or_else(|| {
        ApiError::bad_request(
            "verification by transaction id is not enabled; submit signed_transaction",
        )
    })?;

    let environment = request
        .environment
        .unwrap_or(state.config.default_environment);

    let signed = client
        .fetch_signed_transaction(transaction_id, environment)
        .await?;

    signed.ok_or_else(|| {
        ApiError::not_found(format!(
            "transaction {transaction_id} has no signed payload"
        ))
    })
}
