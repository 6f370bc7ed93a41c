// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Sign-in exchange and user endpoints.

use axum::{extract::State, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{Auth, AuthenticatedUser, Role};
use crate::error::ApiError;
use crate::state::AppState;
use crate::storage::{AuditEvent, AuditEventType, StoredIdentity};

/// Request body for POST /v1/auth/exchange.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ExchangeRequest {
    /// Sign-in provider: `apple` or `google`
    pub provider: String,
    /// OIDC identity token issued by the provider
    pub id_token: String,
}

/// Response for POST /v1/auth/exchange.
#[derive(Debug, Serialize, ToSchema)]
pub struct ExchangeResponse {
    /// First-party session token for the Authorization header
    pub session_token: String,
    /// Always `Bearer`
    pub token_type: String,
    /// Session lifetime in seconds
    pub expires_in: i64,
    /// Canonical user id (`{provider}_{subject}`)
    pub user_id: String,
}

/// Response for GET /v1/users/me.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserMeResponse {
    /// User's unique ID
    pub user_id: String,
    /// User's role
    pub role: Role,
    /// Sign-in provider that created this account
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Email shared by the provider, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Exchange a provider identity token for a session token.
///
/// Verifies the id token against the provider's published keys, upserts the
/// identity record, and mints a first-party session. The admin role is
/// granted at mint time from configuration.
#[utoipa::path(
    post,
    path = "/v1/auth/exchange",
    tag = "Auth",
    request_body = ExchangeRequest,
    responses(
        (status = 200, description = "Session issued", body = ExchangeResponse),
        (status = 400, description = "Unknown or disabled provider"),
        (status = 401, description = "Identity token failed verification"),
        (status = 503, description = "Store unavailable"),
    )
)]
pub async fn exchange_token(
    State(state): State<AppState>,
    Json(request): Json<ExchangeRequest>,
) -> Result<Json<ExchangeResponse>, ApiError> {
    let identity = match state.oidc.verify(&request.provider, &request.id_token).await {
        Ok(identity) => identity,
        Err(err) => {
            let event = AuditEvent::new(AuditEventType::AuthFailure)
                .with_details(serde_json::json!({ "provider": request.provider }))
                .failed(err.to_string());
            let _ = state.db.append_audit(&event);
            return Err(err.into());
        }
    };

    let user_id = identity.user_id();
    let now = Utc::now();

    // First sign-in creates the record; later ones refresh it. The email can
    // arrive on a later login than the first.
    let record = match state.db.get_identity(&user_id)? {
        Some(mut existing) => {
            existing.email = identity.email.clone().or(existing.email);
            existing.last_login_at = now;
            existing
        }
        None => StoredIdentity {
            user_id: user_id.clone(),
            provider: identity.provider.clone(),
            subject: identity.subject.clone(),
            email: identity.email.clone(),
            created_at: now,
            last_login_at: now,
        },
    };
    state.db.upsert_identity(&record)?;

    let role = if state.config.is_admin(&user_id) {
        Role::Admin
    } else {
        Role::Client
    };
    let session_token = state.sessions.issue(&user_id, role)?;

    let event = AuditEvent::new(AuditEventType::SessionIssued).with_user(&user_id);
    let _ = state.db.append_audit(&event);

    Ok(Json(ExchangeResponse {
        session_token,
        token_type: "Bearer".to_string(),
        expires_in: state.sessions.ttl_secs(),
        user_id,
    }))
}

/// Get the current authenticated user's information.
#[utoipa::path(
    get,
    path = "/v1/users/me",
    tag = "Users",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "User information", body = UserMeResponse),
        (status = 401, description = "Unauthorized - invalid or missing token"),
    )
)]
pub async fn get_current_user(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<UserMeResponse>, ApiError> {
    let identity = state.db.get_identity(&user.user_id)?;
    Ok(Json(build_me_response(user, identity)))
}

fn build_me_response(user: AuthenticatedUser, identity: Option<StoredIdentity>) -> UserMeResponse {
    UserMeResponse {
        user_id: user.user_id,
        role: user.role,
        provider: identity.as_ref().map(|i| i.provider.clone()),
        email: identity.and_then(|i| i.email),
    }
}
