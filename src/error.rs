// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::appstore::{AppStoreError, VerifyError};
use crate::auth::AuthError;
use crate::iap::EntitlementError;
use crate::storage::DbError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

// Substrate failures are transient and safe to retry: every engine write is
// idempotent, so 503 is the honest status.
impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        ApiError::service_unavailable(format!("store unavailable: {err}"))
    }
}

impl From<EntitlementError> for ApiError {
    fn from(err: EntitlementError) -> Self {
        match err {
            EntitlementError::MalformedClaim(_) => ApiError::bad_request(err.to_string()),
            EntitlementError::StoreUnavailable(_) => {
                ApiError::service_unavailable(err.to_string())
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::new(err.status_code(), err.to_string())
    }
}

// An authenticity failure means the submitted receipt is bad; a key-set
// failure means we cannot currently tell.
impl From<VerifyError> for ApiError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::SignatureInvalid | VerifyError::AppIdMismatch { .. } => {
                ApiError::unprocessable(err.to_string())
            }
            VerifyError::MalformedPayload(_) => ApiError::bad_request(err.to_string()),
            VerifyError::KeySetUnavailable(_) => ApiError::service_unavailable(err.to_string()),
        }
    }
}

impl From<AppStoreError> for ApiError {
    fn from(err: AppStoreError) -> Self {
        match err {
            AppStoreError::Api { status: 404, .. } => {
                ApiError::not_found("transaction not found in the App Store")
            }
            other => ApiError::service_unavailable(other.to_string()),
        }
    }
}
