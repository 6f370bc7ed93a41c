// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! StoreKit JWS verification.
//!
//! Apple signs transactions and server notifications as JWS tokens whose
//! signing keys are published at a JWKS endpoint. The verifier resolves the
//! key by `kid`, checks the signature, and enforces that transaction
//! payloads belong to our bundle id.
//!
//! ## Verification Modes
//!
//! - **Production mode** (`APPLE_STOREKIT_JWKS_URL` set): full signature
//!   verification against the cached key set.
//! - **Development mode** (no JWKS URL): structure-only decode, no signature
//!   check.

use jsonwebtoken::{decode, decode_header, Validation};
use serde_json::Value;
use url::Url;

use super::types::{NotificationPayload, TransactionClaims};
use crate::auth::{AuthError, JwksManager};

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("payload signature is invalid")]
    SignatureInvalid,
    #[error("payload belongs to bundle `{found}`, expected `{expected}`")]
    AppIdMismatch { expected: String, found: String },
    #[error("malformed signed payload: {0}")]
    MalformedPayload(String),
    #[error("signing key set unavailable: {0}")]
    KeySetUnavailable(String),
}

impl From<AuthError> for VerifyError {
    fn from(err: AuthError) -> Self {
        match err {
            // A kid Apple never published means the token was not signed
            // by Apple, not that our key cache is stale.
            AuthError::NoMatchingKey => VerifyError::SignatureInvalid,
            other => VerifyError::KeySetUnavailable(other.to_string()),
        }
    }
}

/// Verifies StoreKit signed payloads and enforces the app-id check.
pub struct ReceiptVerifier {
    jwks: Option<JwksManager>,
    bundle_id: String,
}

impl ReceiptVerifier {
    pub fn new(jwks_url: Option<Url>, bundle_id: impl Into<String>) -> Self {
        Self {
            jwks: jwks_url.map(|url| JwksManager::new(url.to_string())),
            bundle_id: bundle_id.into(),
        }
    }

    /// Whether signatures are actually checked.
    pub fn verifies_signatures(&self) -> bool {
        self.jwks.is_some()
    }

    /// The StoreKit key cache, when running in production mode.
    pub fn jwks(&self) -> Option<&JwksManager> {
        self.jwks.as_ref()
    }

    /// Verify a signed transaction (`signedTransactionInfo`).
    ///
    /// The claims retain unknown fields, so `serde_json::to_value` on the
    /// result reproduces the complete raw payload.
    pub async fn verify_transaction(&self, token: &str) -> Result<TransactionClaims, VerifyError> {
        let payload = self.decode(token).await?;
        let claims: TransactionClaims = serde_json::from_value(payload)
            .map_err(|e| VerifyError::MalformedPayload(e.to_string()))?;

        // Apple omits bundleId from some sandbox payloads; only an explicit
        // mismatch is rejected.
        if let Some(bundle_id) = &claims.bundle_id {
            if *bundle_id != self.bundle_id {
                return Err(VerifyError::AppIdMismatch {
                    expected: self.bundle_id.clone(),
                    found: bundle_id.clone(),
                });
            }
        }

        Ok(claims)
    }

    /// Verify a server notification envelope (`signedPayload`).
    pub async fn verify_notification(
        &self,
        token: &str,
    ) -> Result<NotificationPayload, VerifyError> {
        let payload = self.decode(token).await?;
        serde_json::from_value(payload).map_err(|e| VerifyError::MalformedPayload(e.to_string()))
    }

    async fn decode(&self, token: &str) -> Result<Value, VerifyError> {
        match &self.jwks {
            Some(jwks) => decode_verified(token, jwks).await,
            None => decode_unverified(token),
        }
    }
}

/// Full signature verification against the StoreKit key set.
async fn decode_verified(token: &str, jwks: &JwksManager) -> Result<Value, VerifyError> {
    let header = decode_header(token).map_err(|e| VerifyError::MalformedPayload(e.to_string()))?;

    let (decoding_key, algorithm) = if let Some(kid) = &header.kid {
        jwks.get_decoding_key(kid).await?
    } else {
        jwks.get_any_decoding_key().await?
    };

    // StoreKit payloads carry no exp/aud claims; only the signature and the
    // dates inside the claim set are meaningful.
    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.leeway = CLOCK_SKEW_LEEWAY;

    let token_data =
        decode::<Value>(token, &decoding_key, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::InvalidSignature => VerifyError::SignatureInvalid,
            _ => VerifyError::MalformedPayload(e.to_string()),
        })?;

    Ok(token_data.claims)
}

/// Development decode (no signature check).
///
/// WARNING: only reachable when no JWKS URL is configured.
fn decode_unverified(token: &str) -> Result<Value, VerifyError> {
    let token_data = jsonwebtoken::dangerous::insecure_decode::<Value>(token)
        .map_err(|e| VerifyError::MalformedPayload(e.to_string()))?;
    Ok(token_data.claims)
}
