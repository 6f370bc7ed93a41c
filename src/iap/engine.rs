// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The receipt reconciliation engine.
//!
//! Turns a verified claim set into durable entitlement state: normalize the
//! claims, classify the product, persist the canonical transaction, then
//! apply the kind-specific grant. Every write is idempotent, so the pipeline
//! is safe to replay for duplicate deliveries and safe to retry after a
//! partial failure.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::appstore::{Environment, TransactionClaims};
use crate::storage::{
    DbError, EntitlementDb, EntitlementStatus, ProductKind, StoredGrant, StoredLedgerEntry,
    StoredSubscription, StoredTransaction,
};

use super::products::ProductCatalog;

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EntitlementError {
    /// A required claim field is absent or unusable. Nothing was persisted.
    #[error("malformed claim: missing or invalid {0}")]
    MalformedClaim(&'static str),

    /// Transient substrate failure. All writes are idempotent, so the caller
    /// may retry the whole pipeline.
    #[error("entitlement store unavailable: {0}")]
    StoreUnavailable(#[from] DbError),
}

// =============================================================================
// Pipeline Output
// =============================================================================

/// What a successful verification tells the caller.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VerifiedReceipt {
    pub transaction_id: String,
    pub product_id: String,
    pub kind: ProductKind,
    pub status: EntitlementStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_date: Option<DateTime<Utc>>,
    pub environment: Environment,
}

// =============================================================================
// Status Derivation
// =============================================================================

/// Derive entitlement status from claim dates. Recomputed on every write;
/// a previously stored status is never trusted.
pub fn derive_status(
    expires_date: Option<DateTime<Utc>>,
    revocation_date: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> EntitlementStatus {
    if revocation_date.is_some() {
        EntitlementStatus::Revoked
    } else if matches!(expires_date, Some(expiry) if expiry <= now) {
        EntitlementStatus::Expired
    } else {
        EntitlementStatus::Active
    }
}

// =============================================================================
// Claim Normalization
// =============================================================================

struct NormalizedClaims {
    transaction_id: String,
    original_transaction_id: Option<String>,
    product_id: String,
    purchase_date: DateTime<Utc>,
    expires_date: Option<DateTime<Utc>>,
    revocation_date: Option<DateTime<Utc>>,
    environment: Environment,
}

fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Map a verified claim set to canonical form.
///
/// `transactionId` and `productId` are hard requirements. A missing
/// `purchaseDate` falls back to processing time and a missing `environment`
/// to the configured default, matching how sparse StoreKit payloads behave.
fn normalize_claims(
    claims: &TransactionClaims,
    now: DateTime<Utc>,
    default_environment: Environment,
) -> Result<NormalizedClaims, EntitlementError> {
    let transaction_id = claims
        .transaction_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or(EntitlementError::MalformedClaim("transactionId"))?;

    let product_id = claims
        .product_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or(EntitlementError::MalformedClaim("productId"))?;

    let purchase_date = match claims.purchase_date {
        Some(millis) => {
            millis_to_datetime(millis).ok_or(EntitlementError::MalformedClaim("purchaseDate"))?
        }
        None => now,
    };

    let expires_date = match claims.expires_date {
        Some(millis) => Some(
            millis_to_datetime(millis).ok_or(EntitlementError::MalformedClaim("expiresDate"))?,
        ),
        None => None,
    };

    let revocation_date = match claims.revocation_date {
        Some(millis) => Some(
            millis_to_datetime(millis)
                .ok_or(EntitlementError::MalformedClaim("revocationDate"))?,
        ),
        None => None,
    };

    let environment = claims
        .environment
        .as_deref()
        .and_then(Environment::parse)
        .unwrap_or(default_environment);

    Ok(NormalizedClaims {
        transaction_id,
        original_transaction_id: claims.original_transaction_id.clone(),
        product_id,
        purchase_date,
        expires_date,
        revocation_date,
        environment,
    })
}

// =============================================================================
// EntitlementEngine
// =============================================================================

/// Drives the normalize → classify → persist → grant pipeline.
#[derive(Clone)]
pub struct EntitlementEngine {
    db: Arc<EntitlementDb>,
    catalog: ProductCatalog,
    default_environment: Environment,
}

impl EntitlementEngine {
    pub fn new(
        db: Arc<EntitlementDb>,
        catalog: ProductCatalog,
        default_environment: Environment,
    ) -> Self {
        Self {
            db,
            catalog,
            default_environment,
        }
    }

    /// Apply a verified claim set on behalf of a user.
    pub fn process_claims(
        &self,
        user_id: &str,
        claims: &TransactionClaims,
    ) -> Result<VerifiedReceipt, EntitlementError> {
        self.process_claims_at(user_id, claims, Utc::now())
    }

    /// Same as [`process_claims`](Self::process_claims) with an injected
    /// processing time.
    pub fn process_claims_at(
        &self,
        user_id: &str,
        claims: &TransactionClaims,
        now: DateTime<Utc>,
    ) -> Result<VerifiedReceipt, EntitlementError> {
        let normalized = normalize_claims(claims, now, self.default_environment)?;
        let classification = self.catalog.classify(claims)?;
        let status = derive_status(normalized.expires_date, normalized.revocation_date, now);
        let raw = serde_json::to_value(claims).map_err(DbError::from)?;

        let record = StoredTransaction {
            transaction_id: normalized.transaction_id,
            original_transaction_id: normalized.original_transaction_id,
            user_id: user_id.to_string(),
            product_id: normalized.product_id,
            kind: classification.kind(),
            status,
            purchase_date: normalized.purchase_date,
            expires_date: normalized.expires_date,
            revocation_date: normalized.revocation_date,
            environment: normalized.environment,
            raw,
            created_at: now,
            updated_at: now,
        };

        // Identity fields of a known transaction win over the incoming copy,
        // so the grant below always follows the stored owner.
        let merged = self.db.upsert_transaction(&record)?;

        match merged.kind {
            ProductKind::Subscription => {
                let sub = StoredSubscription::from_transaction(&merged);
                let applied = self.db.upsert_subscription_if_newer(&sub)?;
                if !applied {
                    tracing::debug!(
                        lineage = %sub.original_transaction_id,
                        transaction = %merged.transaction_id,
                        "skipping subscription update older than stored state"
                    );
                }
            }
            ProductKind::NonConsumable => {
                let grant = StoredGrant::from_transaction(&merged);
                let inserted = self.db.insert_grant_if_absent(&grant)?;
                if !inserted {
                    tracing::debug!(
                        user = %grant.user_id,
                        product = %grant.product_id,
                        "grant already present"
                    );
                }
            }
            ProductKind::Consumable => {
                let delta = self.catalog.credits_for(&classification);
                let entry = StoredLedgerEntry::from_transaction(&merged, delta);
                let inserted = self.db.insert_ledger_entry_if_absent(&entry)?;
                if !inserted {
                    tracing::debug!(
                        transaction = %entry.transaction_id,
                        "ledger entry already credited"
                    );
                }
            }
        }

        Ok(VerifiedReceipt {
            transaction_id: merged.transaction_id,
            product_id: merged.product_id,
            kind: merged.kind,
            status: merged.status,
            expires_date: merged.expires_date,
            environment: merged.environment,
        })
    }
}
