// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Persisted entitlement entities.
//!
//! Everything in here is stored as JSON bytes in redb tables (see
//! [`super::database`]). Identity fields never change after first write;
//! the merge rules live next to the types they protect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::appstore::Environment;

/// Entitlement shape of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    /// Spendable credits; each purchase adds to a balance.
    Consumable,
    /// Permanent one-time grant.
    NonConsumable,
    /// Auto-renewing subscription.
    Subscription,
}

/// Derived lifecycle status of a transaction or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EntitlementStatus {
    Active,
    Expired,
    Revoked,
}

impl Default for EntitlementStatus {
    fn default() -> Self {
        Self::Active
    }
}

/// Canonical record of one platform transaction, keyed by `transaction_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTransaction {
    /// Platform transaction id (globally unique, the primary key)
    pub transaction_id: String,
    /// Lineage id linking subscription renewals
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_transaction_id: Option<String>,
    /// Owning user; write-once
    pub user_id: String,
    /// Purchased product; write-once
    pub product_id: String,
    /// Classified entitlement kind
    pub kind: ProductKind,
    /// Status derived from the date fields at last write
    pub status: EntitlementStatus,
    pub purchase_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_date: Option<DateTime<Utc>>,
    pub environment: Environment,
    /// Full verified claim payload, retained for audit and replay
    pub raw: serde_json::Value,
    /// First time this transaction was seen
    pub created_at: DateTime<Utc>,
    /// Last redelivery absorbed
    pub updated_at: DateTime<Utc>,
}

impl StoredTransaction {
    /// Key of the subscription lineage this transaction belongs to. Falls
    /// back to the transaction id when the platform sent no lineage id.
    pub fn lineage_key(&self) -> &str {
        self.original_transaction_id
            .as_deref()
            .unwrap_or(&self.transaction_id)
    }

    /// Merge a redelivery of the same transaction into this record.
    ///
    /// Identity fields (`user_id`, `product_id`, the lineage id once set,
    /// `created_at`) are write-once; everything status-affecting is taken
    /// from the incoming copy.
    pub fn absorb_redelivery(&mut self, incoming: &StoredTransaction) {
        if self.original_transaction_id.is_none() {
            self.original_transaction_id = incoming.original_transaction_id.clone();
        }
        self.kind = incoming.kind;
        self.status = incoming.status;
        self.purchase_date = incoming.purchase_date;
        self.expires_date = incoming.expires_date;
        self.revocation_date = incoming.revocation_date;
        self.environment = incoming.environment;
        self.raw = incoming.raw.clone();
        self.updated_at = Utc::now();
    }
}

/// Current renewal state of one subscription lineage, keyed by
/// `original_transaction_id`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredSubscription {
    pub original_transaction_id: String,
    pub user_id: String,
    pub product_id: String,
    pub status: EntitlementStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_date: Option<DateTime<Utc>>,
    /// Purchase date of the transaction this row reflects; the
    /// out-of-order guard compares against it before overwriting.
    pub purchase_date: DateTime<Utc>,
    /// Most recent transaction applied to this lineage
    pub last_transaction_id: String,
    pub updated_at: DateTime<Utc>,
}

impl StoredSubscription {
    pub fn from_transaction(tx: &StoredTransaction) -> Self {
        Self {
            original_transaction_id: tx.lineage_key().to_string(),
            user_id: tx.user_id.clone(),
            product_id: tx.product_id.clone(),
            status: tx.status,
            expires_date: tx.expires_date,
            purchase_date: tx.purchase_date,
            last_transaction_id: tx.transaction_id.clone(),
            updated_at: Utc::now(),
        }
    }

    /// Status as of `now`. A lineage last written while active reads as
    /// expired once its expiry passes, without waiting for a notification.
    pub fn effective_status(&self, now: DateTime<Utc>) -> EntitlementStatus {
        match self.status {
            EntitlementStatus::Active => match self.expires_date {
                Some(expiry) if expiry <= now => EntitlementStatus::Expired,
                _ => EntitlementStatus::Active,
            },
            other => other,
        }
    }
}

/// Permanent product grant, keyed by (`user_id`, `product_id`).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredGrant {
    pub user_id: String,
    pub product_id: String,
    /// Transaction that won the insert
    pub transaction_id: String,
    pub granted_at: DateTime<Utc>,
}

impl StoredGrant {
    pub fn from_transaction(tx: &StoredTransaction) -> Self {
        Self {
            user_id: tx.user_id.clone(),
            product_id: tx.product_id.clone(),
            transaction_id: tx.transaction_id.clone(),
            granted_at: Utc::now(),
        }
    }
}

/// Append-only credit movement, keyed by `transaction_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredLedgerEntry {
    pub transaction_id: String,
    pub user_id: String,
    pub product_id: String,
    /// Signed credit delta
    pub delta: i64,
    pub purchase_date: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

impl StoredLedgerEntry {
    pub fn from_transaction(tx: &StoredTransaction, delta: i64) -> Self {
        Self {
            transaction_id: tx.transaction_id.clone(),
            user_id: tx.user_id.clone(),
            product_id: tx.product_id.clone(),
            delta,
            purchase_date: tx.purchase_date,
            recorded_at: Utc::now(),
        }
    }
}

/// Outcome log row for one server notification, keyed by the platform's
/// notification UUID. Redelivery overwrites; the latest payload wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredNotification {
    pub notification_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    /// User the notification resolved to, when any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Transaction written by this notification, when processing ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    /// Whether a transaction write was triggered
    pub processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub raw: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

/// One user, created by the identity exchange. Keyed by `user_id`
/// (`{provider}_{subject}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredIdentity {
    pub user_id: String,
    pub provider: String,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login_at: DateTime<Utc>,
}

/// Operator-registered product configuration, keyed by `product_id`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredProduct {
    pub product_id: String,
    pub kind: ProductKind,
    /// Credit delta granted per purchase (consumables only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn sample_transaction() -> StoredTransaction {
        let now = Utc::now();
        StoredTransaction {
            transaction_id: "tx_1".to_string(),
            original_transaction_id: None,
            user_id: "apple_u1".to_string(),
            product_id: "com.app.sub.monthly".to_string(),
            kind: ProductKind::Subscription,
            status: EntitlementStatus::Active,
            purchase_date: now,
            expires_date: Some(now + Duration::days(30)),
            revocation_date: None,
            environment: Environment::Production,
            raw: json!({"transactionId": "tx_1"}),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn kind_serializes_with_snake_case() {
        assert_eq!(
            serde_json::to_string(&ProductKind::NonConsumable).unwrap(),
            r#""non_consumable""#
        );
        assert_eq!(
            serde_json::to_string(&ProductKind::Consumable).unwrap(),
            r#""consumable""#
        );
        assert_eq!(
            serde_json::to_string(&EntitlementStatus::Revoked).unwrap(),
            r#""revoked""#
        );
    }

    #[test]
    fn lineage_key_falls_back_to_transaction_id() {
        let mut tx = sample_transaction();
        assert_eq!(tx.lineage_key(), "tx_1");

        tx.original_transaction_id = Some("orig_1".to_string());
        assert_eq!(tx.lineage_key(), "orig_1");
    }

    #[test]
    fn redelivery_updates_mutable_fields_only() {
        let mut stored = sample_transaction();
        let first_seen = stored.created_at;

        let mut incoming = sample_transaction();
        incoming.user_id = "apple_intruder".to_string();
        incoming.product_id = "com.app.other".to_string();
        incoming.original_transaction_id = Some("orig_1".to_string());
        incoming.status = EntitlementStatus::Revoked;
        incoming.revocation_date = Some(Utc::now());
        incoming.raw = json!({"transactionId": "tx_1", "revoked": true});

        stored.absorb_redelivery(&incoming);

        // Ownership is immutable.
        assert_eq!(stored.user_id, "apple_u1");
        assert_eq!(stored.product_id, "com.app.sub.monthly");
        assert_eq!(stored.created_at, first_seen);
        // Lineage id may be filled in once.
        assert_eq!(stored.original_transaction_id.as_deref(), Some("orig_1"));
        // Status-affecting fields follow the redelivery.
        assert_eq!(stored.status, EntitlementStatus::Revoked);
        assert!(stored.revocation_date.is_some());
        assert_eq!(stored.raw["revoked"], true);
    }

    #[test]
    fn redelivery_never_clears_lineage_id() {
        let mut stored = sample_transaction();
        stored.original_transaction_id = Some("orig_1".to_string());

        let incoming = sample_transaction();
        stored.absorb_redelivery(&incoming);

        assert_eq!(stored.original_transaction_id.as_deref(), Some("orig_1"));
    }

    #[test]
    fn subscription_row_reflects_transaction() {
        let mut tx = sample_transaction();
        tx.original_transaction_id = Some("orig_1".to_string());

        let sub = StoredSubscription::from_transaction(&tx);
        assert_eq!(sub.original_transaction_id, "orig_1");
        assert_eq!(sub.last_transaction_id, "tx_1");
        assert_eq!(sub.user_id, "apple_u1");
        assert_eq!(sub.expires_date, tx.expires_date);
    }

    #[test]
    fn effective_status_expires_stale_active_rows() {
        let now = Utc::now();
        let mut tx = sample_transaction();
        tx.expires_date = Some(now - Duration::days(1));

        let sub = StoredSubscription::from_transaction(&tx);
        assert_eq!(sub.status, EntitlementStatus::Active);
        assert_eq!(sub.effective_status(now), EntitlementStatus::Expired);

        // Revoked never un-revokes, even with a future expiry.
        let mut revoked = sub.clone();
        revoked.status = EntitlementStatus::Revoked;
        revoked.expires_date = Some(now + Duration::days(30));
        assert_eq!(revoked.effective_status(now), EntitlementStatus::Revoked);
    }

    #[test]
    fn ledger_entry_copies_identity_from_transaction() {
        let mut tx = sample_transaction();
        tx.kind = ProductKind::Consumable;

        let entry = StoredLedgerEntry::from_transaction(&tx, 10);
        assert_eq!(entry.transaction_id, "tx_1");
        assert_eq!(entry.user_id, "apple_u1");
        assert_eq!(entry.delta, 10);
    }
}
