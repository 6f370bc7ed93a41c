// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Read-side view of a user's entitlements.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::appstore::Environment;
use crate::storage::{
    DbResult, EntitlementDb, EntitlementStatus, ProductKind, StoredGrant, StoredSubscription,
    StoredTransaction,
};

/// History length when the caller does not ask for one.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Hard ceiling on history length.
pub const MAX_HISTORY_LIMIT: usize = 100;

/// One transaction in the recent-history listing. The raw claim payload is
/// kept out of client responses.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TransactionSummary {
    pub transaction_id: String,
    pub product_id: String,
    pub kind: ProductKind,
    pub status: EntitlementStatus,
    pub purchase_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_date: Option<DateTime<Utc>>,
    pub environment: Environment,
}

impl From<StoredTransaction> for TransactionSummary {
    fn from(tx: StoredTransaction) -> Self {
        Self {
            transaction_id: tx.transaction_id,
            product_id: tx.product_id,
            kind: tx.kind,
            status: tx.status,
            purchase_date: tx.purchase_date,
            expires_date: tx.expires_date,
            environment: tx.environment,
        }
    }
}

/// Everything a client needs to render the user's entitlements.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EntitlementSnapshot {
    pub subscriptions: Vec<StoredSubscription>,
    pub grants: Vec<StoredGrant>,
    pub consumable_balance: i64,
    pub recent_transactions: Vec<TransactionSummary>,
}

/// Assembles snapshots from the entitlement tables. Read-only.
#[derive(Clone)]
pub struct StatusAggregator {
    db: Arc<EntitlementDb>,
}

impl StatusAggregator {
    pub fn new(db: Arc<EntitlementDb>) -> Self {
        Self { db }
    }

    pub fn snapshot(&self, user_id: &str, limit: usize) -> DbResult<EntitlementSnapshot> {
        self.snapshot_at(user_id, limit, Utc::now())
    }

    /// Snapshot with an injected read time. An empty result set is a valid
    /// snapshot, not an error.
    pub fn snapshot_at(
        &self,
        user_id: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> DbResult<EntitlementSnapshot> {
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT);

        let mut subscriptions = self.db.list_subscriptions(user_id)?;
        for sub in &mut subscriptions {
            // A lineage that lapsed without a further notification still
            // reads as expired.
            sub.status = sub.effective_status(now);
        }

        let grants = self.db.list_grants(user_id)?;
        let consumable_balance = self.db.consumable_balance(user_id)?;
        let recent_transactions = self
            .db
            .list_recent_transactions(user_id, limit)?
            .into_iter()
            .map(TransactionSummary::from)
            .collect();

        Ok(EntitlementSnapshot {
            subscriptions,
            grants,
            consumable_balance,
            recent_transactions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProductSeed;
    use crate::iap::engine::EntitlementEngine;
    use crate::iap::products::ProductCatalog;
    use chrono::Duration;
    use serde_json::json;

    fn setup() -> (
        StatusAggregator,
        EntitlementEngine,
        ProductCatalog,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(EntitlementDb::open(&dir.path().join("test.redb")).unwrap());
        let catalog = ProductCatalog::new(db.clone(), 1);
        let engine = EntitlementEngine::new(db.clone(), catalog.clone(), Environment::Sandbox);
        let aggregator = StatusAggregator::new(db);
        (aggregator, engine, catalog, dir)
    }

    fn claims(value: serde_json::Value) -> crate::appstore::TransactionClaims {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn new_user_gets_an_empty_snapshot() {
        let (aggregator, _engine, _catalog, _dir) = setup();

        let snapshot = aggregator.snapshot("apple_nobody", DEFAULT_HISTORY_LIMIT).unwrap();
        assert!(snapshot.subscriptions.is_empty());
        assert!(snapshot.grants.is_empty());
        assert_eq!(snapshot.consumable_balance, 0);
        assert!(snapshot.recent_transactions.is_empty());
    }

    #[test]
    fn snapshot_reflects_all_three_kinds() {
        let (aggregator, engine, catalog, _dir) = setup();
        let t0 = Utc::now();

        catalog
            .seed(&[ProductSeed {
                product_id: "com.app.credits10".to_string(),
                kind: ProductKind::Consumable,
                credits: Some(10),
                display_name: None,
            }])
            .unwrap();

        engine
            .process_claims_at(
                "apple_u1",
                &claims(json!({
                    "transactionId": "tx_sub",
                    "originalTransactionId": "O1",
                    "productId": "sub.monthly",
                    "purchaseDate": t0.timestamp_millis(),
                    "expiresDate": (t0 + Duration::days(30)).timestamp_millis()
                })),
                t0,
            )
            .unwrap();
        engine
            .process_claims_at(
                "apple_u1",
                &claims(json!({
                    "transactionId": "tx_pro",
                    "productId": "com.app.pro",
                    "purchaseDate": (t0 + Duration::seconds(1)).timestamp_millis()
                })),
                t0,
            )
            .unwrap();
        engine
            .process_claims_at(
                "apple_u1",
                &claims(json!({
                    "transactionId": "tx_credit",
                    "productId": "com.app.credits10",
                    "purchaseDate": (t0 + Duration::seconds(2)).timestamp_millis()
                })),
                t0,
            )
            .unwrap();

        let snapshot = aggregator.snapshot_at("apple_u1", 10, t0).unwrap();
        assert_eq!(snapshot.subscriptions.len(), 1);
        assert_eq!(snapshot.subscriptions[0].status, EntitlementStatus::Active);
        assert_eq!(snapshot.grants.len(), 1);
        assert_eq!(snapshot.consumable_balance, 10);
        assert_eq!(snapshot.recent_transactions.len(), 3);
        // Newest first.
        assert_eq!(snapshot.recent_transactions[0].transaction_id, "tx_credit");
        assert_eq!(snapshot.recent_transactions[2].transaction_id, "tx_sub");
    }

    #[test]
    fn lapsed_subscription_reads_as_expired() {
        let (aggregator, engine, _catalog, _dir) = setup();
        let t0 = Utc::now();

        engine
            .process_claims_at(
                "apple_u1",
                &claims(json!({
                    "transactionId": "tx_sub",
                    "originalTransactionId": "O1",
                    "productId": "sub.monthly",
                    "purchaseDate": t0.timestamp_millis(),
                    "expiresDate": (t0 + Duration::days(30)).timestamp_millis()
                })),
                t0,
            )
            .unwrap();

        // Within the period it reads active, past the expiry it reads
        // expired with no intervening write.
        let during = aggregator.snapshot_at("apple_u1", 10, t0 + Duration::days(1)).unwrap();
        assert_eq!(during.subscriptions[0].status, EntitlementStatus::Active);

        let after = aggregator.snapshot_at("apple_u1", 10, t0 + Duration::days(31)).unwrap();
        assert_eq!(after.subscriptions[0].status, EntitlementStatus::Expired);
    }

    #[test]
    fn history_limit_is_clamped() {
        let (aggregator, engine, _catalog, _dir) = setup();
        let t0 = Utc::now();

        for i in 0..5 {
            engine
                .process_claims_at(
                    "apple_u1",
                    &claims(json!({
                        "transactionId": format!("tx_{i}"),
                        "productId": "com.app.pro",
                        "purchaseDate": (t0 + Duration::seconds(i)).timestamp_millis()
                    })),
                    t0,
                )
                .unwrap();
        }

        let snapshot = aggregator.snapshot_at("apple_u1", 2, t0).unwrap();
        assert_eq!(snapshot.recent_transactions.len(), 2);

        // A zero limit still returns something.
        let snapshot = aggregator.snapshot_at("apple_u1", 0, t0).unwrap();
        assert_eq!(snapshot.recent_transactions.len(), 1);
    }

    #[test]
    fn summary_omits_raw_payload() {
        let (aggregator, engine, _catalog, _dir) = setup();

        engine
            .process_claims(
                "apple_u1",
                &claims(json!({
                    "transactionId": "tx_1",
                    "productId": "com.app.pro",
                    "storefront": "USA"
                })),
            )
            .unwrap();

        let snapshot = aggregator.snapshot("apple_u1", 10).unwrap();
        let json = serde_json::to_value(&snapshot.recent_transactions[0]).unwrap();
        assert!(json.get("raw").is_none());
        assert!(json.get("storefront").is_none());
    }
}
