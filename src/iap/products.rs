// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Product classification.
//!
//! Operators are expected to pre-register products in the catalog; for
//! anything unregistered the classifier falls back to structural inference
//! so an unconfigured product never blocks entitlement delivery.

use std::sync::Arc;

use crate::appstore::TransactionClaims;
use crate::config::ProductSeed;
use crate::storage::{DbResult, EntitlementDb, ProductKind, StoredProduct};

/// How a product's kind was determined.
///
/// Tagged so callers must acknowledge when they are acting on a guess
/// rather than operator configuration.
#[derive(Debug, Clone)]
pub enum Classification {
    /// Operator-registered catalog entry.
    Configured(StoredProduct),
    /// Structural inference from the claim shape.
    Inferred(ProductKind),
}

impl Classification {
    pub fn kind(&self) -> ProductKind {
        match self {
            Classification::Configured(product) => product.kind,
            Classification::Inferred(kind) => *kind,
        }
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, Classification::Configured(_))
    }
}

/// Catalog lookups plus the inference fallback.
#[derive(Clone)]
pub struct ProductCatalog {
    db: Arc<EntitlementDb>,
    default_credits: i64,
}

impl ProductCatalog {
    pub fn new(db: Arc<EntitlementDb>, default_credits: i64) -> Self {
        Self {
            db,
            default_credits,
        }
    }

    /// Classify the product referenced by a claim set.
    ///
    /// Explicit configuration wins; otherwise the claim shape decides.
    /// Never fails on an unknown product.
    pub fn classify(&self, claims: &TransactionClaims) -> DbResult<Classification> {
        if let Some(product_id) = &claims.product_id {
            if let Some(product) = self.db.get_product(product_id)? {
                return Ok(Classification::Configured(product));
            }
        }
        Ok(Classification::Inferred(infer_kind(claims)))
    }

    /// Credit delta for a consumable purchase.
    pub fn credits_for(&self, classification: &Classification) -> i64 {
        match classification {
            Classification::Configured(product) => {
                product.credits.unwrap_or(self.default_credits)
            }
            Classification::Inferred(_) => self.default_credits,
        }
    }

    /// Write configured products into the catalog table. Returns the number
    /// of rows written.
    pub fn seed(&self, seeds: &[ProductSeed]) -> DbResult<usize> {
        for seed in seeds {
            let product = StoredProduct {
                product_id: seed.product_id.clone(),
                kind: seed.kind,
                credits: seed.credits,
                display_name: seed.display_name.clone(),
                updated_at: chrono::Utc::now(),
            };
            self.db.upsert_product(&product)?;
        }
        Ok(seeds.len())
    }
}

/// Structural inference: renewal lineage or an expiry means a subscription,
/// anything else is treated as a permanent unlock. Consumables are never
/// inferred; they must be registered with their credit amount.
fn infer_kind(claims: &TransactionClaims) -> ProductKind {
    if claims.original_transaction_id.is_some() || claims.expires_date.is_some() {
        ProductKind::Subscription
    } else {
        ProductKind::NonConsumable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_catalog() -> (ProductCatalog, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(EntitlementDb::open(&dir.path().join("test.redb")).unwrap());
        (ProductCatalog::new(db, 1), dir)
    }

    fn claims(value: serde_json::Value) -> TransactionClaims {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn configuration_wins_over_inference() {
        let (catalog, _dir) = temp_catalog();
        catalog
            .seed(&[ProductSeed {
                product_id: "com.app.credits10".to_string(),
                kind: ProductKind::Consumable,
                credits: Some(10),
                display_name: None,
            }])
            .unwrap();

        // The claim shape alone would infer a subscription.
        let classification = catalog
            .classify(&claims(json!({
                "transactionId": "tx_1",
                "productId": "com.app.credits10",
                "originalTransactionId": "orig_1"
            })))
            .unwrap();

        assert!(classification.is_configured());
        assert_eq!(classification.kind(), ProductKind::Consumable);
        assert_eq!(catalog.credits_for(&classification), 10);
    }

    #[test]
    fn lineage_or_expiry_infers_subscription() {
        let (catalog, _dir) = temp_catalog();

        let with_lineage = catalog
            .classify(&claims(json!({
                "transactionId": "tx_1",
                "productId": "com.app.sub",
                "originalTransactionId": "orig_1"
            })))
            .unwrap();
        assert_eq!(with_lineage.kind(), ProductKind::Subscription);

        let with_expiry = catalog
            .classify(&claims(json!({
                "transactionId": "tx_2",
                "productId": "com.app.sub",
                "expiresDate": 1_900_000_000_000i64
            })))
            .unwrap();
        assert_eq!(with_expiry.kind(), ProductKind::Subscription);
    }

    #[test]
    fn bare_purchase_infers_non_consumable() {
        let (catalog, _dir) = temp_catalog();
        let classification = catalog
            .classify(&claims(json!({
                "transactionId": "tx_1",
                "productId": "com.app.pro"
            })))
            .unwrap();

        assert!(!classification.is_configured());
        assert_eq!(classification.kind(), ProductKind::NonConsumable);
    }

    #[test]
    fn credits_fall_back_to_configured_default() {
        let (catalog, _dir) = temp_catalog();
        catalog
            .seed(&[ProductSeed {
                product_id: "com.app.credit".to_string(),
                kind: ProductKind::Consumable,
                credits: None,
                display_name: None,
            }])
            .unwrap();

        let classification = catalog
            .classify(&claims(json!({
                "transactionId": "tx_1",
                "productId": "com.app.credit"
            })))
            .unwrap();
        assert_eq!(catalog.credits_for(&classification), 1);
    }
}
