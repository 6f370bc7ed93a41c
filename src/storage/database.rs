// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded entitlement database backed by redb (pure Rust, ACID).
//!
//! Every idempotency rule of the engine bottoms out here: each write method
//! performs its read-decide-write sequence inside a single serialized write
//! transaction, so duplicate deliveries racing on the same key cannot
//! interleave.
//!
//! ## Table Layout
//!
//! - `transactions`: transaction_id → serialized StoredTransaction
//! - `user_tx_index`: composite key (user_id|!purchase_millis|transaction_id) → product_id
//! - `subscription_state`: original_transaction_id → serialized StoredSubscription
//! - `user_subscription_index`: composite key (user_id|original_transaction_id) → product_id
//! - `non_consumable_grants`: composite key (user_id|product_id) → serialized StoredGrant
//! - `consumable_ledger`: transaction_id → serialized StoredLedgerEntry
//! - `user_ledger_index`: composite key (user_id|!purchase_millis|transaction_id) → credit delta
//! - `notification_log`: notification_id → serialized StoredNotification
//! - `identities`: user_id → serialized StoredIdentity
//! - `products`: product_id → serialized StoredProduct
//! - `audit_log`: composite key (!timestamp_millis|event_id) → serialized AuditEvent

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::Serialize;
use utoipa::ToSchema;

use super::audit::AuditEvent;
use super::records::{
    StoredGrant, StoredIdentity, StoredLedgerEntry, StoredNotification, StoredProduct,
    StoredSubscription, StoredTransaction,
};

// =============================================================================
// Table Definitions
// =============================================================================

const TRANSACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("transactions");

/// Key format: `user_id|!purchase_millis_be|transaction_id` for
/// newest-first range scans.
const USER_TX_INDEX: TableDefinition<&[u8], &str> = TableDefinition::new("user_tx_index");

const SUBSCRIPTION_STATE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("subscription_state");

/// Key format: `user_id|original_transaction_id`.
const USER_SUBSCRIPTION_INDEX: TableDefinition<&[u8], &str> =
    TableDefinition::new("user_subscription_index");

/// Key format: `user_id|product_id`. Row presence is the entitlement.
const NON_CONSUMABLE_GRANTS: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("non_consumable_grants");

const CONSUMABLE_LEDGER: TableDefinition<&str, &[u8]> = TableDefinition::new("consumable_ledger");

/// Key format: `user_id|!purchase_millis_be|transaction_id` → signed delta.
/// The balance is the sum of a prefix scan; rows are never mutated.
const USER_LEDGER_INDEX: TableDefinition<&[u8], i64> = TableDefinition::new("user_ledger_index");

const NOTIFICATION_LOG: TableDefinition<&str, &[u8]> = TableDefinition::new("notification_log");

const IDENTITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("identities");

const PRODUCTS: TableDefinition<&str, &[u8]> = TableDefinition::new("products");

/// Key format: `!timestamp_millis_be|event_id` for newest-first scans.
const AUDIT_LOG: TableDefinition<&[u8], &[u8]> = TableDefinition::new("audit_log");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Index Key Helpers
// =============================================================================

/// Build a composite key `scope | inverted_millis_be | id`.
///
/// The inverted timestamp makes a forward range scan yield newest-first.
fn make_time_key(scope: &str, timestamp_millis: i64, id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(scope.len() + 1 + 8 + 1 + id.len());
    key.extend_from_slice(scope.as_bytes());
    key.push(b'|');
    key.extend_from_slice(&(!timestamp_millis as u64).to_be_bytes());
    key.push(b'|');
    key.extend_from_slice(id.as_bytes());
    key
}

/// Build a composite key `a|b`.
fn make_pair_key(a: &str, b: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(a.len() + 1 + b.len());
    key.extend_from_slice(a.as_bytes());
    key.push(b'|');
    key.extend_from_slice(b.as_bytes());
    key
}

/// Build a prefix for range scanning all keys of a scope.
fn make_prefix(scope: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(scope.len() + 1);
    prefix.extend_from_slice(scope.as_bytes());
    prefix.push(b'|');
    prefix
}

/// Upper bound for a prefix range scan (prefix with 0xFF bytes appended).
fn make_prefix_end(scope: &str) -> Vec<u8> {
    let mut end = Vec::with_capacity(scope.len() + 1 + 20);
    end.extend_from_slice(scope.as_bytes());
    end.push(b'|');
    end.extend_from_slice(&[0xFF; 20]);
    end
}

/// Extract the id portion of a `scope|!millis|id` key.
fn extract_id_from_time_key(key: &[u8]) -> Option<String> {
    let mut pipe_count = 0;
    for (i, &b) in key.iter().enumerate() {
        if b == b'|' {
            pipe_count += 1;
            if pipe_count == 2 {
                return String::from_utf8(key[i + 1..].to_vec()).ok();
            }
        }
    }
    None
}

// =============================================================================
// Row Counts
// =============================================================================

/// Table sizes for the admin stats endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StoreStats {
    pub transactions: u64,
    pub subscriptions: u64,
    pub grants: u64,
    pub ledger_entries: u64,
    pub notifications: u64,
    pub identities: u64,
    pub products: u64,
}

// =============================================================================
// EntitlementDb
// =============================================================================

/// Embedded ACID entitlement store.
pub struct EntitlementDb {
    db: Database,
}

impl EntitlementDb {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> DbResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(TRANSACTIONS)?;
            let _ = write_txn.open_table(USER_TX_INDEX)?;
            let _ = write_txn.open_table(SUBSCRIPTION_STATE)?;
            let _ = write_txn.open_table(USER_SUBSCRIPTION_INDEX)?;
            let _ = write_txn.open_table(NON_CONSUMABLE_GRANTS)?;
            let _ = write_txn.open_table(CONSUMABLE_LEDGER)?;
            let _ = write_txn.open_table(USER_LEDGER_INDEX)?;
            let _ = write_txn.open_table(NOTIFICATION_LOG)?;
            let _ = write_txn.open_table(IDENTITIES)?;
            let _ = write_txn.open_table(PRODUCTS)?;
            let _ = write_txn.open_table(AUDIT_LOG)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Cheap liveness probe for the readiness endpoint.
    pub fn ping(&self) -> DbResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(TRANSACTIONS)?;
        Ok(())
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Idempotent transaction write: insert when unknown, otherwise merge the
    /// redelivery into the stored record (identity fields win, mutable fields
    /// follow the incoming copy). Returns the persisted record.
    pub fn upsert_transaction(
        &self,
        incoming: &StoredTransaction,
    ) -> DbResult<StoredTransaction> {
        let write_txn = self.db.begin_write()?;
        let merged = {
            let mut tx_table = write_txn.open_table(TRANSACTIONS)?;
            let mut idx_table = write_txn.open_table(USER_TX_INDEX)?;

            let existing_bytes = tx_table
                .get(incoming.transaction_id.as_str())?
                .map(|v| v.value().to_vec());

            let merged = match existing_bytes {
                Some(bytes) => {
                    let mut stored: StoredTransaction = serde_json::from_slice(&bytes)?;
                    let old_key = make_time_key(
                        &stored.user_id,
                        stored.purchase_date.timestamp_millis(),
                        &stored.transaction_id,
                    );
                    stored.absorb_redelivery(incoming);
                    let new_key = make_time_key(
                        &stored.user_id,
                        stored.purchase_date.timestamp_millis(),
                        &stored.transaction_id,
                    );
                    // A redelivery may move the purchase date; drop the stale
                    // index entry so the transaction is listed exactly once.
                    if new_key != old_key {
                        idx_table.remove(old_key.as_slice())?;
                    }
                    idx_table.insert(new_key.as_slice(), stored.product_id.as_str())?;
                    stored
                }
                None => {
                    let key = make_time_key(
                        &incoming.user_id,
                        incoming.purchase_date.timestamp_millis(),
                        &incoming.transaction_id,
                    );
                    idx_table.insert(key.as_slice(), incoming.product_id.as_str())?;
                    incoming.clone()
                }
            };

            let json = serde_json::to_vec(&merged)?;
            tx_table.insert(merged.transaction_id.as_str(), json.as_slice())?;
            merged
        };
        write_txn.commit()?;
        Ok(merged)
    }

    pub fn get_transaction(&self, transaction_id: &str) -> DbResult<Option<StoredTransaction>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRANSACTIONS)?;
        match table.get(transaction_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Newest-first transaction history for a user, bounded by `limit`.
    pub fn list_recent_transactions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> DbResult<Vec<StoredTransaction>> {
        let read_txn = self.db.begin_read()?;
        let idx_table = read_txn.open_table(USER_TX_INDEX)?;
        let tx_table = read_txn.open_table(TRANSACTIONS)?;

        let prefix = make_prefix(user_id);
        let prefix_end = make_prefix_end(user_id);

        let mut results = Vec::with_capacity(limit);
        for entry in idx_table.range(prefix.as_slice()..prefix_end.as_slice())? {
            let entry = entry?;
            let key_bytes = entry.0.value().to_vec();

            if let Some(transaction_id) = extract_id_from_time_key(&key_bytes) {
                if let Some(value) = tx_table.get(transaction_id.as_str())? {
                    results.push(serde_json::from_slice(value.value())?);
                }
            }

            if results.len() >= limit {
                break;
            }
        }

        Ok(results)
    }

    // =========================================================================
    // Subscription State
    // =========================================================================

    /// Overwrite a subscription lineage row unless the stored row reflects a
    /// temporally newer transaction. Returns whether the write applied.
    ///
    /// Equal purchase dates apply: a redelivery of the current transaction
    /// must converge to the same row, not be mistaken for regression.
    pub fn upsert_subscription_if_newer(&self, sub: &StoredSubscription) -> DbResult<bool> {
        let write_txn = self.db.begin_write()?;
        let applied = {
            let mut table = write_txn.open_table(SUBSCRIPTION_STATE)?;

            let existing_bytes = table
                .get(sub.original_transaction_id.as_str())?
                .map(|v| v.value().to_vec());

            let stale = match existing_bytes {
                Some(bytes) => {
                    let existing: StoredSubscription = serde_json::from_slice(&bytes)?;
                    existing.purchase_date > sub.purchase_date
                }
                None => false,
            };

            if stale {
                false
            } else {
                let json = serde_json::to_vec(sub)?;
                table.insert(sub.original_transaction_id.as_str(), json.as_slice())?;

                let mut idx_table = write_txn.open_table(USER_SUBSCRIPTION_INDEX)?;
                let key = make_pair_key(&sub.user_id, &sub.original_transaction_id);
                idx_table.insert(key.as_slice(), sub.product_id.as_str())?;
                true
            }
        };
        write_txn.commit()?;
        Ok(applied)
    }

    pub fn get_subscription(
        &self,
        original_transaction_id: &str,
    ) -> DbResult<Option<StoredSubscription>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SUBSCRIPTION_STATE)?;
        match table.get(original_transaction_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn list_subscriptions(&self, user_id: &str) -> DbResult<Vec<StoredSubscription>> {
        let read_txn = self.db.begin_read()?;
        let idx_table = read_txn.open_table(USER_SUBSCRIPTION_INDEX)?;
        let sub_table = read_txn.open_table(SUBSCRIPTION_STATE)?;

        let prefix = make_prefix(user_id);
        let prefix_end = make_prefix_end(user_id);

        let mut results = Vec::new();
        for entry in idx_table.range(prefix.as_slice()..prefix_end.as_slice())? {
            let entry = entry?;
            let key_bytes = entry.0.value().to_vec();
            let lineage_id = &key_bytes[prefix.len()..];

            if let Ok(lineage_id) = std::str::from_utf8(lineage_id) {
                if let Some(value) = sub_table.get(lineage_id)? {
                    results.push(serde_json::from_slice(value.value())?);
                }
            }
        }

        Ok(results)
    }

    // =========================================================================
    // Non-Consumable Grants
    // =========================================================================

    /// First grant wins; later transactions for the same (user, product) are
    /// no-ops. Returns whether a row was inserted.
    pub fn insert_grant_if_absent(&self, grant: &StoredGrant) -> DbResult<bool> {
        let write_txn = self.db.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(NON_CONSUMABLE_GRANTS)?;
            let key = make_pair_key(&grant.user_id, &grant.product_id);

            if table.get(key.as_slice())?.is_some() {
                false
            } else {
                let json = serde_json::to_vec(grant)?;
                table.insert(key.as_slice(), json.as_slice())?;
                true
            }
        };
        write_txn.commit()?;
        Ok(inserted)
    }

    pub fn list_grants(&self, user_id: &str) -> DbResult<Vec<StoredGrant>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(NON_CONSUMABLE_GRANTS)?;

        let prefix = make_prefix(user_id);
        let prefix_end = make_prefix_end(user_id);

        let mut results = Vec::new();
        for entry in table.range(prefix.as_slice()..prefix_end.as_slice())? {
            let entry = entry?;
            results.push(serde_json::from_slice(entry.1.value())?);
        }

        Ok(results)
    }

    // =========================================================================
    // Consumable Ledger
    // =========================================================================

    /// A transaction credits the balance at most once. Returns whether the
    /// entry (and its balance index row) was appended.
    pub fn insert_ledger_entry_if_absent(&self, entry: &StoredLedgerEntry) -> DbResult<bool> {
        let write_txn = self.db.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(CONSUMABLE_LEDGER)?;

            if table.get(entry.transaction_id.as_str())?.is_some() {
                false
            } else {
                let json = serde_json::to_vec(entry)?;
                table.insert(entry.transaction_id.as_str(), json.as_slice())?;

                let mut idx_table = write_txn.open_table(USER_LEDGER_INDEX)?;
                let key = make_time_key(
                    &entry.user_id,
                    entry.purchase_date.timestamp_millis(),
                    &entry.transaction_id,
                );
                idx_table.insert(key.as_slice(), entry.delta)?;
                true
            }
        };
        write_txn.commit()?;
        Ok(inserted)
    }

    /// Sum of the user's ledger deltas, computed at read time.
    pub fn consumable_balance(&self, user_id: &str) -> DbResult<i64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USER_LEDGER_INDEX)?;

        let prefix = make_prefix(user_id);
        let prefix_end = make_prefix_end(user_id);

        let mut balance = 0i64;
        for entry in table.range(prefix.as_slice()..prefix_end.as_slice())? {
            let entry = entry?;
            balance += entry.1.value();
        }

        Ok(balance)
    }

    // =========================================================================
    // Notification Log
    // =========================================================================

    /// Upsert by notification id; a redelivery overwrites the row so the
    /// latest payload and outcome are retained.
    pub fn upsert_notification(&self, record: &StoredNotification) -> DbResult<()> {
        let json = serde_json::to_vec(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(NOTIFICATION_LOG)?;
            table.insert(record.notification_id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_notification(&self, notification_id: &str) -> DbResult<Option<StoredNotification>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(NOTIFICATION_LOG)?;
        match table.get(notification_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Identities
    // =========================================================================

    pub fn upsert_identity(&self, identity: &StoredIdentity) -> DbResult<()> {
        let json = serde_json::to_vec(identity)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(IDENTITIES)?;
            table.insert(identity.user_id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_identity(&self, user_id: &str) -> DbResult<Option<StoredIdentity>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(IDENTITIES)?;
        match table.get(user_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Product Catalog
    // =========================================================================

    pub fn upsert_product(&self, product: &StoredProduct) -> DbResult<()> {
        let json = serde_json::to_vec(product)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PRODUCTS)?;
            table.insert(product.product_id.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_product(&self, product_id: &str) -> DbResult<Option<StoredProduct>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PRODUCTS)?;
        match table.get(product_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn list_products(&self) -> DbResult<Vec<StoredProduct>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PRODUCTS)?;

        let mut results = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            results.push(serde_json::from_slice(entry.1.value())?);
        }

        Ok(results)
    }

    // =========================================================================
    // Audit Log
    // =========================================================================

    pub fn append_audit(&self, event: &AuditEvent) -> DbResult<()> {
        let json = serde_json::to_vec(event)?;
        let key = make_time_key("", event.timestamp.timestamp_millis(), &event.event_id);
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(AUDIT_LOG)?;
            table.insert(key.as_slice(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Newest-first audit events within `[from, to]`, bounded by `limit`.
    pub fn list_audit_range(
        &self,
        from: chrono::DateTime<chrono::Utc>,
        to: chrono::DateTime<chrono::Utc>,
        limit: usize,
    ) -> DbResult<Vec<AuditEvent>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_LOG)?;

        // Inverted timestamps sort newest first, so the scan starts at `to`
        // and ends past everything at `from`.
        let start = make_prefix_from_millis(to.timestamp_millis());
        let end = make_prefix_end_from_millis(from.timestamp_millis());

        let mut results = Vec::with_capacity(limit.min(64));
        for entry in table.range(start.as_slice()..end.as_slice())? {
            let entry = entry?;
            results.push(serde_json::from_slice(entry.1.value())?);
            if results.len() >= limit {
                break;
            }
        }

        Ok(results)
    }

    // =========================================================================
    // Stats
    // =========================================================================

    pub fn stats(&self) -> DbResult<StoreStats> {
        let read_txn = self.db.begin_read()?;
        Ok(StoreStats {
            transactions: read_txn.open_table(TRANSACTIONS)?.len()?,
            subscriptions: read_txn.open_table(SUBSCRIPTION_STATE)?.len()?,
            grants: read_txn.open_table(NON_CONSUMABLE_GRANTS)?.len()?,
            ledger_entries: read_txn.open_table(CONSUMABLE_LEDGER)?.len()?,
            notifications: read_txn.open_table(NOTIFICATION_LOG)?.len()?,
            identities: read_txn.open_table(IDENTITIES)?.len()?,
            products: read_txn.open_table(PRODUCTS)?.len()?,
        })
    }
}

/// Start bound for a time-keyed scan anchored at a millisecond timestamp
/// (audit log keys use an empty scope).
fn make_prefix_from_millis(timestamp_millis: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 8);
    key.push(b'|');
    key.extend_from_slice(&(!timestamp_millis as u64).to_be_bytes());
    key
}

fn make_prefix_end_from_millis(timestamp_millis: i64) -> Vec<u8> {
    let mut key = make_prefix_from_millis(timestamp_millis);
    key.extend_from_slice(&[0xFF; 20]);
    key
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appstore::Environment;
    use crate::storage::records::{EntitlementStatus, ProductKind};
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn temp_db() -> (EntitlementDb, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = EntitlementDb::open(&dir.path().join("test.redb")).unwrap();
        (db, dir)
    }

    fn sample_tx(id: &str, user: &str) -> StoredTransaction {
        let now = Utc::now();
        StoredTransaction {
            transaction_id: id.to_string(),
            original_transaction_id: None,
            user_id: user.to_string(),
            product_id: "com.app.credits10".to_string(),
            kind: ProductKind::Consumable,
            status: EntitlementStatus::Active,
            purchase_date: now,
            expires_date: None,
            revocation_date: None,
            environment: Environment::Sandbox,
            raw: json!({"transactionId": id}),
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_sub(lineage: &str, user: &str, purchase: chrono::DateTime<Utc>) -> StoredSubscription {
        StoredSubscription {
            original_transaction_id: lineage.to_string(),
            user_id: user.to_string(),
            product_id: "com.app.sub.monthly".to_string(),
            status: EntitlementStatus::Active,
            expires_date: Some(purchase + Duration::days(30)),
            purchase_date: purchase,
            last_transaction_id: format!("tx_for_{lineage}"),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_and_get_transaction() {
        let (db, _dir) = temp_db();
        let tx = sample_tx("tx_1", "apple_u1");

        let stored = db.upsert_transaction(&tx).unwrap();
        assert_eq!(stored.transaction_id, "tx_1");

        let retrieved = db.get_transaction("tx_1").unwrap().unwrap();
        assert_eq!(retrieved.user_id, "apple_u1");
        assert_eq!(retrieved.product_id, "com.app.credits10");

        assert!(db.get_transaction("tx_unknown").unwrap().is_none());
    }

    #[test]
    fn redelivery_merges_without_reowning() {
        let (db, _dir) = temp_db();
        let tx = sample_tx("tx_1", "apple_u1");
        db.upsert_transaction(&tx).unwrap();

        let mut redelivery = sample_tx("tx_1", "apple_other");
        redelivery.status = EntitlementStatus::Revoked;
        redelivery.revocation_date = Some(Utc::now());

        let merged = db.upsert_transaction(&redelivery).unwrap();
        assert_eq!(merged.user_id, "apple_u1");
        assert_eq!(merged.status, EntitlementStatus::Revoked);

        // Exactly one row and one index entry.
        let listed = db.list_recent_transactions("apple_u1", 10).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(db
            .list_recent_transactions("apple_other", 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn moved_purchase_date_keeps_single_index_entry() {
        let (db, _dir) = temp_db();
        let tx = sample_tx("tx_1", "apple_u1");
        db.upsert_transaction(&tx).unwrap();

        let mut redelivery = sample_tx("tx_1", "apple_u1");
        redelivery.purchase_date = tx.purchase_date + Duration::seconds(90);
        db.upsert_transaction(&redelivery).unwrap();

        let listed = db.list_recent_transactions("apple_u1", 10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(
            listed[0].purchase_date.timestamp_millis(),
            redelivery.purchase_date.timestamp_millis()
        );
    }

    #[test]
    fn recent_transactions_are_newest_first_and_bounded() {
        let (db, _dir) = temp_db();
        let base = Utc::now();

        for i in 0..5 {
            let mut tx = sample_tx(&format!("tx_{i}"), "apple_u1");
            tx.purchase_date = base + Duration::seconds(i);
            db.upsert_transaction(&tx).unwrap();
        }

        let listed = db.list_recent_transactions("apple_u1", 3).unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].transaction_id, "tx_4");
        assert_eq!(listed[1].transaction_id, "tx_3");
        assert_eq!(listed[2].transaction_id, "tx_2");
    }

    #[test]
    fn subscription_guard_skips_older_transactions() {
        let (db, _dir) = temp_db();
        let t0 = Utc::now();

        let current = sample_sub("orig_1", "apple_u1", t0 + Duration::days(30));
        assert!(db.upsert_subscription_if_newer(&current).unwrap());

        // A redelivery of the original (older) purchase must not regress.
        let stale = sample_sub("orig_1", "apple_u1", t0);
        assert!(!db.upsert_subscription_if_newer(&stale).unwrap());

        let stored = db.get_subscription("orig_1").unwrap().unwrap();
        assert_eq!(
            stored.purchase_date.timestamp_millis(),
            (t0 + Duration::days(30)).timestamp_millis()
        );

        // Equal purchase date converges (idempotent redelivery).
        let replay = sample_sub("orig_1", "apple_u1", t0 + Duration::days(30));
        assert!(db.upsert_subscription_if_newer(&replay).unwrap());

        // Newer purchase advances.
        let renewal = sample_sub("orig_1", "apple_u1", t0 + Duration::days(60));
        assert!(db.upsert_subscription_if_newer(&renewal).unwrap());
        let stored = db.get_subscription("orig_1").unwrap().unwrap();
        assert_eq!(stored.last_transaction_id, "tx_for_orig_1");
        assert_eq!(
            stored.purchase_date.timestamp_millis(),
            (t0 + Duration::days(60)).timestamp_millis()
        );
    }

    #[test]
    fn list_subscriptions_by_user() {
        let (db, _dir) = temp_db();
        let t0 = Utc::now();

        db.upsert_subscription_if_newer(&sample_sub("orig_1", "apple_u1", t0))
            .unwrap();
        db.upsert_subscription_if_newer(&sample_sub("orig_2", "apple_u1", t0))
            .unwrap();
        db.upsert_subscription_if_newer(&sample_sub("orig_3", "apple_u2", t0))
            .unwrap();

        let subs = db.list_subscriptions("apple_u1").unwrap();
        assert_eq!(subs.len(), 2);
        assert!(db.list_subscriptions("apple_nobody").unwrap().is_empty());
    }

    #[test]
    fn grants_are_first_wins() {
        let (db, _dir) = temp_db();
        let grant = StoredGrant {
            user_id: "apple_u1".to_string(),
            product_id: "com.app.pro".to_string(),
            transaction_id: "tx_1".to_string(),
            granted_at: Utc::now(),
        };

        assert!(db.insert_grant_if_absent(&grant).unwrap());

        let mut dup = grant.clone();
        dup.transaction_id = "tx_2".to_string();
        assert!(!db.insert_grant_if_absent(&dup).unwrap());

        let grants = db.list_grants("apple_u1").unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].transaction_id, "tx_1");
    }

    #[test]
    fn ledger_credits_each_transaction_once() {
        let (db, _dir) = temp_db();
        let tx = sample_tx("tx_1", "apple_u1");
        let entry = StoredLedgerEntry::from_transaction(&tx, 10);

        assert!(db.insert_ledger_entry_if_absent(&entry).unwrap());
        assert!(!db.insert_ledger_entry_if_absent(&entry).unwrap());
        assert!(!db.insert_ledger_entry_if_absent(&entry).unwrap());
        assert_eq!(db.consumable_balance("apple_u1").unwrap(), 10);

        let tx2 = sample_tx("tx_2", "apple_u1");
        let entry2 = StoredLedgerEntry::from_transaction(&tx2, 5);
        assert!(db.insert_ledger_entry_if_absent(&entry2).unwrap());
        assert_eq!(db.consumable_balance("apple_u1").unwrap(), 15);

        // Negative deltas (adjustments) subtract.
        let tx3 = sample_tx("tx_3", "apple_u1");
        let entry3 = StoredLedgerEntry::from_transaction(&tx3, -4);
        assert!(db.insert_ledger_entry_if_absent(&entry3).unwrap());
        assert_eq!(db.consumable_balance("apple_u1").unwrap(), 11);

        assert_eq!(db.consumable_balance("apple_nobody").unwrap(), 0);
    }

    #[test]
    fn notification_log_upsert_retains_latest_payload() {
        let (db, _dir) = temp_db();
        let first = StoredNotification {
            notification_id: "uuid-1".to_string(),
            notification_type: Some("DID_RENEW".to_string()),
            subtype: None,
            user_id: None,
            transaction_id: None,
            processed: false,
            reason: Some("no user mapping".to_string()),
            raw: json!({"delivery": 1}),
            received_at: Utc::now(),
        };
        db.upsert_notification(&first).unwrap();

        let mut second = first.clone();
        second.processed = true;
        second.reason = None;
        second.transaction_id = Some("tx_9".to_string());
        second.raw = json!({"delivery": 2});
        db.upsert_notification(&second).unwrap();

        let stored = db.get_notification("uuid-1").unwrap().unwrap();
        assert!(stored.processed);
        assert_eq!(stored.raw["delivery"], 2);
        assert_eq!(db.stats().unwrap().notifications, 1);
    }

    #[test]
    fn identity_roundtrip() {
        let (db, _dir) = temp_db();
        let identity = StoredIdentity {
            user_id: "apple_subject1".to_string(),
            provider: "apple".to_string(),
            subject: "subject1".to_string(),
            email: None,
            created_at: Utc::now(),
            last_login_at: Utc::now(),
        };
        db.upsert_identity(&identity).unwrap();

        let mut updated = identity.clone();
        updated.email = Some("u@example.com".to_string());
        db.upsert_identity(&updated).unwrap();

        let stored = db.get_identity("apple_subject1").unwrap().unwrap();
        assert_eq!(stored.email.as_deref(), Some("u@example.com"));
        assert!(db.get_identity("google_nobody").unwrap().is_none());
    }

    #[test]
    fn product_catalog_roundtrip() {
        let (db, _dir) = temp_db();
        let product = StoredProduct {
            product_id: "com.app.credits10".to_string(),
            kind: ProductKind::Consumable,
            credits: Some(10),
            display_name: None,
            updated_at: Utc::now(),
        };
        db.upsert_product(&product).unwrap();

        let stored = db.get_product("com.app.credits10").unwrap().unwrap();
        assert_eq!(stored.credits, Some(10));
        assert_eq!(db.list_products().unwrap().len(), 1);
        assert!(db.get_product("com.app.unknown").unwrap().is_none());
    }

    #[test]
    fn audit_range_scan_is_newest_first() {
        let (db, _dir) = temp_db();
        let base = Utc::now();

        for i in 0..4 {
            let mut event = AuditEvent::new(crate::storage::audit::AuditEventType::ReceiptVerified);
            event.timestamp = base + Duration::seconds(i);
            db.append_audit(&event).unwrap();
        }

        let events = db
            .list_audit_range(base - Duration::minutes(1), base + Duration::minutes(1), 10)
            .unwrap();
        assert_eq!(events.len(), 4);
        assert!(events[0].timestamp >= events[3].timestamp);

        let bounded = db
            .list_audit_range(base - Duration::minutes(1), base + Duration::minutes(1), 2)
            .unwrap();
        assert_eq!(bounded.len(), 2);

        // Events outside the window are excluded.
        let none = db
            .list_audit_range(base - Duration::hours(2), base - Duration::hours(1), 10)
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn stats_reflect_table_sizes() {
        let (db, _dir) = temp_db();
        db.upsert_transaction(&sample_tx("tx_1", "apple_u1")).unwrap();
        db.upsert_transaction(&sample_tx("tx_2", "apple_u1")).unwrap();
        db.upsert_subscription_if_newer(&sample_sub("orig_1", "apple_u1", Utc::now()))
            .unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.transactions, 2);
        assert_eq!(stats.subscriptions, 1);
        assert_eq!(stats.grants, 0);
    }

    #[test]
    fn time_key_orders_newest_first() {
        let key_old = make_time_key("user", 1_000, "tx1");
        let key_new = make_time_key("user", 2_000, "tx2");
        assert!(key_new < key_old, "newer timestamps must sort first");
    }
}
