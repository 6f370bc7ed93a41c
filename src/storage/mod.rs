// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Entitlement Storage Module
//!
//! Persistent storage for verified transactions and the entitlement state
//! derived from them, backed by a single embedded redb database file.
//!
//! ## Durability Model
//!
//! - One ACID database file under the configured data directory
//! - Every engine write runs read-decide-write inside one write transaction,
//!   so redelivered receipts and notifications cannot double-apply
//! - Derived collections (subscription state, grants, ledger) are keyed so
//!   that replays land on the same row
//!
//! ## Storage Layout
//!
//! ```text
//! /data/entitlements.redb
//!   transactions             # canonical verified transactions, by transaction_id
//!   user_tx_index            # newest-first per-user transaction listing
//!   subscription_state       # one row per subscription lineage
//!   user_subscription_index  # per-user lineage listing
//!   non_consumable_grants    # (user, product) unlock rows
//!   consumable_ledger        # append-once credit entries, by transaction_id
//!   user_ledger_index        # per-user deltas for balance sums
//!   notification_log         # App Store server notifications, by UUID
//!   identities               # sign-in identities, by user_id
//!   products                 # product catalog
//!   audit_log                # newest-first audit events
//! ```

pub mod audit;
pub mod database;
pub mod records;

pub use audit::{AuditEvent, AuditEventType};
pub use database::{DbError, DbResult, EntitlementDb, StoreStats};
pub use records::{
    EntitlementStatus, ProductKind, StoredGrant, StoredIdentity, StoredLedgerEntry,
    StoredNotification, StoredProduct, StoredSubscription, StoredTransaction,
};
