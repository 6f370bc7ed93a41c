// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # In-App Purchase Module
//!
//! The reconciliation core: claim normalization, product classification,
//! kind-specific entitlement grants, server notification reconciliation, and
//! the read-side status view. Everything here is idempotent against
//! redelivery; coordination lives in the storage layer's keyed writes, not
//! in process memory.

pub mod engine;
pub mod notifications;
pub mod products;
pub mod status;

pub use engine::{derive_status, EntitlementEngine, EntitlementError, VerifiedReceipt};
pub use notifications::{NotificationReconciler, Outcome};
pub use products::{Classification, ProductCatalog};
pub use status::{
    EntitlementSnapshot, StatusAggregator, TransactionSummary, DEFAULT_HISTORY_LIMIT,
    MAX_HISTORY_LIMIT,
};
