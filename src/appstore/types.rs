// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Decoded StoreKit payload shapes.
//!
//! These mirror the claim sets Apple embeds in signed transactions and
//! App Store Server Notifications (v2). Every field is optional at this
//! layer; required-field enforcement happens in the claim normalizer so a
//! malformed payload is rejected after, not during, decoding. Unknown
//! fields are retained via flattened maps so the raw payload survives
//! re-serialization into the transaction record.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Which App Store environment issued a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Sandbox,
    Production,
}

impl Environment {
    /// Accepts both Apple's `"Sandbox"`/`"Production"` spelling and the
    /// lowercase form used in configuration and stored records.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Some(Self::Sandbox),
            "production" => Some(Self::Production),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claim set of a StoreKit 2 signed transaction (`signedTransactionInfo`).
///
/// Dates are millisecond epoch values, as Apple sends them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,

    /// Lineage id linking all renewals of one subscription purchase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_transaction_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_date: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_date: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_date: Option<i64>,

    /// `"Sandbox"` or `"Production"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    /// Everything else Apple includes (quantity, type, storefront, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Decoded App Store Server Notification (v2) envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    /// Platform-assigned unique id; the idempotency key for the outcome log.
    #[serde(
        rename = "notificationUUID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub notification_uuid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<NotificationData>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// `data` section of a notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_apple_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_transaction_id: Option<String>,

    /// Embedded signed transaction (JWS), when Apple includes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_transaction_info: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_renewal_info: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
