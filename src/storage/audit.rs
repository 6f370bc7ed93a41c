// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for entitlement-changing operations.
//!
//! Receipt verifications, notification outcomes, authentication events, and
//! administrative actions are appended to the audit table, newest first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Receipt pipeline events
    ReceiptVerified,
    ReceiptRejected,

    // Notification events
    NotificationProcessed,
    NotificationIgnored,

    // Auth events
    SessionIssued,
    AuthFailure,

    // Admin events
    ProductUpserted,
    AdminAccess,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of event.
    pub event_type: AuditEventType,
    /// User who triggered the event (if known).
    pub user_id: Option<String>,
    /// Resource affected (transaction_id, product_id, etc.).
    pub resource_id: Option<String>,
    /// Resource type (transaction, product, notification, etc.).
    pub resource_type: Option<String>,
    /// Additional details as JSON.
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error message if operation failed.
    pub error: Option<String>,
}

impl AuditEvent {
    /// Create a new audit event.
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            user_id: None,
            resource_id: None,
            resource_type: None,
            details: None,
            success: true,
            error: None,
        }
    }

    /// Set the user ID.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the resource.
    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Add details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Helper macro for logging audit events.
///
/// Append failures are swallowed: losing an audit row must never fail the
/// request that produced it.
#[macro_export]
macro_rules! audit_log {
    ($db:expr, $event_type:expr, $user:expr) => {{
        let event = $crate::storage::AuditEvent::new($event_type).with_user(&$user.user_id);
        let _ = $db.append_audit(&event);
    }};
    ($db:expr, $event_type:expr, $user:expr, $resource_type:expr, $resource_id:expr) => {{
        let event = $crate::storage::AuditEvent::new($event_type)
            .with_user(&$user.user_id)
            .with_resource($resource_type, $resource_id);
        let _ = $db.append_audit(&event);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_audit_event() {
        let event = AuditEvent::new(AuditEventType::ReceiptVerified)
            .with_user("apple_u1")
            .with_resource("transaction", "tx_123");

        assert_eq!(event.event_type, AuditEventType::ReceiptVerified);
        assert_eq!(event.user_id, Some("apple_u1".to_string()));
        assert_eq!(event.resource_type, Some("transaction".to_string()));
        assert_eq!(event.resource_id, Some("tx_123".to_string()));
        assert!(event.success);
        assert!(event.error.is_none());
    }

    #[test]
    fn failed_event() {
        let event = AuditEvent::new(AuditEventType::AuthFailure)
            .with_user("apple_u1")
            .failed("token expired");

        assert!(!event.success);
        assert_eq!(event.error, Some("token expired".to_string()));
    }

    #[test]
    fn event_type_serializes_snake_case() {
        let json = serde_json::to_value(AuditEventType::NotificationProcessed).unwrap();
        assert_eq!(json, serde_json::json!("notification_processed"));
    }

    #[test]
    fn details_roundtrip() {
        let event = AuditEvent::new(AuditEventType::ProductUpserted)
            .with_details(serde_json::json!({"kind": "consumable", "credits": 10}));

        let json = serde_json::to_string(&event).unwrap();
        let parsed: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.details.unwrap()["credits"], 10);
    }
}
