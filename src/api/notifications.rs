// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! App Store Server Notification endpoint.
//!
//! Apple redelivers aggressively and indefinitely on any non-success
//! response, so this boundary acknowledges every deliverable payload with
//! 200 and reports the real result only in the response body and the
//! notification log. The single exception is a request body without a
//! `signedPayload` field at all, which Apple never sends; that gets 400.

use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::iap::Outcome;
use crate::state::AppState;
use crate::storage::{AuditEvent, AuditEventType};

/// Acknowledgement body; mirrors the logged outcome.
#[derive(Debug, Serialize, ToSchema)]
pub struct NotificationAck {
    /// Whether the notification changed entitlement state.
    pub processed: bool,
    /// Why it did not, when it did not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn ack_from(outcome: &Outcome) -> NotificationAck {
    NotificationAck {
        processed: outcome.processed(),
        reason: outcome.reason().map(str::to_string),
    }
}

/// Receive an App Store server notification.
///
/// Unauthenticated at the HTTP layer; the payload itself is a signed JWS
/// and is verified before anything is applied.
#[utoipa::path(
    post,
    path = "/v1/notifications/appstore",
    tag = "Notifications",
    responses(
        (status = 200, description = "Notification acknowledged; body carries the outcome", body = NotificationAck),
        (status = 400, description = "Request body has no signedPayload field"),
    )
)]
pub async fn handle_appstore_notification(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<NotificationAck>, ApiError> {
    let signed_payload = body
        .get("signedPayload")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::bad_request("missing signedPayload"))?;

    let outcome = state.reconciler().process(signed_payload).await;

    match &outcome {
        Outcome::Processed {
            transaction_id,
            user_id,
        } => {
            let event = AuditEvent::new(AuditEventType::NotificationProcessed)
                .with_user(user_id)
                .with_resource("transaction", transaction_id);
            let _ = state.db.append_audit(&event);
        }
        Outcome::Error { message } => {
            tracing::warn!(error = %message, "notification processing failed, acknowledged anyway");
            let event =
                AuditEvent::new(AuditEventType::NotificationIgnored).failed(message.clone());
            let _ = state.db.append_audit(&event);
        }
        _ => {
            let event = AuditEvent::new(AuditEventType::NotificationIgnored)
                .with_details(serde_json::json!({ "reason": outcome.reason() }));
            let _ = state.db.append_audit(&event);
        }
    }

    Ok(Json(ack_from(&outcome)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processed_outcome_acks_with_no_reason() {
        let ack = ack_from(&Outcome::Processed {
            transaction_id: "tx_1".to_string(),
            user_id: "apple_u1".to_string(),
        });

        assert!(ack.processed);
        assert!(ack.reason.is_none());

        let json = serde_json::to_string(&ack).unwrap();
        assert_eq!(json, r#"{"processed":true}"#);
    }

    #[test]
    fn unmapped_notification_acks_with_reason() {
        let ack = ack_from(&Outcome::NoUserMapping);
        assert!(!ack.processed);
        assert_eq!(ack.reason.as_deref(), Some("no user mapping"));
    }

    #[test]
    fn metadata_only_notification_acks_with_reason() {
        let ack = ack_from(&Outcome::MissingPayload);
        assert!(!ack.processed);
        assert_eq!(ack.reason.as_deref(), Some("missing transaction payload"));
    }

    #[test]
    fn internal_error_still_acks() {
        let ack = ack_from(&Outcome::Error {
            message: "store unavailable".to_string(),
        });
        assert!(!ack.processed);
        assert_eq!(ack.reason.as_deref(), Some("store unavailable"));
    }
}
