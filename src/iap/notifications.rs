// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Server notification reconciliation.
//!
//! Notifications arrive at least once, in no particular order, and often for
//! transactions this service has never seen. The reconciler attributes each
//! one to a known user, replays the verify pipeline when it can obtain the
//! underlying signed transaction, and records the outcome keyed by the
//! platform's notification UUID.
//!
//! The outcome is internal; the transport boundary above this module always
//! acknowledges so the platform does not redeliver indefinitely.

use std::sync::Arc;

use chrono::Utc;

use crate::appstore::{
    AppStoreClient, Environment, NotificationData, NotificationPayload, ReceiptVerifier,
    TransactionClaims,
};
use crate::storage::{DbResult, EntitlementDb, StoredNotification};

use super::engine::EntitlementEngine;

const REASON_NO_USER: &str = "no user mapping";
const REASON_MISSING_PAYLOAD: &str = "missing transaction payload";

/// Terminal result of reconciling one notification delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The underlying transaction was verified and applied.
    Processed {
        transaction_id: String,
        user_id: String,
    },
    /// Neither lineage nor transaction id matched anything we know.
    NoUserMapping,
    /// A user matched but no signed transaction could be obtained.
    MissingPayload,
    /// Processing failed; the message is recorded, never surfaced as a
    /// transport error.
    Error { message: String },
}

impl Outcome {
    pub fn processed(&self) -> bool {
        matches!(self, Outcome::Processed { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Processed { .. } => None,
            Outcome::NoUserMapping => Some(REASON_NO_USER),
            Outcome::MissingPayload => Some(REASON_MISSING_PAYLOAD),
            Outcome::Error { message } => Some(message),
        }
    }

    fn transaction_id(&self) -> Option<&str> {
        match self {
            Outcome::Processed { transaction_id, .. } => Some(transaction_id),
            _ => None,
        }
    }
}

/// Maps inbound notifications onto entitlement state.
pub struct NotificationReconciler {
    db: Arc<EntitlementDb>,
    verifier: Arc<ReceiptVerifier>,
    appstore: Option<Arc<AppStoreClient>>,
    engine: EntitlementEngine,
    default_environment: Environment,
}

impl NotificationReconciler {
    pub fn new(
        db: Arc<EntitlementDb>,
        verifier: Arc<ReceiptVerifier>,
        appstore: Option<Arc<AppStoreClient>>,
        engine: EntitlementEngine,
        default_environment: Environment,
    ) -> Self {
        Self {
            db,
            verifier,
            appstore,
            engine,
            default_environment,
        }
    }

    /// Reconcile one signed notification payload.
    ///
    /// Infallible by contract: every failure mode collapses into an
    /// [`Outcome`], and every keyed delivery leaves exactly one outcome row.
    pub async fn process(&self, signed_payload: &str) -> Outcome {
        let payload = match self.verifier.verify_notification(signed_payload).await {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "discarding unverifiable notification");
                return Outcome::Error {
                    message: format!("notification rejected: {err}"),
                };
            }
        };

        let Some(notification_id) = payload.notification_uuid.clone() else {
            // Without the platform UUID there is no idempotency key, so the
            // delivery is acknowledged but cannot be logged.
            tracing::warn!(
                notification_type = payload.notification_type.as_deref().unwrap_or("unknown"),
                "notification carries no UUID"
            );
            return Outcome::Error {
                message: "missing notification identifier".to_string(),
            };
        };

        let data = payload.data.clone().unwrap_or_default();

        // Decode the embedded transaction first: it may carry the lineage
        // ids the data section omitted.
        let embedded = match &data.signed_transaction_info {
            Some(token) => match self.verifier.verify_transaction(token).await {
                Ok(claims) => Some(claims),
                Err(err) => {
                    let outcome = Outcome::Error {
                        message: format!("embedded transaction rejected: {err}"),
                    };
                    self.log_outcome(&notification_id, &payload, None, &outcome);
                    return outcome;
                }
            },
            None => None,
        };

        let user_id = match self.resolve_user(&data, embedded.as_ref()) {
            Ok(user_id) => user_id,
            Err(err) => {
                let outcome = Outcome::Error {
                    message: format!("user lookup failed: {err}"),
                };
                self.log_outcome(&notification_id, &payload, None, &outcome);
                return outcome;
            }
        };

        let Some(user_id) = user_id else {
            let outcome = Outcome::NoUserMapping;
            self.log_outcome(&notification_id, &payload, None, &outcome);
            return outcome;
        };

        let outcome = self.apply(&user_id, &data, embedded).await;
        self.log_outcome(&notification_id, &payload, Some(&user_id), &outcome);
        outcome
    }

    /// Attribute the notification to a known user: subscription lineage
    /// first, then the transaction ledger.
    fn resolve_user(
        &self,
        data: &NotificationData,
        embedded: Option<&TransactionClaims>,
    ) -> DbResult<Option<String>> {
        let lineage = data
            .original_transaction_id
            .as_deref()
            .or_else(|| embedded.and_then(|claims| claims.original_transaction_id.as_deref()));
        if let Some(lineage) = lineage {
            if let Some(sub) = self.db.get_subscription(lineage)? {
                return Ok(Some(sub.user_id));
            }
        }

        let transaction_id = data
            .transaction_id
            .as_deref()
            .or_else(|| embedded.and_then(|claims| claims.transaction_id.as_deref()));
        if let Some(transaction_id) = transaction_id {
            if let Some(tx) = self.db.get_transaction(transaction_id)? {
                return Ok(Some(tx.user_id));
            }
        }

        Ok(None)
    }

    /// Run the verify pipeline for the resolved user, fetching the signed
    /// transaction from the platform when the payload only references it.
    async fn apply(
        &self,
        user_id: &str,
        data: &NotificationData,
        embedded: Option<TransactionClaims>,
    ) -> Outcome {
        let claims = match embedded {
            Some(claims) => claims,
            None => match self.fetch_referenced_transaction(data).await {
                Ok(Some(claims)) => claims,
                Ok(None) => return Outcome::MissingPayload,
                Err(message) => return Outcome::Error { message },
            },
        };

        match self.engine.process_claims(user_id, &claims) {
            Ok(receipt) => Outcome::Processed {
                transaction_id: receipt.transaction_id,
                user_id: user_id.to_string(),
            },
            Err(err) => Outcome::Error {
                message: err.to_string(),
            },
        }
    }

    /// Some notification subtypes reference a transaction without embedding
    /// it. When the platform API client is configured, chase the reference;
    /// otherwise the payload counts as missing.
    async fn fetch_referenced_transaction(
        &self,
        data: &NotificationData,
    ) -> Result<Option<TransactionClaims>, String> {
        let (Some(client), Some(transaction_id)) = (&self.appstore, &data.transaction_id) else {
            return Ok(None);
        };

        let environment = data
            .environment
            .as_deref()
            .and_then(Environment::parse)
            .unwrap_or(self.default_environment);

        let token = client
            .fetch_signed_transaction(transaction_id, environment)
            .await
            .map_err(|err| format!("transaction lookup failed: {err}"))?;

        match token {
            Some(token) => self
                .verifier
                .verify_transaction(&token)
                .await
                .map(Some)
                .map_err(|err| format!("fetched transaction rejected: {err}")),
            None => Ok(None),
        }
    }

    fn log_outcome(
        &self,
        notification_id: &str,
        payload: &NotificationPayload,
        user_id: Option<&str>,
        outcome: &Outcome,
    ) {
        let record = StoredNotification {
            notification_id: notification_id.to_string(),
            notification_type: payload.notification_type.clone(),
            subtype: payload.subtype.clone(),
            user_id: user_id.map(str::to_string),
            transaction_id: outcome.transaction_id().map(str::to_string),
            processed: outcome.processed(),
            reason: outcome.reason().map(str::to_string),
            raw: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
            received_at: Utc::now(),
        };

        if let Err(err) = self.db.upsert_notification(&record) {
            tracing::warn!(
                error = %err,
                notification = %notification_id,
                "failed to record notification outcome"
            );
        }
    }
}
