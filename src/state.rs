// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared application state.
//!
//! One [`AppState`] is built at startup and cloned into every handler. The
//! expensive pieces (database, HTTP clients, key material) live behind `Arc`s;
//! the per-request pipeline objects (engine, reconciler, aggregator) are cheap
//! bundles of those `Arc`s and are constructed on demand.

use std::sync::Arc;
use std::time::Instant;

use crate::appstore::{AppStoreClient, AppStoreError, ReceiptVerifier};
use crate::auth::{OidcVerifiers, SessionKeys};
use crate::config::AppConfig;
use crate::iap::{EntitlementEngine, NotificationReconciler, ProductCatalog, StatusAggregator};
use crate::storage::EntitlementDb;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<EntitlementDb>,
    /// StoreKit JWS verifier for receipts and notification payloads.
    pub receipts: Arc<ReceiptVerifier>,
    /// App Store Server API client; `None` disables verify-by-id and
    /// transaction fetch for metadata-only notifications.
    pub appstore: Option<Arc<AppStoreClient>>,
    pub oidc: Arc<OidcVerifiers>,
    pub sessions: Arc<SessionKeys>,
    started_at: Instant,
}

impl AppState {
    /// Wire up all components from configuration. Fails when the App Store
    /// Server API credentials are present but unusable.
    pub fn new(config: AppConfig, db: Arc<EntitlementDb>) -> Result<Self, AppStoreError> {
        let receipts = Arc::new(ReceiptVerifier::new(
            config.storekit_jwks_url.clone(),
            &config.bundle_id,
        ));

        let appstore = match &config.appstore_api {
            Some(api) => Some(Arc::new(AppStoreClient::new(api, &config.bundle_id)?)),
            None => None,
        };

        let oidc = Arc::new(OidcVerifiers::from_config(&config));
        let sessions = Arc::new(SessionKeys::new(
            &config.session_jwt_secret,
            config.session_ttl_secs,
        ));

        Ok(Self {
            config: Arc::new(config),
            db,
            receipts,
            appstore,
            oidc,
            sessions,
            started_at: Instant::now(),
        })
    }

    pub fn catalog(&self) -> ProductCatalog {
        ProductCatalog::new(self.db.clone(), self.config.default_consumable_credits)
    }

    pub fn engine(&self) -> EntitlementEngine {
        EntitlementEngine::new(
            self.db.clone(),
            self.catalog(),
            self.config.default_environment,
        )
    }

    pub fn reconciler(&self) -> NotificationReconciler {
        NotificationReconciler::new(
            self.db.clone(),
            self.receipts.clone(),
            self.appstore.clone(),
            self.engine(),
            self.config.default_environment,
        )
    }

    pub fn aggregator(&self) -> StatusAggregator {
        StatusAggregator::new(self.db.clone())
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
