// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Entitlement Server - App Store Receipt Reconciliation Service
//!
//! This crate verifies StoreKit signed transactions and App Store server
//! notifications, then folds them into durable, idempotent entitlement
//! state (credit balances, permanent grants, subscriptions) keyed by
//! first-party user id.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `appstore` - StoreKit JWS verification and App Store Server API client
//! - `auth` - Authentication and authorization (OIDC exchange, HS256 sessions)
//! - `config` - Environment-driven runtime configuration
//! - `error` - HTTP boundary error type
//! - `iap` - Entitlement engine, product catalog, notification reconciler
//! - `state` - Shared application state
//! - `storage` - Durable entitlement state (redb)

pub mod api;
pub mod appstore;
pub mod auth;
pub mod config;
pub mod error;
pub mod iap;
pub mod state;
pub mod storage;
