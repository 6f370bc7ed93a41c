// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! App Store integration: signed-payload verification and the App Store
//! Server API client.

pub mod client;
pub mod jws;
pub mod types;

pub use client::{AppStoreClient, AppStoreError};
pub use jws::{ReceiptVerifier, VerifyError};
pub use types::{Environment, NotificationData, NotificationPayload, TransactionClaims};
