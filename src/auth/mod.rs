// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! This module authenticates the two kinds of caller the entitlement API has.
//!
//! ## Client Auth Flow
//!
//! 1. App signs the user in with Apple or Google and obtains an OIDC id token
//! 2. App calls `POST /v1/auth/exchange` with that token
//! 3. Server:
//!    - Fetches the provider JWKS via HTTPS
//!    - Verifies signature, expiry, issuer, audience
//!    - Derives the canonical `user_id` as `{provider}_{subject}`
//!    - Mints a first-party HS256 session token carrying `sub` and role
//! 4. App sends `Authorization: Bearer <session token>` on every call
//!
//! ## Security
//!
//! - All non-health endpoints require a session token
//! - Provider JWKS fetching is HTTPS-only and cached with TTL
//! - Session verification is local HS256, no network on the hot path
//! - Clock skew tolerance is 60 seconds

pub mod claims;
pub mod error;
pub mod extractor;
pub mod jwks;
pub mod oidc;
pub mod session;

pub use claims::{AuthenticatedUser, Role, SessionClaims};
pub use error::AuthError;
pub use extractor::{AdminOnly, Auth};
pub use jwks::JwksManager;
pub use oidc::{OidcVerifiers, ProviderVerifier, VerifiedIdentity};
pub use session::SessionKeys;
