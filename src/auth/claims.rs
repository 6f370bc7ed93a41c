// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session token claims and the authenticated user representation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// User roles for authorization.
///
/// - `Admin` - Catalog management, stats, and audit access
/// - `Client` - Normal user, can only act on their own entitlements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full administrative access
    Admin,
    /// Normal client user
    Client,
}

impl Role {
    /// Parse role from string (case-insensitive).
    pub fn from_str(s: &str) -> Option<Role> {
        match s.to_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "client" => Some(Role::Client),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Client => "client",
        }
    }
}

impl Default for Role {
    /// Default role is Client (least privilege for authenticated users).
    fn default() -> Self {
        Role::Client
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims carried by a session token this service issued.
///
/// Sessions are minted by the exchange endpoint after a sign-in identity
/// token verifies, and are the only credential the client-facing API
/// accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject: the canonical user id (`{provider}_{subject}`)
    pub sub: String,

    /// Issued at timestamp
    pub iat: i64,

    /// Expiration timestamp
    pub exp: i64,

    /// Role granted at issue time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Authenticated user information extracted from a session token.
///
/// The primary type used throughout the application to represent the
/// authenticated user making a request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedUser {
    /// Canonical user ID (session `sub` claim)
    pub user_id: String,

    /// User's role
    pub role: Role,

    /// Token expiration (Unix timestamp, used for validation, not serialized)
    #[serde(skip)]
    pub expires_at: i64,
}

impl AuthenticatedUser {
    /// Create from verified session claims.
    pub fn from_claims(claims: SessionClaims) -> Self {
        let role = claims
            .role
            .as_deref()
            .and_then(Role::from_str)
            .unwrap_or_default();

        Self {
            user_id: claims.sub,
            role,
            expires_at: claims.exp,
        }
    }

    /// Check if this user is an admin.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_claims() -> SessionClaims {
        SessionClaims {
            sub: "apple_001234.abcdef".to_string(),
            iat: 1_700_000_000,
            exp: 1_700_604_800,
            role: Some("admin".to_string()),
        }
    }

    #[test]
    fn from_claims_extracts_user_id() {
        let user = AuthenticatedUser::from_claims(sample_claims());
        assert_eq!(user.user_id, "apple_001234.abcdef");
        assert_eq!(user.expires_at, 1_700_604_800);
    }

    #[test]
    fn from_claims_extracts_role() {
        let user = AuthenticatedUser::from_claims(sample_claims());
        assert_eq!(user.role, Role::Admin);
        assert!(user.is_admin());
    }

    #[test]
    fn missing_role_defaults_to_client() {
        let mut claims = sample_claims();
        claims.role = None;
        let user = AuthenticatedUser::from_claims(claims);
        assert_eq!(user.role, Role::Client);
        assert!(!user.is_admin());
    }

    #[test]
    fn unknown_role_defaults_to_client() {
        let mut claims = sample_claims();
        claims.role = Some("superuser".to_string());
        let user = AuthenticatedUser::from_claims(claims);
        assert_eq!(user.role, Role::Client);
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!(Role::from_str("ADMIN"), Some(Role::Admin));
        assert_eq!(Role::from_str("Client"), Some(Role::Client));
        assert_eq!(Role::from_str("unknown"), None);
    }
}
