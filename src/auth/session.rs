// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session token issuance and verification.
//!
//! Sessions are symmetric HS256 tokens minted by this service after a
//! sign-in identity token verifies. The secret never leaves the process, so
//! no key set or network round trip is involved in verifying them.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use super::claims::{AuthenticatedUser, Role, SessionClaims};
use super::error::AuthError;

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Signs and verifies this service's own session tokens.
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: i64,
}

impl SessionKeys {
    pub fn new(secret: &str, ttl_secs: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs,
        }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    /// Mint a session token for a signed-in user.
    pub fn issue(&self, user_id: &str, role: Role) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            sub: user_id.to_string(),
            iat: now,
            exp: now + self.ttl_secs,
            role: Some(role.as_str().to_string()),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::InternalError(format!("failed to sign session token: {e}")))
    }

    /// Verify a session token and extract its user.
    pub fn verify(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = CLOCK_SKEW_LEEWAY;
        validation.validate_aud = false;

        let token_data =
            decode::<SessionClaims>(token, &self.decoding, &validation).map_err(|e| {
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                        AuthError::InvalidSignature
                    }
                    jsonwebtoken::errors::ErrorKind::ImmatureSignature => {
                        AuthError::TokenNotYetValid
                    }
                    _ => AuthError::MalformedToken,
                }
            })?;

        Ok(AuthenticatedUser::from_claims(token_data.claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keys() -> SessionKeys {
        SessionKeys::new("test-session-secret", 3600)
    }

    #[test]
    fn issued_token_verifies() {
        let keys = test_keys();
        let token = keys.issue("apple_u1", Role::Client).unwrap();

        let user = keys.verify(&token).unwrap();
        assert_eq!(user.user_id, "apple_u1");
        assert_eq!(user.role, Role::Client);
        assert!(user.expires_at > Utc::now().timestamp());
    }

    #[test]
    fn admin_role_round_trips() {
        let keys = test_keys();
        let token = keys.issue("apple_admin", Role::Admin).unwrap();
        assert!(keys.verify(&token).unwrap().is_admin());
    }

    #[test]
    fn foreign_secret_is_rejected() {
        let keys = test_keys();
        let other = SessionKeys::new("a-different-secret", 3600);

        let token = other.issue("apple_u1", Role::Client).unwrap();
        let err = keys.verify(&token).unwrap_err();
        assert!(matches!(err, AuthError::InvalidSignature));
    }

    #[test]
    fn expired_token_is_rejected() {
        // TTL lands the expiry beyond the leeway window in the past.
        let keys = SessionKeys::new("test-session-secret", -120);
        let token = keys.issue("apple_u1", Role::Client).unwrap();

        let err = keys.verify(&token).unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired));
    }

    #[test]
    fn garbage_token_is_malformed() {
        let keys = test_keys();
        assert!(matches!(
            keys.verify("not.a.token").unwrap_err(),
            AuthError::MalformedToken
        ));
    }
}
