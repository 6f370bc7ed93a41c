// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Sign-in identity token verification (Apple, Google).
//!
//! The exchange endpoint accepts an OIDC identity token from a configured
//! provider, verifies it against the provider's published key set, and only
//! then mints one of this service's own session tokens. Users are keyed as
//! `{provider}_{subject}` so the same person signing in through different
//! providers yields distinct accounts.

use jsonwebtoken::{decode, decode_header, Validation};
use serde::Deserialize;

use crate::config::AppConfig;

use super::error::AuthError;
use super::jwks::JwksManager;

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

const APPLE_ISSUER: &str = "https://appleid.apple.com";
const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

/// Claims this service reads out of a provider identity token. Issuer and
/// audience are enforced by the validation step, not read directly.
#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    /// Subject: the provider's stable user identifier
    sub: String,
    /// Email, when the provider shares it
    #[serde(default)]
    email: Option<String>,
}

/// A provider identity that passed verification.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub provider: String,
    pub subject: String,
    pub email: Option<String>,
}

impl VerifiedIdentity {
    /// Canonical user id.
    pub fn user_id(&self) -> String {
        format!("{}_{}", self.provider, self.subject)
    }
}

/// Verifies identity tokens for one provider.
pub struct ProviderVerifier {
    name: &'static str,
    jwks: JwksManager,
    issuers: Vec<String>,
    audience: String,
}

impl ProviderVerifier {
    pub fn new(
        name: &'static str,
        jwks_url: impl Into<String>,
        issuers: Vec<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            name,
            jwks: JwksManager::new(jwks_url),
            issuers,
            audience: audience.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Verify signature, issuer, audience, and expiry of an identity token.
    pub async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError::MalformedToken)?;

        let (decoding_key, algorithm) = if let Some(kid) = &header.kid {
            self.jwks.get_decoding_key(kid).await?
        } else {
            self.jwks.get_any_decoding_key().await?
        };

        let mut validation = Validation::new(algorithm);
        validation.leeway = CLOCK_SKEW_LEEWAY;
        let issuers: Vec<&str> = self.issuers.iter().map(String::as_str).collect();
        validation.set_issuer(&issuers);
        validation.set_audience(&[&self.audience]);

        let token_data =
            decode::<IdTokenClaims>(token, &decoding_key, &validation).map_err(|e| {
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                        AuthError::InvalidSignature
                    }
                    jsonwebtoken::errors::ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
                    jsonwebtoken::errors::ErrorKind::InvalidAudience => AuthError::InvalidAudience,
                    jsonwebtoken::errors::ErrorKind::ImmatureSignature => {
                        AuthError::TokenNotYetValid
                    }
                    _ => AuthError::MalformedToken,
                }
            })?;

        Ok(VerifiedIdentity {
            provider: self.name.to_string(),
            subject: token_data.claims.sub,
            email: token_data.claims.email,
        })
    }
}

/// The set of enabled sign-in providers.
pub struct OidcVerifiers {
    apple: Option<ProviderVerifier>,
    google: Option<ProviderVerifier>,
}

impl OidcVerifiers {
    pub fn new(apple: Option<ProviderVerifier>, google: Option<ProviderVerifier>) -> Self {
        Self { apple, google }
    }

    /// Build verifiers for every provider with a configured client id.
    pub fn from_config(config: &AppConfig) -> Self {
        let apple = config.apple_signin_client_id.as_ref().map(|client_id| {
            ProviderVerifier::new(
                "apple",
                config.apple_id_jwks_url.to_string(),
                vec![APPLE_ISSUER.to_string()],
                client_id,
            )
        });

        let google = config.google_client_id.as_ref().map(|client_id| {
            ProviderVerifier::new(
                "google",
                config.google_jwks_url.to_string(),
                GOOGLE_ISSUERS.iter().map(|s| s.to_string()).collect(),
                client_id,
            )
        });

        Self::new(apple, google)
    }

    /// Names of the providers that can currently verify tokens.
    pub fn enabled_providers(&self) -> Vec<&'static str> {
        let mut providers = Vec::new();
        if self.apple.is_some() {
            providers.push("apple");
        }
        if self.google.is_some() {
            providers.push("google");
        }
        providers
    }

    /// Verify an identity token from the named provider.
    pub async fn verify(&self, provider: &str, token: &str) -> Result<VerifiedIdentity, AuthError> {
        let verifier = match provider.to_lowercase().as_str() {
            "apple" => self.apple.as_ref(),
            "google" => self.google.as_ref(),
            _ => None,
        };

        match verifier {
            Some(verifier) => verifier.verify(token).await,
            None => Err(AuthError::ProviderNotEnabled(provider.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apple_verifier() -> ProviderVerifier {
        ProviderVerifier::new(
            "apple",
            "https://appleid.apple.com/auth/keys",
            vec![APPLE_ISSUER.to_string()],
            "com.example.app",
        )
    }

    #[test]
    fn user_id_is_provider_prefixed() {
        let identity = VerifiedIdentity {
            provider: "apple".to_string(),
            subject: "001234.abcdef".to_string(),
            email: None,
        };
        assert_eq!(identity.user_id(), "apple_001234.abcdef");
    }

    #[test]
    fn enabled_providers_reflect_configuration() {
        let none = OidcVerifiers::new(None, None);
        assert!(none.enabled_providers().is_empty());

        let apple_only = OidcVerifiers::new(Some(apple_verifier()), None);
        assert_eq!(apple_only.enabled_providers(), vec!["apple"]);
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected() {
        let verifiers = OidcVerifiers::new(Some(apple_verifier()), None);
        let err = verifiers.verify("facebook", "token").await.unwrap_err();
        assert!(matches!(err, AuthError::ProviderNotEnabled(_)));
    }

    #[tokio::test]
    async fn unconfigured_provider_is_rejected() {
        let verifiers = OidcVerifiers::new(Some(apple_verifier()), None);
        let err = verifiers.verify("google", "token").await.unwrap_err();
        assert!(matches!(err, AuthError::ProviderNotEnabled(_)));
    }

    #[tokio::test]
    async fn provider_match_is_case_insensitive() {
        let verifiers = OidcVerifiers::new(None, None);
        // "Apple" resolves to the apple slot, which is not configured here.
        let err = verifiers.verify("Apple", "token").await.unwrap_err();
        assert!(matches!(err, AuthError::ProviderNotEnabled(_)));
    }
}
