// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! All tunables are read from the environment exactly once at startup and
//! carried as an [`AppConfig`] injected into each component at construction.
//! Nothing else in the crate reads `std::env`.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory holding the entitlement database | `/data` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `SESSION_JWT_SECRET` | HS256 secret for first-party session tokens | Required |
//! | `SESSION_TTL_SECS` | Session token lifetime in seconds | `604800` (7 days) |
//! | `APPLE_BUNDLE_ID` | Bundle id every signed transaction must carry | Required |
//! | `APPLE_ENVIRONMENT` | Default transaction environment (`sandbox` or `production`) | `production` |
//! | `APPLE_STOREKIT_JWKS_URL` | StoreKit signing keys, e.g. `https://api.storekit.itunes.apple.com/in-app-purchase/publicKeys` | Unset = dev mode (no signature verification) |
//! | `APPLE_ISSUER_ID` | App Store Connect API issuer id | Optional |
//! | `APPLE_KEY_ID` | App Store Connect API key id | Optional |
//! | `APPLE_PRIVATE_KEY` | App Store Connect API private key (PEM or bare base64 PKCS#8) | Optional |
//! | `APPSTORE_API_BASE_URL` | Production App Store Server API base | `https://api.storekit.itunes.apple.com` |
//! | `APPSTORE_SANDBOX_API_BASE_URL` | Sandbox App Store Server API base | `https://api.storekit-sandbox.itunes.apple.com` |
//! | `APPLE_SIGNIN_CLIENT_ID` | Audience for Sign in with Apple id tokens | Optional (exchange disabled when unset) |
//! | `GOOGLE_CLIENT_ID` | Audience for Google id tokens | Optional (exchange disabled when unset) |
//! | `APPLE_ID_JWKS_URL` | Sign in with Apple JWKS endpoint | `https://appleid.apple.com/auth/keys` |
//! | `GOOGLE_JWKS_URL` | Google JWKS endpoint | `https://www.googleapis.com/oauth2/v3/certs` |
//! | `DEFAULT_CONSUMABLE_CREDITS` | Credit delta for unconfigured consumables | `1` |
//! | `PRODUCT_CATALOG` | Inline JSON array of product seeds | Optional |
//! | `PRODUCT_CATALOG_PATH` | Path to a JSON file of product seeds | Optional |
//! | `ADMIN_USER_IDS` | Comma-separated user ids granted the admin role | Empty |

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use url::Url;

use crate::appstore::Environment;
use crate::storage::ProductKind;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATA_DIR: &str = "/data";
const DEFAULT_SESSION_TTL_SECS: i64 = 604_800;
const DEFAULT_CONSUMABLE_CREDITS: i64 = 1;
const DEFAULT_APPLE_ID_JWKS_URL: &str = "https://appleid.apple.com/auth/keys";
const DEFAULT_GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const DEFAULT_APPSTORE_API_BASE: &str = "https://api.storekit.itunes.apple.com";
const DEFAULT_APPSTORE_SANDBOX_API_BASE: &str = "https://api.storekit-sandbox.itunes.apple.com";

/// File name of the redb database inside `DATA_DIR`.
const DB_FILE_NAME: &str = "entitlements.redb";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(String),
    #[error("invalid configuration value for {name}: {reason}")]
    Invalid { name: String, reason: String },
}

/// Immutable service configuration, loaded once by [`AppConfig::from_env`].
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub session_jwt_secret: String,
    pub session_ttl_secs: i64,
    pub bundle_id: String,
    pub default_environment: Environment,
    /// StoreKit JWKS endpoint. `None` puts the receipt verifier in
    /// development mode: payloads are decoded without signature checks.
    pub storekit_jwks_url: Option<Url>,
    pub apple_signin_client_id: Option<String>,
    pub google_client_id: Option<String>,
    pub apple_id_jwks_url: Url,
    pub google_jwks_url: Url,
    /// App Store Server API credentials; `None` disables verify-by-id.
    pub appstore_api: Option<AppStoreApiConfig>,
    pub default_consumable_credits: i64,
    pub product_seeds: Vec<ProductSeed>,
    pub admin_user_ids: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct AppStoreApiConfig {
    pub issuer_id: String,
    pub key_id: String,
    /// ES256 private key, PEM-armored or bare base64 PKCS#8.
    pub private_key: String,
    pub production_base: Url,
    pub sandbox_base: Url,
}

/// One entry of the startup product catalog (`PRODUCT_CATALOG`).
#[derive(Debug, Clone, Deserialize)]
pub struct ProductSeed {
    pub product_id: String,
    pub kind: ProductKind,
    #[serde(default)]
    pub credits: Option<i64>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_number("PORT", env_or_default("PORT", &DEFAULT_PORT.to_string()))?;
        let session_ttl_secs = parse_number(
            "SESSION_TTL_SECS",
            env_or_default("SESSION_TTL_SECS", &DEFAULT_SESSION_TTL_SECS.to_string()),
        )?;
        let default_consumable_credits = parse_number(
            "DEFAULT_CONSUMABLE_CREDITS",
            env_or_default(
                "DEFAULT_CONSUMABLE_CREDITS",
                &DEFAULT_CONSUMABLE_CREDITS.to_string(),
            ),
        )?;

        let default_environment = match env_optional("APPLE_ENVIRONMENT") {
            Some(raw) => Environment::parse(&raw).ok_or_else(|| ConfigError::Invalid {
                name: "APPLE_ENVIRONMENT".to_string(),
                reason: format!("expected `sandbox` or `production`, got `{raw}`"),
            })?,
            None => Environment::Production,
        };

        Ok(Self {
            host: env_or_default("HOST", DEFAULT_HOST),
            port,
            data_dir: PathBuf::from(env_or_default("DATA_DIR", DEFAULT_DATA_DIR)),
            session_jwt_secret: env_required("SESSION_JWT_SECRET")?,
            session_ttl_secs,
            bundle_id: env_required("APPLE_BUNDLE_ID")?,
            default_environment,
            storekit_jwks_url: parse_optional_url("APPLE_STOREKIT_JWKS_URL")?,
            apple_signin_client_id: env_optional("APPLE_SIGNIN_CLIENT_ID"),
            google_client_id: env_optional("GOOGLE_CLIENT_ID"),
            apple_id_jwks_url: parse_url(
                "APPLE_ID_JWKS_URL",
                &env_or_default("APPLE_ID_JWKS_URL", DEFAULT_APPLE_ID_JWKS_URL),
            )?,
            google_jwks_url: parse_url(
                "GOOGLE_JWKS_URL",
                &env_or_default("GOOGLE_JWKS_URL", DEFAULT_GOOGLE_JWKS_URL),
            )?,
            appstore_api: load_appstore_api_config()?,
            default_consumable_credits,
            product_seeds: load_product_seeds()?,
            admin_user_ids: parse_admin_ids(&env_or_default("ADMIN_USER_IDS", "")),
        })
    }

    /// Path of the redb file under the configured data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_user_ids.contains(user_id)
    }
}

/// All three credentials must be present; a partial set is a deployment
/// mistake and fails startup rather than silently disabling the client.
fn load_appstore_api_config() -> Result<Option<AppStoreApiConfig>, ConfigError> {
    let issuer_id = env_optional("APPLE_ISSUER_ID");
    let key_id = env_optional("APPLE_KEY_ID");
    let private_key = env_optional("APPLE_PRIVATE_KEY");

    match (issuer_id, key_id, private_key) {
        (None, None, None) => Ok(None),
        (Some(issuer_id), Some(key_id), Some(private_key)) => Ok(Some(AppStoreApiConfig {
            issuer_id,
            key_id,
            private_key: private_key.replace("\\n", "\n"),
            production_base: parse_url(
                "APPSTORE_API_BASE_URL",
                &env_or_default("APPSTORE_API_BASE_URL", DEFAULT_APPSTORE_API_BASE),
            )?,
            sandbox_base: parse_url(
                "APPSTORE_SANDBOX_API_BASE_URL",
                &env_or_default(
                    "APPSTORE_SANDBOX_API_BASE_URL",
                    DEFAULT_APPSTORE_SANDBOX_API_BASE,
                ),
            )?,
        })),
        (issuer_id, key_id, _) => {
            let missing = if issuer_id.is_none() {
                "APPLE_ISSUER_ID"
            } else if key_id.is_none() {
                "APPLE_KEY_ID"
            } else {
                "APPLE_PRIVATE_KEY"
            };
            Err(ConfigError::Missing(format!(
                "{missing} (App Store Server API credentials are all-or-none)"
            )))
        }
    }
}

fn load_product_seeds() -> Result<Vec<ProductSeed>, ConfigError> {
    if let Some(inline) = env_optional("PRODUCT_CATALOG") {
        return parse_product_seeds(&inline);
    }
    if let Some(path) = env_optional("PRODUCT_CATALOG_PATH") {
        let contents = fs::read_to_string(&path).map_err(|e| ConfigError::Invalid {
            name: "PRODUCT_CATALOG_PATH".to_string(),
            reason: format!("failed to read {path}: {e}"),
        })?;
        return parse_product_seeds(&contents);
    }
    Ok(Vec::new())
}

fn parse_product_seeds(json: &str) -> Result<Vec<ProductSeed>, ConfigError> {
    serde_json::from_str(json).map_err(|e| ConfigError::Invalid {
        name: "PRODUCT_CATALOG".to_string(),
        reason: e.to_string(),
    })
}

fn parse_admin_ids(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: String) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn parse_url(name: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::Invalid {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn parse_optional_url(name: &str) -> Result<Option<Url>, ConfigError> {
    match env_optional(name) {
        Some(raw) => parse_url(name, &raw).map(Some),
        None => Ok(None),
    }
}

fn env_required(name: &str) -> Result<String, ConfigError> {
    env_optional(name).ok_or_else(|| ConfigError::Missing(name.to_string()))
}

fn env_optional(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        }
        Err(_) => None,
    }
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}
