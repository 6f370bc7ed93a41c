// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use entitlement_server::api;
use entitlement_server::config::AppConfig;
use entitlement_server::state::AppState;
use entitlement_server::storage::EntitlementDb;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = AppConfig::from_env()?;

    let db = Arc::new(EntitlementDb::open(&config.db_path())?);
    let state = AppState::new(config, db)?;

    // Push configured products into the catalog before taking traffic so the
    // first receipt of the day classifies against current entries.
    if !state.config.product_seeds.is_empty() {
        let seeded = state.catalog().seed(&state.config.product_seeds)?;
        tracing::info!(products = seeded, "seeded product catalog");
    }

    let addr = state.config.bind_addr();
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!(
        addr = %addr,
        signature_verification = state.receipts.verifies_signatures(),
        verify_by_id = state.appstore.is_some(),
        providers = ?state.oidc.enabled_providers(),
        "entitlement server listening (docs at /docs)"
    );

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// `RUST_LOG` controls the filter; `LOG_FORMAT=json` switches to structured
/// output for log shippers, anything else stays human-readable.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Resolves on SIGINT or SIGTERM so in-flight requests drain before exit.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining connections");
}
