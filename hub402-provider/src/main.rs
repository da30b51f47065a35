//! hub402 demo resource server.
//!
//! Serves `GET /api/data` behind the payment Guard: the first request is
//! answered with a 402 challenge, a request carrying a valid `x-payment`
//! header is verified and settled through the configured facilitator and
//! then served, with the settlement receipt in `x-payment-response`.
//!
//! ```bash
//! PAY_TO=<recipient pubkey> cargo run -p hub402-provider
//! ```

mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use tower_http::cors;
use tracing_subscriber::EnvFilter;

use hub402::proto::{EXACT_SCHEME, PaymentRequirements};
use hub402::timestamp::UnixTimestamp;
use hub402_http::constants::WELL_KNOWN_X402_PATH;
use hub402_http::server::{PaymentGuard, RouteTable, catalog};
use hub402_http::FacilitatorClient;

use crate::config::ProviderConfig;

/// Settlement blocks until ledger confirmation; give it room.
const FACILITATOR_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    dotenvy::dotenv().ok();
    rustls::crypto::ring::default_provider().install_default().ok();

    if let Err(error) = run().await {
        tracing::error!("provider failed: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = ProviderConfig::parse();
    config.validate()?;

    let requirements = PaymentRequirements {
        scheme: EXACT_SCHEME.to_owned(),
        network: config.network.clone(),
        max_amount_required: config.amount_atomic.clone(),
        resource: "GET /api/data".to_owned(),
        description: Some("Sample data API (pay-per-call)".to_owned()),
        mime_type: Some("application/json".to_owned()),
        output_schema: None,
        pay_to: config.pay_to.clone(),
        max_timeout_seconds: 60,
        asset: config.asset.clone(),
        extra: None,
    };
    let routes = RouteTable::new().guard(requirements);
    let well_known = serde_json::to_value(catalog(&routes))?;

    let facilitator = Arc::new(
        FacilitatorClient::try_from(config.facilitator_url.as_str())?
            .with_timeout(FACILITATOR_TIMEOUT),
    );
    let guard = PaymentGuard::new(facilitator, routes);

    let app = Router::new()
        .route("/api/data", get(api_data))
        .route("/health", get(|| async { Json(serde_json::json!({"ok": true})) }))
        .route(
            WELL_KNOWN_X402_PATH,
            get(move || {
                let body = well_known.clone();
                async move { Json(body) }
            }),
        )
        .layer(guard)
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        facilitator = %config.facilitator_url,
        pay_to = %config.pay_to,
        amount = %config.amount_atomic,
        "provider listening on http://{addr}"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("provider shut down gracefully");
    Ok(())
}

/// The protected resource.
async fn api_data() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "data": {
            "message": "Hello from the hub402 provider",
            "ts": UnixTimestamp::now().to_string(),
        }
    }))
}

/// Waits for Ctrl-C or SIGTERM (Unix) to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => tracing::info!("received Ctrl-C, shutting down"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl-C");
        tracing::info!("received Ctrl-C, shutting down");
    }
}
