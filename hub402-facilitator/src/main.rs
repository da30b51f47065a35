//! hub402 facilitator server.
//!
//! ```bash
//! # Run against devnet with an ephemeral, faucet-funded fee payer
//! DEMO_MODE=true cargo run -p hub402-facilitator
//!
//! # Production shape: explicit fee payer, shared Redis stores
//! NETWORK=mainnet-beta FEE_PAYER_SECRET=... REDIS_URL=redis://... \
//!     cargo run -p hub402-facilitator --release
//! ```
//!
//! Configuration is environment-driven; see [`config::FacilitatorConfig`]
//! for the full list. `RUST_LOG` controls log verbosity (default `info`).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use clap::Parser;
use hub402_svm::LedgerOps;
use tower_http::cors;
use tracing_subscriber::EnvFilter;

use hub402::store::TtlStore;
use hub402_facilitator::config::FacilitatorConfig;
use hub402_facilitator::gate::{RequestGate, gate_middleware};
use hub402_facilitator::handlers::{AppState, router};
use hub402_facilitator::store::{FileTtlStore, RedisTtlStore};
use hub402_facilitator::strategy::build_strategy;
use hub402_svm::chain::funding::{FundingConfig, FundingManager};
use hub402_svm::chain::types::LAMPORTS_PER_SOL;
use hub402_svm::{ExactSvmFacilitator, SolanaLedger};
use hub402_svm::exact::{FacilitatorOptions, SettleOptions};

/// The operating account is topped up at boot when it holds less.
const MIN_OPERATING_BALANCE: u64 = LAMPORTS_PER_SOL / 10;

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
        tracing::error!("facilitator failed: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = FacilitatorConfig::parse();
    let (keypair, auto_generated) = config.fee_payer()?;

    let ledger = Arc::new(SolanaLedger::new(
        config.rpc_url(),
        keypair,
        config.network,
    ));
    let funding_enabled = auto_generated && config.network.has_faucet();
    if auto_generated {
        tracing::warn!(
            fee_payer = %ledger.fee_payer(),
            "no FEE_PAYER_SECRET configured, using an ephemeral operating account"
        );
    }

    // Top the operating account up in the background; failures are
    // non-fatal, settlement retries funding on demand.
    if funding_enabled {
        let startup_funding = FundingManager::new(
            Arc::clone(&ledger),
            funding_enabled,
            FundingConfig::default(),
        );
        tokio::spawn(async move {
            if let Err(error) = startup_funding.ensure_funded(MIN_OPERATING_BALANCE).await {
                tracing::warn!(error = %error, "startup funding did not complete");
            }
        });
    }

    let (nonce_store, idempotency_store): (Arc<dyn TtlStore>, Arc<dyn TtlStore>) =
        match config.redis_url.as_deref() {
            Some(url) => {
                tracing::info!("using Redis stores (multi-replica safe)");
                (
                    Arc::new(RedisTtlStore::connect(url, "hub402:nonces").await?),
                    Arc::new(RedisTtlStore::connect(url, "hub402:settlements").await?),
                )
            }
            None => {
                tracing::info!(
                    dir = %config.store_dir.display(),
                    "using file stores (single replica only)"
                );
                (
                    Arc::new(FileTtlStore::open(&config.store_dir, "nonces")?),
                    Arc::new(FileTtlStore::open(&config.store_dir, "settlements")?),
                )
            }
        };

    if config.demo_mode {
        tracing::warn!(
            "DEMO_MODE enabled: authorization-only payloads settle from the facilitator's own funds"
        );
    }
    if config.disable_nonce_replay {
        tracing::warn!("nonce replay protection disabled; test environments only");
    }

    let options = FacilitatorOptions {
        strategy: build_strategy(config.strict_verifier_url.as_ref()),
        settle: SettleOptions {
            mode: config.settlement_mode,
            demo_settlement: config.demo_mode,
        },
        skip_replay_check: config.disable_nonce_replay,
    };
    let funding = FundingManager::new(
        Arc::clone(&ledger),
        funding_enabled,
        FundingConfig::default(),
    );
    let facilitator = Arc::new(ExactSvmFacilitator::new(
        Arc::clone(&ledger),
        funding,
        nonce_store,
        idempotency_store,
        options,
    ));

    let gate = RequestGate::new(
        config.auth_token.clone(),
        (!config.disable_rate_limit)
            .then(|| Duration::from_millis(config.rate_limit_min_interval_ms)),
    );

    let app = router(AppState {
        facilitator,
        ledger: Arc::clone(&ledger),
        settlement_mode: config.settlement_mode,
    })
    .layer(axum::middleware::from_fn_with_state(gate, gate_middleware))
    .layer(
        cors::CorsLayer::new()
            .allow_origin(cors::Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(cors::Any),
    );

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        network = %config.network,
        rpc = %config.rpc_url(),
        fee_payer = %ledger.fee_payer(),
        settlement_mode = %config.settlement_mode,
        "facilitator listening on http://{addr}"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("facilitator shut down gracefully");
    Ok(())
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
