//! Facilitator HTTP entrypoint.
//!
//! Launches an axum-based server exposing the x402 protocol interface for
//! payment verification and settlement against a VeChain-style node.
//!
//! Endpoints:
//! - `GET /verify` – Supported verification schema
//! - `POST /verify` – Verify a payment payload against requirements
//! - `GET /settle` – Supported settlement schema
//! - `POST /settle` – Settle an accepted payment payload on-chain
//! - `GET /supported` – List supported networks and schemes
//! - `GET /health` – Liveness probe
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control the binding address
//! - See [`x402_vechain::config`] for the full variable list

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use x402_vechain::chain::ThorGateway;
use x402_vechain::config::Config;
use x402_vechain::delegation::{FeeDelegationEngine, SqliteDelegationLog};
use x402_vechain::facilitator_local::FacilitatorLocal;
use x402_vechain::handlers;
use x402_vechain::nonce::SqliteNonceLedger;
use x402_vechain::shutdown::Shutdown;
use x402_vechain::telemetry::Telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = Config::from_env()?;

    let gateway = Arc::new(ThorGateway::new(config.node_url.clone()));
    let nonces = Arc::new(SqliteNonceLedger::open(&config.db_path)?);
    let delegation_log = Arc::new(SqliteDelegationLog::open(&config.db_path)?);
    let delegation = match config.delegator_signer()? {
        Some(signer) => {
            tracing::info!(delegator = %signer.address(), "fee delegation enabled");
            FeeDelegationEngine::enabled(
                signer,
                config.delegation.max_vtho_per_tx,
                config.delegation.max_tx_per_hour,
                delegation_log,
            )
        }
        None => FeeDelegationEngine::disabled(delegation_log),
    };

    let facilitator = Arc::new(FacilitatorLocal::new(
        gateway,
        nonces,
        delegation,
        config.network,
        config.confirmation,
    ));

    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(facilitator))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!(network = %config.network, "Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown = Shutdown::listen()?;
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(shutdown.cancelled())
        .await?;

    Ok(())
}
