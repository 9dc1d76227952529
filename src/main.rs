//! Roundbot - unattended round operator for on-chain prediction markets
//!
//! Advances each configured market's round state machine (genesis →
//! lock → execute), records finalized rounds, and serves a minimal
//! liveness API.

use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use clap::Parser;
use dotenv::dotenv;
use std::{env, sync::Arc};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roundbot_backend::{
    chain::RpcChainClient,
    engine::{scheduler::Scheduler, MarketContext},
    models::MarketConfig,
    oracle::HermesOracle,
    store::{PersistedRound, RoundStore},
};

const DEFAULT_ORACLE_BASE_URL: &str = "https://hermes.pyth.network";
const DEFAULT_PRICE_EXPO: u32 = 8;
const DEFAULT_MARKETS: &str = "BTC,ETH,SOL";

#[derive(Parser, Debug)]
#[command(name = "roundbot", about = "On-chain round operator")]
struct Args {
    /// Run a single tick and exit (for smoke checks).
    #[arg(long)]
    once: bool,
    /// Liveness HTTP port.
    #[arg(long, env = "PORT", default_value_t = 3001)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv();
    init_tracing();

    let args = Args::parse();

    let configs = match load_market_configs() {
        Ok(configs) => configs,
        Err(missing) => {
            error!("missing required environment variables: {}", missing.join(", "));
            std::process::exit(1);
        }
    };

    let rpc_url = env::var("CHAIN_RPC_URL").unwrap_or_else(|_| "http://localhost:8545".to_string());
    let oracle_base =
        env::var("ORACLE_BASE_URL").unwrap_or_else(|_| DEFAULT_ORACLE_BASE_URL.to_string());
    let fee_contract = match env::var("ORACLE_FEE_CONTRACT") {
        Ok(v) if !v.trim().is_empty() => v,
        _ => {
            error!("missing required environment variables: ORACLE_FEE_CONTRACT");
            std::process::exit(1);
        }
    };
    let db_path = env::var("DB_PATH").unwrap_or_else(|_| "roundbot_rounds.db".to_string());

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    let store = RoundStore::new(&db_path)?;
    info!("round store initialized at: {db_path}");

    // One context per market: its own contract binding, operator
    // identity, and oracle feed. No process-wide chain singletons.
    let mut contexts = Vec::with_capacity(configs.len());
    for config in configs {
        info!(
            "[{}] configured: pair={}, contract={}, operator={}",
            config.name, config.pair, config.contract_address, config.operator_address
        );
        let chain = RpcChainClient::new(
            http_client.clone(),
            rpc_url.clone(),
            config.contract_address.clone(),
            fee_contract.clone(),
            config.operator_address.clone(),
        );
        let oracle = HermesOracle::new(http_client.clone(), oracle_base.clone());
        contexts.push(MarketContext {
            config,
            chain: Arc::new(chain),
            oracle: Arc::new(oracle),
            store: store.clone(),
        });
    }

    let scheduler = Scheduler::new(contexts);

    if args.once {
        let summary = scheduler.tick().await?;
        info!(
            "single tick complete: any_success={}, any_executed={}",
            summary.any_success, summary.any_executed
        );
        return Ok(());
    }

    tokio::spawn(serve_liveness(args.port, store.clone()));

    info!("roundbot operator starting main loop");
    if let Err(e) = scheduler.run().await {
        error!("operator loop terminated: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roundbot_backend=debug,roundbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Loads the per-market configuration from `<NAME>_*` environment
/// variables for every market named in `MARKETS`. All missing
/// variables are collected so the operator sees the full list at once.
fn load_market_configs() -> std::result::Result<Vec<MarketConfig>, Vec<String>> {
    let markets = env::var("MARKETS").unwrap_or_else(|_| DEFAULT_MARKETS.to_string());
    let mut configs = Vec::new();
    let mut missing = Vec::new();

    for name in markets.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let mut require = |suffix: &str| -> String {
            let key = format!("{name}_{suffix}");
            match env::var(&key) {
                Ok(v) if !v.trim().is_empty() => v,
                _ => {
                    missing.push(key);
                    String::new()
                }
            }
        };

        let contract_address = require("CONTRACT_ADDRESS");
        let feed_id = require("PRICE_FEED_ID");
        let operator_address = require("OPERATOR_ADDRESS");
        let price_expo = env::var(format!("{name}_PRICE_EXPO"))
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(DEFAULT_PRICE_EXPO);

        configs.push(MarketConfig {
            name: name.to_string(),
            pair: format!("{name}/USD"),
            feed_id,
            contract_address,
            price_expo,
            operator_address,
        });
    }

    if missing.is_empty() {
        Ok(configs)
    } else {
        Err(missing)
    }
}

#[derive(Clone)]
struct ApiState {
    store: RoundStore,
}

/// Minimal liveness server: health probe plus a read-only view of the
/// most recently recorded rounds.
async fn serve_liveness(port: u16, store: RoundStore) {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/rounds/recent", get(recent_rounds))
        .with_state(ApiState { store })
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{port}");
    match TcpListener::bind(&addr).await {
        Ok(listener) => {
            info!("liveness server listening on {addr}");
            if let Err(e) = axum::serve(listener, app).await {
                error!("liveness server error: {e}");
            }
        }
        Err(e) => error!("failed to bind liveness server on {addr}: {e}"),
    }
}

async fn health_check() -> &'static str {
    "roundbot operational"
}

async fn recent_rounds(State(state): State<ApiState>) -> Json<Vec<PersistedRound>> {
    match state.store.recent_rounds(50).await {
        Ok(rounds) => Json(rounds),
        Err(e) => {
            error!("failed to read recent rounds: {e:#}");
            Json(Vec::new())
        }
    }
}
