//! mm-bot: market maker for scheduled binary up/down markets.
//!
//! Usage:
//!   mm-bot [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>     Config file path (default: config/mm.toml)
//!   --assets <ASSETS>       Comma-separated assets (overrides config)
//!   -w, --duration <DUR>    Slot duration: 5m or 15m (overrides config)
//!   --dry-run               Simulate fills, no orders and no chain writes
//!
//! Credentials come from the environment (or .env): MM_PRIVATE_KEY,
//! MM_PROXY_WALLET, and optionally MM_API_KEY / MM_API_SECRET /
//! MM_API_PASSPHRASE (derived from the signing key when absent).

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mm_bot::cleanup::Cleanup;
use mm_bot::config::BotConfig;
use mm_bot::engine::{Engine, MmParams};
use mm_bot::stats::SessionStats;
use mm_bot::venue::{ChainClient, LiveChain, LiveGateway, OrderGateway, SimChain, SimGateway};
use mm_chain::{Addresses, CtfClient, WalletExecutor};
use mm_common::{Asset, SlotDuration};
use mm_market::auth::{derive_api_creds, ApiCreds};
use mm_market::order::OrderSigner;
use mm_market::{ClobClient, DataApiClient, DetectorConfig, GammaClient, MarketDetector};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "mm-bot")]
#[command(about = "Market maker for scheduled binary up/down markets")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/mm.toml")]
    config: PathBuf,

    /// Comma-separated assets to trade (e.g., "BTC,ETH")
    #[arg(long, value_delimiter = ',')]
    assets: Option<Vec<Asset>>,

    /// Slot duration: 5m or 15m
    #[arg(long, short = 'w')]
    duration: Option<SlotDuration>,

    /// Simulate fills against live midpoints; no orders, no chain writes
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: failed to load .env file: {e}");
        }
    }

    let args = Args::parse();

    let mut config = if args.config.exists() {
        BotConfig::from_file(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?
    } else {
        eprintln!(
            "Config file not found at {:?}, using defaults",
            args.config
        );
        BotConfig::default()
    };
    config.apply_env_overrides();
    config.apply_cli_overrides(args.assets, args.duration, args.dry_run);

    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting mm-bot");
    info!(
        assets = ?config.mm.assets,
        duration = %config.mm.duration,
        dry_run = config.dry_run,
        "configuration"
    );
    config.validate().context("Configuration validation failed")?;

    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received, shutting down");
                let _ = shutdown_tx.send(());
            }
        });
    }

    let gamma = GammaClient::new(config.endpoints.gamma_url.clone());
    let detector = MarketDetector::new(
        gamma.clone(),
        DetectorConfig {
            assets: config.mm.assets.clone(),
            duration: config.mm.duration,
            poll_interval: config.poll_interval(),
            include_current_slot: false,
        },
    );
    let (market_tx, market_rx) = mpsc::channel(16);
    tokio::spawn(detector.run(market_tx, shutdown_tx.subscribe()));

    let stats = SessionStats::new(config.dry_run.then(|| PathBuf::from("mm-sim-stats.json")));
    let params = MmParams::from_config(&config.mm);

    let (gateway, chain): (Arc<dyn OrderGateway>, Arc<dyn ChainClient>) = if config.dry_run {
        info!(balance = %config.mm.sim_balance, "dry-run mode: simulated ledger");
        let sim_chain = SimChain::new(config.mm.sim_balance);
        let sim_gateway = SimGateway::new(
            ClobClient::public(config.endpoints.clob_url.clone()),
            sim_chain.clone(),
        );
        (Arc::new(sim_gateway), sim_chain)
    } else {
        build_live_venue(&config, &gamma, &shutdown_tx).await?
    };

    let engine = Engine::new(params, gateway, chain, stats, shutdown_tx.clone());
    engine.run(market_rx).await;

    info!("clean shutdown");
    Ok(())
}

/// Build the live venue stack: provider, wallet serializer, CTF client,
/// authenticated CLOB client, startup cleanup and the redeemer task.
async fn build_live_venue(
    config: &BotConfig,
    gamma: &GammaClient,
    shutdown_tx: &broadcast::Sender<()>,
) -> Result<(Arc<dyn OrderGateway>, Arc<dyn ChainClient>)> {
    let key = config
        .wallet
        .private_key
        .as_deref()
        .context("MM_PRIVATE_KEY not set")?;
    let signer = PrivateKeySigner::from_str(key.trim()).context("Invalid MM_PRIVATE_KEY")?;
    let proxy: Address = config
        .wallet
        .proxy_address
        .as_deref()
        .context("MM_PROXY_WALLET not set")?
        .parse()
        .context("Invalid MM_PROXY_WALLET address")?;

    let provider = ProviderBuilder::new()
        .wallet(signer.clone())
        .connect(&config.endpoints.rpc_url)
        .await
        .context("Failed to connect to RPC")?
        .erased();

    let addresses = Addresses::polygon();
    let (executor, _serializer) = WalletExecutor::spawn(provider.clone(), signer.clone(), proxy);
    let ctf = Arc::new(CtfClient::new(provider, executor, addresses, proxy));

    let creds = match (
        config.wallet.api_key.clone(),
        config.wallet.api_secret.clone(),
        config.wallet.api_passphrase.clone(),
    ) {
        (Some(key), Some(secret), Some(passphrase)) => ApiCreds {
            key,
            secret,
            passphrase,
        },
        _ => {
            info!("deriving CLOB API credentials from signing key");
            let http = reqwest::Client::new();
            let base = config
                .endpoints
                .clob_url
                .clone()
                .unwrap_or_else(|| "https://clob.polymarket.com".to_string());
            derive_api_creds(&http, &base, &signer)
                .await
                .context("CLOB credential derivation failed")?
        }
    };

    let order_signer = OrderSigner::new(
        signer,
        Some(proxy),
        addresses.exchange,
        addresses.neg_risk_exchange,
    );
    let clob = Arc::new(ClobClient::new(
        config.endpoints.clob_url.clone(),
        creds,
        order_signer,
    ));
    let data_api = DataApiClient::new(config.endpoints.data_api_url.clone());

    let cleanup = Arc::new(Cleanup::new(
        ctf.clone(),
        clob.clone(),
        data_api,
        gamma.clone(),
        proxy,
    ));
    cleanup.startup().await;
    tokio::spawn(cleanup.run_redeemer(
        std::time::Duration::from_secs(config.redeem.interval),
        shutdown_tx.subscribe(),
    ));

    let gateway = Arc::new(LiveGateway::new(clob));
    let chain = Arc::new(LiveChain::new(ctf));
    Ok((gateway, chain))
}
