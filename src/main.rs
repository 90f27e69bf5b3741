// Battle Sync - service entry point
// Wires the account source, reconciler, battle engine and HTTP surface, then runs until Ctrl-C

use anyhow::{Context, Result};
use battle_sync::battle::scoring::TierParams;
use battle_sync::battle::BattleEngine;
use battle_sync::config::{Config, MonitoringConfig, PriceSource};
use battle_sync::finalizer::{DisabledFinalizer, HttpFinalizer, VictoryFinalizer};
use battle_sync::notify::LogNotifier;
use battle_sync::pda::ProgramIds;
use battle_sync::price::hermes::HermesPriceFeed;
use battle_sync::price::oracle::OraclePriceFeed;
use battle_sync::price::PriceFeed;
use battle_sync::reconciler::Reconciler;
use battle_sync::rpc::{AccountSource, RpcAccountSource};
use battle_sync::scheduler::{spawn_full_scan, spawn_victory_loop};
use battle_sync::server::{self, AppState};
use battle_sync::sync::{SyncOrchestrator, SyncSettings};
use battle_sync::Database;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Load configuration
    let config = Config::load_or_default()?;
    init_logging(&config.monitoring);

    info!("🚀 Battle Sync Starting...");

    let db = Arc::new(Database::new(&config.database.path, config.database.wal_mode)?);
    info!("✅ Database initialized: {}", config.database.path);

    let enabled = config.networks.enabled();
    let mut programs = HashMap::new();
    let mut tiers = HashMap::new();
    let mut endpoints = Vec::new();
    for (network, net) in &enabled {
        let ids = ProgramIds {
            battle: net.battle_program_id()?,
            launch: net.launch_program_id()?,
        };
        info!(
            "🎯 {}: battle={} launch={} tier={} rpc={}",
            network, ids.battle, ids.launch, net.tier, net.rpc_endpoint
        );
        programs.insert(*network, ids);
        tiers.insert(*network, TierParams::from(config.tier_for(*network)?));
        endpoints.push((*network, net.rpc_endpoint.clone()));
    }
    let default_network = enabled
        .first()
        .map(|(network, _)| *network)
        .context("No network configured")?;

    let accounts: Arc<dyn AccountSource> =
        Arc::new(RpcAccountSource::new(&endpoints, config.sync.rpc_timeout()));

    let price: Arc<dyn PriceFeed> = match config.price.source {
        PriceSource::Oracle => {
            info!("💵 Price source: on-chain oracle");
            Arc::new(OraclePriceFeed::new(accounts.clone(), programs.clone()))
        }
        PriceSource::Hermes => {
            info!("💵 Price source: Hermes ({})", config.price.hermes_endpoint);
            Arc::new(
                HermesPriceFeed::new(
                    &config.price.hermes_endpoint,
                    &config.price.sol_usd_feed_id,
                    config.sync.price_timeout(),
                )
                .context("Failed to build Hermes client")?,
            )
        }
    };

    let finalizer: Arc<dyn VictoryFinalizer> = match &config.finalizer.endpoint {
        Some(endpoint) => {
            info!("🏁 Finalizer: {}", endpoint);
            Arc::new(
                HttpFinalizer::new(
                    endpoint,
                    config.finalizer.auth_token.clone(),
                    config.sync.finalizer_timeout(),
                )
                .context("Failed to build finalizer client")?,
            )
        }
        None => {
            warn!("⚠️  Finalizer: DISABLED, victories stay pending");
            Arc::new(DisabledFinalizer)
        }
    };

    let notifier = Arc::new(LogNotifier);
    let reconciler = Arc::new(Reconciler::new(
        db,
        notifier.clone(),
        tiers,
        config.sync.store_timeout(),
    ));
    let sync = Arc::new(SyncOrchestrator::new(
        accounts,
        reconciler.clone(),
        price.clone(),
        programs,
        SyncSettings::from(&config.sync),
    ));
    let battles = Arc::new(BattleEngine::new(
        reconciler,
        price,
        finalizer,
        notifier,
        config.sync.price_timeout(),
        config.sync.finalizer_timeout(),
    ));

    let shutdown = CancellationToken::new();
    let scan_task = spawn_full_scan(
        sync.clone(),
        Duration::from_secs(config.sync.scan_interval_secs),
        shutdown.clone(),
    );
    let victory_task = spawn_victory_loop(
        battles.clone(),
        sync.networks(),
        Duration::from_secs(config.sync.victory_scan_interval_secs),
        shutdown.clone(),
    );

    if config.server.webhook_secret.is_none() {
        warn!("⚠️  No webhook secret configured, HTTP endpoints are open");
    }
    let state = AppState {
        sync,
        battles,
        default_network,
        secret: config.server.webhook_secret.clone(),
        max_batch_events: config.server.max_batch_events,
        shutdown: shutdown.clone(),
    };
    let mut server_task = tokio::spawn({
        let bind = config.server.bind.clone();
        async move { server::serve(state, &bind).await }
    });

    let server_exit = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("❌ Failed to listen for Ctrl-C: {}", e);
            }
            info!("🛑 Shutdown requested");
            None
        }
        res = &mut server_task => Some(res),
    };
    shutdown.cancel();
    let server_exit = match server_exit {
        Some(res) => res,
        None => server_task.await,
    };
    log_server_exit(server_exit);
    let _ = tokio::join!(scan_task, victory_task);

    info!("👋 Battle Sync stopped");
    Ok(())
}

fn log_server_exit(res: Result<Result<()>, tokio::task::JoinError>) {
    match res {
        Ok(Ok(())) => info!("🌐 HTTP server stopped"),
        Ok(Err(e)) => error!("❌ HTTP server error: {:#}", e),
        Err(e) => error!("❌ HTTP server task panicked: {}", e),
    }
}

fn init_logging(monitoring: &MonitoringConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&monitoring.log_level));

    let builder = fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    if monitoring.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}
