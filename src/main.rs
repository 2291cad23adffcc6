// =============================================================================
// Whale Signal Engine — Main Entry Point
// =============================================================================
//
// Wires the Repository, Cache, Broker, Feed Client, Ingest Handler, the five
// background workers (Baseline, Regime, Pattern, Correlation, Performance
// Refresher), the Signal Generator, the Signal Outcome Tracker and Whale
// Followup Tracker, and the REST/SSE surface into one `AppState`, then spawns
// each piece as its own task and waits for Ctrl+C.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod broker;
mod cache;
mod config;
mod error;
mod feed;
mod followup;
mod indicators;
mod ingest;
mod outcome;
mod repository;
mod signals;
mod types;
mod webhook;
mod workers;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::broker::Broker;
use crate::cache::{Cache, InMemoryCache};
use crate::config::EngineConfig;
use crate::feed::{FeedClient, HmacTokenProvider};
use crate::followup::WhaleFollowupTracker;
use crate::ingest::IngestHandler;
use crate::outcome::SignalOutcomeTracker;
use crate::repository::sqlite::SqliteRepository;
use crate::repository::Repository;
use crate::signals::SignalGenerator;
use crate::webhook::WebhookDispatcher;
use crate::workers::{
    BaselineCalculator, CorrelationAnalyzer, PatternDetector, PerformanceRefresher, RegimeDetector,
};

const CONFIG_PATH: &str = "engine_config.json";
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Whale Signal Engine — Starting Up                 ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = EngineConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load engine config, using defaults");
        EngineConfig::default()
    });

    if let Ok(syms) = std::env::var("WHALE_SYMBOLS") {
        config.symbols = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    let config = Arc::new(config);

    info!(symbols = ?config.symbols, "symbol universe configured");

    // ── 2. Build shared components ───────────────────────────────────────
    let db_path =
        std::env::var("WHALE_DB_PATH").unwrap_or_else(|_| "whale_signal_engine.db".into());
    let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::open(&db_path)?);
    let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new());
    let broker = Broker::spawn();
    let webhooks = WebhookDispatcher::spawn(Client::new());

    let key_id = std::env::var("WHALE_FEED_KEY_ID").unwrap_or_default();
    let secret = std::env::var("WHALE_FEED_SECRET").unwrap_or_default();
    let feed_client = Arc::new(FeedClient::new(
        config.trading_ws_url.clone(),
        config.symbols.clone(),
        Arc::new(HmacTokenProvider::new(key_id, secret)),
        Duration::from_secs(config.ping_interval_secs),
        Duration::from_secs(config.reconnect_base_secs),
        Duration::from_secs(config.reconnect_max_secs),
    ));

    let generator = Arc::new(SignalGenerator::new(
        repo.clone(),
        cache.clone(),
        broker.clone(),
        config.clone(),
    ));
    let ingest = Arc::new(IngestHandler::new(
        repo.clone(),
        cache.clone(),
        broker.clone(),
        webhooks.clone(),
        config.clone(),
        generator.clone(),
    ));

    let outcome_tracker = Arc::new(SignalOutcomeTracker::new(repo.clone(), config.clone()));
    let followup_tracker = Arc::new(WhaleFollowupTracker::new(repo.clone()));
    let baseline = Arc::new(BaselineCalculator::new(repo.clone(), config.clone()));
    let regime = Arc::new(RegimeDetector::new(repo.clone()));
    let pattern = Arc::new(PatternDetector::new(repo.clone()));
    let correlation = Arc::new(CorrelationAnalyzer::new(repo.clone()));
    let performance = Arc::new(PerformanceRefresher::new(repo.clone()));

    let state = Arc::new(AppState::new(
        config.clone(),
        repo,
        cache,
        broker,
        webhooks,
        feed_client.clone(),
        ingest.clone(),
        generator.clone(),
        outcome_tracker.clone(),
        followup_tracker.clone(),
        baseline.clone(),
        regime.clone(),
        pattern.clone(),
        correlation.clone(),
        performance.clone(),
    ));

    let shutdown = CancellationToken::new();

    // ── 3. Feed Client → Ingest Handler pipeline ─────────────────────────
    let (trades_tx, mut trades_rx) = mpsc::channel(4096);
    {
        let feed_client = feed_client.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = feed_client.run(trades_tx) => {}
                _ = shutdown.cancelled() => {}
            }
        });
    }
    {
        let ingest = ingest.clone();
        let shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            while let Some(trade) = trades_rx.recv().await {
                if let Err(e) = ingest.handle_trade(trade).await {
                    error!(error = %e, "trade ingest failed");
                }
            }
        });
        tokio::spawn(async move {
            shutdown.cancelled().await;
            handle.abort();
        });
    }

    // ── 4. Background analysis workers ───────────────────────────────────
    baseline
        .clone()
        .spawn(config.symbols.clone(), Duration::from_secs(300));
    regime
        .clone()
        .spawn(config.symbols.clone(), Duration::from_secs(60));
    pattern
        .clone()
        .spawn(config.symbols.clone(), Duration::from_secs(30));
    correlation.clone().spawn(Duration::from_secs(900));
    performance.clone().spawn(Duration::from_secs(3600));

    // ── 5. Outcome & followup trackers ───────────────────────────────────
    outcome_tracker.clone().spawn(Duration::from_secs(60));
    followup_tracker.clone().spawn(Duration::from_secs(60));

    info!("all background workers and trackers spawned");

    // ── 6. REST/SSE API server ───────────────────────────────────────────
    let bind_addr = std::env::var("WHALE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    {
        let api_state = state.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let app = api::router(api_state);
            let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(addr = %bind_addr, error = %e, "failed to bind API server");
                    return;
                }
            };
            info!(addr = %bind_addr, "API server listening");
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                shutdown.cancelled().await;
            });
            if let Err(e) = serve.await {
                error!(error = %e, "API server failed");
            }
        });
    }

    info!("all subsystems running. Press Ctrl+C to stop.");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — draining (up to {:?})", DRAIN_TIMEOUT);
    shutdown.cancel();
    tokio::time::sleep(Duration::from_millis(500).min(DRAIN_TIMEOUT)).await;

    if let Err(e) = config.save(CONFIG_PATH) {
        error!(error = %e, "failed to save engine config on shutdown");
    }

    info!("whale signal engine shut down complete.");
    Ok(())
}
