// =============================================================================
// Aurora Equities — Main Entry Point
// =============================================================================
//
// Adapted from the teacher's task topology (`main.rs`): one `tokio::spawn`
// per independent loop, a single `tokio::sync::watch<bool>` shutdown signal
// fanned out to every task, and a `ctrl_c().await` handler that flushes the
// store before exit. The teacher starts in Demo + Paused mode for safety;
// this engine keeps that default (`EngineState::new` starts paused) and
// requires an explicit `/api/v1/control/resume` call to begin trading.
// =============================================================================

mod api;
mod broker;
mod cache;
mod candle;
mod collector;
mod config;
mod discovery;
mod engine;
mod error;
mod execution;
mod indicators;
mod position;
mod risk;
mod scheduler;
mod signals;
mod store;
mod stream;
mod subscription;
mod types;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;
use crate::engine::Engine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Aurora Equities — Starting Up                     ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path = std::env::var("AURORA_CONFIG_PATH").unwrap_or_else(|_| "engine_config.json".to_string());
    let config = EngineConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load engine config, using defaults");
        EngineConfig::default()
    });

    info!(
        account_mode = %config.account_mode,
        trading_style = %config.trading_style,
        "engine starting in SAFE mode (paused, operator must resume)"
    );

    let engine = Engine::new(config)?;

    // A single shutdown signal fanned out to every background task.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Stream client connection loop ────────────────────────────────────
    {
        let stream = engine.stream.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move {
            stream.run(rx).await;
        });
    }

    // ── Polling worker (REST fallback for polled symbols) ────────────────
    {
        let subscriptions = engine.subscriptions.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move {
            subscriptions.run_polling_loop(rx).await;
        });
    }

    // ── Scheduler: time-slot rotation + discovery + signal scan ──────────
    {
        let scheduler = engine.scheduler.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move {
            scheduler.run_slot_loop(rx).await;
        });
    }
    {
        let scheduler = engine.scheduler.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move {
            scheduler.run_signal_loop(rx).await;
        });
    }

    // ── Candle Trade Manager scan loop ────────────────────────────────────
    let candle_manager = candle::CandleTradeManager::new(engine.collector.clone(), engine.executor.clone());
    {
        let manager = candle_manager.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move {
            manager.run_scan_loop(rx).await;
        });
    }

    // ── External order reconciliation ─────────────────────────────────────
    {
        let engine_recon = engine.clone();
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            return;
                        }
                    }
                }
                if let Err(e) = engine_recon.scheduler.reconcile_external_orders().await {
                    error!(error = %e, "order reconciliation failed");
                    engine_recon.record_error(format!("reconciliation failed: {e}"), None);
                }
            }
        });
    }

    // ── REST API server ────────────────────────────────────────────────────
    {
        let api_engine = engine.clone();
        let bind_addr = std::env::var("AURORA_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
        tokio::spawn(async move {
            let app = api::rest::router(api_engine);
            let listener = tokio::net::TcpListener::bind(&bind_addr)
                .await
                .expect("failed to bind API server");
            info!(addr = %bind_addr, "API server listening");
            axum::serve(listener, app).await.expect("API server failed");
        });
    }

    info!("all subsystems running, engine is PAUSED — resume via POST /api/v1/control/resume");

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    let _ = shutdown_tx.send(true);
    engine.shutdown().await;

    info!("Aurora Equities shut down complete.");
    Ok(())
}
