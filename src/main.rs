// ===============================
// src/main.rs
// ===============================
/*
=============================================================================
Project : cexdex_bot_rust — CEX/DEX price-divergence decision engine in Rust
Module  : main.rs
Version : 0.4.0
License : MIT (see LICENSE)

Summary : Consumes normalized CEX/DEX ticks over an at-least-once event bus,
          classifies divergence into alignment bands, evaluates cross-venue
          edge after costs, applies risk limits with idempotent execution,
          simulates paper fills into a SQLite ledger, and exposes Prometheus
          metrics plus a small HTTP status API.
=============================================================================
*/
mod align;
mod api;
mod bus;
mod config;
mod domain;
mod executor;
mod feed;
mod ledger;
mod metrics;
mod quotes;
mod recorder;
mod risk;
mod strategy;

use std::sync::Arc;

use tokio::select;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::ApiContext;
use crate::bus::{Bus, TOPIC_MARKET_DATA, TOPIC_STRATEGY_DECISIONS};
use crate::config::{FeedMode, QuoteMode};
use crate::domain::RecordedEnvelope;
use crate::executor::{EngineCfg, ExecStatusSnapshot, ExecutionEngine};
use crate::ledger::PaperLedger;
use crate::quotes::{HttpQuoteSource, MockQuoteSource, QuoteSource};
use crate::strategy::{EvaluatorCfg, PipelineSnapshot};

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // ---- Load & validate config (exit non-zero when invalid) ----
    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(cfg.metrics_port));

    // ---- Human-friendly startup info + export config to metrics ----
    info!(
        symbol = %cfg.symbol,
        cex = %cfg.cex_venue,
        cex_fallback = ?cfg.cex_fallback_venue,
        dex = %cfg.dex_venue,
        mode = cfg.mode.as_str(),
        kill_switch = cfg.kill_switch,
        feed = ?cfg.feed_mode,
        quote = ?cfg.quote_mode,
        max_order_usdt = cfg.limits.max_order_usdt,
        max_daily_volume_usdt = cfg.limits.max_daily_volume_usdt,
        min_edge_bps = cfg.limits.min_edge_bps,
        "startup config"
    );
    metrics::CONFIG_MODE
        .with_label_values(&[cfg.mode.as_str()])
        .set(1);
    metrics::CONFIG_KILL_SWITCH.set(cfg.kill_switch as i64);
    metrics::CONFIG_SYMBOL
        .with_label_values(&[&cfg.symbol])
        .set(1);

    // ---- Shutdown flag observed by every long-lived task ----
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ---- Recorder (optional) + bus ----
    let rec_tx = match cfg.record_file.clone() {
        Some(path) => {
            let (tx, rx) = mpsc::channel::<RecordedEnvelope>(8192);
            tokio::spawn(recorder::run(rx, path));
            Some(tx)
        }
        None => None,
    };
    let bus = Bus::new(cfg.bus_max_deliveries, rec_tx);

    // ---- Tick producers ----
    match cfg.feed_mode {
        FeedMode::Mock => {
            tokio::spawn(feed::run_mock(
                bus.clone(),
                cfg.symbol.clone(),
                cfg.cex_venue.clone(),
                cfg.dex_venue.clone(),
                shutdown_rx.clone(),
            ));
        }
        FeedMode::Ws => {
            tokio::spawn(feed::run_ws(
                bus.clone(),
                cfg.tick_ws_url.clone(),
                shutdown_rx.clone(),
            ));
        }
    }

    // ---- Quote source ----
    let quote: Arc<dyn QuoteSource> = match cfg.quote_mode {
        QuoteMode::Mock => Arc::new(MockQuoteSource::new(1.0, cfg.costs.dex_lp_fee_bps)),
        QuoteMode::Http => Arc::new(HttpQuoteSource::new(
            cfg.quote_http_url.clone(),
            cfg.quote_confidence,
        )),
    };

    // ---- Ledger ----
    let ledger = match PaperLedger::open(&cfg.ledger_path) {
        Ok(ledger) => ledger,
        Err(e) => {
            error!(error = %e, path = %cfg.ledger_path, "cannot open paper ledger");
            std::process::exit(1);
        }
    };

    // ---- Snapshot channels for the status API ----
    let (decision_tx, decision_rx) = watch::channel(None);
    let (state_tx, state_rx) = watch::channel(PipelineSnapshot::default());
    let (status_tx, status_rx) = watch::channel(ExecStatusSnapshot::default());

    // ---- Strategy evaluator ----
    tokio::spawn(strategy::run(
        bus.clone(),
        EvaluatorCfg::from_cfg(&cfg),
        quote,
        decision_tx,
        state_tx,
        shutdown_rx.clone(),
    ));

    // ---- Execution engine (live venue client is an external collaborator;
    //      none is wired in-tree) ----
    let engine = ExecutionEngine::new(EngineCfg::from_cfg(&cfg), ledger.clone(), None);
    tokio::spawn(executor::run(
        bus.clone(),
        engine,
        status_tx,
        shutdown_rx.clone(),
    ));

    // ---- Status API ----
    tokio::spawn(api::run(
        cfg.api_port,
        ApiContext {
            decision_rx,
            state_rx,
            status_rx,
            ledger,
        },
        shutdown_rx,
    ));

    // ---- Heartbeat until Ctrl-C ----
    let mut beat = interval(Duration::from_secs(5));
    loop {
        select! {
            _ = beat.tick() => {
                info!(
                    ticks = bus.topic_len(TOPIC_MARKET_DATA),
                    decisions = bus.topic_len(TOPIC_STRATEGY_DECISIONS),
                    "heartbeat"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl-C, shutting down");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    // consumer loops run bounded polls; give them one cycle to drain
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    info!("shutdown complete");
}
