// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Feed / bus --------
pub static TICKS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("ticks_total", "market data ticks consumed").unwrap());

pub static TICKS_BY_VENUE: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ticks_total_by_venue", "market data ticks per symbol & venue"),
        &["symbol", "venue"],
    )
    .unwrap()
});

pub static FEED_FRAMES_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "feed_frames_dropped_total",
        "ws frames that were not normalized ticks",
    )
    .unwrap()
});

pub static BUS_PUBLISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("bus_published_total", "envelopes published per topic"),
        &["topic"],
    )
    .unwrap()
});

pub static BUS_DEAD_LETTERS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "bus_dead_letters_total",
            "envelopes routed to dead.letters per origin topic",
        ),
        &["topic"],
    )
    .unwrap()
});

// -------- Strategy --------
pub static DECISIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "strategy_decisions_total",
            "strategy decisions (label: outcome = trade|hold)",
        ),
        &["outcome"],
    )
    .unwrap()
});

pub static EVALS_SKIPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "strategy_evals_skipped_total",
            "evaluations skipped by input-data reason",
        ),
        &["reason"],
    )
    .unwrap()
});

pub static EDGE_AFTER_COSTS_BPS: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "strategy_edge_after_costs_bps",
            "edge after modeled costs (bps)",
        )
        .buckets(vec![-100.0, -50.0, -20.0, 0.0, 20.0, 50.0, 100.0, 200.0, 400.0]),
    )
    .unwrap()
});

// -------- Execution --------
pub static EXEC_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "exec_outcomes_total",
            "execution outcomes (filled|failed|rejected|duplicate)",
        ),
        &["outcome"],
    )
    .unwrap()
});

pub static ORDERS_ACTIVE: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("orders_active", "orders currently pending").unwrap());

pub static DAILY_VOLUME_USDT: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("daily_volume_usdt", "filled volume in today's UTC window").unwrap());

// ---- Config visibility (mode / kill switch / symbol) ----
pub static CONFIG_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_execution_mode", "execution mode (label: mode)"),
        &["mode"],
    )
    .unwrap()
});

pub static CONFIG_KILL_SWITCH: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("config_kill_switch", "1 if the kill switch is active").unwrap());

pub static CONFIG_SYMBOL: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_symbol", "configured symbol (label: symbol)"),
        &["symbol"],
    )
    .unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(TICKS.clone())),
        REGISTRY.register(Box::new(TICKS_BY_VENUE.clone())),
        REGISTRY.register(Box::new(FEED_FRAMES_DROPPED.clone())),
        REGISTRY.register(Box::new(BUS_PUBLISHED.clone())),
        REGISTRY.register(Box::new(BUS_DEAD_LETTERS.clone())),
        REGISTRY.register(Box::new(DECISIONS.clone())),
        REGISTRY.register(Box::new(EVALS_SKIPPED.clone())),
        REGISTRY.register(Box::new(EDGE_AFTER_COSTS_BPS.clone())),
        REGISTRY.register(Box::new(EXEC_OUTCOMES.clone())),
        REGISTRY.register(Box::new(ORDERS_ACTIVE.clone())),
        REGISTRY.register(Box::new(DAILY_VOLUME_USDT.clone())),
        REGISTRY.register(Box::new(CONFIG_MODE.clone())),
        REGISTRY.register(Box::new(CONFIG_KILL_SWITCH.clone())),
        REGISTRY.register(Box::new(CONFIG_SYMBOL.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics) — tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(%addr, ?e, "metrics bind failed");
                return;
            }
        };
        eprintln!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => eprintln!("metrics accept error: {}", e),
            }
        }
    });
}
