// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : cexdex_bot_rust — CEX/DEX price-divergence decision engine in Rust
Module  : config.rs
Version : 0.4.0
License : MIT (see LICENSE)

Summary : Consumes normalized CEX/DEX ticks over an at-least-once event bus,
          classifies divergence into alignment bands, evaluates cross-venue
          edge after costs, applies risk limits with idempotent execution,
          simulates paper fills into a SQLite ledger, and exposes Prometheus
          metrics plus a small HTTP status API.
=============================================================================
*/
use std::env;
use std::str::FromStr;

use dotenvy::dotenv;
use thiserror::Error;

use crate::align::{AlignPolicy, AlignmentBands, AlignmentConfig};
use crate::domain::ExecutionMode;
use crate::quotes::QuoteConfidence;

/// Tick producer mode: in-process mock walk or a WS endpoint that already
/// emits the normalized tick schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedMode {
    Mock,
    Ws,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuoteMode {
    Mock,
    Http,
}

#[derive(Clone, Debug)]
pub struct VenueCredentials {
    pub api_key: String,
    pub api_secret: String,
}

/// Risk limits enforced by the execution engine.
#[derive(Clone, Debug)]
pub struct Limits {
    pub max_order_usdt: f64,
    pub max_daily_volume_usdt: f64,
    pub min_edge_bps: f64,
    pub max_slippage_bps: f64,
    pub max_staleness_secs: f64,
    pub max_concurrent_orders: usize,
}

/// Static cost model inputs for the spread evaluator.
#[derive(Clone, Debug)]
pub struct CostCfg {
    pub cex_fee_bps: f64,
    pub dex_lp_fee_bps: f64,
    pub gas_cost_usdt: Option<f64>,
    pub rebalance_enabled: bool,
    pub rebalance_cost_bps: f64,
}

#[derive(Clone, Debug)]
pub struct Cfg {
    pub symbol: String,
    pub cex_venue: String,
    pub cex_fallback_venue: Option<String>,
    pub dex_venue: String,

    pub feed_mode: FeedMode,
    pub tick_ws_url: String,
    pub quote_mode: QuoteMode,
    pub quote_http_url: String,
    pub quote_confidence: QuoteConfidence,

    pub ledger_path: String,
    pub record_file: Option<String>,
    pub metrics_port: u16,
    pub api_port: u16,

    pub mode: ExecutionMode,
    pub kill_switch: bool,
    pub limits: Limits,
    pub costs: CostCfg,
    pub align: AlignmentConfig,
    pub policy: AlignPolicy,
    pub bus_max_deliveries: u32,
    pub creds: Option<VenueCredentials>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("unknown EXECUTION_MODE {0:?} (expected off|paper|live)")]
    InvalidMode(String),
    #[error("unknown {key} {value:?}")]
    InvalidChoice { key: &'static str, value: String },
    #[error(
        "alignment bands must be strictly increasing: neutral {neutral} < soft {soft} < hard {hard}"
    )]
    BandOrdering {
        neutral: f64,
        soft: f64,
        hard: f64,
    },
    #[error("{key} must be positive, got {value}")]
    NonPositive { key: &'static str, value: f64 },
    #[error("live mode requires VENUE_API_KEY and VENUE_API_SECRET at startup")]
    MissingCredentials,
}

/// Unset -> default; set but unparsable -> hard error (never a silent default).
fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}

fn bool_var(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue { key, value: raw }),
        },
    }
}

fn string_var(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn parse_execution_mode(s: &str) -> Option<ExecutionMode> {
    match s.trim().to_ascii_lowercase().as_str() {
        "off" => Some(ExecutionMode::Off),
        "paper" => Some(ExecutionMode::Paper),
        "live" => Some(ExecutionMode::Live),
        _ => None,
    }
}

fn parse_confidence(s: &str) -> Option<QuoteConfidence> {
    match s.trim().to_ascii_lowercase().as_str() {
        "on_chain" | "onchain" => Some(QuoteConfidence::OnChain),
        "aggregator" => Some(QuoteConfidence::Aggregator),
        "scraped" => Some(QuoteConfidence::Scraped),
        _ => None,
    }
}

pub fn load() -> Result<Cfg, ConfigError> {
    // .env dibaca dulu, env yang sudah di-set tidak di-override
    let _ = dotenv();

    // ===== Market =====
    let symbol = string_var("SYMBOL", "TKNUSDT").to_ascii_uppercase();
    let cex_venue = string_var("CEX_VENUE", "binance").to_ascii_lowercase();
    let cex_fallback_venue = env::var("CEX_FALLBACK_VENUE")
        .ok()
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty());
    let dex_venue = string_var("DEX_VENUE", "dex").to_ascii_lowercase();

    // ===== Feed / quote sources =====
    let feed_mode = match string_var("FEED_MODE", "mock").to_ascii_lowercase().as_str() {
        "mock" => FeedMode::Mock,
        "ws" => FeedMode::Ws,
        other => {
            return Err(ConfigError::InvalidChoice {
                key: "FEED_MODE",
                value: other.to_string(),
            })
        }
    };
    let tick_ws_url = string_var("TICK_WS_URL", "ws://127.0.0.1:8900/ticks");

    let quote_mode = match string_var("QUOTE_SOURCE", "mock")
        .to_ascii_lowercase()
        .as_str()
    {
        "mock" => QuoteMode::Mock,
        "http" => QuoteMode::Http,
        other => {
            return Err(ConfigError::InvalidChoice {
                key: "QUOTE_SOURCE",
                value: other.to_string(),
            })
        }
    };
    let quote_http_url = string_var("QUOTE_HTTP_URL", "http://127.0.0.1:8901/ladder");
    let quote_confidence_raw = string_var("QUOTE_CONFIDENCE", "aggregator");
    let quote_confidence =
        parse_confidence(&quote_confidence_raw).ok_or(ConfigError::InvalidChoice {
            key: "QUOTE_CONFIDENCE",
            value: quote_confidence_raw.clone(),
        })?;

    // ===== Files / ports =====
    let ledger_path = string_var("LEDGER_PATH", "data/paper_ledger.db");
    let record_file = env::var("RECORD_FILE").ok().filter(|v| !v.is_empty());
    let metrics_port = parse_var("METRICS_PORT", 9898u16)?;
    let api_port = parse_var("API_PORT", 8088u16)?;

    // ===== Execution mode & kill switch =====
    let mode_raw = string_var("EXECUTION_MODE", "off");
    let mode = parse_execution_mode(&mode_raw).ok_or(ConfigError::InvalidMode(mode_raw))?;
    // Default ON: trading must be opted into, twice.
    let kill_switch = bool_var("KILL_SWITCH", true)?;

    // ===== Limits =====
    let limits = Limits {
        max_order_usdt: parse_var("MAX_ORDER_USDT", 1_000.0)?,
        max_daily_volume_usdt: parse_var("MAX_DAILY_VOLUME_USDT", 10_000.0)?,
        min_edge_bps: parse_var("MIN_EDGE_BPS", 50.0)?,
        max_slippage_bps: parse_var("MAX_SLIPPAGE_BPS", 100.0)?,
        max_staleness_secs: parse_var("MAX_STALENESS_SECS", 10.0)?,
        max_concurrent_orders: parse_var("MAX_CONCURRENT_ORDERS", 1usize)?,
    };

    // ===== Cost model =====
    let gas_cost_usdt = match env::var("GAS_COST_USDT") {
        Err(_) => None,
        Ok(raw) => Some(raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: "GAS_COST_USDT",
            value: raw,
        })?),
    };
    let costs = CostCfg {
        cex_fee_bps: parse_var("CEX_FEE_BPS", 10.0)?,
        dex_lp_fee_bps: parse_var("DEX_LP_FEE_BPS", 30.0)?,
        gas_cost_usdt,
        rebalance_enabled: bool_var("REBALANCE_COST_ENABLED", false)?,
        rebalance_cost_bps: parse_var("REBALANCE_COST_BPS", 0.0)?,
    };

    // ===== Alignment =====
    let align = AlignmentConfig {
        bands: AlignmentBands {
            neutral_pct: parse_var("ALIGN_NEUTRAL_PCT", 0.5)?,
            soft_pct: parse_var("ALIGN_SOFT_PCT", 1.0)?,
            hard_pct: parse_var("ALIGN_HARD_PCT", 2.0)?,
        },
        margin_pct: parse_var("ALIGN_MARGIN_PCT", 0.1)?,
        max_trade_usdt: parse_var("ALIGN_MAX_TRADE_USDT", 1_000.0)?,
        cooldown_secs: parse_var("ALIGN_COOLDOWN_SECS", 300.0)?,
        min_benefit_bps: parse_var("ALIGN_MIN_BENEFIT_BPS", 10.0)?,
    };

    // Promoted policy constants; defaults are the historical values.
    let mut policy = AlignPolicy::default();
    policy.protection_weight = parse_var("ALIGN_PROTECTION_WEIGHT", policy.protection_weight)?;
    policy.slippage_cap_bps = parse_var("ALIGN_SLIPPAGE_CAP_BPS", policy.slippage_cap_bps)?;
    policy.fill_slippage_bps_per_1k =
        parse_var("FILL_SLIPPAGE_BPS_PER_1K", policy.fill_slippage_bps_per_1k)?;
    policy.gas_estimate_usdt = parse_var("FILL_GAS_ESTIMATE_USDT", policy.gas_estimate_usdt)?;

    let bus_max_deliveries = parse_var("BUS_MAX_DELIVERIES", 3u32)?;

    // ===== Credentials (live only) =====
    let creds = match (env::var("VENUE_API_KEY").ok(), env::var("VENUE_API_SECRET").ok()) {
        (Some(api_key), Some(api_secret)) if !api_key.is_empty() && !api_secret.is_empty() => {
            Some(VenueCredentials { api_key, api_secret })
        }
        _ => None,
    };

    let cfg = Cfg {
        symbol,
        cex_venue,
        cex_fallback_venue,
        dex_venue,
        feed_mode,
        tick_ws_url,
        quote_mode,
        quote_http_url,
        quote_confidence,
        ledger_path,
        record_file,
        metrics_port,
        api_port,
        mode,
        kill_switch,
        limits,
        costs,
        align,
        policy,
        bus_max_deliveries,
        creds,
    };
    validate(&cfg)?;
    Ok(cfg)
}

/// Startup validation. The process must exit non-zero on any error here;
/// misconfiguration is never discovered at first trade.
pub fn validate(cfg: &Cfg) -> Result<(), ConfigError> {
    let b = &cfg.align.bands;
    if !(b.neutral_pct < b.soft_pct && b.soft_pct < b.hard_pct) {
        return Err(ConfigError::BandOrdering {
            neutral: b.neutral_pct,
            soft: b.soft_pct,
            hard: b.hard_pct,
        });
    }

    for (key, value) in [
        ("MAX_ORDER_USDT", cfg.limits.max_order_usdt),
        ("MAX_DAILY_VOLUME_USDT", cfg.limits.max_daily_volume_usdt),
        ("MAX_STALENESS_SECS", cfg.limits.max_staleness_secs),
        ("ALIGN_MAX_TRADE_USDT", cfg.align.max_trade_usdt),
    ] {
        if value <= 0.0 {
            return Err(ConfigError::NonPositive { key, value });
        }
    }
    if cfg.limits.max_concurrent_orders == 0 {
        return Err(ConfigError::NonPositive {
            key: "MAX_CONCURRENT_ORDERS",
            value: 0.0,
        });
    }
    if cfg.bus_max_deliveries == 0 {
        return Err(ConfigError::NonPositive {
            key: "BUS_MAX_DELIVERIES",
            value: 0.0,
        });
    }

    if cfg.mode == ExecutionMode::Live && cfg.creds.is_none() {
        return Err(ConfigError::MissingCredentials);
    }

    Ok(())
}
