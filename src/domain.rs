// ===============================
// src/domain.rs
// ===============================
use serde::{Deserialize, Serialize};

/// Trade direction across the two venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    BuyCexSellDex,
    BuyDexSellCex,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::BuyCexSellDex => "buy_cex_sell_dex",
            Direction::BuyDexSellCex => "buy_dex_sell_cex",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    Off,
    Paper,
    Live,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Off => "off",
            ExecutionMode::Paper => "paper",
            ExecutionMode::Live => "live",
        }
    }
}

/// Normalized tick from an external producer. The pipeline trusts the venue
/// label and timestamps; it never re-derives them from exchange payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketTick {
    pub symbol: String,
    pub venue: String,
    pub ts_ms: i64,
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub ask: Option<f64>,
    #[serde(default)]
    pub last: Option<f64>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub source_ts_ms: Option<i64>,
}

/// Latest per-venue quote, overwritten on each tick. Staleness is derived as
/// `now - ts_ms` at evaluation time, never stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VenueState {
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
    pub ts_ms: i64,
}

impl VenueState {
    pub fn from_tick(tick: &MarketTick) -> Self {
        Self {
            bid: tick.bid.or(tick.price),
            ask: tick.ask.or(tick.price),
            last: tick.last.or(tick.price),
            ts_ms: tick.ts_ms,
        }
    }

    pub fn age_secs(&self, now_ms: i64) -> f64 {
        ((now_ms - self.ts_ms).max(0)) as f64 / 1000.0
    }
}

/// One evaluation with complete, fresh inputs produces exactly one of these.
/// Never retroactively mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyDecision {
    pub id: String,
    pub ts_ms: i64,
    pub symbol: String,
    pub cex_bid: f64,
    pub cex_ask: f64,
    pub dex_price: f64,
    pub raw_spread_bps: f64,
    pub estimated_cost_bps: f64,
    pub edge_after_costs_bps: f64,
    pub would_trade: bool,
    pub direction: Option<Direction>,
    pub suggested_size_usdt: f64,
    pub reason: String,
}

/// Execution request consumed by the engine. `idempotency_key` is the sole
/// deduplication key; the bus delivery id is never used for that purpose.
/// Observed prices ride along so paper fills settle against real quotes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub id: String,
    pub ts_ms: i64,
    pub symbol: String,
    pub direction: Direction,
    pub size_usdt: f64,
    pub edge_bps: f64,
    pub mode: ExecutionMode,
    pub idempotency_key: String,
    #[serde(default)]
    pub cex_price: Option<f64>,
    #[serde(default)]
    pub dex_price: Option<f64>,
    #[serde(default)]
    pub lp_fee_bps: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Pending,
    Filled,
    Failed,
    Rejected,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "pending",
            TradeStatus::Filled => "filled",
            TradeStatus::Failed => "failed",
            TradeStatus::Rejected => "rejected",
        }
    }
}

/// Order record driven through PENDING -> FILLED | FAILED | REJECTED.
/// Terminal records are immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub ts_ms: i64,
    pub symbol: String,
    pub direction: Direction,
    pub size_usdt: f64,
    pub edge_bps: f64,
    pub mode: ExecutionMode,
    pub status: TradeStatus,
    pub idempotency_key: String,
    #[serde(default)]
    pub fill_price: Option<f64>,
    #[serde(default)]
    pub pnl_usdt: Option<f64>,
    #[serde(default)]
    pub fees_usdt: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Envelope carried on the bus. Deserialized and validated once at the bus
/// boundary; consumers match exhaustively on the tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BusMessage {
    Tick(MarketTick),
    Decision(StrategyDecision),
    ExecRequest(ExecutionRequest),
    Dead {
        origin_topic: String,
        group: String,
        deliveries: u32,
        inner: Box<BusMessage>,
    },
    Note(String),
}

impl BusMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            BusMessage::Tick(_) => "tick",
            BusMessage::Decision(_) => "decision",
            BusMessage::ExecRequest(_) => "exec_request",
            BusMessage::Dead { .. } => "dead",
            BusMessage::Note(_) => "note",
        }
    }
}

/// Envelope as persisted by the recorder: topic + sequence + payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedEnvelope {
    pub topic: String,
    pub seq: u64,
    pub ts_ms: i64,
    pub msg: BusMessage,
}
