// ===============================
// src/executor.rs (execution engine)
// ===============================
//
// Consumes strategy decisions and external execution requests through its
// own consumer group and drives the per-order state machine:
//
//     PENDING -> FILLED | FAILED      (duplicates never create a record)
//
// Idempotency is checked before anything else so retried requests are always
// absorbed; the business key is `idempotency_key`, never the bus seq.
// Paper fills settle against the real observed prices carried on the
// request; live mode is only the integration point for an external venue
// client and hard-stops without one.
//
use std::collections::VecDeque;
use std::sync::Arc;

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::align::AlignPolicy;
use crate::bus::{Bus, TOPIC_EXECUTION_REQUESTS, TOPIC_STRATEGY_DECISIONS};
use crate::config::{Cfg, Limits, VenueCredentials};
use crate::domain::{
    BusMessage, Direction, ExecutionMode, ExecutionRequest, StrategyDecision, TradeRecord,
    TradeStatus,
};
use crate::ledger::{LedgerError, PaperFill, PaperLedger};
use crate::metrics::{DAILY_VOLUME_USDT, EXEC_OUTCOMES, ORDERS_ACTIVE};
use crate::risk::{RiskGate, ValidationError};

pub const CONSUMER_GROUP: &str = "execution-engine";
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Interface to the external live order-placement client. Not implemented
/// in-tree; live fills arrive through whatever implements this.
#[async_trait]
pub trait VenueClient: Send + Sync {
    async fn place_order(&self, req: &ExecutionRequest) -> Result<VenueFill, VenueError>;
}

#[derive(Debug, Clone)]
pub struct VenueFill {
    pub fill_price: f64,
    pub filled_size_usdt: f64,
}

#[derive(Debug, Error)]
pub enum VenueError {
    #[error("venue rejected order: {0}")]
    Rejected(String),
    #[error("venue transport error: {0}")]
    Transport(String),
}

/// Typed execution outcomes. Rejections and duplicates are normal results,
/// not errors.
#[derive(Debug, Clone)]
pub enum ExecOutcome {
    Executed(TradeRecord),
    Rejected { reason: String },
    Duplicate { idempotency_key: String, trade_id: String },
}

impl ExecOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ExecOutcome::Executed(rec) => rec.status.as_str(),
            ExecOutcome::Rejected { .. } => "rejected",
            ExecOutcome::Duplicate { .. } => "duplicate",
        }
    }
}

#[derive(Clone, Debug)]
pub struct EngineCfg {
    pub mode: ExecutionMode,
    pub kill_switch: bool,
    pub limits: Limits,
    pub policy: AlignPolicy,
    pub dex_lp_fee_bps: f64,
    pub creds: Option<VenueCredentials>,
}

impl EngineCfg {
    pub fn from_cfg(cfg: &Cfg) -> Self {
        Self {
            mode: cfg.mode,
            kill_switch: cfg.kill_switch,
            limits: cfg.limits.clone(),
            policy: cfg.policy.clone(),
            dex_lp_fee_bps: cfg.costs.dex_lp_fee_bps,
            creds: cfg.creds.clone(),
        }
    }
}

/// Read view for /status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecStatusSnapshot {
    pub mode: String,
    pub kill_switch: bool,
    pub active_orders: usize,
    pub daily_volume_usdt: f64,
    pub fills: u64,
    pub failures: u64,
    pub rejections: u64,
    pub duplicates: u64,
    pub max_order_usdt: f64,
    pub max_daily_volume_usdt: f64,
    pub min_edge_bps: f64,
    pub max_concurrent_orders: usize,
}

pub struct ExecutionEngine {
    cfg: EngineCfg,
    gate: RiskGate,
    ledger: PaperLedger,
    venue_client: Option<Arc<dyn VenueClient>>,
    /// idempotency_key -> trade id of the absorbed execution
    seen: HashMap<String, String>,
    active: HashSet<String>,
    recent: VecDeque<TradeRecord>,
    fills: u64,
    failures: u64,
    rejections: u64,
    duplicates: u64,
}

impl ExecutionEngine {
    pub fn new(
        cfg: EngineCfg,
        ledger: PaperLedger,
        venue_client: Option<Arc<dyn VenueClient>>,
    ) -> Self {
        let gate = RiskGate::new(cfg.kill_switch, cfg.mode, cfg.limits.clone());
        Self {
            cfg,
            gate,
            ledger,
            venue_client,
            seen: HashMap::new(),
            active: HashSet::new(),
            recent: VecDeque::with_capacity(64),
            fills: 0,
            failures: 0,
            rejections: 0,
            duplicates: 0,
        }
    }

    fn next_trade_id(now_ms: i64) -> String {
        format!("T-{}-{}", now_ms, rand::thread_rng().gen::<u32>())
    }

    /// Paper fill model. The clip's own size moves price:
    /// `(size/1000)*10` bps plus the caller-supplied jitter, capped at
    /// MAX_SLIPPAGE_BPS. PnL settles against the carried real prices when
    /// present; otherwise the edge-bps approximation.
    fn simulate_fill(&self, req: &ExecutionRequest, jitter_bps: f64) -> (f64, f64, f64) {
        let size_slip_bps = req.size_usdt / 1_000.0 * self.cfg.policy.fill_slippage_bps_per_1k;
        let slip = (size_slip_bps + jitter_bps).min(self.cfg.limits.max_slippage_bps) / 10_000.0;
        let lp_fee_bps = req.lp_fee_bps.unwrap_or(self.cfg.dex_lp_fee_bps);

        match (req.cex_price, req.dex_price) {
            (Some(cex), Some(dex)) if cex > 0.0 && dex > 0.0 => {
                let gross = match req.direction {
                    Direction::BuyDexSellCex => (cex - dex) / dex * req.size_usdt,
                    Direction::BuyCexSellDex => (dex - cex) / cex * req.size_usdt,
                };
                let lp_fee = req.size_usdt * lp_fee_bps / 10_000.0;
                let gas = self.cfg.policy.gas_estimate_usdt;
                // the DEX leg is the one that moves against the clip
                let fill_price = match req.direction {
                    Direction::BuyDexSellCex => dex * (1.0 + slip),
                    Direction::BuyCexSellDex => dex * (1.0 - slip),
                };
                (fill_price, gross - lp_fee - gas, lp_fee + gas)
            }
            _ => {
                // no real prices on the request: edge-bps approximation only
                let pnl = req.size_usdt * req.edge_bps / 10_000.0;
                let fill_price = req.dex_price.or(req.cex_price).unwrap_or(0.0);
                (fill_price, pnl, 0.0)
            }
        }
    }

    /// Drive one request through the state machine. `jitter_bps` is passed
    /// in so tests can pin it to zero; the run loop draws 0-5 bps.
    pub async fn execute(
        &mut self,
        req: &ExecutionRequest,
        jitter_bps: f64,
    ) -> Result<ExecOutcome, LedgerError> {
        let now_ms = Utc::now().timestamp_millis();

        // Idempotency comes before any validation so a retried request is
        // absorbed no matter how limits have moved since the first attempt.
        if let Some(trade_id) = self.seen.get(&req.idempotency_key) {
            self.duplicates += 1;
            info!(key = %req.idempotency_key, trade_id = %trade_id, "duplicate request absorbed");
            return Ok(ExecOutcome::Duplicate {
                idempotency_key: req.idempotency_key.clone(),
                trade_id: trade_id.clone(),
            });
        }
        if self.ledger.has_decision(&req.idempotency_key)? {
            self.duplicates += 1;
            return Ok(ExecOutcome::Duplicate {
                idempotency_key: req.idempotency_key.clone(),
                trade_id: String::new(),
            });
        }

        if req.size_usdt > self.cfg.limits.max_order_usdt {
            self.rejections += 1;
            let reason = ValidationError::OrderTooLarge {
                size: req.size_usdt,
                max: self.cfg.limits.max_order_usdt,
            }
            .to_string();
            warn!(id = %req.id, %reason, "execution rejected");
            return Ok(ExecOutcome::Rejected { reason });
        }

        if let Err(e) = self
            .gate
            .validate(req.edge_bps, req.size_usdt, self.active.len())
        {
            self.rejections += 1;
            let reason = e.to_string();
            warn!(id = %req.id, %reason, "execution rejected");
            return Ok(ExecOutcome::Rejected { reason });
        }

        // Accepted: PENDING, tracked as active until terminal.
        let trade_id = Self::next_trade_id(now_ms);
        let mut rec = TradeRecord {
            id: trade_id.clone(),
            ts_ms: now_ms,
            symbol: req.symbol.clone(),
            direction: req.direction,
            size_usdt: req.size_usdt,
            edge_bps: req.edge_bps,
            mode: self.cfg.mode,
            status: TradeStatus::Pending,
            idempotency_key: req.idempotency_key.clone(),
            fill_price: None,
            pnl_usdt: None,
            fees_usdt: None,
            reason: None,
        };
        self.active.insert(trade_id.clone());
        self.seen.insert(req.idempotency_key.clone(), trade_id.clone());
        ORDERS_ACTIVE.set(self.active.len() as i64);

        match self.cfg.mode {
            ExecutionMode::Paper => {
                let (fill_price, pnl, fees) = self.simulate_fill(req, jitter_bps);
                rec.status = TradeStatus::Filled;
                rec.fill_price = Some(fill_price);
                rec.pnl_usdt = Some(pnl);
                rec.fees_usdt = Some(fees);

                self.ledger.record_fill(&PaperFill {
                    trade_id: trade_id.clone(),
                    ts_ms: now_ms,
                    symbol: req.symbol.clone(),
                    direction: req.direction,
                    size_usdt: req.size_usdt,
                    fill_price,
                    edge_bps: req.edge_bps,
                    pnl_usdt: pnl,
                    fees_usdt: fees,
                    cex_price: req.cex_price,
                    dex_price: req.dex_price,
                    decision_id: req.idempotency_key.clone(),
                })?;

                self.gate.record_volume(req.size_usdt);
                self.fills += 1;
                info!(
                    id = %trade_id,
                    size = req.size_usdt,
                    fill_price,
                    pnl,
                    fees,
                    "PAPER FILL"
                );
            }
            ExecutionMode::Live => {
                // Deliberate hard stops: funds never go at risk speculatively.
                if self.cfg.creds.is_none() {
                    let reason = "missing credentials";
                    rec.status = TradeStatus::Failed;
                    rec.reason = Some(reason.to_string());
                    self.failures += 1;
                    error!(id = %trade_id, reason, "live execution failed");
                } else if let Some(client) = self.venue_client.clone() {
                    match client.place_order(req).await {
                        Ok(fill) => {
                            rec.status = TradeStatus::Filled;
                            rec.fill_price = Some(fill.fill_price);
                            self.gate.record_volume(fill.filled_size_usdt);
                            self.fills += 1;
                            info!(id = %trade_id, price = fill.fill_price, "LIVE FILL");
                        }
                        Err(e) => {
                            rec.status = TradeStatus::Failed;
                            rec.reason = Some(e.to_string());
                            self.failures += 1;
                            error!(id = %trade_id, error = %e, "live execution failed");
                        }
                    }
                } else {
                    let reason = "live venue client not configured";
                    rec.status = TradeStatus::Failed;
                    rec.reason = Some(reason.to_string());
                    self.failures += 1;
                    error!(id = %trade_id, reason, "live execution failed");
                }
            }
            ExecutionMode::Off => {
                // unreachable through the gate; terminal failure if forced
                rec.status = TradeStatus::Failed;
                rec.reason = Some("execution mode is off".to_string());
            }
        }

        self.active.remove(&trade_id);
        ORDERS_ACTIVE.set(self.active.len() as i64);
        if self.recent.len() >= 64 {
            self.recent.pop_front();
        }
        self.recent.push_back(rec.clone());
        Ok(ExecOutcome::Executed(rec))
    }

    /// Glue from strategy output to execution input. Records every decision
    /// (even would_trade = false) for audit completeness, then executes only
    /// when the decision wants a trade and the gate agrees.
    pub async fn evaluate_and_execute(
        &mut self,
        decision: &StrategyDecision,
        jitter_bps: f64,
    ) -> Result<Option<ExecOutcome>, LedgerError> {
        self.ledger.record_decision(decision)?;

        if !decision.would_trade {
            return Ok(None);
        }
        let Some(direction) = decision.direction else {
            return Ok(None);
        };

        let size_usdt = decision
            .suggested_size_usdt
            .min(self.cfg.limits.max_order_usdt);

        let now_ms = Utc::now().timestamp_millis();
        let req = ExecutionRequest {
            id: format!("R-{}-{}", now_ms, rand::thread_rng().gen::<u32>()),
            ts_ms: now_ms,
            symbol: decision.symbol.clone(),
            direction,
            size_usdt,
            edge_bps: decision.edge_after_costs_bps,
            mode: self.cfg.mode,
            idempotency_key: decision.id.clone(),
            // the CEX side settles at the touch we would actually hit
            cex_price: Some(match direction {
                Direction::BuyCexSellDex => decision.cex_ask,
                Direction::BuyDexSellCex => decision.cex_bid,
            }),
            dex_price: Some(decision.dex_price),
            lp_fee_bps: None,
        };

        let outcome = self.execute(&req, jitter_bps).await?;
        if let ExecOutcome::Executed(rec) = &outcome {
            if rec.status == TradeStatus::Filled {
                self.ledger.mark_executed(&decision.id)?;
            }
        }
        Ok(Some(outcome))
    }

    pub fn status(&mut self) -> ExecStatusSnapshot {
        ExecStatusSnapshot {
            mode: self.cfg.mode.as_str().to_string(),
            kill_switch: self.cfg.kill_switch,
            active_orders: self.active.len(),
            daily_volume_usdt: self.gate.daily_volume_usdt(),
            fills: self.fills,
            failures: self.failures,
            rejections: self.rejections,
            duplicates: self.duplicates,
            max_order_usdt: self.cfg.limits.max_order_usdt,
            max_daily_volume_usdt: self.cfg.limits.max_daily_volume_usdt,
            min_edge_bps: self.cfg.limits.min_edge_bps,
            max_concurrent_orders: self.cfg.limits.max_concurrent_orders,
        }
    }
}

fn draw_jitter_bps() -> f64 {
    rand::thread_rng().gen_range(0.0..=5.0)
}

/// Consumer-group task over both inbound topics. Polls are sequential with
/// short timeouts so one idle topic never starves the other and shutdown
/// stays bounded.
pub async fn run(
    bus: Bus,
    mut engine: ExecutionEngine,
    status_tx: watch::Sender<ExecStatusSnapshot>,
    shutdown_rx: watch::Receiver<bool>,
) {
    // unique consumer name within the group, one instance per process
    let consumer = format!("{}-{}", CONSUMER_GROUP, std::process::id());
    info!(group = CONSUMER_GROUP, %consumer, mode = engine.cfg.mode.as_str(), "execution engine started");
    let _ = status_tx.send(engine.status());

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        if let Some(delivery) = bus
            .poll(TOPIC_STRATEGY_DECISIONS, CONSUMER_GROUP, &consumer, POLL_TIMEOUT)
            .await
        {
            match &delivery.msg {
                BusMessage::Decision(decision) => {
                    match engine.evaluate_and_execute(decision, draw_jitter_bps()).await {
                        Ok(outcome) => {
                            if let Some(o) = &outcome {
                                EXEC_OUTCOMES.with_label_values(&[o.label()]).inc();
                            }
                            bus.ack(TOPIC_STRATEGY_DECISIONS, CONSUMER_GROUP, delivery.seq);
                        }
                        Err(e) => {
                            // ledger hiccup: bounded redelivery, then DLQ
                            error!(error = %e, "decision handling failed, nacking");
                            bus.nack(TOPIC_STRATEGY_DECISIONS, CONSUMER_GROUP, delivery.seq);
                        }
                    }
                }
                other => {
                    warn!(kind = other.kind(), "unexpected envelope on strategy.decisions");
                    bus.nack(TOPIC_STRATEGY_DECISIONS, CONSUMER_GROUP, delivery.seq);
                }
            }
            let snap = engine.status();
            DAILY_VOLUME_USDT.set(snap.daily_volume_usdt);
            let _ = status_tx.send(snap);
        }

        if *shutdown_rx.borrow() {
            break;
        }

        if let Some(delivery) = bus
            .poll(TOPIC_EXECUTION_REQUESTS, CONSUMER_GROUP, &consumer, POLL_TIMEOUT)
            .await
        {
            match &delivery.msg {
                BusMessage::ExecRequest(req) => match engine.execute(req, draw_jitter_bps()).await {
                    Ok(outcome) => {
                        EXEC_OUTCOMES.with_label_values(&[outcome.label()]).inc();
                        bus.ack(TOPIC_EXECUTION_REQUESTS, CONSUMER_GROUP, delivery.seq);
                    }
                    Err(e) => {
                        error!(error = %e, "request handling failed, nacking");
                        bus.nack(TOPIC_EXECUTION_REQUESTS, CONSUMER_GROUP, delivery.seq);
                    }
                },
                other => {
                    warn!(kind = other.kind(), "unexpected envelope on execution.requests");
                    bus.nack(TOPIC_EXECUTION_REQUESTS, CONSUMER_GROUP, delivery.seq);
                }
            }
            let snap = engine.status();
            DAILY_VOLUME_USDT.set(snap.daily_volume_usdt);
            let _ = status_tx.send(snap);
        }
    }
    info!("execution engine stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Limits {
        Limits {
            max_order_usdt: 1_000.0,
            max_daily_volume_usdt: 1_500.0,
            min_edge_bps: 50.0,
            max_slippage_bps: 100.0,
            max_staleness_secs: 10.0,
            max_concurrent_orders: 1,
        }
    }

    fn engine_cfg(mode: ExecutionMode, kill_switch: bool) -> EngineCfg {
        EngineCfg {
            mode,
            kill_switch,
            limits: limits(),
            policy: AlignPolicy::default(),
            dex_lp_fee_bps: 30.0,
            creds: None,
        }
    }

    fn engine(mode: ExecutionMode, kill_switch: bool) -> ExecutionEngine {
        ExecutionEngine::new(
            engine_cfg(mode, kill_switch),
            PaperLedger::open_memory().unwrap(),
            None,
        )
    }

    fn request(key: &str, size: f64, edge: f64) -> ExecutionRequest {
        ExecutionRequest {
            id: format!("R-{key}"),
            ts_ms: 1_700_000_000_000,
            symbol: "TKNUSDT".into(),
            direction: Direction::BuyDexSellCex,
            size_usdt: size,
            edge_bps: edge,
            mode: ExecutionMode::Paper,
            idempotency_key: key.to_string(),
            cex_price: Some(1.02),
            dex_price: Some(1.00),
            lp_fee_bps: Some(30.0),
        }
    }

    fn decision(id: &str, would_trade: bool, size: f64, edge: f64) -> StrategyDecision {
        StrategyDecision {
            id: id.to_string(),
            ts_ms: 1_700_000_000_000,
            symbol: "TKNUSDT".into(),
            cex_bid: 1.02,
            cex_ask: 1.021,
            dex_price: 1.00,
            raw_spread_bps: edge + 40.0,
            estimated_cost_bps: 40.0,
            edge_after_costs_bps: edge,
            would_trade,
            direction: Some(Direction::BuyDexSellCex),
            suggested_size_usdt: size,
            reason: "test".into(),
        }
    }

    #[tokio::test]
    async fn second_execute_with_same_key_is_duplicate() {
        let mut eng = engine(ExecutionMode::Paper, false);
        let req = request("K-1", 500.0, 120.0);

        let first = eng.execute(&req, 0.0).await.unwrap();
        assert!(matches!(
            &first,
            ExecOutcome::Executed(rec) if rec.status == TradeStatus::Filled
        ));

        let second = eng.execute(&req, 0.0).await.unwrap();
        assert!(matches!(second, ExecOutcome::Duplicate { .. }));

        // exactly one trade row
        assert_eq!(eng.ledger.stats().unwrap().trades, 1);
    }

    #[tokio::test]
    async fn oversized_order_is_rejected_regardless_of_edge() {
        let mut eng = engine(ExecutionMode::Paper, false);
        let req = request("K-big", 5_000.0, 100_000.0);
        let out = eng.execute(&req, 0.0).await.unwrap();
        match out {
            ExecOutcome::Rejected { reason } => assert!(reason.contains("MAX_ORDER_USDT")),
            other => panic!("expected rejection, got {}", other.label()),
        }
        assert_eq!(eng.ledger.stats().unwrap().trades, 0);
    }

    #[tokio::test]
    async fn daily_volume_cap_rejects_the_overflowing_order() {
        let mut eng = engine(ExecutionMode::Paper, false);
        let first = eng.execute(&request("K-a", 1_000.0, 120.0), 0.0).await.unwrap();
        assert!(matches!(first, ExecOutcome::Executed(_)));

        // 1000 + 1000 > 1500
        let second = eng.execute(&request("K-b", 1_000.0, 120.0), 0.0).await.unwrap();
        match second {
            ExecOutcome::Rejected { reason } => assert!(reason.contains("daily volume")),
            other => panic!("expected rejection, got {}", other.label()),
        }
    }

    #[tokio::test]
    async fn kill_switch_blocks_before_pending() {
        let mut eng = engine(ExecutionMode::Paper, true);
        let out = eng.execute(&request("K-ks", 100.0, 500.0), 0.0).await.unwrap();
        match out {
            ExecOutcome::Rejected { reason } => assert!(reason.contains("kill switch")),
            other => panic!("expected rejection, got {}", other.label()),
        }
        assert!(eng.active.is_empty());
        assert!(eng.recent.is_empty());
        assert_eq!(eng.ledger.stats().unwrap().trades, 0);
    }

    #[tokio::test]
    async fn concurrency_cap_counts_active_orders() {
        let mut eng = engine(ExecutionMode::Paper, false);
        eng.active.insert("T-stuck".to_string());
        let out = eng.execute(&request("K-c", 100.0, 120.0), 0.0).await.unwrap();
        match out {
            ExecOutcome::Rejected { reason } => assert!(reason.contains("concurrent")),
            other => panic!("expected rejection, got {}", other.label()),
        }
    }

    #[tokio::test]
    async fn paper_fill_pnl_settles_against_real_prices() {
        let mut eng = engine(ExecutionMode::Paper, false);
        // buy_dex_sell_cex, dex 1.00, cex 1.02, size 1000, lp 30 bps, no jitter:
        // pnl = 20 - 3 - 0.5 = 16.5
        let out = eng.execute(&request("K-pnl", 1_000.0, 120.0), 0.0).await.unwrap();
        match out {
            ExecOutcome::Executed(rec) => {
                assert_eq!(rec.status, TradeStatus::Filled);
                let pnl = rec.pnl_usdt.unwrap();
                assert!((pnl - 16.5).abs() < 1e-9, "pnl {pnl}");
                let fees = rec.fees_usdt.unwrap();
                assert!((fees - 3.5).abs() < 1e-9);
                // 1000 USDT clip => 10 bps size slippage on the dex leg
                let fill = rec.fill_price.unwrap();
                assert!((fill - 1.001).abs() < 1e-9);
            }
            other => panic!("expected fill, got {}", other.label()),
        }
    }

    #[tokio::test]
    async fn live_without_credentials_fails_hard() {
        let mut eng = engine(ExecutionMode::Live, false);
        let out = eng.execute(&request("K-live", 100.0, 120.0), 0.0).await.unwrap();
        match out {
            ExecOutcome::Executed(rec) => {
                assert_eq!(rec.status, TradeStatus::Failed);
                assert_eq!(rec.reason.as_deref(), Some("missing credentials"));
            }
            other => panic!("expected failed record, got {}", other.label()),
        }
        // failed, not retried, not filled
        assert_eq!(eng.fills, 0);
        assert_eq!(eng.failures, 1);
    }

    struct StubVenue;

    #[async_trait]
    impl VenueClient for StubVenue {
        async fn place_order(&self, req: &ExecutionRequest) -> Result<VenueFill, VenueError> {
            Ok(VenueFill {
                fill_price: req.dex_price.unwrap_or(1.0),
                filled_size_usdt: req.size_usdt,
            })
        }
    }

    #[tokio::test]
    async fn live_with_client_and_credentials_fills() {
        let mut cfg = engine_cfg(ExecutionMode::Live, false);
        cfg.creds = Some(VenueCredentials {
            api_key: "k".into(),
            api_secret: "s".into(),
        });
        let mut eng = ExecutionEngine::new(
            cfg,
            PaperLedger::open_memory().unwrap(),
            Some(Arc::new(StubVenue)),
        );
        let out = eng.execute(&request("K-lv", 100.0, 120.0), 0.0).await.unwrap();
        match out {
            ExecOutcome::Executed(rec) => assert_eq!(rec.status, TradeStatus::Filled),
            other => panic!("expected fill, got {}", other.label()),
        }
    }

    #[tokio::test]
    async fn every_decision_is_recorded_even_without_a_trade() {
        let mut eng = engine(ExecutionMode::Paper, false);
        let d = decision("D-hold", false, 500.0, 10.0);
        let out = eng.evaluate_and_execute(&d, 0.0).await.unwrap();
        assert!(out.is_none());
        assert_eq!(eng.ledger.decision_count().unwrap(), 1);
        assert_eq!(eng.ledger.stats().unwrap().trades, 0);
    }

    #[tokio::test]
    async fn evaluate_and_execute_clamps_size_and_marks_executed() {
        let mut eng = engine(ExecutionMode::Paper, false);
        let d = decision("D-go", true, 50_000.0, 120.0);
        let out = eng.evaluate_and_execute(&d, 0.0).await.unwrap().unwrap();
        match out {
            ExecOutcome::Executed(rec) => {
                assert_eq!(rec.status, TradeStatus::Filled);
                assert!((rec.size_usdt - 1_000.0).abs() < 1e-9); // clamped
            }
            other => panic!("expected fill, got {}", other.label()),
        }
        assert!(eng.ledger.has_decision("D-go").unwrap());
    }

    #[tokio::test]
    async fn redelivered_decision_is_absorbed_by_idempotency() {
        let mut eng = engine(ExecutionMode::Paper, false);
        let d = decision("D-redeliver", true, 500.0, 120.0);
        let first = eng.evaluate_and_execute(&d, 0.0).await.unwrap().unwrap();
        assert!(matches!(first, ExecOutcome::Executed(_)));
        let second = eng.evaluate_and_execute(&d, 0.0).await.unwrap().unwrap();
        assert!(matches!(second, ExecOutcome::Duplicate { .. }));
        assert_eq!(eng.ledger.stats().unwrap().trades, 1);
    }
}
