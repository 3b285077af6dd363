// ===============================
// src/strategy.rs (spread evaluator)
// ===============================
//
// Tick-driven evaluator for one symbol:
// - keeps the latest quote per venue (overwrite, never merge)
// - requires a fresh CEX side (preferred venue, stale-fallback to the
//   alternate) and a fresh DEX side before evaluating
// - computes both directional spreads, nets out the cost model, and emits
//   one StrategyDecision per qualifying evaluation onto the bus
// - skipped evaluations carry a typed reason and a metric, never a silent drop
//
use std::sync::Arc;

use ahash::AHashMap as HashMap;
use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::align::{
    self, AlignDirection, AlignPolicy, AlignmentConfig, AlignmentDecision,
};
use crate::bus::{Bus, TOPIC_MARKET_DATA, TOPIC_STRATEGY_DECISIONS};
use crate::config::{Cfg, CostCfg};
use crate::domain::{BusMessage, Direction, MarketTick, StrategyDecision, VenueState};
use crate::metrics::{DECISIONS, EDGE_AFTER_COSTS_BPS, EVALS_SKIPPED, TICKS, TICKS_BY_VENUE};
use crate::quotes::{QuoteLadder, QuoteSource};

pub const CONSUMER_GROUP: &str = "strategy-evaluator";
const POLL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct EvaluatorCfg {
    pub symbol: String,
    pub cex_venue: String,
    pub cex_fallback_venue: Option<String>,
    pub dex_venue: String,
    pub max_staleness_secs: f64,
    pub min_edge_bps: f64,
    pub costs: CostCfg,
    pub align: AlignmentConfig,
    pub policy: AlignPolicy,
}

impl EvaluatorCfg {
    pub fn from_cfg(cfg: &Cfg) -> Self {
        Self {
            symbol: cfg.symbol.clone(),
            cex_venue: cfg.cex_venue.clone(),
            cex_fallback_venue: cfg.cex_fallback_venue.clone(),
            dex_venue: cfg.dex_venue.clone(),
            max_staleness_secs: cfg.limits.max_staleness_secs,
            min_edge_bps: cfg.limits.min_edge_bps,
            costs: cfg.costs.clone(),
            align: cfg.align.clone(),
            policy: cfg.policy.clone(),
        }
    }
}

/// Reasons an evaluation was skipped. Input-data problems, not errors.
#[derive(Debug, Error)]
pub enum EvalSkip {
    #[error("no data yet for venue {0}")]
    MissingVenue(String),
    #[error("venue {venue} stale: {age_secs:.1}s > {max_secs:.1}s")]
    Stale {
        venue: String,
        age_secs: f64,
        max_secs: f64,
    },
    #[error("incomplete quote for venue {0}")]
    IncompleteQuote(String),
    #[error("no comparison signal (zero price)")]
    NoSignal,
}

impl EvalSkip {
    pub fn label(&self) -> &'static str {
        match self {
            EvalSkip::MissingVenue(_) => "missing_venue",
            EvalSkip::Stale { .. } => "stale",
            EvalSkip::IncompleteQuote(_) => "incomplete_quote",
            EvalSkip::NoSignal => "no_signal",
        }
    }
}

/// Per-venue view exposed over /state.
#[derive(Debug, Clone, Serialize)]
pub struct VenueSnapshot {
    pub venue: String,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
    pub ts_ms: i64,
    pub age_secs: f64,
    pub stale: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineSnapshot {
    pub ts_ms: i64,
    pub symbol: String,
    pub venues: Vec<VenueSnapshot>,
    pub any_stale: bool,
}

pub struct SpreadEvaluator {
    cfg: EvaluatorCfg,
    books: HashMap<String, VenueState>,
    last_trade_ts_ms: Option<i64>,
    last_trade_direction: Option<AlignDirection>,
    last_trade_size_usdt: Option<f64>,
    /// Latest full alignment snapshot, for the status surface.
    pub last_alignment: Option<AlignmentDecision>,
}

impl SpreadEvaluator {
    pub fn new(cfg: EvaluatorCfg) -> Self {
        Self {
            cfg,
            books: HashMap::new(),
            last_trade_ts_ms: None,
            last_trade_direction: None,
            last_trade_size_usdt: None,
            last_alignment: None,
        }
    }

    /// Overwrite the venue book. Returns false for foreign symbols.
    pub fn on_tick(&mut self, tick: &MarketTick) -> bool {
        if tick.symbol != self.cfg.symbol {
            return false;
        }
        self.books
            .insert(tick.venue.clone(), VenueState::from_tick(tick));
        true
    }

    fn fresh_bid_ask(&self, venue: &str, now_ms: i64) -> Result<(f64, f64), EvalSkip> {
        let state = self
            .books
            .get(venue)
            .ok_or_else(|| EvalSkip::MissingVenue(venue.to_string()))?;
        let age_secs = state.age_secs(now_ms);
        if age_secs > self.cfg.max_staleness_secs {
            return Err(EvalSkip::Stale {
                venue: venue.to_string(),
                age_secs,
                max_secs: self.cfg.max_staleness_secs,
            });
        }
        match (state.bid, state.ask) {
            (Some(b), Some(a)) if b > 0.0 && a > 0.0 => Ok((b, a)),
            _ => Err(EvalSkip::IncompleteQuote(venue.to_string())),
        }
    }

    /// CEX side: preferred venue first, alternate when the preferred is
    /// stale/missing. The preferred venue's skip reason wins if both fail.
    fn cex_quote(&self, now_ms: i64) -> Result<(String, f64, f64), EvalSkip> {
        match self.fresh_bid_ask(&self.cfg.cex_venue, now_ms) {
            Ok((bid, ask)) => Ok((self.cfg.cex_venue.clone(), bid, ask)),
            Err(primary_err) => match &self.cfg.cex_fallback_venue {
                Some(fb) => match self.fresh_bid_ask(fb, now_ms) {
                    Ok((bid, ask)) => Ok((fb.clone(), bid, ask)),
                    Err(_) => Err(primary_err),
                },
                None => Err(primary_err),
            },
        }
    }

    fn dex_quote(&self, now_ms: i64) -> Result<(f64, f64, f64), EvalSkip> {
        let venue = &self.cfg.dex_venue;
        let state = self
            .books
            .get(venue)
            .ok_or_else(|| EvalSkip::MissingVenue(venue.clone()))?;
        let age_secs = state.age_secs(now_ms);
        if age_secs > self.cfg.max_staleness_secs {
            return Err(EvalSkip::Stale {
                venue: venue.clone(),
                age_secs,
                max_secs: self.cfg.max_staleness_secs,
            });
        }
        // DEX sources often report a single pool price; bid/ask collapse to it.
        let price = state
            .last
            .or(state.bid)
            .filter(|p| *p > 0.0)
            .ok_or_else(|| EvalSkip::IncompleteQuote(venue.clone()))?;
        let bid = state.bid.filter(|p| *p > 0.0).unwrap_or(price);
        let ask = state.ask.filter(|p| *p > 0.0).unwrap_or(price);
        Ok((price, bid, ask))
    }

    /// Strategy-side cost model in bps of notional.
    fn estimate_cost_bps(&self, size_usdt: f64, lp_fee_bps: f64, gas_cost_usdt: Option<f64>) -> f64 {
        let gas_bps = match gas_cost_usdt {
            Some(gas) if size_usdt > 0.0 => gas / size_usdt * 10_000.0,
            _ => 0.0,
        };
        let rebalance_bps = if self.cfg.costs.rebalance_enabled {
            self.cfg.costs.rebalance_cost_bps
        } else {
            0.0
        };
        let slippage_bps = (size_usdt / 1_000.0 * self.cfg.policy.strategy_slippage_bps_per_1k)
            .min(self.cfg.policy.strategy_slippage_cap_bps);
        self.cfg.costs.cex_fee_bps + lp_fee_bps + gas_bps + rebalance_bps + slippage_bps
    }

    pub fn evaluate(
        &mut self,
        ladder: Option<&QuoteLadder>,
        now_ms: i64,
    ) -> Result<StrategyDecision, EvalSkip> {
        let (cex_source, cex_bid, cex_ask) = self.cex_quote(now_ms)?;
        let (dex_price, dex_bid, dex_ask) = self.dex_quote(now_ms)?;
        if cex_ask == 0.0 || dex_ask == 0.0 {
            return Err(EvalSkip::NoSignal);
        }

        // Live venue costs from the quote source beat static config.
        let lp_fee_bps = ladder
            .and_then(|l| l.lp_fee_bps)
            .unwrap_or(self.cfg.costs.dex_lp_fee_bps);
        let gas_cost_usdt = ladder
            .and_then(|l| l.gas_cost_usdt)
            .or(self.cfg.costs.gas_cost_usdt);
        let ladder_points: &[crate::quotes::LadderPoint] =
            ladder.map(|l| l.points.as_slice()).unwrap_or(&[]);

        // Single-market alignment view against the CEX mid anchor.
        let cex_mid = (cex_bid + cex_ask) / 2.0;
        let alignment = align::compute_alignment_decision(
            cex_mid,
            &cex_source,
            dex_price,
            0.0,
            ladder_points,
            gas_cost_usdt,
            lp_fee_bps,
            &self.cfg.align,
            self.last_trade_ts_ms,
            self.last_trade_direction,
            self.last_trade_size_usdt,
            &self.cfg.policy,
            now_ms,
        );
        if !alignment.prices.signal {
            self.last_alignment = Some(alignment);
            return Err(EvalSkip::NoSignal);
        }

        let buy_cex_sell_dex_bps = (dex_bid - cex_ask) / cex_ask * 10_000.0;
        let buy_dex_sell_cex_bps = (cex_bid - dex_ask) / dex_ask * 10_000.0;
        let dominant = align::dominant_spread(buy_cex_sell_dex_bps, buy_dex_sell_cex_bps);

        let suggested_size_usdt = if alignment.suggestion.suggested_size_usdt > 0.0 {
            alignment.suggestion.suggested_size_usdt
        } else {
            self.cfg.align.max_trade_usdt
        };

        let (raw_spread_bps, direction) = match dominant {
            Some((dir, bps)) => (bps, Some(dir)),
            None => (buy_cex_sell_dex_bps.max(buy_dex_sell_cex_bps), None),
        };
        let estimated_cost_bps =
            self.estimate_cost_bps(suggested_size_usdt, lp_fee_bps, gas_cost_usdt);
        let edge_after_costs_bps = raw_spread_bps - estimated_cost_bps;
        let would_trade = direction.is_some() && edge_after_costs_bps >= self.cfg.min_edge_bps;

        let reason = match direction {
            None => "no positive cross-venue spread".to_string(),
            Some(dir) if would_trade => format!(
                "edge {:.1} bps >= min {:.1} bps after {:.1} bps costs, {}",
                edge_after_costs_bps,
                self.cfg.min_edge_bps,
                estimated_cost_bps,
                dir.as_str()
            ),
            Some(_) => format!(
                "edge {:.1} bps below min {:.1} bps after {:.1} bps costs",
                edge_after_costs_bps, self.cfg.min_edge_bps, estimated_cost_bps
            ),
        };

        let decision = StrategyDecision {
            id: format!("D-{}-{}", now_ms, rand::thread_rng().gen::<u32>()),
            ts_ms: now_ms,
            symbol: self.cfg.symbol.clone(),
            cex_bid,
            cex_ask,
            dex_price,
            raw_spread_bps,
            estimated_cost_bps,
            edge_after_costs_bps,
            would_trade,
            direction,
            suggested_size_usdt,
            reason,
        };

        // An emitted trade decision counts as an attempted alignment trade
        // for cooldown purposes.
        if would_trade {
            self.last_trade_ts_ms = Some(now_ms);
            self.last_trade_direction = direction.map(|d| match d {
                Direction::BuyCexSellDex => AlignDirection::SellDex,
                Direction::BuyDexSellCex => AlignDirection::BuyDex,
            });
            self.last_trade_size_usdt = Some(suggested_size_usdt);
        }
        self.last_alignment = Some(alignment);

        Ok(decision)
    }

    pub fn snapshot(&self, now_ms: i64) -> PipelineSnapshot {
        let mut venues: Vec<VenueSnapshot> = self
            .books
            .iter()
            .map(|(venue, state)| {
                let age_secs = state.age_secs(now_ms);
                VenueSnapshot {
                    venue: venue.clone(),
                    bid: state.bid,
                    ask: state.ask,
                    last: state.last,
                    ts_ms: state.ts_ms,
                    age_secs,
                    stale: age_secs > self.cfg.max_staleness_secs,
                }
            })
            .collect();
        venues.sort_by(|a, b| a.venue.cmp(&b.venue));
        PipelineSnapshot {
            ts_ms: now_ms,
            symbol: self.cfg.symbol.clone(),
            any_stale: venues.is_empty() || venues.iter().any(|v| v.stale),
            venues,
        }
    }
}

/// Consumer-group task: market.data in, strategy.decisions out.
pub async fn run(
    bus: Bus,
    cfg: EvaluatorCfg,
    quote: Arc<dyn QuoteSource>,
    decision_tx: watch::Sender<Option<StrategyDecision>>,
    state_tx: watch::Sender<PipelineSnapshot>,
    shutdown_rx: watch::Receiver<bool>,
) {
    let mut ev = SpreadEvaluator::new(cfg);
    let mut ladder: Option<QuoteLadder> = None;
    // unique consumer name within the group, one instance per process
    let consumer = format!("{}-{}", CONSUMER_GROUP, std::process::id());
    info!(symbol = %ev.cfg.symbol, group = CONSUMER_GROUP, %consumer, "strategy evaluator started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let Some(delivery) = bus
            .poll(TOPIC_MARKET_DATA, CONSUMER_GROUP, &consumer, POLL_TIMEOUT)
            .await
        else {
            continue;
        };

        match &delivery.msg {
            BusMessage::Tick(tick) => {
                TICKS.inc();
                TICKS_BY_VENUE
                    .with_label_values(&[&tick.symbol, &tick.venue])
                    .inc();

                if !ev.on_tick(tick) {
                    // foreign symbol, not ours to evaluate
                    bus.ack(TOPIC_MARKET_DATA, CONSUMER_GROUP, delivery.seq);
                    continue;
                }

                let now_ms = Utc::now().timestamp_millis();
                let ladder_stale = ladder
                    .as_ref()
                    .map(|l| (now_ms - l.ts_ms) as f64 / 1000.0 > ev.cfg.max_staleness_secs)
                    .unwrap_or(true);
                if ladder_stale {
                    match quote.ladder().await {
                        Ok(l) => ladder = Some(l),
                        Err(e) => warn!(error = %e, source = quote.name(), "ladder refresh failed"),
                    }
                }

                match ev.evaluate(ladder.as_ref(), now_ms) {
                    Ok(decision) => {
                        DECISIONS
                            .with_label_values(&[if decision.would_trade { "trade" } else { "hold" }])
                            .inc();
                        EDGE_AFTER_COSTS_BPS.observe(decision.edge_after_costs_bps);
                        info!(
                            id = %decision.id,
                            raw_bps = decision.raw_spread_bps,
                            edge_bps = decision.edge_after_costs_bps,
                            would_trade = decision.would_trade,
                            reason = %decision.reason,
                            "strategy decision"
                        );
                        let _ = decision_tx.send(Some(decision.clone()));
                        bus.publish(TOPIC_STRATEGY_DECISIONS, BusMessage::Decision(decision));
                    }
                    Err(skip) => {
                        EVALS_SKIPPED.with_label_values(&[skip.label()]).inc();
                        debug!(reason = %skip, "evaluation skipped");
                    }
                }
                let _ = state_tx.send(ev.snapshot(now_ms));
                bus.ack(TOPIC_MARKET_DATA, CONSUMER_GROUP, delivery.seq);
            }
            other => {
                // wrong envelope for this topic: bounded retries, then DLQ
                warn!(kind = other.kind(), "unexpected envelope on market.data");
                bus.nack(TOPIC_MARKET_DATA, CONSUMER_GROUP, delivery.seq);
            }
        }
    }
    info!("strategy evaluator stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::{AlignmentBands, BandStatus};

    fn test_cfg(zero_costs: bool) -> EvaluatorCfg {
        let mut policy = AlignPolicy::default();
        if zero_costs {
            policy.strategy_slippage_bps_per_1k = 0.0;
        }
        EvaluatorCfg {
            symbol: "TKNUSDT".into(),
            cex_venue: "binance".into(),
            cex_fallback_venue: Some("bybit".into()),
            dex_venue: "dex".into(),
            max_staleness_secs: 10.0,
            min_edge_bps: 50.0,
            costs: CostCfg {
                cex_fee_bps: if zero_costs { 0.0 } else { 10.0 },
                dex_lp_fee_bps: if zero_costs { 0.0 } else { 30.0 },
                gas_cost_usdt: None,
                rebalance_enabled: false,
                rebalance_cost_bps: 0.0,
            },
            align: AlignmentConfig {
                bands: AlignmentBands {
                    neutral_pct: 0.5,
                    soft_pct: 1.0,
                    hard_pct: 2.0,
                },
                margin_pct: 0.1,
                max_trade_usdt: 1_000.0,
                cooldown_secs: 300.0,
                min_benefit_bps: 10.0,
            },
            policy,
        }
    }

    fn tick(venue: &str, ts_ms: i64, bid: Option<f64>, ask: Option<f64>, price: Option<f64>) -> MarketTick {
        MarketTick {
            symbol: "TKNUSDT".into(),
            venue: venue.into(),
            ts_ms,
            bid,
            ask,
            last: None,
            price,
            source_ts_ms: None,
        }
    }

    #[test]
    fn wide_spread_with_zero_costs_trades_buy_cex_sell_dex() {
        let mut ev = SpreadEvaluator::new(test_cfg(true));
        let now = 1_700_000_000_000;
        ev.on_tick(&tick("binance", now, Some(0.0122), Some(0.0123), None));
        ev.on_tick(&tick("dex", now, None, None, Some(0.0128)));

        let d = ev.evaluate(None, now).expect("complete fresh inputs");
        assert!((d.raw_spread_bps - 406.5).abs() < 1.0);
        assert!(d.would_trade);
        assert_eq!(d.direction, Some(Direction::BuyCexSellDex));
        assert!(d.edge_after_costs_bps >= 50.0);
    }

    #[test]
    fn identical_prices_land_in_neutral_band() {
        let mut ev = SpreadEvaluator::new(test_cfg(true));
        let now = 1_700_000_000_000;
        ev.on_tick(&tick("binance", now, Some(1.0), Some(1.0), None));
        ev.on_tick(&tick("dex", now, None, None, Some(1.0)));

        let d = ev.evaluate(None, now).expect("complete fresh inputs");
        assert!(!d.would_trade);

        let alignment = ev.last_alignment.as_ref().expect("alignment computed");
        assert_eq!(alignment.prices.band_status, BandStatus::Neutral);
        assert!(!alignment.suggestion.should_trade);
        assert!(alignment.suggestion.reason.contains("neutral band"));
    }

    #[test]
    fn stale_cex_input_skips_with_stale_reason() {
        let mut ev = SpreadEvaluator::new(test_cfg(true));
        let now = 1_700_000_000_000;
        // both cex venues stale, dex fresh
        ev.on_tick(&tick("binance", now - 60_000, Some(1.0), Some(1.0), None));
        ev.on_tick(&tick("bybit", now - 60_000, Some(1.0), Some(1.0), None));
        ev.on_tick(&tick("dex", now, None, None, Some(1.0)));

        match ev.evaluate(None, now) {
            Err(EvalSkip::Stale { venue, .. }) => assert_eq!(venue, "binance"),
            other => panic!("expected stale skip, got {:?}", other.map(|d| d.reason)),
        }
    }

    #[test]
    fn stale_preferred_venue_falls_back_to_alternate() {
        let mut ev = SpreadEvaluator::new(test_cfg(true));
        let now = 1_700_000_000_000;
        ev.on_tick(&tick("binance", now - 60_000, Some(0.9), Some(0.9), None));
        ev.on_tick(&tick("bybit", now, Some(1.0), Some(1.001), None));
        ev.on_tick(&tick("dex", now, None, None, Some(1.0)));

        let d = ev.evaluate(None, now).expect("fallback venue is fresh");
        assert_eq!(d.cex_ask, 1.001);
        let alignment = ev.last_alignment.as_ref().unwrap();
        assert_eq!(alignment.prices.cex_source, "bybit");
    }

    #[test]
    fn missing_dex_side_skips_with_missing_reason() {
        let mut ev = SpreadEvaluator::new(test_cfg(true));
        let now = 1_700_000_000_000;
        ev.on_tick(&tick("binance", now, Some(1.0), Some(1.0), None));
        match ev.evaluate(None, now) {
            Err(EvalSkip::MissingVenue(v)) => assert_eq!(v, "dex"),
            other => panic!("expected missing venue, got {:?}", other.map(|d| d.reason)),
        }
    }

    #[test]
    fn every_fresh_evaluation_produces_exactly_one_decision() {
        let mut ev = SpreadEvaluator::new(test_cfg(false));
        let now = 1_700_000_000_000;
        let mut produced = 0;
        for i in 0..5 {
            let ts = now + i * 1_000;
            ev.on_tick(&tick("binance", ts, Some(1.0), Some(1.001), None));
            ev.on_tick(&tick("dex", ts, None, None, Some(1.002)));
            if ev.evaluate(None, ts).is_ok() {
                produced += 1;
            }
        }
        assert_eq!(produced, 5);
    }

    #[test]
    fn foreign_symbol_ticks_are_ignored() {
        let mut ev = SpreadEvaluator::new(test_cfg(true));
        let mut t = tick("binance", 0, Some(1.0), Some(1.0), None);
        t.symbol = "OTHERUSDT".into();
        assert!(!ev.on_tick(&t));
    }
}
