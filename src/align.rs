// ===============================
// src/align.rs (alignment solver)
// ===============================
//
// Pure functions only: band classification, cost/benefit estimates,
// quote-ladder interpolation, cooldown tracking, and the suggestion tree.
// No I/O, no clocks — callers pass `now_ms` explicitly so everything here
// is deterministic and unit-testable.
//
use serde::{Deserialize, Serialize};

use crate::domain::Direction;
use crate::quotes::LadderPoint;

/// Tuning knobs that used to be literals inside the formulas. Defaults keep
/// the historical values; override via config when recalibrated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignPolicy {
    /// Weight of the "protection value" credited per bps of gap closed.
    pub protection_weight: f64,
    /// Cap on the size-proportional slippage heuristic (bps).
    pub slippage_cap_bps: f64,
    /// Alignment slippage heuristic: bps per USDT/100 of size.
    pub slippage_bps_per_100: f64,
    /// Strategy cost-model slippage buffer: bps per 1000 USDT of size.
    pub strategy_slippage_bps_per_1k: f64,
    /// Cap on the strategy slippage buffer (bps).
    pub strategy_slippage_cap_bps: f64,
    /// Paper-fill size slippage: bps per 1000 USDT of clip.
    pub fill_slippage_bps_per_1k: f64,
    /// Fixed gas estimate charged per simulated fill (USDT).
    pub gas_estimate_usdt: f64,
}

impl Default for AlignPolicy {
    fn default() -> Self {
        Self {
            protection_weight: 0.5,
            slippage_cap_bps: 50.0,
            slippage_bps_per_100: 1.0,
            strategy_slippage_bps_per_1k: 5.0,
            strategy_slippage_cap_bps: 50.0,
            fill_slippage_bps_per_1k: 10.0,
            gas_estimate_usdt: 0.5,
        }
    }
}

/// Deviation thresholds in percent. Must be strictly increasing; validated
/// at config load, not here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AlignmentBands {
    pub neutral_pct: f64,
    pub soft_pct: f64,
    pub hard_pct: f64,
}

/// Per-market alignment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentConfig {
    pub bands: AlignmentBands,
    /// Target-price margin off the CEX price, percent.
    pub margin_pct: f64,
    pub max_trade_usdt: f64,
    pub cooldown_secs: f64,
    pub min_benefit_bps: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BandStatus {
    Neutral,
    Soft,
    Hard,
}

/// Alignment trade direction on the DEX leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlignDirection {
    SellDex,
    BuyDex,
}

impl AlignDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlignDirection::SellDex => "sell_dex",
            AlignDirection::BuyDex => "buy_dex",
        }
    }
}

/// Derived snapshot of one CEX-vs-DEX comparison. Recomputed per evaluation,
/// never persisted standalone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceComparison {
    pub cex_price: f64,
    pub cex_source: String,
    pub dex_price: f64,
    pub dex_size: f64,
    pub deviation_pct: f64,
    pub deviation_bps: f64,
    pub band_status: BandStatus,
    /// False when the comparison could not be formed (zero CEX price).
    pub signal: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AlignmentCosts {
    pub lp_fee_bps: f64,
    pub gas_bps: f64,
    pub slippage_bps: f64,
    pub total_bps: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AlignmentBenefit {
    pub gap_reduction_bps: f64,
    pub protection_bps: f64,
    pub net_benefit_bps: f64,
}

/// Outcome of inverting the quote ladder for a target execution price.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LadderFit {
    pub size_usdt: f64,
    /// Execution price at the fitted point: the target when bracketed,
    /// otherwise the nearest sampled endpoint.
    pub exec_price: f64,
    pub achievable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownState {
    pub last_trade_ts_ms: Option<i64>,
    pub last_direction: Option<AlignDirection>,
    pub last_size_usdt: Option<f64>,
    pub in_cooldown: bool,
    pub cooldown_remaining_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentSuggestion {
    pub should_trade: bool,
    pub direction: Option<AlignDirection>,
    pub suggested_size_usdt: f64,
    pub suggested_size_tokens: f64,
    pub target_price: f64,
    pub expected_post_trade_price: f64,
    pub costs: AlignmentCosts,
    pub benefit: AlignmentBenefit,
    pub reason: String,
    pub blocked: bool,
    pub block_reason: Option<String>,
}

impl AlignmentSuggestion {
    fn no_trade(reason: String) -> Self {
        Self {
            should_trade: false,
            direction: None,
            suggested_size_usdt: 0.0,
            suggested_size_tokens: 0.0,
            target_price: 0.0,
            expected_post_trade_price: 0.0,
            costs: AlignmentCosts::default(),
            benefit: AlignmentBenefit::default(),
            reason,
            blocked: false,
            block_reason: None,
        }
    }
}

/// Full alignment snapshot, timestamped at call time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentDecision {
    pub ts_ms: i64,
    pub prices: PriceComparison,
    pub cooldown: CooldownState,
    pub suggestion: AlignmentSuggestion,
}

/// Boundary values belong to the lower band (<=, not <).
pub fn classify_band(deviation_pct: f64, bands: &AlignmentBands) -> BandStatus {
    let dev = deviation_pct.abs();
    if dev <= bands.neutral_pct {
        BandStatus::Neutral
    } else if dev <= bands.soft_pct {
        BandStatus::Soft
    } else {
        BandStatus::Hard
    }
}

/// Zero CEX price yields a "no signal" comparison, not an error.
pub fn compare_prices(
    cex_price: f64,
    cex_source: &str,
    dex_price: f64,
    dex_size: f64,
    bands: &AlignmentBands,
) -> PriceComparison {
    if cex_price == 0.0 {
        return PriceComparison {
            cex_price,
            cex_source: cex_source.to_string(),
            dex_price,
            dex_size,
            deviation_pct: 0.0,
            deviation_bps: 0.0,
            band_status: BandStatus::Neutral,
            signal: false,
        };
    }
    let deviation_pct = (dex_price - cex_price) / cex_price * 100.0;
    let deviation_bps = deviation_pct * 100.0;
    PriceComparison {
        cex_price,
        cex_source: cex_source.to_string(),
        dex_price,
        dex_size,
        deviation_pct,
        deviation_bps,
        band_status: classify_band(deviation_pct, bands),
        signal: true,
    }
}

/// Crude, explicit cost heuristic — not a market-impact model. Kept simple
/// on purpose so it stays auditable and swappable.
pub fn estimate_costs(
    trade_size_usdt: f64,
    gas_cost_usdt: Option<f64>,
    lp_fee_bps: f64,
    policy: &AlignPolicy,
) -> AlignmentCosts {
    let slippage_bps =
        (trade_size_usdt / 100.0 * policy.slippage_bps_per_100).min(policy.slippage_cap_bps);
    let gas_bps = match gas_cost_usdt {
        Some(gas) if trade_size_usdt > 0.0 => gas / trade_size_usdt * 10_000.0,
        _ => 0.0,
    };
    AlignmentCosts {
        lp_fee_bps,
        gas_bps,
        slippage_bps,
        total_bps: lp_fee_bps + gas_bps + slippage_bps,
    }
}

pub fn estimate_benefit(
    current_deviation_bps: f64,
    post_trade_deviation_bps: f64,
    costs: &AlignmentCosts,
    policy: &AlignPolicy,
) -> AlignmentBenefit {
    let gap_reduction_bps = current_deviation_bps.abs() - post_trade_deviation_bps.abs();
    let protection_bps = gap_reduction_bps * policy.protection_weight;
    AlignmentBenefit {
        gap_reduction_bps,
        protection_bps,
        net_benefit_bps: gap_reduction_bps + protection_bps - costs.total_bps,
    }
}

/// Invert a sampled price curve: given a target execution price, estimate the
/// size that achieves it. Adjacent pairs are checked in both bracket
/// directions since the curve need not be monotonic. Outside the sampled
/// range the nearest endpoint is returned with `achievable = false`.
pub fn interpolate_quote_ladder(ladder: &[LadderPoint], target_price: f64) -> LadderFit {
    let mut points: Vec<&LadderPoint> = ladder
        .iter()
        .filter(|p| p.size_usdt > 0.0 && p.exec_price.is_finite() && p.exec_price > 0.0)
        .collect();
    if points.is_empty() {
        return LadderFit {
            size_usdt: 0.0,
            exec_price: 0.0,
            achievable: false,
        };
    }
    points.sort_by(|a, b| a.size_usdt.total_cmp(&b.size_usdt));

    for pair in points.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        let bracketed = (lo.exec_price <= target_price && target_price <= hi.exec_price)
            || (hi.exec_price <= target_price && target_price <= lo.exec_price);
        if !bracketed {
            continue;
        }
        let span = hi.exec_price - lo.exec_price;
        if span == 0.0 {
            return LadderFit {
                size_usdt: lo.size_usdt,
                exec_price: lo.exec_price,
                achievable: true,
            };
        }
        let t = (target_price - lo.exec_price) / span;
        return LadderFit {
            size_usdt: lo.size_usdt + t * (hi.size_usdt - lo.size_usdt),
            exec_price: target_price,
            achievable: true,
        };
    }

    // Outside the sampled curve: nearest endpoint by price distance.
    let first = points[0];
    let last = points[points.len() - 1];
    let nearest = if (target_price - first.exec_price).abs() <= (target_price - last.exec_price).abs()
    {
        first
    } else {
        last
    };
    LadderFit {
        size_usdt: nearest.size_usdt,
        exec_price: nearest.exec_price,
        achievable: false,
    }
}

/// Null `last_trade_ts_ms` means never traded, therefore never in cooldown.
pub fn check_cooldown(
    last_trade_ts_ms: Option<i64>,
    last_direction: Option<AlignDirection>,
    last_size_usdt: Option<f64>,
    cooldown_secs: f64,
    now_ms: i64,
) -> CooldownState {
    let remaining = match last_trade_ts_ms {
        None => 0.0,
        Some(ts) => {
            let elapsed_secs = (now_ms - ts).max(0) as f64 / 1000.0;
            (cooldown_secs - elapsed_secs).max(0.0)
        }
    };
    CooldownState {
        last_trade_ts_ms,
        last_direction,
        last_size_usdt,
        in_cooldown: remaining > 0.0,
        cooldown_remaining_secs: remaining,
    }
}

/// Deterministic direction pick for the cross-venue evaluator: whichever
/// positive spread has the larger magnitude wins.
pub fn dominant_spread(
    buy_cex_sell_dex_bps: f64,
    buy_dex_sell_cex_bps: f64,
) -> Option<(Direction, f64)> {
    let a = (buy_cex_sell_dex_bps > 0.0).then_some((Direction::BuyCexSellDex, buy_cex_sell_dex_bps));
    let b = (buy_dex_sell_cex_bps > 0.0).then_some((Direction::BuyDexSellCex, buy_dex_sell_cex_bps));
    match (a, b) {
        (Some(x), Some(y)) => Some(if x.1 >= y.1 { x } else { y }),
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (None, None) => None,
    }
}

/// The suggestion tree. Steps run in this exact order; the order is policy.
pub fn compute_suggestion(
    prices: &PriceComparison,
    ladder: &[LadderPoint],
    gas_cost_usdt: Option<f64>,
    lp_fee_bps: f64,
    cfg: &AlignmentConfig,
    cooldown: &CooldownState,
    policy: &AlignPolicy,
) -> AlignmentSuggestion {
    // 1) Inside the neutral band nothing needs aligning.
    if !prices.signal || prices.band_status == BandStatus::Neutral {
        return AlignmentSuggestion::no_trade(format!(
            "within neutral band ({:.3}% deviation, neutral <= {:.3}%)",
            prices.deviation_pct, cfg.bands.neutral_pct
        ));
    }

    // 2) Cooldown blocks everything outside neutral.
    if cooldown.in_cooldown {
        let mut s = AlignmentSuggestion::no_trade(format!(
            "cooldown active, {:.0}s remaining",
            cooldown.cooldown_remaining_secs
        ));
        s.blocked = true;
        s.block_reason = Some("cooldown".to_string());
        return s;
    }

    // 3) Direction + target price, offset toward the CEX anchor.
    let direction = if prices.dex_price > prices.cex_price {
        AlignDirection::SellDex
    } else {
        AlignDirection::BuyDex
    };
    let margin = cfg.margin_pct / 100.0;
    let target_price = match direction {
        AlignDirection::SellDex => prices.cex_price * (1.0 + margin),
        AlignDirection::BuyDex => prices.cex_price * (1.0 - margin),
    };

    let fit = interpolate_quote_ladder(ladder, target_price);
    let suggested_size_usdt = fit.size_usdt.min(cfg.max_trade_usdt);
    let suggested_size_tokens = if prices.dex_price > 0.0 {
        suggested_size_usdt / prices.dex_price
    } else {
        0.0
    };
    let expected_post_trade_price = if fit.achievable {
        target_price
    } else {
        fit.exec_price
    };

    let costs = estimate_costs(suggested_size_usdt, gas_cost_usdt, lp_fee_bps, policy);
    let post_deviation_bps = if prices.cex_price > 0.0 {
        (expected_post_trade_price - prices.cex_price) / prices.cex_price * 10_000.0
    } else {
        0.0
    };
    let benefit = estimate_benefit(prices.deviation_bps, post_deviation_bps, &costs, policy);

    let base = AlignmentSuggestion {
        should_trade: false,
        direction: Some(direction),
        suggested_size_usdt,
        suggested_size_tokens,
        target_price,
        expected_post_trade_price,
        costs,
        benefit,
        reason: String::new(),
        blocked: false,
        block_reason: None,
    };

    // 4) Not worth it once costs are netted out.
    if benefit.net_benefit_bps < cfg.min_benefit_bps {
        return AlignmentSuggestion {
            reason: format!(
                "net benefit {:.1} bps below minimum {:.1} bps",
                benefit.net_benefit_bps, cfg.min_benefit_bps
            ),
            ..base
        };
    }

    // 5) Soft band: worthwhile but optional.
    if prices.band_status == BandStatus::Soft {
        return AlignmentSuggestion {
            reason: format!(
                "optional: soft band {} {:.0} USDT at target {:.6}, net {:.1} bps",
                direction.as_str(),
                suggested_size_usdt,
                target_price,
                benefit.net_benefit_bps
            ),
            ..base
        };
    }

    // 6) Hard band: act.
    AlignmentSuggestion {
        should_trade: true,
        reason: format!(
            "hard band: {} {:.0} USDT at target {:.6}, net {:.1} bps",
            direction.as_str(),
            suggested_size_usdt,
            target_price,
            benefit.net_benefit_bps
        ),
        ..base
    }
}

/// Orchestrates comparison + cooldown + suggestion into one snapshot.
#[allow(clippy::too_many_arguments)]
pub fn compute_alignment_decision(
    cex_price: f64,
    cex_source: &str,
    dex_price: f64,
    dex_size: f64,
    ladder: &[LadderPoint],
    gas_cost_usdt: Option<f64>,
    lp_fee_bps: f64,
    cfg: &AlignmentConfig,
    last_trade_ts_ms: Option<i64>,
    last_direction: Option<AlignDirection>,
    last_size_usdt: Option<f64>,
    policy: &AlignPolicy,
    now_ms: i64,
) -> AlignmentDecision {
    let prices = compare_prices(cex_price, cex_source, dex_price, dex_size, &cfg.bands);
    let cooldown = check_cooldown(
        last_trade_ts_ms,
        last_direction,
        last_size_usdt,
        cfg.cooldown_secs,
        now_ms,
    );
    let suggestion = compute_suggestion(
        &prices,
        ladder,
        gas_cost_usdt,
        lp_fee_bps,
        cfg,
        &cooldown,
        policy,
    );
    AlignmentDecision {
        ts_ms: now_ms,
        prices,
        cooldown,
        suggestion,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bands() -> AlignmentBands {
        AlignmentBands {
            neutral_pct: 0.5,
            soft_pct: 1.0,
            hard_pct: 2.0,
        }
    }

    fn cfg() -> AlignmentConfig {
        AlignmentConfig {
            bands: bands(),
            margin_pct: 0.1,
            max_trade_usdt: 5_000.0,
            cooldown_secs: 120.0,
            min_benefit_bps: 5.0,
        }
    }

    fn ladder() -> Vec<LadderPoint> {
        vec![
            LadderPoint {
                size_usdt: 100.0,
                exec_price: 1.00,
            },
            LadderPoint {
                size_usdt: 200.0,
                exec_price: 1.02,
            },
        ]
    }

    #[test]
    fn band_boundaries_are_inclusive_on_the_lower_band() {
        let b = bands();
        assert_eq!(classify_band(0.5, &b), BandStatus::Neutral);
        assert_eq!(classify_band(-0.5, &b), BandStatus::Neutral);
        assert_eq!(classify_band(1.0, &b), BandStatus::Soft);
        assert_eq!(classify_band(1.0001, &b), BandStatus::Hard);
        assert_eq!(classify_band(0.0, &b), BandStatus::Neutral);
    }

    #[test]
    fn compare_prices_guards_zero_cex_price() {
        let cmp = compare_prices(0.0, "binance", 1.0, 0.0, &bands());
        assert!(!cmp.signal);
        assert_eq!(cmp.deviation_bps, 0.0);
        assert_eq!(cmp.band_status, BandStatus::Neutral);
    }

    #[test]
    fn compare_prices_deviation_math() {
        let cmp = compare_prices(1.00, "binance", 1.02, 500.0, &bands());
        assert!(cmp.signal);
        assert!((cmp.deviation_pct - 2.0).abs() < 1e-9);
        assert!((cmp.deviation_bps - 200.0).abs() < 1e-9);
        assert_eq!(cmp.band_status, BandStatus::Hard);
    }

    #[test]
    fn ladder_interpolates_between_samples() {
        let fit = interpolate_quote_ladder(&ladder(), 1.01);
        assert!(fit.achievable);
        assert!((fit.size_usdt - 150.0).abs() < 1e-6);
        assert!((fit.exec_price - 1.01).abs() < 1e-12);
    }

    #[test]
    fn ladder_outside_range_returns_nearest_endpoint() {
        let fit = interpolate_quote_ladder(&ladder(), 1.10);
        assert!(!fit.achievable);
        assert!((fit.size_usdt - 200.0).abs() < 1e-9);

        let fit = interpolate_quote_ladder(&ladder(), 0.90);
        assert!(!fit.achievable);
        assert!((fit.size_usdt - 100.0).abs() < 1e-9);
    }

    #[test]
    fn ladder_with_no_valid_entries_is_unachievable_zero() {
        let fit = interpolate_quote_ladder(&[], 1.0);
        assert!(!fit.achievable);
        assert_eq!(fit.size_usdt, 0.0);

        let junk = vec![LadderPoint {
            size_usdt: -5.0,
            exec_price: 1.0,
        }];
        let fit = interpolate_quote_ladder(&junk, 1.0);
        assert!(!fit.achievable);
        assert_eq!(fit.size_usdt, 0.0);
    }

    #[test]
    fn cooldown_decays_with_wall_clock() {
        let now_ms = 1_700_000_000_000;
        let state = check_cooldown(Some(now_ms - 60_000), None, None, 120.0, now_ms);
        assert!(state.in_cooldown);
        assert!((state.cooldown_remaining_secs - 60.0).abs() < 0.5);

        let state = check_cooldown(Some(now_ms - 121_000), None, None, 120.0, now_ms);
        assert!(!state.in_cooldown);
        assert_eq!(state.cooldown_remaining_secs, 0.0);
    }

    #[test]
    fn cooldown_never_traded_is_not_in_cooldown() {
        let state = check_cooldown(None, None, None, 120.0, 1_700_000_000_000);
        assert!(!state.in_cooldown);
    }

    #[test]
    fn estimate_costs_caps_slippage_and_handles_missing_gas() {
        let policy = AlignPolicy::default();
        let costs = estimate_costs(10_000.0, None, 30.0, &policy);
        assert_eq!(costs.slippage_bps, 50.0); // 10_000/100 = 100, capped
        assert_eq!(costs.gas_bps, 0.0);
        assert_eq!(costs.total_bps, 80.0);

        let costs = estimate_costs(1_000.0, Some(2.0), 30.0, &policy);
        assert!((costs.gas_bps - 20.0).abs() < 1e-9);
        assert!((costs.slippage_bps - 10.0).abs() < 1e-9);
    }

    #[test]
    fn benefit_weights_protection_at_half_gap() {
        let policy = AlignPolicy::default();
        let costs = AlignmentCosts {
            total_bps: 10.0,
            ..Default::default()
        };
        let b = estimate_benefit(200.0, 50.0, &costs, &policy);
        assert!((b.gap_reduction_bps - 150.0).abs() < 1e-9);
        assert!((b.protection_bps - 75.0).abs() < 1e-9);
        assert!((b.net_benefit_bps - 215.0).abs() < 1e-9);
    }

    #[test]
    fn neutral_deviation_yields_no_trade_with_neutral_reason() {
        let prices = compare_prices(1.0, "binance", 1.0, 0.0, &bands());
        let cd = check_cooldown(None, None, None, 120.0, 0);
        let s = compute_suggestion(
            &prices,
            &ladder(),
            None,
            30.0,
            &cfg(),
            &cd,
            &AlignPolicy::default(),
        );
        assert!(!s.should_trade);
        assert!(s.reason.contains("neutral band"));
    }

    #[test]
    fn cooldown_blocks_with_block_reason() {
        let prices = compare_prices(1.00, "binance", 1.05, 0.0, &bands());
        let now_ms = 1_700_000_000_000;
        let cd = check_cooldown(Some(now_ms - 1_000), None, None, 120.0, now_ms);
        let s = compute_suggestion(
            &prices,
            &ladder(),
            None,
            30.0,
            &cfg(),
            &cd,
            &AlignPolicy::default(),
        );
        assert!(!s.should_trade);
        assert!(s.blocked);
        assert_eq!(s.block_reason.as_deref(), Some("cooldown"));
    }

    #[test]
    fn hard_band_trades_and_soft_band_is_optional() {
        let policy = AlignPolicy::default();
        let cd = check_cooldown(None, None, None, 120.0, 0);
        let lad = vec![
            LadderPoint {
                size_usdt: 100.0,
                exec_price: 0.995,
            },
            LadderPoint {
                size_usdt: 2_000.0,
                exec_price: 1.05,
            },
        ];

        // 5% above CEX: hard band, sell the DEX leg down toward the anchor.
        let prices = compare_prices(1.00, "binance", 1.05, 0.0, &bands());
        let s = compute_suggestion(&prices, &lad, None, 30.0, &cfg(), &cd, &policy);
        assert!(s.should_trade);
        assert_eq!(s.direction, Some(AlignDirection::SellDex));
        assert!(s.suggested_size_usdt > 0.0);

        // 0.8% above CEX: soft band, populated but optional.
        let prices = compare_prices(1.000, "binance", 1.008, 0.0, &bands());
        let s = compute_suggestion(&prices, &lad, None, 30.0, &cfg(), &cd, &policy);
        assert!(!s.should_trade);
        assert_eq!(s.direction, Some(AlignDirection::SellDex));
        assert!(s.reason.starts_with("optional"));
    }

    #[test]
    fn insufficient_net_benefit_names_the_shortfall() {
        let mut c = cfg();
        c.min_benefit_bps = 10_000.0; // unreachable on purpose
        let prices = compare_prices(1.00, "binance", 1.05, 0.0, &bands());
        let cd = check_cooldown(None, None, None, 120.0, 0);
        let s = compute_suggestion(
            &prices,
            &ladder(),
            None,
            30.0,
            &c,
            &cd,
            &AlignPolicy::default(),
        );
        assert!(!s.should_trade);
        assert!(s.reason.contains("below minimum"));
    }

    #[test]
    fn dominant_spread_picks_larger_magnitude() {
        assert_eq!(
            dominant_spread(120.0, 80.0),
            Some((Direction::BuyCexSellDex, 120.0))
        );
        assert_eq!(
            dominant_spread(30.0, 90.0),
            Some((Direction::BuyDexSellCex, 90.0))
        );
        assert_eq!(
            dominant_spread(-10.0, 40.0),
            Some((Direction::BuyDexSellCex, 40.0))
        );
        assert_eq!(dominant_spread(-10.0, -5.0), None);
    }
}
