// ===============================
// src/risk.rs
// ===============================
//
// Pre-trade validation gate for the execution engine. Checks run in a fixed
// order and the first failure wins; every rejection is a typed outcome with
// its own reason, never a generic error.
//
use chrono::{NaiveDate, Utc};
use thiserror::Error;

use crate::config::Limits;
use crate::domain::ExecutionMode;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("kill switch active")]
    KillSwitch,
    #[error("execution mode is off")]
    ModeOff,
    #[error("edge {edge_bps:.1} bps below minimum {min_bps:.1} bps")]
    EdgeBelowMin { edge_bps: f64, min_bps: f64 },
    #[error("daily volume cap: {current:.0} + {requested:.0} exceeds {max:.0} USDT")]
    DailyVolumeExceeded {
        current: f64,
        requested: f64,
        max: f64,
    },
    #[error("concurrent order cap reached: {active} active, max {max}")]
    TooManyActiveOrders { active: usize, max: usize },
    #[error("order size {size:.0} USDT exceeds MAX_ORDER_USDT {max:.0}")]
    OrderTooLarge { size: f64, max: f64 },
}

/// Risk state owned by the execution engine's task. The daily volume window
/// rolls on the UTC date; nothing else writes to it.
pub struct RiskGate {
    pub kill_switch: bool,
    pub mode: ExecutionMode,
    pub limits: Limits,
    daily_date: NaiveDate,
    daily_volume_usdt: f64,
}

impl RiskGate {
    pub fn new(kill_switch: bool, mode: ExecutionMode, limits: Limits) -> Self {
        Self {
            kill_switch,
            mode,
            limits,
            daily_date: Utc::now().date_naive(),
            daily_volume_usdt: 0.0,
        }
    }

    fn roll_window(&mut self) {
        let today = Utc::now().date_naive();
        if today != self.daily_date {
            self.daily_date = today;
            self.daily_volume_usdt = 0.0;
        }
    }

    /// The gate. Evaluation order is policy:
    /// kill switch, mode, edge floor, daily volume cap, concurrency cap.
    pub fn validate(
        &mut self,
        edge_bps: f64,
        size_usdt: f64,
        active_orders: usize,
    ) -> Result<(), ValidationError> {
        self.roll_window();

        if self.kill_switch {
            return Err(ValidationError::KillSwitch);
        }
        if self.mode == ExecutionMode::Off {
            return Err(ValidationError::ModeOff);
        }
        if edge_bps < self.limits.min_edge_bps {
            return Err(ValidationError::EdgeBelowMin {
                edge_bps,
                min_bps: self.limits.min_edge_bps,
            });
        }
        if self.daily_volume_usdt + size_usdt > self.limits.max_daily_volume_usdt {
            return Err(ValidationError::DailyVolumeExceeded {
                current: self.daily_volume_usdt,
                requested: size_usdt,
                max: self.limits.max_daily_volume_usdt,
            });
        }
        if active_orders >= self.limits.max_concurrent_orders {
            return Err(ValidationError::TooManyActiveOrders {
                active: active_orders,
                max: self.limits.max_concurrent_orders,
            });
        }
        Ok(())
    }

    /// Count filled volume against today's window.
    pub fn record_volume(&mut self, size_usdt: f64) {
        self.roll_window();
        self.daily_volume_usdt += size_usdt;
    }

    pub fn daily_volume_usdt(&mut self) -> f64 {
        self.roll_window();
        self.daily_volume_usdt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Limits {
        Limits {
            max_order_usdt: 1_000.0,
            max_daily_volume_usdt: 2_000.0,
            min_edge_bps: 50.0,
            max_slippage_bps: 100.0,
            max_staleness_secs: 10.0,
            max_concurrent_orders: 2,
        }
    }

    #[test]
    fn kill_switch_wins_over_everything_else() {
        let mut gate = RiskGate::new(true, ExecutionMode::Paper, limits());
        assert!(matches!(
            gate.validate(10_000.0, 1.0, 0),
            Err(ValidationError::KillSwitch)
        ));
    }

    #[test]
    fn mode_off_is_checked_second() {
        let mut gate = RiskGate::new(false, ExecutionMode::Off, limits());
        assert!(matches!(
            gate.validate(10_000.0, 1.0, 0),
            Err(ValidationError::ModeOff)
        ));
    }

    #[test]
    fn edge_floor_then_volume_then_concurrency() {
        let mut gate = RiskGate::new(false, ExecutionMode::Paper, limits());
        assert!(matches!(
            gate.validate(10.0, 100.0, 0),
            Err(ValidationError::EdgeBelowMin { .. })
        ));

        gate.record_volume(1_800.0);
        assert!(matches!(
            gate.validate(100.0, 500.0, 0),
            Err(ValidationError::DailyVolumeExceeded { .. })
        ));

        assert!(matches!(
            gate.validate(100.0, 100.0, 2),
            Err(ValidationError::TooManyActiveOrders { .. })
        ));

        assert!(gate.validate(100.0, 100.0, 1).is_ok());
    }
}
