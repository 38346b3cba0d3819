// Risk Gate: position/exposure limits, inventory-imbalance guard and the
// daily-loss circuit breaker. The UTC-midnight reset mechanism is kept from
// the upstream RiskManager's day-rollover check; the limit formulas
// themselves follow this engine's own inventory-imbalance-as-share-count
// rule (see DESIGN.md's Open Question resolutions).
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::InventoryLedger;
use crate::types::Side;

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub max_position_per_market: i64,
    pub max_total_exposure: Decimal,
    pub max_inventory_imbalance: i64,
    pub daily_loss_limit: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub daily_pnl: Decimal,
    pub daily_pnl_reset_time: DateTime<Utc>,
    pub halted: bool,
    pub halt_reason: String,
}

impl Default for RiskState {
    fn default() -> Self {
        Self { daily_pnl: Decimal::ZERO, daily_pnl_reset_time: Utc::now(), halted: false, halt_reason: String::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub total_exposure: Decimal,
    pub max_position_size: i64,
    pub current_max_position: i64,
    pub daily_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub num_positions: usize,
    pub inventory_imbalance: Decimal,
}

pub struct RiskGate {
    pub config: RiskConfig,
    state: RiskState,
}

impl RiskGate {
    pub fn new(config: RiskConfig) -> Self {
        Self { config, state: RiskState::default() }
    }

    pub fn get_state(&self) -> RiskState {
        self.state.clone()
    }

    pub fn restore_state(&mut self, state: RiskState) {
        self.state = state;
    }

    pub fn is_halted(&self) -> bool {
        self.state.halted
    }

    pub fn halt_trading(&mut self, reason: impl Into<String>) {
        self.state.halted = true;
        self.state.halt_reason = reason.into();
        log::warn!("trading halted: {}", self.state.halt_reason);
    }

    pub fn resume_trading(&mut self) {
        self.state.halted = false;
        self.state.halt_reason.clear();
        log::info!("trading resumed");
    }

    /// Checks whether a proposed order passes the position, exposure and
    /// inventory-imbalance limits. `size` is a whole share count, matching
    /// `max_inventory_imbalance`'s unit (see DESIGN.md).
    pub fn check_order_allowed(
        &self,
        ledger: &mut InventoryLedger,
        asset_id: &str,
        side: Side,
        size: i64,
        price: Decimal,
    ) -> Result<(), String> {
        if self.state.halted {
            return Err(format!("trading halted: {}", self.state.halt_reason));
        }

        let current_qty = ledger.position(asset_id).quantity;
        let new_qty = match side {
            Side::Buy => current_qty + size,
            Side::Sell => current_qty - size,
        };

        if new_qty.abs() > self.config.max_position_per_market {
            return Err(format!("would exceed position limit: {new_qty} > {}", self.config.max_position_per_market));
        }

        let current_exposure = ledger.gross_exposure();
        let additional_exposure = price * Decimal::from(size);
        if current_exposure + additional_exposure > self.config.max_total_exposure {
            return Err(format!(
                "would exceed total exposure: {} > {}",
                current_exposure + additional_exposure,
                self.config.max_total_exposure
            ));
        }

        if new_qty.abs() > self.config.max_inventory_imbalance {
            return Err(format!("would exceed inventory imbalance: {new_qty}"));
        }

        Ok(())
    }

    /// Checks the daily-loss circuit breaker, resetting the counter at UTC
    /// midnight. Returns true if the breaker tripped (and halts trading).
    pub fn check_daily_loss(&mut self, ledger: &InventoryLedger) -> bool {
        let now = Utc::now();
        if now.date_naive() > self.state.daily_pnl_reset_time.date_naive() {
            self.state.daily_pnl = Decimal::ZERO;
            self.state.daily_pnl_reset_time = now;
        }

        let total_pnl = ledger.total_realized_pnl() + ledger.total_unrealized_pnl();
        self.state.daily_pnl = total_pnl;

        if total_pnl < -self.config.daily_loss_limit {
            self.halt_trading(format!("daily loss limit hit: {total_pnl}"));
            return true;
        }
        false
    }

    pub fn get_risk_metrics(&self, ledger: &InventoryLedger) -> RiskMetrics {
        let positions: Vec<_> = ledger.positions().collect();
        let max_position = positions.iter().map(|p| p.quantity.unsigned_abs()).max().unwrap_or(0);
        let gross = ledger.gross_exposure();
        let net = ledger.net_exposure();
        let imbalance = if gross > Decimal::ZERO { net / gross } else { Decimal::ZERO };

        RiskMetrics {
            total_exposure: gross,
            max_position_size: self.config.max_position_per_market,
            current_max_position: max_position as i64,
            daily_pnl: self.state.daily_pnl,
            unrealized_pnl: ledger.total_unrealized_pnl(),
            realized_pnl: ledger.total_realized_pnl(),
            num_positions: positions.len(),
            inventory_imbalance: imbalance,
        }
    }

    /// Shrinks order size on the side that would push inventory further out of balance.
    pub fn calculate_size_adjustment(
        &self,
        ledger: &mut InventoryLedger,
        asset_id: &str,
        side: Side,
        base_size: Decimal,
    ) -> Decimal {
        let current_qty = ledger.position(asset_id).quantity;
        let half_threshold = self.config.max_inventory_imbalance / 2;

        let over_threshold = match side {
            Side::Buy => current_qty > half_threshold,
            Side::Sell => current_qty < -half_threshold,
        };
        if !over_threshold {
            return base_size;
        }

        let reduction = (Decimal::from(current_qty.abs()) / Decimal::from(self.config.max_inventory_imbalance))
            .min(Decimal::new(5, 1));
        base_size * (Decimal::ONE - reduction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Trade;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn gate() -> RiskGate {
        RiskGate::new(RiskConfig {
            max_position_per_market: 500,
            max_total_exposure: dec!(1000.0),
            max_inventory_imbalance: 400,
            daily_loss_limit: dec!(100.0),
        })
    }

    #[test]
    fn order_within_limits_is_allowed() {
        let gate = gate();
        let mut ledger = InventoryLedger::new();
        assert!(gate.check_order_allowed(&mut ledger, "A", Side::Buy, 20, dec!(0.5)).is_ok());
    }

    #[test]
    fn order_exceeding_position_limit_is_rejected() {
        let gate = gate();
        let mut ledger = InventoryLedger::new();
        ledger.apply_fill(&Trade {
            trade_id: "t1".into(),
            asset_id: "A".into(),
            side: Side::Buy,
            price: dec!(0.5),
            size: dec!(490),
            fee: Decimal::ZERO,
            timestamp: Utc::now(),
            order_id: "o".into(),
        });
        assert!(gate.check_order_allowed(&mut ledger, "A", Side::Buy, 20, dec!(0.5)).is_err());
    }

    #[test]
    fn halted_gate_rejects_every_order() {
        let mut gate = gate();
        gate.halt_trading("manual stop");
        let mut ledger = InventoryLedger::new();
        assert!(gate.check_order_allowed(&mut ledger, "A", Side::Buy, 1, dec!(0.5)).is_err());
    }

    #[test]
    fn daily_loss_breaker_trips_and_halts() {
        let mut gate = gate();
        let mut ledger = InventoryLedger::new();
        ledger.apply_fill(&Trade {
            trade_id: "t1".into(),
            asset_id: "A".into(),
            side: Side::Buy,
            price: dec!(0.8),
            size: dec!(200),
            fee: Decimal::ZERO,
            timestamp: Utc::now(),
            order_id: "o".into(),
        });
        ledger.apply_fill(&Trade {
            trade_id: "t2".into(),
            asset_id: "A".into(),
            side: Side::Sell,
            price: dec!(0.3),
            size: dec!(200),
            fee: Decimal::ZERO,
            timestamp: Utc::now(),
            order_id: "o".into(),
        });
        assert!(gate.check_daily_loss(&ledger));
        assert!(gate.is_halted());
    }

    #[test]
    fn daily_pnl_resets_after_midnight_rollover() {
        let mut gate = gate();
        gate.halt_trading("pretend prior halt");
        gate.resume_trading();
        let mut state = gate.get_state();
        state.daily_pnl = dec!(-50);
        state.daily_pnl_reset_time = Utc::now() - Duration::days(1);
        gate.restore_state(state);
        let ledger = InventoryLedger::new();
        gate.check_daily_loss(&ledger);
        assert_eq!(gate.get_state().daily_pnl, Decimal::ZERO);
    }
}
