// Engine Snapshot: a plain, serializable view of engine state for status
// reporting (stdout, a status file, or an operator dashboard). Replaces the
// upstream engine's Redis pub/sub bridge — this engine has no sibling
// process to push state to, so the snapshot is just a value, not a channel.
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::risk::RiskMetrics;
use crate::types::{ManagedOrder, OrderBook, Position, Trade};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub generated_at: DateTime<Utc>,
    pub paper_trading: bool,
    pub halted: bool,
    pub balance: Decimal,
    pub positions: Vec<Position>,
    pub orderbooks: HashMap<String, OrderBook>,
    pub live_orders: Vec<ManagedOrder>,
    pub risk_metrics: RiskMetrics,
    pub recent_fills: Vec<Trade>,
}

impl EngineSnapshot {
    pub fn summary_line(&self) -> String {
        let gross: Decimal = self.positions.iter().map(|p| p.market_value()).sum();
        let pnl: Decimal = self.positions.iter().map(|p| p.total_pnl()).sum();
        format!(
            "[{}] balance=${} positions={} gross_exposure=${} pnl=${} live_orders={} halted={}",
            self.generated_at.format("%H:%M:%S"),
            self.balance,
            self.positions.len(),
            gross,
            pnl,
            self.live_orders.len(),
            self.halted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::RiskMetrics;
    use rust_decimal_macros::dec;

    #[test]
    fn summary_line_includes_balance_and_halt_state() {
        let snapshot = EngineSnapshot {
            generated_at: Utc::now(),
            paper_trading: true,
            halted: false,
            balance: dec!(1000),
            positions: vec![],
            orderbooks: HashMap::new(),
            live_orders: vec![],
            risk_metrics: RiskMetrics {
                total_exposure: Decimal::ZERO,
                max_position_size: 500,
                current_max_position: 0,
                daily_pnl: Decimal::ZERO,
                unrealized_pnl: Decimal::ZERO,
                realized_pnl: Decimal::ZERO,
                num_positions: 0,
                inventory_imbalance: Decimal::ZERO,
            },
            recent_fills: vec![],
        };
        let line = snapshot.summary_line();
        assert!(line.contains("balance=$1000"));
        assert!(line.contains("halted=false"));
    }
}
