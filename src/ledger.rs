// Inventory Ledger: weighted-average-cost position accounting with
// sign-flip realized P&L booking, grounded on the upstream InventoryManager.
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::types::{Position, Side, Trade};

#[derive(Debug, Default)]
pub struct InventoryLedger {
    positions: HashMap<String, Position>,
    trade_history: Vec<Trade>,
    seen_trade_ids: std::collections::HashSet<String>,
}

impl InventoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&mut self, asset_id: &str) -> &Position {
        self.positions.entry(asset_id.to_string()).or_insert_with(|| Position::flat(asset_id, Utc::now()))
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| p.quantity != 0)
    }

    pub fn all_positions(&self) -> &HashMap<String, Position> {
        &self.positions
    }

    /// Applies a fill's effect on position and realized P&L. Idempotent on
    /// `trade.trade_id`: replaying the same fill twice (duplicate delivery
    /// over a reconnecting feed) is a no-op the second time.
    pub fn apply_fill(&mut self, trade: &Trade) {
        if !self.seen_trade_ids.insert(trade.trade_id.clone()) {
            return;
        }

        let position = self.positions.entry(trade.asset_id.clone()).or_insert_with(|| Position::flat(&trade.asset_id, Utc::now()));

        let old_quantity = position.quantity;
        let size = trade.size;
        let size_i = trade.size.round().to_i64().unwrap_or(0);

        match trade.side {
            Side::Buy => {
                let new_quantity = old_quantity + size_i;
                if old_quantity >= 0 {
                    if new_quantity != 0 {
                        let old_cost = position.avg_entry_price * Decimal::from(old_quantity.max(0));
                        let new_cost = trade.price * size;
                        position.avg_entry_price = (old_cost + new_cost) / Decimal::from(new_quantity);
                    }
                } else {
                    let closed_qty = size_i.min(old_quantity.abs());
                    let pnl = (position.avg_entry_price - trade.price) * Decimal::from(closed_qty);
                    position.realized_pnl += pnl;
                    if new_quantity > 0 {
                        position.avg_entry_price = trade.price;
                    }
                }
                position.quantity = new_quantity;
            }
            Side::Sell => {
                let new_quantity = old_quantity - size_i;
                if old_quantity <= 0 {
                    if new_quantity != 0 {
                        let old_cost = position.avg_entry_price * Decimal::from((-old_quantity.min(0)).max(0));
                        let new_cost = trade.price * size;
                        position.avg_entry_price = (old_cost + new_cost) / Decimal::from(new_quantity.abs());
                    }
                } else {
                    let closed_qty = size_i.min(old_quantity);
                    let pnl = (trade.price - position.avg_entry_price) * Decimal::from(closed_qty);
                    position.realized_pnl += pnl;
                    if new_quantity < 0 {
                        position.avg_entry_price = trade.price;
                    }
                }
                position.quantity = new_quantity;
            }
        }

        position.last_updated = Utc::now();
        self.trade_history.push(trade.clone());
        log::info!(
            "position updated: {} {} -> {} @ {}",
            trade.asset_id,
            old_quantity,
            position.quantity,
            trade.price
        );
    }

    pub fn total_long_exposure(&self) -> Decimal {
        self.positions.values().filter(|p| p.quantity > 0).map(|p| p.avg_entry_price * Decimal::from(p.quantity)).sum()
    }

    pub fn total_short_exposure(&self) -> Decimal {
        self.positions
            .values()
            .filter(|p| p.quantity < 0)
            .map(|p| p.avg_entry_price * Decimal::from(p.quantity.unsigned_abs()))
            .sum()
    }

    pub fn net_exposure(&self) -> Decimal {
        self.total_long_exposure() - self.total_short_exposure()
    }

    pub fn gross_exposure(&self) -> Decimal {
        self.total_long_exposure() + self.total_short_exposure()
    }

    pub fn total_realized_pnl(&self) -> Decimal {
        self.positions.values().map(|p| p.realized_pnl).sum()
    }

    pub fn total_unrealized_pnl(&self) -> Decimal {
        self.positions.values().map(|p| p.unrealized_pnl).sum()
    }

    pub fn update_all_unrealized(&mut self, prices: &HashMap<String, Decimal>) {
        for (asset_id, position) in self.positions.iter_mut() {
            if let Some(&price) = prices.get(asset_id) {
                if position.quantity == 0 {
                    position.unrealized_pnl = Decimal::ZERO;
                    continue;
                }
                position.unrealized_pnl = if position.quantity > 0 {
                    (price - position.avg_entry_price) * Decimal::from(position.quantity)
                } else {
                    (position.avg_entry_price - price) * Decimal::from(position.quantity.unsigned_abs())
                };
            }
        }
    }

    pub fn restore(&mut self, positions: Vec<Position>) {
        self.positions.clear();
        for p in positions {
            self.positions.insert(p.asset_id.clone(), p);
        }
    }

    pub fn snapshot(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn trade(id: &str, side: Side, price: Decimal, size: Decimal) -> Trade {
        Trade {
            trade_id: id.to_string(),
            asset_id: "A".to_string(),
            side,
            price,
            size,
            fee: Decimal::ZERO,
            timestamp: Utc::now(),
            order_id: "o1".to_string(),
        }
    }

    #[test]
    fn buy_then_buy_averages_entry_price() {
        let mut ledger = InventoryLedger::new();
        ledger.apply_fill(&trade("t1", Side::Buy, dec!(0.50), dec!(10)));
        ledger.apply_fill(&trade("t2", Side::Buy, dec!(0.60), dec!(10)));
        let p = ledger.position("A").clone();
        assert_eq!(p.quantity, 20);
        assert_eq!(p.avg_entry_price, dec!(0.55));
    }

    #[test]
    fn closing_long_books_realized_pnl() {
        let mut ledger = InventoryLedger::new();
        ledger.apply_fill(&trade("t1", Side::Buy, dec!(0.50), dec!(10)));
        ledger.apply_fill(&trade("t2", Side::Sell, dec!(0.60), dec!(10)));
        let p = ledger.position("A").clone();
        assert_eq!(p.quantity, 0);
        assert_eq!(p.realized_pnl, dec!(1.00));
    }

    #[test]
    fn flipping_long_to_short_resets_entry_price() {
        let mut ledger = InventoryLedger::new();
        ledger.apply_fill(&trade("t1", Side::Buy, dec!(0.50), dec!(10)));
        ledger.apply_fill(&trade("t2", Side::Sell, dec!(0.40), dec!(15)));
        let p = ledger.position("A").clone();
        assert_eq!(p.quantity, -5);
        assert_eq!(p.avg_entry_price, dec!(0.40));
        assert_eq!(p.realized_pnl, dec!(-1.00));
    }

    #[test]
    fn duplicate_trade_id_is_applied_once() {
        let mut ledger = InventoryLedger::new();
        let t = trade("dup", Side::Buy, dec!(0.50), dec!(10));
        ledger.apply_fill(&t);
        ledger.apply_fill(&t);
        assert_eq!(ledger.position("A").quantity, 10);
    }
}
