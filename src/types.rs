// Core data model: instruments, books, quotes, orders and positions.
//
// Prices and sizes are exact decimals (rust_decimal), never f64 — every
// comparison the Order Manager relies on for reconciliation must be exact
// on the 0.01 tick, which binary floats cannot guarantee.
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const TICK: Decimal = dec!(0.01);

pub fn round_to_tick(price: Decimal) -> Decimal {
    (price / TICK).round() * TICK
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Live,
    Partial,
    Matched,
    Cancelled,
    Unknown,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Matched | OrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Gtc,
    Fok,
    Fak,
}

/// One price level of an order book side: `size == 0` means the level was removed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: Decimal,
    pub size: Decimal,
}

/// Per-instrument book, maintained either from snapshot+deltas (push mode) or
/// replaced wholesale on every poll (polling mode). Bids are kept sorted
/// descending by price, asks ascending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub asset_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

impl OrderBook {
    pub fn new(asset_id: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            timestamp: None,
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    pub fn mid(&self) -> Option<Decimal> {
        Some((self.best_bid()? + self.best_ask()?) / dec!(2))
    }

    /// Size-weighted mid over the top `depth` levels of each side, then averaged.
    pub fn weighted_mid(&self, depth: usize) -> Option<Decimal> {
        let bid_wm = Self::side_weighted(&self.bids, depth)?;
        let ask_wm = Self::side_weighted(&self.asks, depth)?;
        Some((bid_wm + ask_wm) / dec!(2))
    }

    fn side_weighted(levels: &[Level], depth: usize) -> Option<Decimal> {
        let slice = &levels[..levels.len().min(depth)];
        if slice.is_empty() {
            return None;
        }
        let total_size: Decimal = slice.iter().map(|l| l.size).sum();
        if total_size.is_zero() {
            return None;
        }
        let weighted: Decimal = slice.iter().map(|l| l.price * l.size).sum();
        Some(weighted / total_size)
    }

    /// Cumulative size of the top `n` levels of a side.
    pub fn top_depth(&self, side: Side, n: usize) -> Decimal {
        let levels = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        levels.iter().take(n).map(|l| l.size).sum()
    }

    /// Applies a snapshot wholesale, replacing both sides and re-sorting.
    pub fn apply_snapshot(&mut self, bids: Vec<Level>, asks: Vec<Level>, ts: DateTime<Utc>) {
        self.bids = bids;
        self.asks = asks;
        self.bids
            .sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(Ordering::Equal));
        self.asks
            .sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(Ordering::Equal));
        self.timestamp = Some(ts);
    }

    /// Applies a single `(side, price, size)` delta. `size == 0` removes the level;
    /// applying the same removal twice is a no-op, matching the idempotence law.
    pub fn apply_delta(&mut self, side: Side, price: Decimal, size: Decimal, ts: DateTime<Utc>) {
        let levels = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let pos = levels.iter().position(|l| l.price == price);
        if size.is_zero() {
            if let Some(i) = pos {
                levels.remove(i);
            }
        } else {
            match pos {
                Some(i) => levels[i].size = size,
                None => levels.push(Level { price, size }),
            }
            match side {
                Side::Buy => levels.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(Ordering::Equal)),
                Side::Sell => levels.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(Ordering::Equal)),
            }
        }
        self.timestamp = Some(ts);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: Decimal,
    pub size: Decimal,
    pub side: Side,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteSet {
    pub asset_id: String,
    pub bids: Vec<Quote>,
    pub asks: Vec<Quote>,
    pub fair_value: Decimal,
    pub spread: Decimal,
    pub provenance: String,
}

impl QuoteSet {
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub asset_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub size_matched: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub order_type: OrderType,
}

impl Order {
    pub fn is_fully_matched(&self) -> bool {
        self.size_matched >= self.size
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedOrder {
    pub order: Order,
    pub originating_quote: Quote,
    pub placed_at: DateTime<Utc>,
    pub asset_id: String,
    pub is_stale: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub asset_id: String,
    pub quantity: i64,
    pub avg_entry_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub last_updated: DateTime<Utc>,
}

impl Position {
    pub fn flat(asset_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            asset_id: asset_id.into(),
            quantity: 0,
            avg_entry_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            last_updated: now,
        }
    }

    pub fn total_pnl(&self) -> Decimal {
        self.realized_pnl + self.unrealized_pnl
    }

    pub fn market_value(&self) -> Decimal {
        Decimal::from(self.quantity.unsigned_abs()) * self.avg_entry_price
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub asset_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub fee: Decimal,
    pub timestamp: DateTime<Utc>,
    pub order_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(bids: &[(f64, f64)], asks: &[(f64, f64)]) -> OrderBook {
        let mut b = OrderBook::new("A");
        let bids = bids
            .iter()
            .map(|&(p, s)| Level { price: Decimal::try_from(p).unwrap(), size: Decimal::try_from(s).unwrap() })
            .collect();
        let asks = asks
            .iter()
            .map(|&(p, s)| Level { price: Decimal::try_from(p).unwrap(), size: Decimal::try_from(s).unwrap() })
            .collect();
        b.apply_snapshot(bids, asks, Utc::now());
        b
    }

    #[test]
    fn mid_is_average_of_best_levels() {
        let b = book(&[(0.49, 200.0)], &[(0.51, 200.0)]);
        assert_eq!(b.mid(), Some(dec!(0.50)));
    }

    #[test]
    fn delta_removal_is_idempotent() {
        let mut b = book(&[(0.49, 200.0)], &[(0.51, 200.0)]);
        b.apply_delta(Side::Buy, dec!(0.49), Decimal::ZERO, Utc::now());
        let after_first = b.bids.clone();
        b.apply_delta(Side::Buy, dec!(0.49), Decimal::ZERO, Utc::now());
        assert_eq!(b.bids, after_first);
        assert!(b.bids.is_empty());
    }

    #[test]
    fn delta_insert_keeps_side_sorted() {
        let mut b = book(&[(0.49, 200.0)], &[]);
        b.apply_delta(Side::Buy, dec!(0.50), dec!(50), Utc::now());
        assert_eq!(b.bids[0].price, dec!(0.50));
        assert_eq!(b.bids[1].price, dec!(0.49));
    }

    #[test]
    fn weighted_mid_uses_top_k_depth() {
        let b = book(&[(0.49, 100.0), (0.48, 900.0)], &[(0.51, 100.0), (0.52, 900.0)]);
        // top-1 only: ignores the deeper, larger level
        assert_eq!(b.weighted_mid(1), Some(dec!(0.50)));
    }
}
