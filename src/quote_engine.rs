// Quote Engine: fair value, spread shaping and multi-level quote generation.
//
// Mirrors the teacher's grid/regime-multiplier shape (compute_quote_grid,
// RegimeGovernor) but replaces the Hyperliquid bps/ATR formulas with the
// exact fair-value/spread/skew formulas this market needs.
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use std::time::Instant;

use crate::types::{OrderBook, Quote, QuoteSet, Side, Trade};

#[derive(Debug, Clone)]
pub struct QuoteEngineConfig {
    pub base_spread: Decimal,
    pub min_spread: Decimal,
    pub max_spread: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub num_levels: u32,
    pub level_spacing: Decimal,
    pub default_size: Decimal,
    pub inventory_skew_threshold: i64,
    pub use_weighted_mid: bool,
}

/// Fair value + spread shaping, inventory skew, and a rolling adverse-selection
/// factor derived from recent trade flow. Stateless between calls except for
/// the adverse-selection trade window, matching `update_adverse_selection`.
pub struct QuoteEngine {
    pub config: QuoteEngineConfig,
    recent_trades: VecDeque<Trade>,
    volatility_window: chrono::Duration,
    adverse_selection_factor: Decimal,
}

impl QuoteEngine {
    pub fn new(config: QuoteEngineConfig) -> Self {
        Self {
            config,
            recent_trades: VecDeque::new(),
            volatility_window: chrono::Duration::minutes(5),
            adverse_selection_factor: Decimal::ONE,
        }
    }

    pub fn calculate_fair_value(&self, book: &OrderBook, inventory: i64) -> Option<Decimal> {
        let mut fair_value = if self.config.use_weighted_mid {
            book.weighted_mid(3).or_else(|| book.mid())?
        } else {
            book.mid()?
        };

        if inventory.abs() > self.config.inventory_skew_threshold {
            let adjustment = Decimal::from(inventory) * dec!(0.0001);
            fair_value -= adjustment;
        }

        Some(fair_value.clamp(self.config.min_price, self.config.max_price))
    }

    pub fn calculate_spread(
        &self,
        book: &OrderBook,
        inventory: i64,
        volatility_factor: Decimal,
        hours_to_expiry: Option<f64>,
    ) -> Decimal {
        let mut spread = self.config.base_spread * volatility_factor;

        if inventory.abs() > self.config.inventory_skew_threshold {
            let threshold4 = Decimal::from(self.config.inventory_skew_threshold * 4);
            let inventory_factor = Decimal::ONE + Decimal::from(inventory.abs()) / threshold4;
            spread *= inventory_factor;
        }

        if let Some(hours) = hours_to_expiry {
            if hours < 48.0 {
                let denom = (hours / 12.0).max(1.0);
                let expiry_factor = Decimal::ONE + Decimal::ONE / Decimal::try_from(denom).unwrap_or(Decimal::ONE);
                spread *= expiry_factor;
            }
        }

        let bid_depth = book.top_depth(Side::Buy, 5);
        let ask_depth = book.top_depth(Side::Sell, 5);
        if bid_depth < dec!(100) || ask_depth < dec!(100) {
            spread *= dec!(1.5);
        }

        spread *= self.adverse_selection_factor;

        spread.clamp(self.config.min_spread, self.config.max_spread)
    }

    /// Returns (bid_adjustment, ask_adjustment), added to both sides' prices.
    /// A long position pushes both down (encourage selling); short pushes both up.
    pub fn calculate_inventory_skew(&self, inventory: i64) -> (Decimal, Decimal) {
        if inventory.abs() <= self.config.inventory_skew_threshold {
            return (Decimal::ZERO, Decimal::ZERO);
        }
        let skew_multiple = Decimal::from(inventory) / Decimal::from(self.config.inventory_skew_threshold);
        let adjustment = skew_multiple * dec!(0.005);
        (-adjustment, -adjustment)
    }

    pub fn calculate_quotes(
        &self,
        asset_id: &str,
        book: &OrderBook,
        inventory: i64,
        volatility_factor: Decimal,
        hours_to_expiry: Option<f64>,
        size_override: Option<Decimal>,
    ) -> Option<QuoteSet> {
        let fair_value = self.calculate_fair_value(book, inventory)?;
        let spread = self.calculate_spread(book, inventory, volatility_factor, hours_to_expiry);
        let (bid_skew, ask_skew) = self.calculate_inventory_skew(inventory);
        let size = size_override.unwrap_or(self.config.default_size);
        let half_spread = spread / dec!(2);

        let mut bids = Vec::new();
        let mut asks = Vec::new();

        for level in 0..self.config.num_levels {
            let level_offset = Decimal::from(level) * self.config.level_spacing;
            let shrink = Decimal::ONE - Decimal::from(level) * dec!(0.2);
            let level_size = (size * shrink).max(dec!(5.0));

            let bid_price = round_price(fair_value - half_spread - level_offset + bid_skew);
            if bid_price >= self.config.min_price {
                bids.push(Quote { price: bid_price, size: level_size, side: Side::Buy });
            }

            let ask_price = round_price(fair_value + half_spread + level_offset + ask_skew);
            if ask_price <= self.config.max_price {
                asks.push(Quote { price: ask_price, size: level_size, side: Side::Sell });
            }
        }

        Some(QuoteSet {
            asset_id: asset_id.to_string(),
            bids,
            asks,
            fair_value,
            spread,
            provenance: format!("fv={fair_value:.3}, spread={spread:.3}, inv={inventory}"),
        })
    }

    pub fn should_quote(
        &self,
        book: &OrderBook,
        inventory: i64,
        max_inventory: i64,
        hours_to_expiry: Option<f64>,
    ) -> (bool, &'static str) {
        let Some(mid) = book.mid() else {
            return (false, "no orderbook data");
        };
        if inventory.abs() >= max_inventory {
            return (true, "inventory limit reached, one side blocked by the risk gate");
        }
        if let Some(hours) = hours_to_expiry {
            if hours < 1.0 {
                return (false, "too close to expiry");
            }
        }
        if mid < dec!(0.02) || mid > dec!(0.98) {
            return (false, "price near resolution bounds");
        }
        (true, "ok")
    }

    /// Widens the spread when recent trade flow is one-sided (we're being picked off).
    pub fn update_adverse_selection(&mut self, trades: &[Trade]) {
        if trades.is_empty() {
            return;
        }
        self.recent_trades.extend(trades.iter().cloned());
        let cutoff = Utc::now() - self.volatility_window;
        while self.recent_trades.front().map(|t| t.timestamp <= cutoff).unwrap_or(false) {
            self.recent_trades.pop_front();
        }

        if self.recent_trades.len() < 5 {
            self.adverse_selection_factor = Decimal::ONE;
            return;
        }

        let buy_volume: Decimal = self.recent_trades.iter().filter(|t| t.side == Side::Buy).map(|t| t.size).sum();
        let sell_volume: Decimal = self.recent_trades.iter().filter(|t| t.side == Side::Sell).map(|t| t.size).sum();
        let total = buy_volume + sell_volume;
        if total > Decimal::ZERO {
            let imbalance = (buy_volume - sell_volume).abs() / total;
            self.adverse_selection_factor = Decimal::ONE + imbalance * dec!(0.5);
        }
    }
}

fn round_price(price: Decimal) -> Decimal {
    (price * dec!(100)).round() / dec!(100)
}

/// Volatility-regime and momentum signal producer layered on top of `QuoteEngine`,
/// grounded on the teacher's `RegimeGovernor` (rolling-window signal -> spread multiplier).
pub struct SmartQuoteEngine {
    pub inner: QuoteEngine,
    price_history: VecDeque<(Instant, Decimal)>,
}

impl SmartQuoteEngine {
    pub fn new(config: QuoteEngineConfig) -> Self {
        Self { inner: QuoteEngine::new(config), price_history: VecDeque::new() }
    }

    pub fn update_price_history(&mut self, price: Decimal) {
        self.price_history.push_back((Instant::now(), price));
        while self.price_history.len() > 100 {
            self.price_history.pop_front();
        }
    }

    pub fn calculate_realized_volatility(&self) -> Decimal {
        if self.price_history.len() < 10 {
            return Decimal::ONE;
        }
        let prices: Vec<Decimal> = self.price_history.iter().rev().take(20).map(|(_, p)| *p).rev().collect();
        let mut returns = Vec::new();
        for w in prices.windows(2) {
            if w[0] != Decimal::ZERO {
                returns.push((w[1] - w[0]) / w[0]);
            }
        }
        if returns.is_empty() {
            return Decimal::ONE;
        }
        let mean: Decimal = returns.iter().sum::<Decimal>() / Decimal::from(returns.len() as i64);
        let variance: Decimal =
            returns.iter().map(|r| (*r - mean) * (*r - mean)).sum::<Decimal>() / Decimal::from(returns.len() as i64);
        let vol = sqrt_decimal(variance) * dec!(100);
        (vol + Decimal::ONE).clamp(dec!(0.5), dec!(3.0))
    }

    pub fn detect_momentum(&self) -> Decimal {
        if self.price_history.len() < 5 {
            return Decimal::ZERO;
        }
        let all: Vec<Decimal> = self.price_history.iter().map(|(_, p)| *p).collect();
        let recent = &all[all.len() - 5..];
        let older_start = if all.len() >= 10 { all.len() - 10 } else { 0 };
        let older_end = all.len() - 5;
        let older = if all.len() >= 10 { &all[older_start..older_end] } else { recent };

        let recent_avg: Decimal = recent.iter().sum::<Decimal>() / Decimal::from(recent.len() as i64);
        let older_avg: Decimal = older.iter().sum::<Decimal>() / Decimal::from(older.len() as i64);
        recent_avg - older_avg
    }

    pub fn calculate_quotes(
        &mut self,
        asset_id: &str,
        book: &OrderBook,
        inventory: i64,
        volatility_factor: Decimal,
        hours_to_expiry: Option<f64>,
        size_override: Option<Decimal>,
    ) -> Option<QuoteSet> {
        if let Some(mid) = book.mid() {
            self.update_price_history(mid);
        }
        let realized_vol = self.calculate_realized_volatility();
        let combined_vol = (volatility_factor + realized_vol) / dec!(2);
        let momentum = self.detect_momentum();

        let mut quotes =
            self.inner.calculate_quotes(asset_id, book, inventory, combined_vol, hours_to_expiry, size_override)?;

        if momentum.abs() > dec!(0.01) {
            let adjustment = momentum * dec!(0.1);
            quotes.fair_value += adjustment;
            quotes.provenance = format!("{}, mom={:.4}", quotes.provenance, momentum);
        }
        Some(quotes)
    }
}

fn sqrt_decimal(v: Decimal) -> Decimal {
    if v <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let as_f64: f64 = v.try_into().unwrap_or(0.0);
    Decimal::try_from(as_f64.sqrt()).unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Level;
    use chrono::Utc;

    fn default_config() -> QuoteEngineConfig {
        QuoteEngineConfig {
            base_spread: dec!(0.02),
            min_spread: dec!(0.01),
            max_spread: dec!(0.10),
            min_price: dec!(0.05),
            max_price: dec!(0.95),
            num_levels: 3,
            level_spacing: dec!(0.01),
            default_size: dec!(20.0),
            inventory_skew_threshold: 100,
            use_weighted_mid: true,
        }
    }

    fn deep_book() -> OrderBook {
        let mut b = OrderBook::new("A");
        b.apply_snapshot(
            vec![Level { price: dec!(0.49), size: dec!(500) }, Level { price: dec!(0.48), size: dec!(500) }],
            vec![Level { price: dec!(0.51), size: dec!(500) }, Level { price: dec!(0.52), size: dec!(500) }],
            Utc::now(),
        );
        b
    }

    #[test]
    fn flat_inventory_produces_symmetric_quotes() {
        let engine = QuoteEngine::new(default_config());
        let book = deep_book();
        let set = engine.calculate_quotes("A", &book, 0, Decimal::ONE, None, None).unwrap();
        assert_eq!(set.bids.len(), 3);
        assert_eq!(set.asks.len(), 3);
        let mid_to_bid = set.fair_value - set.bids[0].price;
        let ask_to_mid = set.asks[0].price - set.fair_value;
        assert_eq!(mid_to_bid, ask_to_mid);
    }

    #[test]
    fn long_inventory_skews_quotes_down() {
        let engine = QuoteEngine::new(default_config());
        let book = deep_book();
        let flat = engine.calculate_quotes("A", &book, 0, Decimal::ONE, None, None).unwrap();
        let long = engine.calculate_quotes("A", &book, 300, Decimal::ONE, None, None).unwrap();
        assert!(long.bids[0].price < flat.bids[0].price);
        assert!(long.asks[0].price < flat.asks[0].price);
    }

    #[test]
    fn thin_book_widens_spread() {
        let engine = QuoteEngine::new(default_config());
        let mut thin = OrderBook::new("A");
        thin.apply_snapshot(
            vec![Level { price: dec!(0.49), size: dec!(10) }],
            vec![Level { price: dec!(0.51), size: dec!(10) }],
            Utc::now(),
        );
        let thick = deep_book();
        let thin_set = engine.calculate_quotes("A", &thin, 0, Decimal::ONE, None, None).unwrap();
        let thick_set = engine.calculate_quotes("A", &thick, 0, Decimal::ONE, None, None).unwrap();
        assert!(thin_set.spread >= thick_set.spread);
    }

    #[test]
    fn should_quote_blocks_near_resolution_bounds() {
        let engine = QuoteEngine::new(default_config());
        let mut extreme = OrderBook::new("A");
        extreme.apply_snapshot(
            vec![Level { price: dec!(0.01), size: dec!(500) }],
            vec![Level { price: dec!(0.015), size: dec!(500) }],
            Utc::now(),
        );
        let (ok, _) = engine.should_quote(&extreme, 0, 500, None);
        assert!(!ok);
    }
}
