// Paper-trading simulator: a drop-in ExchangeClient that wraps SimExchange
// with the fill dynamics a real venue has and a flat paper balance doesn't —
// queue position, volume-scaled fill probability, adverse selection, and
// slippage for crossing orders. Everything else (balance/position/order
// bookkeeping) stays in SimExchange; this layer only decides *when* and at
// *what size* a resting order fills.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::EngineError;
use crate::exchange::{ExchangeClient, OrderRequest, SimExchange};
use crate::types::{Level, Order, OrderBook, OrderStatus, Side, Trade};

const LATENCY_MIN_MS: u64 = 50;
const LATENCY_MAX_MS: u64 = 300;
const BASE_FILL_PROB_PER_SECOND: Decimal = dec!(0.02);
const ADVERSE_SELECTION_MULTIPLIER: Decimal = dec!(3.0);
const FAVORABLE_SELECTION_MULTIPLIER: Decimal = dec!(0.3);

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub enable_latency: bool,
    pub enable_adverse_selection: bool,
    pub enable_partial_fills: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self { enable_latency: true, enable_adverse_selection: true, enable_partial_fills: true }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulatorStats {
    pub orders_placed: u64,
    pub orders_filled: u64,
    pub orders_partial: u64,
    pub orders_cancelled: u64,
    pub total_volume: Decimal,
    pub maker_volume: Decimal,
    pub taker_volume: Decimal,
    pub total_fees: Decimal,
    pub adverse_fills: u64,
    pub favorable_fills: u64,
}

impl SimulatorStats {
    pub fn adverse_fill_rate(&self) -> Decimal {
        let total = self.adverse_fills + self.favorable_fills;
        if total == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(self.adverse_fills) / Decimal::from(total)
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MarketState {
    recent_volume: Decimal,
    volume_window_start: Option<DateTime<Utc>>,
    price_history: VecDeque<(DateTime<Utc>, Decimal)>,
}

impl MarketState {
    fn update_price_history(&mut self, mid: Decimal, now: DateTime<Utc>) {
        self.price_history.push_back((now, mid));
        let cutoff = now - chrono::Duration::minutes(5);
        while self.price_history.front().map(|(t, _)| *t < cutoff).unwrap_or(false) {
            self.price_history.pop_front();
        }
    }

    fn record_trade(&mut self, size: Decimal, now: DateTime<Utc>) {
        let window_start = *self.volume_window_start.get_or_insert(now);
        if (now - window_start).num_seconds() > 60 {
            self.recent_volume = Decimal::ZERO;
            self.volume_window_start = Some(now);
        }
        self.recent_volume += size;
    }

    fn volume_per_second(&self, now: DateTime<Utc>) -> Decimal {
        let elapsed = self.volume_window_start.map(|w| (now - w).num_seconds().max(1)).unwrap_or(1);
        self.recent_volume / Decimal::from(elapsed)
    }

    /// Price move since `since`: most recent mid minus the mid in effect at that time.
    fn price_move_since(&self, since: DateTime<Utc>) -> Decimal {
        if self.price_history.len() < 2 {
            return Decimal::ZERO;
        }
        let mut old_price = None;
        for (t, p) in &self.price_history {
            if *t <= since {
                old_price = Some(*p);
            } else {
                break;
            }
        }
        match (old_price, self.price_history.back()) {
            (Some(old), Some((_, current))) => *current - old,
            _ => Decimal::ZERO,
        }
    }
}

fn queue_depth_at_price(book: &OrderBook, price: Decimal, side: Side) -> Decimal {
    match side {
        Side::Buy => book.bids.iter().filter(|l| l.price >= price).map(|l| l.size).sum(),
        Side::Sell => book.asks.iter().filter(|l| l.price <= price).map(|l| l.size).sum(),
    }
}

#[derive(Debug, Clone)]
struct TrackedOrder {
    order_id: String,
    asset_id: String,
    side: Side,
    price: Decimal,
    created_at: DateTime<Utc>,
    queue_position: Decimal,
    initial_queue_depth: Decimal,
}

/// Realistic paper-trading fill engine. Implements `ExchangeClient` itself so
/// it can sit anywhere a live venue would, delegating balance/order/trade
/// bookkeeping to an inner `SimExchange` and adding queue dynamics on top.
pub struct PaperSimulator {
    exchange: SimExchange,
    config: SimulatorConfig,
    markets: Mutex<HashMap<String, MarketState>>,
    tracked: Mutex<HashMap<String, TrackedOrder>>,
    stats: Mutex<SimulatorStats>,
}

impl PaperSimulator {
    pub fn new(starting_balance: Decimal, config: SimulatorConfig) -> Self {
        Self {
            exchange: SimExchange::new(starting_balance),
            config,
            markets: Mutex::new(HashMap::new()),
            tracked: Mutex::new(HashMap::new()),
            stats: Mutex::new(SimulatorStats::default()),
        }
    }

    /// Feeds a fresh book snapshot in: updates the inner venue's book (for
    /// crossing/queue checks) and this simulator's mid-price history (for
    /// adverse-selection detection).
    pub fn ingest_book(&self, asset_id: &str, book: &OrderBook) {
        self.exchange.set_book(asset_id, book.bids.clone(), book.asks.clone());
        if let Some(mid) = book.mid() {
            self.markets.lock().unwrap().entry(asset_id.to_string()).or_default().update_price_history(mid, Utc::now());
        }
    }

    pub fn ingest_trade(&self, asset_id: &str, size: Decimal) {
        self.markets.lock().unwrap().entry(asset_id.to_string()).or_default().record_trade(size, Utc::now());
    }

    pub fn stats(&self) -> SimulatorStats {
        self.stats.lock().unwrap().clone()
    }

    async fn sleep_latency(&self) {
        if self.config.enable_latency {
            let ms = rand::thread_rng().gen_range(LATENCY_MIN_MS..=LATENCY_MAX_MS);
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    /// Walks the opposite side of the book at progressively worse levels,
    /// filling the crossing portion of `order` as taker volume with slippage
    /// recorded per level. Returns the size still remaining after the walk.
    async fn execute_crossing(&self, order: &Order, book: &OrderBook) -> Decimal {
        let mut remaining = order.size;
        let levels: Vec<Level> = match order.side {
            Side::Buy => book.asks.iter().filter(|l| l.price <= order.price).cloned().collect(),
            Side::Sell => book.bids.iter().filter(|l| l.price >= order.price).cloned().collect(),
        };

        for level in levels {
            if remaining <= Decimal::ZERO {
                break;
            }
            let fill_size = remaining.min(level.size);
            if fill_size <= Decimal::ZERO {
                continue;
            }
            self.exchange.record_fill(&order.order_id, level.price, fill_size, false);
            remaining -= fill_size;

            let mut stats = self.stats.lock().unwrap();
            stats.total_volume += fill_size;
            stats.taker_volume += fill_size;
        }

        if remaining <= Decimal::ZERO {
            self.stats.lock().unwrap().orders_filled += 1;
        }
        remaining
    }

    /// Fill-probability model for one resting order: base rate, scaled by
    /// recent volume and queue progress, then multiplied for adverse or
    /// favorable price movement since the order was placed.
    fn calculate_fill_probability(&self, tracked: &TrackedOrder, market: &MarketState) -> (Decimal, bool) {
        let mut prob = BASE_FILL_PROB_PER_SECOND / dec!(2);

        let vol_per_sec = market.volume_per_second(Utc::now());
        if vol_per_sec > Decimal::ZERO {
            let volume_factor = (vol_per_sec / dec!(10)).min(dec!(3));
            prob *= Decimal::ONE + volume_factor;
        }

        if tracked.initial_queue_depth > Decimal::ZERO {
            let progress = (Decimal::ONE - tracked.queue_position / tracked.initial_queue_depth).clamp(Decimal::ZERO, Decimal::ONE);
            prob *= dec!(0.2) + progress * dec!(0.8);
        }

        let mut is_adverse = false;
        if self.config.enable_adverse_selection {
            let price_move = market.price_move_since(tracked.created_at);
            match tracked.side {
                Side::Buy if price_move < Decimal::ZERO => {
                    prob *= ADVERSE_SELECTION_MULTIPLIER;
                    is_adverse = true;
                }
                Side::Buy if price_move > Decimal::ZERO => prob *= FAVORABLE_SELECTION_MULTIPLIER,
                Side::Sell if price_move > Decimal::ZERO => {
                    prob *= ADVERSE_SELECTION_MULTIPLIER;
                    is_adverse = true;
                }
                Side::Sell if price_move < Decimal::ZERO => prob *= FAVORABLE_SELECTION_MULTIPLIER,
                _ => {}
            }
        }

        (prob.min(Decimal::ONE), is_adverse)
    }

    /// One fill-check pass over every tracked resting order. Meant to be
    /// driven by a 500ms background loop.
    pub async fn check_resting_fills(&self) {
        let snapshot: Vec<TrackedOrder> = self.tracked.lock().unwrap().values().cloned().collect();

        for tracked in snapshot {
            let market = self.markets.lock().unwrap().get(&tracked.asset_id).cloned().unwrap_or_default();
            let (prob, is_adverse) = self.calculate_fill_probability(&tracked, &market);
            if rand::thread_rng().gen::<f64>() > prob.to_f64().unwrap_or(0.0) {
                continue;
            }

            let live = self.exchange.get_orders(Some(&tracked.asset_id), OrderStatus::Live).await.unwrap_or_default();
            let Some(order) = live.into_iter().find(|o| o.order_id == tracked.order_id) else {
                self.tracked.lock().unwrap().remove(&tracked.order_id);
                continue;
            };
            let remaining = order.size - order.size_matched;
            if remaining <= Decimal::ZERO {
                self.tracked.lock().unwrap().remove(&tracked.order_id);
                continue;
            }

            let fill_size = if self.config.enable_partial_fills {
                let vol_per_sec = market.volume_per_second(Utc::now());
                (vol_per_sec * dec!(0.5)).max(Decimal::ONE).min(remaining)
            } else {
                remaining
            };

            self.exchange.record_fill(&tracked.order_id, tracked.price, fill_size, true);

            {
                let mut stats = self.stats.lock().unwrap();
                stats.total_volume += fill_size;
                stats.maker_volume += fill_size;
                if is_adverse {
                    stats.adverse_fills += 1;
                } else {
                    stats.favorable_fills += 1;
                }
            }

            if order.size_matched + fill_size >= order.size {
                self.tracked.lock().unwrap().remove(&tracked.order_id);
                self.stats.lock().unwrap().orders_filled += 1;
            } else {
                let mut tracked_map = self.tracked.lock().unwrap();
                if let Some(t) = tracked_map.get_mut(&tracked.order_id) {
                    t.queue_position = Decimal::ZERO;
                }
                drop(tracked_map);
                self.stats.lock().unwrap().orders_partial += 1;
            }
        }
    }
}

#[async_trait]
impl ExchangeClient for PaperSimulator {
    async fn get_orderbook(&self, asset_id: &str) -> Result<OrderBook, EngineError> {
        self.exchange.get_orderbook(asset_id).await
    }

    async fn get_price(&self, asset_id: &str, side: Side) -> Result<Decimal, EngineError> {
        self.exchange.get_price(asset_id, side).await
    }

    async fn place_order(&self, req: OrderRequest) -> Result<Order, EngineError> {
        self.sleep_latency().await;

        let book = self.exchange.get_orderbook(&req.asset_id).await.unwrap_or_else(|_| OrderBook::new(&req.asset_id));
        let queue_depth = queue_depth_at_price(&book, req.price, req.side);
        let crosses = match req.side {
            Side::Buy => book.best_ask().map(|a| req.price >= a).unwrap_or(false),
            Side::Sell => book.best_bid().map(|b| req.price <= b).unwrap_or(false),
        };

        let order = self.exchange.place_order(req).await?;
        self.stats.lock().unwrap().orders_placed += 1;

        let remaining = if crosses { self.execute_crossing(&order, &book).await } else { order.size };

        if remaining > Decimal::ZERO {
            self.tracked.lock().unwrap().insert(
                order.order_id.clone(),
                TrackedOrder {
                    order_id: order.order_id.clone(),
                    asset_id: order.asset_id.clone(),
                    side: order.side,
                    price: order.price,
                    created_at: order.created_at,
                    queue_position: if crosses { Decimal::ZERO } else { queue_depth },
                    initial_queue_depth: if crosses { Decimal::ONE } else { queue_depth.max(Decimal::ONE) },
                },
            );
        }

        Ok(order)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool, EngineError> {
        self.sleep_latency().await;
        let cancelled = self.exchange.cancel_order(order_id).await?;
        if cancelled {
            self.tracked.lock().unwrap().remove(order_id);
            self.stats.lock().unwrap().orders_cancelled += 1;
        }
        Ok(cancelled)
    }

    async fn cancel_all_orders(&self, asset_id: Option<&str>) -> Result<u32, EngineError> {
        self.sleep_latency().await;
        let count = self.exchange.cancel_all_orders(asset_id).await?;
        self.tracked.lock().unwrap().retain(|_, t| asset_id.map(|a| a != t.asset_id).unwrap_or(false));
        self.stats.lock().unwrap().orders_cancelled += count as u64;
        Ok(count)
    }

    async fn get_orders(&self, asset_id: Option<&str>, status: OrderStatus) -> Result<Vec<Order>, EngineError> {
        self.exchange.get_orders(asset_id, status).await
    }

    async fn get_trades(&self, asset_id: Option<&str>, limit: usize) -> Result<Vec<Trade>, EngineError> {
        self.exchange.get_trades(asset_id, limit).await
    }

    async fn get_balance(&self) -> Result<Decimal, EngineError> {
        self.exchange.get_balance().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderType;
    use rust_decimal_macros::dec;

    fn config_no_latency() -> SimulatorConfig {
        SimulatorConfig { enable_latency: false, enable_adverse_selection: true, enable_partial_fills: true }
    }

    #[tokio::test]
    async fn crossing_buy_fills_immediately_with_slippage_tracked() {
        let sim = PaperSimulator::new(dec!(1000), config_no_latency());
        let mut book = OrderBook::new("A");
        book.apply_snapshot(
            vec![Level { price: dec!(0.48), size: dec!(100) }],
            vec![Level { price: dec!(0.50), size: dec!(10) }, Level { price: dec!(0.51), size: dec!(50) }],
            Utc::now(),
        );
        sim.ingest_book("A", &book);

        let order = sim
            .place_order(OrderRequest { asset_id: "A".into(), side: Side::Buy, price: dec!(0.51), size: dec!(20), order_type: OrderType::Gtc })
            .await
            .unwrap();

        let filled = sim.exchange.get_orders(Some("A"), OrderStatus::Matched).await.unwrap();
        assert_eq!(filled.len(), 1);
        assert_eq!(filled[0].order_id, order.order_id);
        assert_eq!(filled[0].size_matched, dec!(20));

        let stats = sim.stats();
        assert_eq!(stats.orders_filled, 1);
        assert_eq!(stats.taker_volume, dec!(20));
    }

    #[tokio::test]
    async fn resting_order_tracks_queue_depth_ahead() {
        let sim = PaperSimulator::new(dec!(1000), config_no_latency());
        let mut book = OrderBook::new("A");
        book.apply_snapshot(
            vec![Level { price: dec!(0.48), size: dec!(100) }, Level { price: dec!(0.47), size: dec!(40) }],
            vec![Level { price: dec!(0.52), size: dec!(10) }],
            Utc::now(),
        );
        sim.ingest_book("A", &book);

        let order = sim
            .place_order(OrderRequest { asset_id: "A".into(), side: Side::Buy, price: dec!(0.48), size: dec!(20), order_type: OrderType::Gtc })
            .await
            .unwrap();

        let tracked = sim.tracked.lock().unwrap();
        let t = tracked.get(&order.order_id).expect("order should be tracked as resting");
        assert_eq!(t.initial_queue_depth, dec!(100));
        assert_eq!(t.queue_position, dec!(100));
    }

    #[tokio::test]
    async fn adverse_price_move_multiplies_fill_probability() {
        let sim = PaperSimulator::new(dec!(1000), config_no_latency());
        let mut book = OrderBook::new("A");
        book.apply_snapshot(vec![Level { price: dec!(0.50), size: dec!(10) }], vec![Level { price: dec!(0.52), size: dec!(10) }], Utc::now());
        sim.ingest_book("A", &book);

        let tracked = TrackedOrder {
            order_id: "x".into(),
            asset_id: "A".into(),
            side: Side::Buy,
            price: dec!(0.50),
            created_at: Utc::now() - chrono::Duration::seconds(10),
            queue_position: Decimal::ZERO,
            initial_queue_depth: Decimal::ONE,
        };

        {
            let mut markets = sim.markets.lock().unwrap();
            let market = markets.entry("A".to_string()).or_default();
            market.price_history.push_back((tracked.created_at, dec!(0.50)));
            market.price_history.push_back((Utc::now(), dec!(0.45)));
        }

        let market = sim.markets.lock().unwrap().get("A").cloned().unwrap();
        let (prob_adverse, adverse) = sim.calculate_fill_probability(&tracked, &market);

        let favorable_tracked = tracked.clone();
        let mut favorable_market = market.clone();
        favorable_market.price_history.clear();
        favorable_market.price_history.push_back((tracked.created_at, dec!(0.50)));
        favorable_market.price_history.push_back((Utc::now(), dec!(0.55)));
        let (prob_favorable, favorable) = sim.calculate_fill_probability(&favorable_tracked, &favorable_market);

        assert!(adverse);
        assert!(!favorable);
        assert!(prob_adverse > prob_favorable);
    }

    #[tokio::test]
    async fn cancel_removes_tracked_resting_order() {
        let sim = PaperSimulator::new(dec!(1000), config_no_latency());
        let mut book = OrderBook::new("A");
        book.apply_snapshot(vec![Level { price: dec!(0.40), size: dec!(10) }], vec![Level { price: dec!(0.60), size: dec!(10) }], Utc::now());
        sim.ingest_book("A", &book);

        let order = sim
            .place_order(OrderRequest { asset_id: "A".into(), side: Side::Buy, price: dec!(0.45), size: dec!(5), order_type: OrderType::Gtc })
            .await
            .unwrap();

        assert!(sim.tracked.lock().unwrap().contains_key(&order.order_id));
        assert!(sim.cancel_order(&order.order_id).await.unwrap());
        assert!(!sim.tracked.lock().unwrap().contains_key(&order.order_id));
    }
}
