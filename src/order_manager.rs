// Order Manager: reconciles desired quotes against live orders.
//
// Grounded directly on the upstream OrderManager's update_quotes/_update_side
// algorithm: build the desired (price, size) multiset, keep orders that
// already match it, cancel the rest, then place whatever's left over.
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

use crate::exchange::{ExchangeClient, OrderRequest};
use crate::ledger::InventoryLedger;
use crate::types::{ManagedOrder, Order, OrderStatus, OrderType, Quote, QuoteSet, Side};

#[derive(Default)]
struct SideBook {
    buy: Vec<ManagedOrder>,
    sell: Vec<ManagedOrder>,
}

impl SideBook {
    fn side(&self, side: Side) -> &Vec<ManagedOrder> {
        match side {
            Side::Buy => &self.buy,
            Side::Sell => &self.sell,
        }
    }
    fn side_mut(&mut self, side: Side) -> &mut Vec<ManagedOrder> {
        match side {
            Side::Buy => &mut self.buy,
            Side::Sell => &mut self.sell,
        }
    }
}

pub struct OrderManager {
    order_timeout: chrono::Duration,
    orders: HashMap<String, SideBook>,
    pending_cancels: HashSet<String>,
}

impl OrderManager {
    pub fn new(order_timeout_secs: u64) -> Self {
        Self {
            order_timeout: chrono::Duration::seconds(order_timeout_secs as i64),
            orders: HashMap::new(),
            pending_cancels: HashSet::new(),
        }
    }

    fn book_for(&mut self, asset_id: &str) -> &mut SideBook {
        self.orders.entry(asset_id.to_string()).or_default()
    }

    /// Reconciles one asset's whole quote set (both sides) against live orders.
    /// Returns the number of new orders placed.
    pub async fn update_quotes(
        &mut self,
        exchange: &dyn ExchangeClient,
        asset_id: &str,
        quote_set: &QuoteSet,
    ) -> u32 {
        let mut placed = 0;
        placed += self.update_side(exchange, asset_id, Side::Buy, &quote_set.bids).await;
        placed += self.update_side(exchange, asset_id, Side::Sell, &quote_set.asks).await;
        placed
    }

    async fn update_side(
        &mut self,
        exchange: &dyn ExchangeClient,
        asset_id: &str,
        side: Side,
        new_quotes: &[Quote],
    ) -> u32 {
        let mut desired: Vec<(Decimal, Decimal)> = new_quotes.iter().map(|q| (q.price, q.size)).collect();

        let current: Vec<ManagedOrder> = self.book_for(asset_id).side(side).clone();
        let mut to_keep = Vec::new();
        let mut to_cancel = Vec::new();

        for managed in current {
            if managed.order.status != OrderStatus::Live {
                continue;
            }
            let key = (managed.order.price, managed.order.size);
            if let Some(pos) = desired.iter().position(|k| *k == key) {
                desired.remove(pos);
                to_keep.push(managed);
            } else {
                to_cancel.push(managed);
            }
        }

        for managed in &to_cancel {
            self.cancel_order(exchange, managed).await;
        }

        let mut placed = 0;
        for quote in new_quotes {
            let key = (quote.price, quote.size);
            if !desired.contains(&key) {
                continue;
            }
            if let Ok(order) = exchange
                .place_order(OrderRequest {
                    asset_id: asset_id.to_string(),
                    side: quote.side,
                    price: quote.price,
                    size: quote.size,
                    order_type: OrderType::Gtc,
                })
                .await
            {
                to_keep.push(ManagedOrder {
                    order,
                    originating_quote: *quote,
                    placed_at: Utc::now(),
                    asset_id: asset_id.to_string(),
                    is_stale: false,
                });
                placed += 1;
                // Only consume one `desired` slot per placed order; remove a
                // single matching entry so duplicate (price,size) quotes at
                // different levels don't double-place.
                if let Some(pos) = desired.iter().position(|k| *k == key) {
                    desired.remove(pos);
                }
            }
        }

        *self.book_for(asset_id).side_mut(side) = to_keep;
        placed
    }

    async fn cancel_order(&mut self, exchange: &dyn ExchangeClient, managed: &ManagedOrder) {
        if self.pending_cancels.contains(&managed.order.order_id) {
            return;
        }
        self.pending_cancels.insert(managed.order.order_id.clone());

        match exchange.cancel_order(&managed.order.order_id).await {
            Ok(true) => log::debug!("cancelled order {}", managed.order.order_id),
            Ok(false) => log::warn!("failed to cancel order {}", managed.order.order_id),
            Err(e) => log::error!("error cancelling order {}: {e}", managed.order.order_id),
        }
        self.pending_cancels.remove(&managed.order.order_id);
    }

    pub async fn cancel_all_orders(&mut self, exchange: &dyn ExchangeClient, asset_id: Option<&str>) {
        let asset_ids: Vec<String> = match asset_id {
            Some(a) => vec![a.to_string()],
            None => self.orders.keys().cloned().collect(),
        };

        for aid in &asset_ids {
            let book = self.book_for(aid);
            let live: Vec<ManagedOrder> =
                book.buy.iter().chain(book.sell.iter()).filter(|m| m.order.status == OrderStatus::Live).cloned().collect();
            for managed in &live {
                self.cancel_order(exchange, managed).await;
            }
            self.orders.insert(aid.clone(), SideBook::default());
        }

        let _ = exchange.cancel_all_orders(asset_id).await;
    }

    /// Cancels orders that have been resting longer than `order_timeout`.
    pub async fn cancel_stale_orders(&mut self, exchange: &dyn ExchangeClient) -> u32 {
        let mut cancelled = 0;
        let now = Utc::now();
        let asset_ids: Vec<String> = self.orders.keys().cloned().collect();

        for aid in asset_ids {
            let order_timeout = self.order_timeout;
            let live: Vec<ManagedOrder> = {
                let book = self.book_for(&aid);
                book.buy
                    .iter()
                    .chain(book.sell.iter())
                    .filter(|m| m.order.status == OrderStatus::Live && now - m.placed_at > order_timeout)
                    .cloned()
                    .collect()
            };
            for managed in &live {
                self.cancel_order(exchange, managed).await;
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn live_orders(&self, asset_id: Option<&str>) -> Vec<&ManagedOrder> {
        let mut result = Vec::new();
        let asset_ids: Vec<&String> = match asset_id {
            Some(a) => self.orders.keys().filter(|k| k.as_str() == a).collect(),
            None => self.orders.keys().collect(),
        };
        for aid in asset_ids {
            if let Some(book) = self.orders.get(aid) {
                result.extend(book.buy.iter().chain(book.sell.iter()).filter(|m| m.order.status == OrderStatus::Live));
            }
        }
        result
    }

    pub fn order_count(&self, asset_id: &str) -> (usize, usize) {
        match self.orders.get(asset_id) {
            Some(book) => (
                book.buy.iter().filter(|m| m.order.status == OrderStatus::Live).count(),
                book.sell.iter().filter(|m| m.order.status == OrderStatus::Live).count(),
            ),
            None => (0, 0),
        }
    }

    /// Marks locally-live orders `Unknown` if the exchange no longer reports
    /// them live — they were filled or cancelled out from under us.
    pub async fn sync_with_exchange(&mut self, exchange: &dyn ExchangeClient, asset_id: &str) {
        let live_orders = match exchange.get_orders(Some(asset_id), OrderStatus::Live).await {
            Ok(orders) => orders,
            Err(e) => {
                log::error!("error syncing orders for {asset_id}: {e}");
                return;
            }
        };
        let exchange_ids: HashSet<String> = live_orders.iter().map(|o: &Order| o.order_id.clone()).collect();

        let book = self.book_for(asset_id);
        for side in [Side::Buy, Side::Sell] {
            for managed in book.side_mut(side).iter_mut() {
                if !exchange_ids.contains(&managed.order.order_id) && managed.order.status == OrderStatus::Live {
                    log::info!("order {} no longer live on exchange", managed.order.order_id);
                    managed.order.status = OrderStatus::Unknown;
                }
            }
        }
    }

    pub fn placed_at(&self, order_id: &str) -> Option<DateTime<Utc>> {
        self.orders.values().flat_map(|b| b.buy.iter().chain(b.sell.iter())).find(|m| m.order.order_id == order_id).map(|m| m.placed_at)
    }

    /// Cancels every live order, then closes every open position at the
    /// book's best opposing price. Halting the gate afterward is the
    /// caller's responsibility — this only does the cancel-then-close leg.
    pub async fn emergency_cashout(&mut self, exchange: &dyn ExchangeClient, ledger: &InventoryLedger) -> Vec<CashoutLeg> {
        self.cancel_all_orders(exchange, None).await;

        let mut legs = Vec::new();
        for position in ledger.positions() {
            let side = if position.quantity > 0 { Side::Sell } else { Side::Buy };
            let size = Decimal::from(position.quantity.unsigned_abs());

            let price = match exchange.get_price(&position.asset_id, side).await {
                Ok(p) => p,
                Err(e) => {
                    legs.push(CashoutLeg { asset_id: position.asset_id.clone(), side, size, result: Err(e.to_string()) });
                    continue;
                }
            };

            let result = exchange
                .place_order(OrderRequest { asset_id: position.asset_id.clone(), side, price, size, order_type: OrderType::Fak })
                .await
                .map_err(|e| e.to_string());
            legs.push(CashoutLeg { asset_id: position.asset_id.clone(), side, size, result });
        }
        legs
    }
}

/// One closing order's outcome during an emergency cashout.
#[derive(Debug, Clone)]
pub struct CashoutLeg {
    pub asset_id: String,
    pub side: Side,
    pub size: Decimal,
    pub result: Result<Order, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::SimExchange;
    use rust_decimal_macros::dec;

    fn quote_set(asset_id: &str, bid_price: Decimal, ask_price: Decimal) -> QuoteSet {
        QuoteSet {
            asset_id: asset_id.to_string(),
            bids: vec![Quote { price: bid_price, size: dec!(20), side: Side::Buy }],
            asks: vec![Quote { price: ask_price, size: dec!(20), side: Side::Sell }],
            fair_value: (bid_price + ask_price) / dec!(2),
            spread: ask_price - bid_price,
            provenance: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn fresh_quote_set_places_both_sides() {
        let exchange = SimExchange::new(dec!(1000));
        let mut mgr = OrderManager::new(300);
        let qs = quote_set("A", dec!(0.49), dec!(0.51));
        let placed = mgr.update_quotes(&exchange, "A", &qs).await;
        assert_eq!(placed, 2);
        assert_eq!(mgr.order_count("A"), (1, 1));
    }

    #[tokio::test]
    async fn unchanged_quotes_do_not_recycle_orders() {
        let exchange = SimExchange::new(dec!(1000));
        let mut mgr = OrderManager::new(300);
        let qs = quote_set("A", dec!(0.49), dec!(0.51));
        mgr.update_quotes(&exchange, "A", &qs).await;
        let placed_again = mgr.update_quotes(&exchange, "A", &qs).await;
        assert_eq!(placed_again, 0);
        assert_eq!(mgr.order_count("A"), (1, 1));
    }

    #[tokio::test]
    async fn moved_quote_cancels_old_and_places_new() {
        let exchange = SimExchange::new(dec!(1000));
        let mut mgr = OrderManager::new(300);
        let qs1 = quote_set("A", dec!(0.49), dec!(0.51));
        mgr.update_quotes(&exchange, "A", &qs1).await;
        let qs2 = quote_set("A", dec!(0.48), dec!(0.52));
        let placed = mgr.update_quotes(&exchange, "A", &qs2).await;
        assert_eq!(placed, 2);
        assert_eq!(mgr.order_count("A"), (1, 1));
    }

    #[tokio::test]
    async fn emergency_cashout_cancels_then_closes_positions() {
        use crate::types::Level;

        let exchange = SimExchange::new(dec!(1000));
        exchange.set_book("A", vec![Level { price: dec!(0.49), size: dec!(100) }], vec![Level { price: dec!(0.51), size: dec!(100) }]);
        exchange.set_book("B", vec![Level { price: dec!(0.39), size: dec!(100) }], vec![Level { price: dec!(0.41), size: dec!(100) }]);

        let mut mgr = OrderManager::new(300);
        let qs = quote_set("A", dec!(0.49), dec!(0.51));
        mgr.update_quotes(&exchange, "A", &qs).await;

        let mut ledger = InventoryLedger::new();
        ledger.apply_fill(&crate::types::Trade {
            trade_id: "t1".into(),
            asset_id: "A".into(),
            side: Side::Buy,
            price: dec!(0.49),
            size: dec!(10),
            fee: Decimal::ZERO,
            timestamp: Utc::now(),
            order_id: "o1".into(),
        });
        ledger.apply_fill(&crate::types::Trade {
            trade_id: "t2".into(),
            asset_id: "B".into(),
            side: Side::Sell,
            price: dec!(0.41),
            size: dec!(5),
            fee: Decimal::ZERO,
            timestamp: Utc::now(),
            order_id: "o2".into(),
        });

        let legs = mgr.emergency_cashout(&exchange, &ledger).await;

        assert_eq!(mgr.order_count("A"), (0, 0));
        assert_eq!(legs.len(), 2);
        assert!(legs.iter().all(|l| l.result.is_ok()));

        let a_leg = legs.iter().find(|l| l.asset_id == "A").unwrap();
        assert_eq!(a_leg.side, Side::Sell);
        assert_eq!(a_leg.size, dec!(10));

        let b_leg = legs.iter().find(|l| l.asset_id == "B").unwrap();
        assert_eq!(b_leg.side, Side::Buy);
        assert_eq!(b_leg.size, dec!(5));
    }
}
