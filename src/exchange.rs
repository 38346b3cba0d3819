// Venue client: Polymarket CLOB REST surface behind an ExchangeClient trait,
// with a SimExchange (paper trading) and LiveExchange (signed REST) split
// grounded on the upstream ExchangeClient/SimExchange/LiveExchange design —
// same drop-in-equivalent boundary at the fill-callback, signed headers
// and short result-caching idiom carried over, Hyperliquid payloads swapped
// for Polymarket's.
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::VenueConfig;
use crate::error::EngineError;
use crate::signing::sign_l2_request;
use crate::types::{Level, Order, OrderBook, OrderStatus, OrderType, Side, Trade};

const CACHE_DURATION: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub asset_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub order_type: OrderType,
}

#[derive(Debug)]
pub enum OrderError {
    InsufficientFunds,
    InvalidOrder(String),
    NetworkError(String),
    RateLimited,
}

impl fmt::Display for OrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderError::InsufficientFunds => write!(f, "insufficient funds"),
            OrderError::InvalidOrder(s) => write!(f, "invalid order: {s}"),
            OrderError::NetworkError(s) => write!(f, "network error: {s}"),
            OrderError::RateLimited => write!(f, "rate limited"),
        }
    }
}

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_orderbook(&self, asset_id: &str) -> Result<OrderBook, EngineError>;
    async fn get_price(&self, asset_id: &str, side: Side) -> Result<Decimal, EngineError>;
    async fn place_order(&self, req: OrderRequest) -> Result<Order, EngineError>;
    async fn cancel_order(&self, order_id: &str) -> Result<bool, EngineError>;
    async fn cancel_all_orders(&self, asset_id: Option<&str>) -> Result<u32, EngineError>;
    async fn get_orders(&self, asset_id: Option<&str>, status: OrderStatus) -> Result<Vec<Order>, EngineError>;
    async fn get_trades(&self, asset_id: Option<&str>, limit: usize) -> Result<Vec<Trade>, EngineError>;
    async fn get_balance(&self) -> Result<Decimal, EngineError>;
}

// ─── Paper-trading venue (delegates the fill model to the simulator) ──────

/// Minimal order book + balance bookkeeping for paper trading. The realistic
/// queue/latency fill model lives in `simulator.rs`; this struct is just the
/// venue-facing surface `OrderManager` talks to.
pub struct SimExchange {
    books: Mutex<HashMap<String, OrderBook>>,
    orders: Mutex<HashMap<String, Order>>,
    trades: Mutex<Vec<Trade>>,
    balance: Mutex<Decimal>,
    maker_fee: Decimal,
    taker_fee: Decimal,
}

impl SimExchange {
    pub fn new(starting_balance: Decimal) -> Self {
        Self {
            books: Mutex::new(HashMap::new()),
            orders: Mutex::new(HashMap::new()),
            trades: Mutex::new(Vec::new()),
            balance: Mutex::new(starting_balance),
            maker_fee: Decimal::ZERO,
            taker_fee: Decimal::ZERO,
        }
    }

    pub fn set_book(&self, asset_id: &str, bids: Vec<Level>, asks: Vec<Level>) {
        let mut books = self.books.lock().unwrap();
        let book = books.entry(asset_id.to_string()).or_insert_with(|| OrderBook::new(asset_id));
        book.apply_snapshot(bids, asks, Utc::now());
    }

    /// Fills an order immediately at `price` (used by the simulator once it
    /// decides a resting or crossing order should trade).
    pub fn record_fill(&self, order_id: &str, price: Decimal, size: Decimal, is_maker: bool) -> Option<Trade> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders.get_mut(order_id)?;
        order.size_matched += size;
        order.status = if order.is_fully_matched() { OrderStatus::Matched } else { OrderStatus::Partial };

        let fee_rate = if is_maker { self.maker_fee } else { self.taker_fee };
        let fee = price * size * fee_rate;
        let mut balance = self.balance.lock().unwrap();
        match order.side {
            Side::Buy => *balance -= price * size + fee,
            Side::Sell => *balance += price * size - fee,
        }

        let trade = Trade {
            trade_id: format!("paper_{}", Uuid::new_v4().simple()),
            asset_id: order.asset_id.clone(),
            side: order.side,
            price,
            size,
            fee,
            timestamp: Utc::now(),
            order_id: order.order_id.clone(),
        };
        self.trades.lock().unwrap().push(trade.clone());
        Some(trade)
    }
}

#[async_trait]
impl ExchangeClient for SimExchange {
    async fn get_orderbook(&self, asset_id: &str) -> Result<OrderBook, EngineError> {
        self.books
            .lock()
            .unwrap()
            .get(asset_id)
            .cloned()
            .ok_or_else(|| EngineError::Venue(format!("no cached book for {asset_id}")))
    }

    async fn get_price(&self, asset_id: &str, side: Side) -> Result<Decimal, EngineError> {
        let books = self.books.lock().unwrap();
        let book = books.get(asset_id).ok_or_else(|| EngineError::Venue(format!("no cached book for {asset_id}")))?;
        match side {
            Side::Buy => book.best_bid(),
            Side::Sell => book.best_ask(),
        }
        .ok_or_else(|| EngineError::Venue("book side empty".to_string()))
    }

    async fn place_order(&self, req: OrderRequest) -> Result<Order, EngineError> {
        let order = Order {
            order_id: format!("paper_{}", Uuid::new_v4().simple()),
            asset_id: req.asset_id,
            side: req.side,
            price: req.price,
            size: req.size,
            size_matched: Decimal::ZERO,
            status: OrderStatus::Live,
            created_at: Utc::now(),
            order_type: req.order_type,
        };
        self.orders.lock().unwrap().insert(order.order_id.clone(), order.clone());
        Ok(order)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool, EngineError> {
        let mut orders = self.orders.lock().unwrap();
        if let Some(order) = orders.get_mut(order_id) {
            if matches!(order.status, OrderStatus::Live | OrderStatus::Partial) {
                order.status = OrderStatus::Cancelled;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn cancel_all_orders(&self, asset_id: Option<&str>) -> Result<u32, EngineError> {
        let mut orders = self.orders.lock().unwrap();
        let mut count = 0;
        for order in orders.values_mut() {
            if matches!(order.status, OrderStatus::Live | OrderStatus::Partial)
                && asset_id.map(|a| a == order.asset_id).unwrap_or(true)
            {
                order.status = OrderStatus::Cancelled;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn get_orders(&self, asset_id: Option<&str>, status: OrderStatus) -> Result<Vec<Order>, EngineError> {
        let orders = self.orders.lock().unwrap();
        Ok(orders
            .values()
            .filter(|o| match status {
                OrderStatus::Live => matches!(o.status, OrderStatus::Live | OrderStatus::Partial),
                other => o.status == other,
            })
            .filter(|o| asset_id.map(|a| a == o.asset_id).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn get_trades(&self, asset_id: Option<&str>, limit: usize) -> Result<Vec<Trade>, EngineError> {
        let trades = self.trades.lock().unwrap();
        Ok(trades
            .iter()
            .rev()
            .filter(|t| asset_id.map(|a| a == t.asset_id).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_balance(&self) -> Result<Decimal, EngineError> {
        Ok(*self.balance.lock().unwrap())
    }
}

// ─── Live venue (signed REST against the CLOB gateway) ────────────────────

struct Cached<T> {
    value: T,
    at: Instant,
}

pub struct LiveExchange {
    base_url: String,
    api_key: String,
    api_secret: Vec<u8>,
    passphrase: String,
    http: reqwest::Client,
    book_cache: Mutex<HashMap<String, Cached<OrderBook>>>,
}

#[derive(Deserialize)]
struct BookLevelWire {
    price: String,
    size: String,
}

#[derive(Deserialize)]
struct BookWire {
    bids: Vec<BookLevelWire>,
    asks: Vec<BookLevelWire>,
}

#[derive(Deserialize)]
struct OrderWire {
    #[serde(rename = "orderID")]
    order_id: String,
}

impl LiveExchange {
    pub fn new(config: &VenueConfig) -> Result<Self, EngineError> {
        let api_key = config.api_key.clone().ok_or_else(|| EngineError::Config("missing POLY_API_KEY".into()))?;
        let api_secret = config.api_secret.clone().ok_or_else(|| EngineError::Config("missing POLY_API_SECRET".into()))?;
        let passphrase = config.passphrase.clone().ok_or_else(|| EngineError::Config("missing POLY_PASSPHRASE".into()))?;
        Ok(Self {
            base_url: config.base_url.clone(),
            api_key,
            api_secret: api_secret.into_bytes(),
            passphrase,
            http: reqwest::Client::new(),
            book_cache: Mutex::new(HashMap::new()),
        })
    }

    fn l2_headers(&self, method: &str, path: &str, body: &str) -> Result<Vec<(&'static str, String)>, EngineError> {
        let ts = Utc::now().timestamp_millis().to_string();
        let headers = sign_l2_request(&self.api_secret, &self.api_key, &self.passphrase, &ts, method, path, body)?;
        Ok(headers.into_header_pairs())
    }
}

#[async_trait]
impl ExchangeClient for LiveExchange {
    async fn get_orderbook(&self, asset_id: &str) -> Result<OrderBook, EngineError> {
        if let Some(cached) = self.book_cache.lock().unwrap().get(asset_id) {
            if cached.at.elapsed() < CACHE_DURATION {
                return Ok(cached.value.clone());
            }
        }

        let resp = self
            .http
            .get(format!("{}/book", self.base_url))
            .query(&[("token_id", asset_id)])
            .send()
            .await
            .map_err(|e| EngineError::Venue(e.to_string()))?;
        let wire: BookWire = resp.json().await.map_err(|e| EngineError::Venue(e.to_string()))?;

        let mut book = OrderBook::new(asset_id);
        let bids = wire
            .bids
            .iter()
            .filter_map(|l| Some(Level { price: l.price.parse().ok()?, size: l.size.parse().ok()? }))
            .collect();
        let asks = wire
            .asks
            .iter()
            .filter_map(|l| Some(Level { price: l.price.parse().ok()?, size: l.size.parse().ok()? }))
            .collect();
        book.apply_snapshot(bids, asks, Utc::now());

        self.book_cache.lock().unwrap().insert(asset_id.to_string(), Cached { value: book.clone(), at: Instant::now() });
        Ok(book)
    }

    async fn get_price(&self, asset_id: &str, side: Side) -> Result<Decimal, EngineError> {
        let side_str = match side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        #[derive(Deserialize)]
        struct PriceWire {
            price: String,
        }
        let resp = self
            .http
            .get(format!("{}/price", self.base_url))
            .query(&[("token_id", asset_id), ("side", side_str)])
            .send()
            .await
            .map_err(|e| EngineError::Venue(e.to_string()))?;
        let wire: PriceWire = resp.json().await.map_err(|e| EngineError::Venue(e.to_string()))?;
        wire.price.parse().map_err(|_| EngineError::Venue("bad price in response".to_string()))
    }

    async fn place_order(&self, req: OrderRequest) -> Result<Order, EngineError> {
        let side_str = match req.side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        let order_type_str = match req.order_type {
            OrderType::Gtc => "GTC",
            OrderType::Fok => "FOK",
            OrderType::Fak => "FAK",
        };
        let body = serde_json::json!({
            "tokenID": req.asset_id,
            "side": side_str,
            "price": req.price.to_string(),
            "size": req.size.to_string(),
            "type": order_type_str,
        })
        .to_string();

        let headers = self.l2_headers("POST", "/order", &body)?;
        let mut builder = self.http.post(format!("{}/order", self.base_url)).body(body);
        for (k, v) in headers {
            builder = builder.header(k, v);
        }
        let resp = builder.send().await.map_err(|e| EngineError::Venue(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(EngineError::OrderRejected(resp.status().to_string()));
        }
        let wire: OrderWire = resp.json().await.map_err(|e| EngineError::Venue(e.to_string()))?;

        Ok(Order {
            order_id: wire.order_id,
            asset_id: req.asset_id,
            side: req.side,
            price: req.price,
            size: req.size,
            size_matched: Decimal::ZERO,
            status: OrderStatus::Live,
            created_at: Utc::now(),
            order_type: req.order_type,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool, EngineError> {
        let body = serde_json::json!({ "orderID": order_id }).to_string();
        let headers = self.l2_headers("DELETE", "/order", &body)?;
        let mut builder = self.http.delete(format!("{}/order", self.base_url)).body(body);
        for (k, v) in headers {
            builder = builder.header(k, v);
        }
        let resp = builder.send().await.map_err(|e| EngineError::Venue(e.to_string()))?;
        Ok(resp.status().is_success())
    }

    async fn cancel_all_orders(&self, asset_id: Option<&str>) -> Result<u32, EngineError> {
        let headers = self.l2_headers("DELETE", "/orders", "")?;
        let mut builder = self.http.delete(format!("{}/orders", self.base_url));
        if let Some(a) = asset_id {
            builder = builder.query(&[("token_id", a)]);
        }
        for (k, v) in headers {
            builder = builder.header(k, v);
        }
        let resp = builder.send().await.map_err(|e| EngineError::Venue(e.to_string()))?;
        #[derive(Deserialize)]
        struct CancelledWire {
            cancelled: u32,
        }
        let wire: CancelledWire = resp.json().await.unwrap_or(CancelledWire { cancelled: 0 });
        Ok(wire.cancelled)
    }

    async fn get_orders(&self, asset_id: Option<&str>, status: OrderStatus) -> Result<Vec<Order>, EngineError> {
        let status_str = match status {
            OrderStatus::Live => "LIVE",
            OrderStatus::Partial => "LIVE",
            OrderStatus::Matched => "MATCHED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Unknown => "LIVE",
        };
        let headers = self.l2_headers("GET", "/orders", "")?;
        let mut builder = self.http.get(format!("{}/orders", self.base_url)).query(&[("state", status_str)]);
        if let Some(a) = asset_id {
            builder = builder.query(&[("asset_id", a)]);
        }
        for (k, v) in headers {
            builder = builder.header(k, v);
        }
        let resp = builder.send().await.map_err(|e| EngineError::Venue(e.to_string()))?;
        #[derive(Deserialize)]
        struct OrderListWire {
            id: String,
            asset_id: String,
            side: String,
            price: String,
            original_size: String,
            size_matched: String,
        }
        let wire: Vec<OrderListWire> = resp.json().await.unwrap_or_default();
        Ok(wire
            .into_iter()
            .filter_map(|o| {
                Some(Order {
                    order_id: o.id,
                    asset_id: o.asset_id,
                    side: if o.side == "BUY" { Side::Buy } else { Side::Sell },
                    price: o.price.parse().ok()?,
                    size: o.original_size.parse().ok()?,
                    size_matched: o.size_matched.parse().ok()?,
                    status: OrderStatus::Live,
                    created_at: Utc::now(),
                    order_type: OrderType::Gtc,
                })
            })
            .collect())
    }

    async fn get_trades(&self, asset_id: Option<&str>, limit: usize) -> Result<Vec<Trade>, EngineError> {
        let headers = self.l2_headers("GET", "/trades", "")?;
        let mut builder = self.http.get(format!("{}/trades", self.base_url)).query(&[("limit", &limit.to_string())]);
        if let Some(a) = asset_id {
            builder = builder.query(&[("asset_id", a)]);
        }
        for (k, v) in headers {
            builder = builder.header(k, v);
        }
        let resp = builder.send().await.map_err(|e| EngineError::Venue(e.to_string()))?;
        #[derive(Deserialize)]
        struct TradeWire {
            id: String,
            asset_id: String,
            side: String,
            price: String,
            size: String,
            fee: String,
            order_id: String,
        }
        let wire: Vec<TradeWire> = resp.json().await.unwrap_or_default();
        Ok(wire
            .into_iter()
            .filter_map(|t| {
                Some(Trade {
                    trade_id: t.id,
                    asset_id: t.asset_id,
                    side: if t.side == "BUY" { Side::Buy } else { Side::Sell },
                    price: t.price.parse().ok()?,
                    size: t.size.parse().ok()?,
                    fee: t.fee.parse().ok()?,
                    timestamp: Utc::now(),
                    order_id: t.order_id,
                })
            })
            .collect())
    }

    async fn get_balance(&self) -> Result<Decimal, EngineError> {
        #[derive(Deserialize)]
        struct BalanceWire {
            balance: String,
        }
        let headers = self.l2_headers("GET", "/balance", "")?;
        let mut builder = self.http.get(format!("{}/balance", self.base_url));
        for (k, v) in headers {
            builder = builder.header(k, v);
        }
        let resp = builder.send().await.map_err(|e| EngineError::Venue(e.to_string()))?;
        let wire: BalanceWire = resp.json().await.map_err(|e| EngineError::Venue(e.to_string()))?;
        wire.balance.parse().map_err(|_| EngineError::Venue("bad balance in response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn sim_place_and_cancel_round_trip() {
        let exchange = SimExchange::new(dec!(1000));
        let order = exchange
            .place_order(OrderRequest { asset_id: "A".into(), side: Side::Buy, price: dec!(0.5), size: dec!(20), order_type: OrderType::Gtc })
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Live);
        assert!(exchange.cancel_order(&order.order_id).await.unwrap());
        assert!(!exchange.cancel_order(&order.order_id).await.unwrap());
    }

    #[tokio::test]
    async fn sim_fill_debits_balance_on_buy() {
        let exchange = SimExchange::new(dec!(1000));
        let order = exchange
            .place_order(OrderRequest { asset_id: "A".into(), side: Side::Buy, price: dec!(0.5), size: dec!(20), order_type: OrderType::Gtc })
            .await
            .unwrap();
        exchange.record_fill(&order.order_id, dec!(0.5), dec!(20), true);
        let balance = exchange.get_balance().await.unwrap();
        assert_eq!(balance, dec!(990));
    }
}
