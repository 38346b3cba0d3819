// Market Data Feed: subscribes to Polymarket's market channel (book snapshots,
// price changes, last-trade prints) over WebSocket, with a REST-polling
// fallback for environments where the socket isn't available. Reconnection
// backoff and the stall-panic flag are kept from the upstream ingestor's
// WS loop; the wire format is Polymarket's, not Hyperliquid's l2Book.
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use url::Url;

use crate::config::FeedConfig;
use crate::exchange::ExchangeClient;
use crate::types::{Level, OrderBook, Side, Trade};

const WS_MARKET_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

#[derive(Debug, Clone)]
pub enum FeedEvent {
    Book(OrderBook),
    PriceChange { asset_id: String, side: Side, price: Decimal, size: Decimal },
    LastTrade { asset_id: String, side: Side, price: Decimal, size: Decimal },
    UserFill(Trade),
}

#[derive(Debug, Deserialize)]
struct WireLevel {
    price: String,
    size: String,
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    event_type: Option<String>,
    asset_id: Option<String>,
    #[serde(default)]
    bids: Vec<WireLevel>,
    #[serde(default)]
    asks: Vec<WireLevel>,
    side: Option<String>,
    price: Option<String>,
    size: Option<String>,
}

fn parse_side(raw: &str) -> Side {
    if raw.eq_ignore_ascii_case("BUY") {
        Side::Buy
    } else {
        Side::Sell
    }
}

fn parse_levels(raw: &[WireLevel]) -> Vec<Level> {
    raw.iter().filter_map(|l| Some(Level { price: l.price.parse().ok()?, size: l.size.parse().ok()? })).collect()
}

/// Atomically shared flag: set when the feed hasn't produced a message in
/// longer than the configured stall timeout. The control loop watches this
/// and cancels resting orders rather than quoting off a stale book.
pub type StallFlag = Arc<AtomicBool>;

pub fn new_stall_flag() -> StallFlag {
    Arc::new(AtomicBool::new(false))
}

struct LastMessageClock(AtomicU64);

impl LastMessageClock {
    fn new() -> Self {
        Self(AtomicU64::new(now_ms()))
    }
    fn touch(&self) {
        self.0.store(now_ms(), Ordering::SeqCst);
    }
    fn idle_ms(&self) -> u64 {
        now_ms().saturating_sub(self.0.load(Ordering::SeqCst))
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn apply_event(event: WireEvent) -> Option<FeedEvent> {
    let asset_id = event.asset_id.clone().unwrap_or_default();
    match event.event_type.as_deref() {
        Some("book") => {
            let mut book = OrderBook::new(&asset_id);
            book.apply_snapshot(parse_levels(&event.bids), parse_levels(&event.asks), Utc::now());
            Some(FeedEvent::Book(book))
        }
        Some("price_change") => {
            let side = parse_side(event.side.as_deref().unwrap_or("BUY"));
            let price: Decimal = event.price.as_deref()?.parse().ok()?;
            let size: Decimal = event.size.as_deref()?.parse().ok()?;
            Some(FeedEvent::PriceChange { asset_id, side, price, size })
        }
        Some("last_trade_price") => {
            let side = parse_side(event.side.as_deref().unwrap_or("BUY"));
            let price: Decimal = event.price.as_deref()?.parse().ok()?;
            let size: Decimal = event.size.as_deref()?.parse().ok()?;
            Some(FeedEvent::LastTrade { asset_id, side, price, size })
        }
        _ => None,
    }
}

/// Runs the WebSocket market-channel feed with exponential backoff
/// reconnection, forwarding parsed events on `tx`. Returns once `stall`
/// reconnection attempts are exhausted.
pub async fn run_ws_feed(
    asset_ids: Vec<String>,
    config: FeedConfig,
    tx: mpsc::Sender<FeedEvent>,
    stall: StallFlag,
) -> Result<(), crate::error::EngineError> {
    let clock = Arc::new(LastMessageClock::new());

    let stall_clock = clock.clone();
    let stall_flag = stall.clone();
    let stall_timeout_ms = config.stall_timeout_secs * 1_000;
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            let idle = stall_clock.idle_ms();
            let now_stalled = idle > stall_timeout_ms;
            if now_stalled && !stall_flag.load(Ordering::SeqCst) {
                error!("feed stalled: no message for {idle}ms");
                stall_flag.store(true, Ordering::SeqCst);
            } else if !now_stalled && stall_flag.load(Ordering::SeqCst) {
                info!("feed recovered");
                stall_flag.store(false, Ordering::SeqCst);
            }
        }
    });

    let mut retry_delay_secs = config.reconnect_initial_delay_secs;
    let mut attempt = 0u32;

    loop {
        info!("connecting to market feed: {WS_MARKET_URL}");
        match connect_async(Url::parse(WS_MARKET_URL).map_err(|e| crate::error::EngineError::Venue(e.to_string()))?).await
        {
            Ok((ws_stream, _)) => {
                info!("market feed connected, subscribing to {} assets", asset_ids.len());
                retry_delay_secs = config.reconnect_initial_delay_secs;
                attempt = 0;
                stall.store(false, Ordering::SeqCst);
                clock.touch();

                let (mut write, mut read) = ws_stream.split();
                let sub = serde_json::json!({ "assets_ids": asset_ids, "type": "market" });
                if let Err(e) = write.send(Message::Text(sub.to_string())).await {
                    error!("failed to send subscription: {e}");
                }

                while let Some(msg) = read.next().await {
                    clock.touch();
                    match msg {
                        Ok(Message::Text(text)) => {
                            let parsed: Result<Vec<WireEvent>, _> = serde_json::from_str(&text);
                            let events = match parsed {
                                Ok(events) => events,
                                Err(_) => match serde_json::from_str::<WireEvent>(&text) {
                                    Ok(event) => vec![event],
                                    Err(e) => {
                                        debug!("unparseable feed message: {e}");
                                        continue;
                                    }
                                },
                            };
                            for event in events {
                                if let Some(feed_event) = apply_event(event) {
                                    if tx.send(feed_event).await.is_err() {
                                        return Ok(());
                                    }
                                }
                            }
                        }
                        Ok(Message::Ping(data)) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Ok(Message::Close(_)) => {
                            warn!("market feed closed by server, reconnecting");
                            break;
                        }
                        Err(e) => {
                            error!("market feed error: {e}, reconnecting");
                            break;
                        }
                        _ => {}
                    }
                }
            }
            Err(e) => {
                error!("failed to connect to market feed: {e}");
            }
        }

        attempt += 1;
        if attempt >= config.reconnect_max_attempts {
            return Err(crate::error::EngineError::FeedExhausted { attempts: attempt });
        }
        tokio::time::sleep(tokio::time::Duration::from_secs(retry_delay_secs)).await;
        retry_delay_secs = (retry_delay_secs * 2).min(config.reconnect_max_delay_secs);
    }
}

/// Polls REST order books on a fixed interval instead of opening a socket —
/// the fallback path when push mode is disabled.
pub async fn run_poll_feed(
    exchange: Arc<dyn ExchangeClient>,
    asset_ids: Vec<String>,
    interval_secs: u64,
    tx: mpsc::Sender<FeedEvent>,
) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        for asset_id in &asset_ids {
            match exchange.get_orderbook(asset_id).await {
                Ok(book) => {
                    if tx.send(FeedEvent::Book(book)).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!("poll feed: failed to fetch book for {asset_id}: {e}"),
            }
        }
    }
}

/// Applies incoming feed events to a shared book cache, returning the set of
/// asset ids touched this call so callers can decide what to re-quote.
pub fn apply_to_cache(cache: &Mutex<HashMap<String, OrderBook>>, event: &FeedEvent) -> Option<String> {
    let mut books = cache.lock().unwrap();
    match event {
        FeedEvent::Book(book) => {
            books.insert(book.asset_id.clone(), book.clone());
            Some(book.asset_id.clone())
        }
        FeedEvent::PriceChange { asset_id, side, price, size } => {
            let book = books.entry(asset_id.clone()).or_insert_with(|| OrderBook::new(asset_id));
            book.apply_delta(*side, *price, *size, Utc::now());
            Some(asset_id.clone())
        }
        FeedEvent::LastTrade { .. } | FeedEvent::UserFill(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn book_event_parses_into_snapshot() {
        let event = WireEvent {
            event_type: Some("book".into()),
            asset_id: Some("A".into()),
            bids: vec![WireLevel { price: "0.49".into(), size: "100".into() }],
            asks: vec![WireLevel { price: "0.51".into(), size: "100".into() }],
            side: None,
            price: None,
            size: None,
        };
        let parsed = apply_event(event).unwrap();
        match parsed {
            FeedEvent::Book(book) => {
                assert_eq!(book.best_bid(), Some("0.49".parse().unwrap()));
                assert_eq!(book.best_ask(), Some("0.51".parse().unwrap()));
            }
            _ => panic!("expected book event"),
        }
    }

    #[test]
    fn price_change_event_parses_side_and_price() {
        let event = WireEvent {
            event_type: Some("price_change".into()),
            asset_id: Some("A".into()),
            bids: vec![],
            asks: vec![],
            side: Some("SELL".into()),
            price: Some("0.55".into()),
            size: Some("10".into()),
        };
        let parsed = apply_event(event).unwrap();
        match parsed {
            FeedEvent::PriceChange { side, price, .. } => {
                assert_eq!(side, Side::Sell);
                assert_eq!(price, "0.55".parse().unwrap());
            }
            _ => panic!("expected price change event"),
        }
    }

    #[test]
    fn unknown_event_type_is_ignored() {
        let event = WireEvent {
            event_type: Some("tick_size_change".into()),
            asset_id: Some("A".into()),
            bids: vec![],
            asks: vec![],
            side: None,
            price: None,
            size: None,
        };
        assert!(apply_event(event).is_none());
    }

    #[test]
    fn apply_to_cache_inserts_full_snapshot() {
        let cache = Mutex::new(HashMap::new());
        let mut book = OrderBook::new("A");
        book.apply_snapshot(vec![Level { price: "0.4".parse().unwrap(), size: "1".parse().unwrap() }], vec![], Utc::now());
        let touched = apply_to_cache(&cache, &FeedEvent::Book(book));
        assert_eq!(touched, Some("A".to_string()));
        assert!(cache.lock().unwrap().contains_key("A"));
    }
}
