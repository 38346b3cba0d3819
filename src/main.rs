// polymm: automated market maker for binary-outcome prediction markets.
//
// Wiring: a market data feed (WS push or REST poll) keeps a shared order book
// cache; a quoting loop ticks on a fixed interval, runs each target market's
// book through the quote engine, filters the resulting quotes through the
// risk gate, and reconciles them onto the venue via the order manager. Fills
// flow back into the inventory ledger from the feed's user channel.
mod config;
mod error;
mod exchange;
mod feed;
mod ledger;
mod monitor;
mod order_manager;
mod persistence;
mod quote_engine;
mod risk;
mod signing;
mod simulator;
mod snapshot;
mod types;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use config::EngineConfig;
use error::EngineError;
use exchange::{ExchangeClient, LiveExchange};
use feed::FeedEvent;
use ledger::InventoryLedger;
use monitor::{MonitorConfig, PerformanceMonitor};
use order_manager::OrderManager;
use persistence::EngineState;
use quote_engine::{QuoteEngineConfig, SmartQuoteEngine};
use risk::{RiskConfig as GateConfig, RiskGate};
use simulator::{PaperSimulator, SimulatorConfig};
use snapshot::EngineSnapshot;
use types::{OrderBook, Side, Trade};

#[tokio::main]
async fn main() -> Result<(), EngineError> {
    env_logger::init();
    let config = EngineConfig::load_from_env()?;
    log::info!(
        "polymm starting: paper_trading={} markets={} push_mode={}",
        config.paper_trading,
        config.target_markets.len(),
        config.feed.push_mode
    );

    let paper_sim: Option<Arc<PaperSimulator>> =
        config.paper_trading.then(|| Arc::new(PaperSimulator::new(config.starting_balance, SimulatorConfig::default())));
    let exchange: Arc<dyn ExchangeClient> = match &paper_sim {
        Some(sim) => sim.clone(),
        None => Arc::new(LiveExchange::new(&config.venue)?),
    };

    let saved = persistence::load_state(&config.state_path, config.starting_balance);
    let ledger = Arc::new(Mutex::new(InventoryLedger::new()));
    ledger.lock().unwrap().restore(saved.positions);

    let risk_gate = Arc::new(AsyncMutex::new(RiskGate::new(GateConfig {
        max_position_per_market: config.risk.max_position,
        max_total_exposure: config.risk.max_total_exposure,
        max_inventory_imbalance: config.risk.max_inventory_imbalance,
        daily_loss_limit: config.risk.daily_loss_limit,
    })));
    if let Some(state) = saved.risk_state {
        risk_gate.lock().await.restore_state(state);
    }

    let order_manager = Arc::new(AsyncMutex::new(OrderManager::new(config.strategy.order_timeout_secs)));
    let quote_engines: Arc<Mutex<HashMap<String, SmartQuoteEngine>>> = Arc::new(Mutex::new(HashMap::new()));
    let book_cache: Arc<Mutex<HashMap<String, OrderBook>>> = Arc::new(Mutex::new(HashMap::new()));
    let recent_trades: Arc<Mutex<HashMap<String, Vec<Trade>>>> = Arc::new(Mutex::new(HashMap::new()));
    let perf_monitor = Arc::new(Mutex::new(PerformanceMonitor::new(MonitorConfig::default())));
    let stall = feed::new_stall_flag();
    // Set of asset ids touched by a book/price/trade/fill event since the
    // quoting loop last drained it. In push mode the loop only re-quotes
    // what's in here instead of rescanning every target market.
    let pending_quote_updates: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

    let (tx, mut rx) = mpsc::channel::<FeedEvent>(1024);

    let feed_handle = if config.feed.push_mode {
        let assets = config.target_markets.clone();
        let feed_config = config.feed.clone();
        let stall_clone = stall.clone();
        tokio::spawn(async move {
            if let Err(e) = feed::run_ws_feed(assets, feed_config, tx, stall_clone).await {
                log::error!("market feed exhausted: {e}");
            }
        })
    } else {
        let exch = exchange.clone();
        let assets = config.target_markets.clone();
        let interval = config.strategy.quote_refresh_interval_secs;
        tokio::spawn(async move {
            feed::run_poll_feed(exch, assets, interval, tx).await;
        })
    };

    {
        let cache = book_cache.clone();
        let ledger = ledger.clone();
        let trades = recent_trades.clone();
        let perf_monitor = perf_monitor.clone();
        let paper_sim = paper_sim.clone();
        let pending = pending_quote_updates.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match &event {
                    FeedEvent::UserFill(trade) => {
                        let before = ledger.lock().unwrap().total_realized_pnl();
                        ledger.lock().unwrap().apply_fill(trade);
                        let after = ledger.lock().unwrap().total_realized_pnl();
                        if after != before {
                            perf_monitor.lock().unwrap().record_trade(after - before);
                        }
                        pending.lock().unwrap().insert(trade.asset_id.clone());
                    }
                    FeedEvent::LastTrade { asset_id, side, price, size } => {
                        let trade = Trade {
                            trade_id: format!("mkt_{asset_id}_{price}_{}", Utc::now().timestamp_nanos_opt().unwrap_or(0)),
                            asset_id: asset_id.clone(),
                            side: *side,
                            price: *price,
                            size: *size,
                            fee: Decimal::ZERO,
                            timestamp: Utc::now(),
                            order_id: String::new(),
                        };
                        trades.lock().unwrap().entry(asset_id.clone()).or_default().push(trade);
                        if let Some(sim) = &paper_sim {
                            sim.ingest_trade(asset_id, *size);
                        }
                        pending.lock().unwrap().insert(asset_id.clone());
                    }
                    _ => {}
                }
                if let Some(asset_id) = feed::apply_to_cache(&cache, &event) {
                    pending.lock().unwrap().insert(asset_id.clone());
                    if let Some(sim) = &paper_sim {
                        if let Some(book) = cache.lock().unwrap().get(&asset_id) {
                            sim.ingest_book(&asset_id, book);
                        }
                    }
                }
            }
        });
    }

    if let Some(sim) = paper_sim.clone() {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(500));
            loop {
                interval.tick().await;
                sim.check_resting_fills().await;
            }
        });
    }

    {
        let stall = stall.clone();
        let order_manager = order_manager.clone();
        let exchange = exchange.clone();
        tokio::spawn(async move {
            let mut was_stalled = false;
            loop {
                tokio::time::sleep(Duration::from_millis(500)).await;
                let now_stalled = stall.load(Ordering::SeqCst);
                if now_stalled && !was_stalled {
                    log::error!("feed stalled, cancelling all resting orders");
                    order_manager.lock().await.cancel_all_orders(exchange.as_ref(), None).await;
                }
                was_stalled = now_stalled;
            }
        });
    }

    {
        let order_manager = order_manager.clone();
        let exchange = exchange.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                let cancelled = order_manager.lock().await.cancel_stale_orders(exchange.as_ref()).await;
                if cancelled > 0 {
                    log::info!("cancelled {cancelled} stale orders");
                }
            }
        });
    }

    {
        let ledger = ledger.clone();
        let risk_gate = risk_gate.clone();
        let order_manager = order_manager.clone();
        let book_cache = book_cache.clone();
        let exchange = exchange.clone();
        let perf_monitor = perf_monitor.clone();
        let state_path = config.state_path.clone();
        let paper_trading = config.paper_trading;
        let interval_secs = config.print_status_interval_secs;
        let paper_sim = paper_sim.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;

                let balance = exchange.get_balance().await.unwrap_or_default();
                let positions = ledger.lock().unwrap().snapshot();
                let metrics = {
                    let risk = risk_gate.lock().await;
                    let lg = ledger.lock().unwrap();
                    risk.get_risk_metrics(&lg)
                };
                let halted = risk_gate.lock().await.is_halted();
                let live_orders = order_manager.lock().await.live_orders(None).into_iter().cloned().collect();
                let orderbooks = book_cache.lock().unwrap().clone();

                let snapshot = EngineSnapshot {
                    generated_at: Utc::now(),
                    paper_trading,
                    halted,
                    balance,
                    positions: positions.clone(),
                    orderbooks,
                    live_orders,
                    risk_metrics: metrics,
                    recent_fills: Vec::new(),
                };
                log::info!("{}", snapshot.summary_line());

                let perf = perf_monitor.lock().unwrap().get_metrics();
                log::info!(
                    "perf: trades={} win_rate={}% profit_factor={} action={:?}",
                    perf.trade_count,
                    perf.win_rate,
                    perf.profit_factor,
                    perf.suggested_action
                );

                let risk_state = risk_gate.lock().await.get_state();
                persistence::save_state(&state_path, &EngineState { balance, positions, risk_state: Some(risk_state) });

                if let Some(sim) = &paper_sim {
                    let s = sim.stats();
                    log::info!(
                        "sim: placed={} filled={} partial={} cancelled={} volume={} fees={} adverse_fill_rate={}",
                        s.orders_placed,
                        s.orders_filled,
                        s.orders_partial,
                        s.orders_cancelled,
                        s.total_volume,
                        s.total_fees,
                        s.adverse_fill_rate()
                    );
                }
            }
        });
    }

    log::info!(
        "entering quoting loop, push_mode={} refresh={}s",
        config.feed.push_mode,
        config.strategy.quote_refresh_interval_secs
    );
    let mut poll_interval = tokio::time::interval(Duration::from_secs(config.strategy.quote_refresh_interval_secs));
    let mut push_interval = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("shutdown requested, cancelling resting orders and closing the feed");
                order_manager.lock().await.cancel_all_orders(exchange.as_ref(), None).await;
                feed_handle.abort();

                let balance = exchange.get_balance().await.unwrap_or_default();
                let positions = ledger.lock().unwrap().snapshot();
                let metrics = {
                    let risk = risk_gate.lock().await;
                    let lg = ledger.lock().unwrap();
                    risk.get_risk_metrics(&lg)
                };
                let snapshot = EngineSnapshot {
                    generated_at: Utc::now(),
                    paper_trading: config.paper_trading,
                    halted: risk_gate.lock().await.is_halted(),
                    balance,
                    positions,
                    orderbooks: book_cache.lock().unwrap().clone(),
                    live_orders: order_manager.lock().await.live_orders(None).into_iter().cloned().collect(),
                    risk_metrics: metrics,
                    recent_fills: Vec::new(),
                };
                log::info!("final: {}", snapshot.summary_line());

                if let Some(sim) = &paper_sim {
                    let s = sim.stats();
                    log::info!(
                        "final sim stats: placed={} filled={} partial={} cancelled={} volume={} fees={} adverse_fill_rate={}",
                        s.orders_placed,
                        s.orders_filled,
                        s.orders_partial,
                        s.orders_cancelled,
                        s.total_volume,
                        s.total_fees,
                        s.adverse_fill_rate()
                    );
                }
                return Ok(());
            }
            _ = poll_interval.tick(), if !config.feed.push_mode => {
                if risk_halted_this_tick(&risk_gate, &ledger).await {
                    continue;
                }
                for asset_id in &config.target_markets {
                    requote_market(
                        asset_id, &config, &book_cache, &ledger, &recent_trades,
                        &quote_engines, &risk_gate, &order_manager, exchange.as_ref(),
                    ).await;
                }
            }
            _ = push_interval.tick(), if config.feed.push_mode => {
                let touched: Vec<String> = pending_quote_updates.lock().unwrap().drain().collect();
                if touched.is_empty() {
                    continue;
                }
                if risk_halted_this_tick(&risk_gate, &ledger).await {
                    continue;
                }
                for asset_id in &touched {
                    if !config.target_markets.contains(asset_id) {
                        continue;
                    }
                    requote_market(
                        asset_id, &config, &book_cache, &ledger, &recent_trades,
                        &quote_engines, &risk_gate, &order_manager, exchange.as_ref(),
                    ).await;
                }
            }
        }
    }
}

/// Checks the halt flag and daily-loss breaker once per tick. Returns true
/// if the quoting pass for this tick should be skipped entirely.
async fn risk_halted_this_tick(risk_gate: &AsyncMutex<RiskGate>, ledger: &Mutex<InventoryLedger>) -> bool {
    let mut risk = risk_gate.lock().await;
    if risk.is_halted() {
        return true;
    }
    let tripped = {
        let lg = ledger.lock().unwrap();
        risk.check_daily_loss(&lg)
    };
    if tripped {
        log::error!("daily loss limit breached, trading halted");
    }
    tripped
}

/// Runs one market through the quote engine, risk gate and order manager.
/// Shared by both the push-mode (flagged-assets-only) and poll-mode
/// (full-rescan) branches of the quoting loop.
#[allow(clippy::too_many_arguments)]
async fn requote_market(
    asset_id: &str,
    config: &EngineConfig,
    book_cache: &Mutex<HashMap<String, OrderBook>>,
    ledger: &Mutex<InventoryLedger>,
    recent_trades: &Mutex<HashMap<String, Vec<Trade>>>,
    quote_engines: &Mutex<HashMap<String, SmartQuoteEngine>>,
    risk_gate: &AsyncMutex<RiskGate>,
    order_manager: &AsyncMutex<OrderManager>,
    exchange: &dyn ExchangeClient,
) {
    let Some(book) = book_cache.lock().unwrap().get(asset_id).cloned() else { return };

    let inventory = ledger.lock().unwrap().position(asset_id).quantity;
    let pending_trades: Vec<Trade> = recent_trades.lock().unwrap().remove(asset_id).unwrap_or_default();

    let mut engines = quote_engines.lock().unwrap();
    let engine = engines.entry(asset_id.to_string()).or_insert_with(|| {
        SmartQuoteEngine::new(QuoteEngineConfig {
            base_spread: config.trading.base_spread,
            min_spread: config.trading.min_spread,
            max_spread: config.trading.max_spread,
            min_price: config.trading.min_price,
            max_price: config.trading.max_price,
            num_levels: config.trading.num_levels,
            level_spacing: config.trading.level_spacing,
            default_size: config.trading.default_order_size,
            inventory_skew_threshold: config.risk.inventory_skew_threshold,
            use_weighted_mid: config.strategy.use_weighted_mid,
        })
    });

    if config.strategy.adverse_selection_adjustment && !pending_trades.is_empty() {
        engine.inner.update_adverse_selection(&pending_trades);
    }

    let (ok, reason) = engine.inner.should_quote(&book, inventory, config.risk.max_inventory_imbalance, None);
    if !ok {
        log::debug!("{asset_id}: not quoting ({reason})");
        return;
    }

    let Some(mut quote_set) = engine.calculate_quotes(asset_id, &book, inventory, Decimal::ONE, None, None) else {
        return;
    };
    drop(engines);

    {
        let risk = risk_gate.lock().await;
        let mut lg = ledger.lock().unwrap();
        quote_set.bids.retain(|q| {
            let size_i = q.size.round().to_i64().unwrap_or(0);
            risk.check_order_allowed(&mut lg, asset_id, Side::Buy, size_i, q.price).is_ok()
        });
        quote_set.asks.retain(|q| {
            let size_i = q.size.round().to_i64().unwrap_or(0);
            risk.check_order_allowed(&mut lg, asset_id, Side::Sell, size_i, q.price).is_ok()
        });
    }

    if quote_set.is_empty() {
        return;
    }

    let mut om = order_manager.lock().await;
    let placed = om.update_quotes(exchange, asset_id, &quote_set).await;
    om.sync_with_exchange(exchange, asset_id).await;
    if placed > 0 {
        log::debug!("{asset_id}: placed {placed} new orders ({})", quote_set.provenance);
    }
}
