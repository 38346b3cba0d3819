// Performance Monitor: rolling win-rate/profit-factor tracking over recent
// fills, used for status reporting only — trading halts are decided by the
// risk gate, not by this feedback loop.
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub window_size: usize,
    pub min_trades_for_action: usize,
    pub pf_threshold_warning: Decimal,
    pub pf_threshold_critical: Decimal,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            min_trades_for_action: 20,
            pf_threshold_warning: Decimal::ONE,
            pf_threshold_critical: Decimal::new(8, 1),
        }
    }
}

pub struct PerformanceMonitor {
    config: MonitorConfig,
    history: VecDeque<TradeResult>,
}

#[derive(Debug, Clone)]
struct TradeResult {
    pnl: Decimal,
    is_win: bool,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self { config, history: VecDeque::new() }
    }

    pub fn record_trade(&mut self, pnl: Decimal) {
        if self.history.len() >= self.config.window_size {
            self.history.pop_front();
        }
        self.history.push_back(TradeResult { pnl, is_win: pnl > Decimal::ZERO });
    }

    pub fn get_metrics(&self) -> PerformanceMetrics {
        if self.history.is_empty() {
            return PerformanceMetrics::default();
        }

        let total_trades = self.history.len();
        let wins = self.history.iter().filter(|t| t.is_win).count();
        let win_rate = Decimal::from(wins) / Decimal::from(total_trades) * Decimal::from(100);

        let gross_profit: Decimal = self.history.iter().filter(|t| t.pnl > Decimal::ZERO).map(|t| t.pnl).sum();
        let gross_loss: Decimal = self.history.iter().filter(|t| t.pnl < Decimal::ZERO).map(|t| t.pnl.abs()).sum();

        let profit_factor = if gross_loss > Decimal::ZERO {
            gross_profit / gross_loss
        } else if gross_profit > Decimal::ZERO {
            Decimal::from(100)
        } else {
            Decimal::ZERO
        };

        PerformanceMetrics {
            win_rate,
            profit_factor,
            trade_count: total_trades,
            suggested_action: self.evaluate_action(profit_factor, total_trades),
        }
    }

    fn evaluate_action(&self, pf: Decimal, count: usize) -> FeedbackAction {
        if count < self.config.min_trades_for_action {
            return FeedbackAction::None;
        }
        if pf < self.config.pf_threshold_critical {
            FeedbackAction::HaltTrading
        } else if pf < self.config.pf_threshold_warning {
            FeedbackAction::ReduceSize(Decimal::new(5, 1))
        } else {
            FeedbackAction::None
        }
    }

    pub fn win_rate(&self) -> Decimal {
        if self.history.is_empty() {
            Decimal::ZERO
        } else {
            let wins = self.history.iter().filter(|t| t.is_win).count();
            Decimal::from(wins) / Decimal::from(self.history.len()) * Decimal::from(100)
        }
    }
}

#[derive(Debug, Default)]
pub struct PerformanceMetrics {
    pub win_rate: Decimal,
    pub profit_factor: Decimal,
    pub trade_count: usize,
    pub suggested_action: FeedbackAction,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum FeedbackAction {
    #[default]
    None,
    ReduceSize(Decimal),
    HaltTrading,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn monitor_initial_state_has_no_suggestion() {
        let monitor = PerformanceMonitor::new(MonitorConfig::default());
        let metrics = monitor.get_metrics();
        assert_eq!(metrics.trade_count, 0);
        assert_eq!(metrics.suggested_action, FeedbackAction::None);
    }

    #[test]
    fn all_wins_yields_max_profit_factor() {
        let config = MonitorConfig { window_size: 10, min_trades_for_action: 5, pf_threshold_warning: dec!(1.5), pf_threshold_critical: dec!(1.0) };
        let mut monitor = PerformanceMonitor::new(config);
        for _ in 0..5 {
            monitor.record_trade(dec!(10.0));
        }
        let metrics = monitor.get_metrics();
        assert_eq!(metrics.win_rate, dec!(100));
        assert_eq!(metrics.suggested_action, FeedbackAction::None);
    }

    #[test]
    fn mediocre_profit_factor_suggests_reducing_size() {
        let config = MonitorConfig { window_size: 10, min_trades_for_action: 5, pf_threshold_warning: dec!(1.5), pf_threshold_critical: dec!(0.5) };
        let mut monitor = PerformanceMonitor::new(config);
        for _ in 0..3 {
            monitor.record_trade(dec!(10.0));
        }
        for _ in 0..3 {
            monitor.record_trade(dec!(-8.33));
        }
        let metrics = monitor.get_metrics();
        match metrics.suggested_action {
            FeedbackAction::ReduceSize(x) => assert_eq!(x, dec!(0.5)),
            other => panic!("expected ReduceSize, got {other:?}"),
        }
    }

    #[test]
    fn poor_profit_factor_suggests_halting() {
        let config = MonitorConfig { window_size: 10, min_trades_for_action: 5, pf_threshold_warning: dec!(1.5), pf_threshold_critical: dec!(0.8) };
        let mut monitor = PerformanceMonitor::new(config);
        monitor.record_trade(dec!(10.0));
        for _ in 0..5 {
            monitor.record_trade(dec!(-10.0));
        }
        let metrics = monitor.get_metrics();
        assert_eq!(metrics.suggested_action, FeedbackAction::HaltTrading);
    }

    #[test]
    fn window_rolls_off_oldest_trade() {
        let config = MonitorConfig { window_size: 3, min_trades_for_action: 1, pf_threshold_warning: dec!(0), pf_threshold_critical: dec!(0) };
        let mut monitor = PerformanceMonitor::new(config);
        monitor.record_trade(dec!(1.0));
        monitor.record_trade(dec!(2.0));
        monitor.record_trade(dec!(3.0));
        monitor.record_trade(dec!(4.0));
        assert_eq!(monitor.history.len(), 3);
        assert_eq!(monitor.history.front().unwrap().pnl, dec!(2.0));
    }
}
