// Engine configuration, assembled from environment variables (.env loaded via
// dotenvy, same as the upstream engine's startup). Financial fields are
// Decimal so a fat-fingered "0.02" in the environment can't round-trip
// through f64 before it ever touches a quote.
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;

use crate::error::EngineError;

fn env_decimal(key: &str, default: Decimal) -> Result<Decimal, EngineError> {
    match env::var(key) {
        Ok(v) => v
            .parse::<Decimal>()
            .map_err(|e| EngineError::Config(format!("{key}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn env_u32(key: &str, default: u32) -> Result<u32, EngineError> {
    match env::var(key) {
        Ok(v) => v.parse::<u32>().map_err(|e| EngineError::Config(format!("{key}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64, EngineError> {
    match env::var(key) {
        Ok(v) => v.parse::<u64>().map_err(|e| EngineError::Config(format!("{key}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct TradingConfig {
    pub base_spread: Decimal,
    pub min_spread: Decimal,
    pub max_spread: Decimal,
    pub min_order_size: Decimal,
    pub max_order_size: Decimal,
    pub default_order_size: Decimal,
    pub num_levels: u32,
    pub level_spacing: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub max_position: i64,
    pub max_total_exposure: Decimal,
    pub inventory_skew_threshold: i64,
    pub max_inventory_imbalance: i64,
    pub daily_loss_limit: Decimal,
    pub inventory_spread_multiplier: Decimal,
    pub hours_before_resolution_cutoff: i64,
    pub volatility_spread_multiplier: Decimal,
}

#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub quote_refresh_interval_secs: u64,
    pub order_timeout_secs: u64,
    pub min_edge: Decimal,
    pub use_weighted_mid: bool,
    pub depth_weight: Decimal,
    pub adverse_selection_adjustment: bool,
    pub adverse_selection_decay: Decimal,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub reconnect_initial_delay_secs: u64,
    pub reconnect_max_delay_secs: u64,
    pub reconnect_max_attempts: u32,
    pub stall_timeout_secs: u64,
    pub push_mode: bool,
}

#[derive(Debug, Clone)]
pub struct VenueConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub passphrase: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub paper_trading: bool,
    pub starting_balance: Decimal,
    pub target_markets: Vec<String>,
    pub trading: TradingConfig,
    pub risk: RiskConfig,
    pub strategy: StrategyConfig,
    pub feed: FeedConfig,
    pub venue: VenueConfig,
    pub state_path: String,
    pub print_status_interval_secs: u64,
}

impl EngineConfig {
    pub fn load_from_env() -> Result<Self, EngineError> {
        dotenvy::dotenv().ok();

        let paper_trading = env_bool("PAPER_TRADING", true);
        let target_markets: Vec<String> = env::var("TARGET_MARKETS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let trading = TradingConfig {
            base_spread: env_decimal("MM_BASE_SPREAD", dec!(0.02))?,
            min_spread: env_decimal("MM_MIN_SPREAD", dec!(0.01))?,
            max_spread: env_decimal("MM_MAX_SPREAD", dec!(0.10))?,
            min_order_size: env_decimal("MM_MIN_ORDER_SIZE", dec!(5.0))?,
            max_order_size: env_decimal("MM_MAX_ORDER_SIZE", dec!(50.0))?,
            default_order_size: env_decimal("MM_DEFAULT_ORDER_SIZE", dec!(20.0))?,
            num_levels: env_u32("MM_NUM_LEVELS", 3)?,
            level_spacing: env_decimal("MM_LEVEL_SPACING", dec!(0.01))?,
            min_price: env_decimal("MM_MIN_PRICE", dec!(0.05))?,
            max_price: env_decimal("MM_MAX_PRICE", dec!(0.95))?,
        };

        let risk = RiskConfig {
            max_position: env_u64("MM_MAX_POSITION", 500)? as i64,
            max_total_exposure: env_decimal("MM_MAX_TOTAL_EXPOSURE", dec!(1000.0))?,
            inventory_skew_threshold: env_u64("MM_INVENTORY_SKEW_THRESHOLD", 100)? as i64,
            max_inventory_imbalance: env_u64("MM_MAX_INVENTORY_IMBALANCE", 400)? as i64,
            daily_loss_limit: env_decimal("MM_DAILY_LOSS_LIMIT", dec!(100.0))?,
            inventory_spread_multiplier: env_decimal("MM_INVENTORY_SPREAD_MULTIPLIER", dec!(1.5))?,
            hours_before_resolution_cutoff: env_u64("MM_RESOLUTION_CUTOFF_HOURS", 24)? as i64,
            volatility_spread_multiplier: env_decimal("MM_VOLATILITY_SPREAD_MULTIPLIER", dec!(2.0))?,
        };

        let strategy = StrategyConfig {
            quote_refresh_interval_secs: env_u64("MM_QUOTE_REFRESH_INTERVAL_SECS", 5)?,
            order_timeout_secs: env_u64("MM_ORDER_TIMEOUT_SECS", 300)?,
            min_edge: env_decimal("MM_MIN_EDGE", dec!(0.005))?,
            use_weighted_mid: env_bool("MM_USE_WEIGHTED_MID", true),
            depth_weight: env_decimal("MM_DEPTH_WEIGHT", dec!(0.3))?,
            adverse_selection_adjustment: env_bool("MM_ADVERSE_SELECTION_ADJUSTMENT", true),
            adverse_selection_decay: env_decimal("MM_ADVERSE_SELECTION_DECAY", dec!(0.9))?,
        };

        let feed = FeedConfig {
            reconnect_initial_delay_secs: env_u64("MM_RECONNECT_INITIAL_DELAY_SECS", 5)?,
            reconnect_max_delay_secs: env_u64("MM_RECONNECT_MAX_DELAY_SECS", 60)?,
            reconnect_max_attempts: env_u32("MM_RECONNECT_MAX_ATTEMPTS", 10)?,
            stall_timeout_secs: env_u64("MM_STALL_TIMEOUT_SECS", 30)?,
            push_mode: env_bool("MM_PUSH_MODE", true),
        };

        let venue = VenueConfig {
            base_url: env::var("POLY_BASE_URL").unwrap_or_else(|_| "https://clob.polymarket.com".to_string()),
            api_key: env::var("POLY_API_KEY").ok(),
            api_secret: env::var("POLY_API_SECRET").ok(),
            passphrase: env::var("POLY_PASSPHRASE").ok(),
        };

        if !paper_trading && (venue.api_key.is_none() || venue.api_secret.is_none() || venue.passphrase.is_none()) {
            return Err(EngineError::Config(
                "live mode requires POLY_API_KEY, POLY_API_SECRET and POLY_PASSPHRASE".to_string(),
            ));
        }

        Ok(Self {
            paper_trading,
            starting_balance: env_decimal("MM_STARTING_BALANCE", dec!(5000.0))?,
            target_markets,
            trading,
            risk,
            strategy,
            feed,
            venue,
            state_path: env::var("MM_STATE_PATH").unwrap_or_else(|_| "engine_state.json".to_string()),
            print_status_interval_secs: env_u64("MM_PRINT_STATUS_INTERVAL_SECS", 60)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_decimal_falls_back_to_default_when_unset() {
        env::remove_var("MM_TEST_DECIMAL_UNUSED");
        let v = env_decimal("MM_TEST_DECIMAL_UNUSED", dec!(0.02)).unwrap();
        assert_eq!(v, dec!(0.02));
    }

    #[test]
    fn env_bool_accepts_common_truthy_strings() {
        env::set_var("MM_TEST_BOOL", "Yes");
        assert!(env_bool("MM_TEST_BOOL", false));
        env::remove_var("MM_TEST_BOOL");
    }
}
