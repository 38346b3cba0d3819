// Closed error taxonomy for engine components. Component-level operations
// return `Result<T, EngineError>`; glue code in main.rs uses anyhow and only
// converts to EngineError at a boundary that needs to match on the kind.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("venue request failed: {0}")]
    Venue(String),

    #[error("venue rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("order rejected: {0}")]
    OrderRejected(String),

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("trading halted: {0}")]
    Halted(String),

    #[error("risk check failed: {0}")]
    RiskRejected(String),

    #[error("feed stalled: no message for {idle_ms}ms on {asset_id}")]
    FeedStalled { asset_id: String, idle_ms: u64 },

    #[error("feed reconnect attempts exhausted after {attempts} tries")]
    FeedExhausted { attempts: u32 },

    #[error("state persistence error: {0}")]
    Persistence(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
