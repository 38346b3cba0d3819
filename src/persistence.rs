// Engine state persistence: balance, positions and the risk gate's daily
// counters, round-tripped as JSON so a restart resumes instead of starting flat.
use log::{error, info};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::risk::RiskState;
use crate::types::Position;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub balance: Decimal,
    pub positions: Vec<Position>,
    pub risk_state: Option<RiskState>,
}

impl EngineState {
    pub fn new(balance: Decimal) -> Self {
        Self { balance, positions: Vec::new(), risk_state: None }
    }
}

pub fn load_state<P: AsRef<Path>>(path: P, default_balance: Decimal) -> EngineState {
    if path.as_ref().exists() {
        match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<EngineState>(&content) {
                Ok(state) => {
                    info!("loaded state from {:?}: balance=${}, positions={}", path.as_ref(), state.balance, state.positions.len());
                    return state;
                }
                Err(e) => error!("failed to parse state file: {e}"),
            },
            Err(e) => error!("failed to read state file: {e}"),
        }
    }
    info!("state file not found, initializing new state with ${default_balance}");
    EngineState::new(default_balance)
}

pub fn save_state<P: AsRef<Path>>(path: P, state: &EngineState) {
    match serde_json::to_string_pretty(state) {
        Ok(content) => {
            if let Err(e) = fs::write(path, content) {
                error!("failed to write state file: {e}");
            }
        }
        Err(e) => error!("failed to serialize state: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn missing_state_file_falls_back_to_default_balance() {
        let state = load_state("/tmp/polymm_nonexistent_state_file.json", dec!(1000));
        assert_eq!(state.balance, dec!(1000));
        assert!(state.positions.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let path = "/tmp/polymm_persistence_test_state.json";
        let mut state = EngineState::new(dec!(500));
        state.positions.push(Position::flat("A", chrono::Utc::now()));
        save_state(path, &state);
        let loaded = load_state(path, dec!(0));
        assert_eq!(loaded.balance, dec!(500));
        assert_eq!(loaded.positions.len(), 1);
        let _ = fs::remove_file(path);
    }
}
