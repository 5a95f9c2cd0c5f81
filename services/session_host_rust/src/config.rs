//! Host configuration from environment variables.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    /// Market tick period in milliseconds.
    pub market_tick_ms: u64,
    /// Order-processing tick period in milliseconds.
    pub order_tick_ms: u64,
    /// Ready/betting countdown in seconds.
    pub ready_countdown_secs: u64,
    /// Seconds between fire-and-forget state saves.
    pub save_interval_secs: u64,
    /// Seconds between host-initiated spins; 0 disables auto-spinning.
    pub auto_spin_secs: u64,
    /// Path of the persisted session state file.
    pub state_path: String,
    /// Identifier of the initial wheel.
    pub wheel_id: String,
    /// Comma-separated entry labels for the initial wheel.
    pub wheel_entries: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            market_tick_ms: env::var("MARKET_TICK_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1_000),
            order_tick_ms: env::var("ORDER_TICK_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
            ready_countdown_secs: env::var("READY_COUNTDOWN_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            save_interval_secs: env::var("SAVE_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(15),
            auto_spin_secs: env::var("AUTO_SPIN_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            state_path: env::var("STATE_PATH").unwrap_or_else(|_| "session_state.json".to_string()),
            wheel_id: env::var("WHEEL_ID").unwrap_or_else(|_| "main".to_string()),
            wheel_entries: env::var("WHEEL_ENTRIES")
                .unwrap_or_else(|_| "Pizza,Tacos,Sushi,Burgers,Ramen,Salad".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}
