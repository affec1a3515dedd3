use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "byteferry-relay", about = "Anonymous rendezvous relay for opaque frames")]
pub struct RelayConfig {
    /// Listen address for both the TCP and WebSocket listeners
    #[arg(long, env = "RELAY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// TCP listener port (length-prefixed framing)
    #[arg(long, env = "RELAY_PORT", default_value_t = 9784)]
    pub port: u16,

    /// WebSocket listener port
    #[arg(long, env = "RELAY_WS_PORT", default_value_t = 9785)]
    pub ws_port: u16,

    /// Maximum concurrent rooms
    #[arg(long, env = "RELAY_MAX_ROOMS", default_value_t = 1000)]
    pub max_rooms: usize,

    /// Room age limit in seconds before eviction
    #[arg(long, env = "RELAY_ROOM_TTL", default_value_t = 1800)]
    pub room_ttl: u64,

    /// Per-frame size ceiling in bytes, for control and relay traffic alike
    #[arg(long, env = "RELAY_MAX_MSG_SIZE", default_value_t = 10 * 1024 * 1024)]
    pub max_msg_size: usize,

    /// Admissions allowed per peer address within one window
    #[arg(long, env = "RELAY_RATE_LIMIT_MAX", default_value_t = 20)]
    pub rate_limit_max: usize,

    /// Sliding rate-limit window in seconds
    #[arg(long, env = "RELAY_RATE_LIMIT_WINDOW", default_value_t = 60)]
    pub rate_limit_window: u64,
}

impl RelayConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.room_ttl)
    }

    #[must_use]
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 9784,
            ws_port: 9785,
            max_rooms: 1000,
            room_ttl: 1800,
            max_msg_size: 10 * 1024 * 1024,
            rate_limit_max: 20,
            rate_limit_window: 60,
        }
    }
}
