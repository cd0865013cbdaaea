//! Runtime settings for the server process.
//!
//! Gameplay constants are part of the wire protocol and live in `shared`;
//! only deployment concerns are configurable here.

use shared::TICK_RATE;
use std::time::Duration;

/// Frames a slow client may have queued before it is treated as gone.
/// About half a second of state updates at the default tick rate.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Simulation ticks per second.
    pub tick_rate: u32,
    /// Request path that is upgraded to a WebSocket.
    pub ws_path: String,
    pub outbound_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            tick_rate: TICK_RATE,
            ws_path: "/ws".to_string(),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }
}
