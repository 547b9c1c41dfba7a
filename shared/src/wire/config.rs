use std::time::Duration;

/// Tuning of a socket wire and its connectors
#[derive(Clone, Debug)]
pub struct WireConfig {
    /// Period between two pings
    pub heartbeat_interval: Duration,
    /// Counter gap, in heartbeat intervals, after which the connection is reported dead
    pub max_heartbeat_delay: i32,
    /// Socket read timeout, bounds how long termination waits for the receive loop
    pub receive_timeout: Duration,
    /// Size of the chunks the send buffer cuts outbound bytes into
    pub chunk_size: usize,
    /// Inbound messages above this length are reported as a possible OOM
    pub max_message_length: usize,
    /// How long graceful termination waits for the send buffer to drain
    pub stop_timeout: Duration,
    /// Pause between two connection attempts of a client connector
    pub connect_retry_delay: Duration,
    /// Queue inbound messages until the protocol finished bootstrapping
    pub delayed_delivery: bool,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(500),
            max_heartbeat_delay: 3,
            receive_timeout: Duration::from_millis(500),
            chunk_size: 16_370,
            max_message_length: 300_000_000,
            stop_timeout: Duration::from_millis(500),
            connect_retry_delay: Duration::from_millis(500),
            delayed_delivery: true,
        }
    }
}
