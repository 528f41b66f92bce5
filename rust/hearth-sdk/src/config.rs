use std::time::Duration;

/// Tuning knobs for a [`crate::HearthClient`].
///
/// Endpoint URLs and the access token are passed to the client constructor;
/// this struct only carries behavior.
#[derive(Debug, Clone)]
pub struct HearthConfig {
    pub auto_reconnect: bool,
    /// Backoff ladder for reconnection attempts. The last entry is reused
    /// once the ladder is exhausted.
    pub reconnect_intervals: Vec<Duration>,
    pub max_reconnect_attempts: u32,
    pub ping_interval: Duration,
    /// Bounds the auth handshake; exceeding it fails the attempt instead of
    /// hanging.
    pub auth_timeout: Duration,
    /// Bounds a single socket-open attempt.
    pub connect_timeout: Duration,
    /// Full-resync cadence while the polling fallback is active.
    pub poll_interval: Duration,
}

impl Default for HearthConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_intervals: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
            ],
            max_reconnect_attempts: 5,
            ping_interval: Duration::from_secs(15),
            auth_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// The subset of [`HearthConfig`] the connection manager needs.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub auto_reconnect: bool,
    pub reconnect_intervals: Vec<Duration>,
    pub max_reconnect_attempts: u32,
    pub ping_interval: Duration,
    pub auth_timeout: Duration,
    pub connect_timeout: Duration,
}

impl From<HearthConfig> for ConnectionConfig {
    fn from(config: HearthConfig) -> Self {
        Self {
            auto_reconnect: config.auto_reconnect,
            reconnect_intervals: config.reconnect_intervals,
            max_reconnect_attempts: config.max_reconnect_attempts,
            ping_interval: config.ping_interval,
            auth_timeout: config.auth_timeout,
            connect_timeout: config.connect_timeout,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        HearthConfig::default().into()
    }
}
