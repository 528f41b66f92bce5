use thiserror::Error;

#[derive(Error, Debug)]
pub enum HearthError {
    /// The hub rejected the access token. Treated as a configuration error:
    /// the connection manager never retries after this.
    #[error("Authentication rejected by the hub")]
    AuthInvalid,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Max reconnection attempts reached ({0})")]
    MaxReconnectAttempts(u32),

    /// The hub rejected a command, or the call never reached it. The
    /// optimistic update has already been rolled back when this surfaces.
    #[error("Command on {entity_id} failed: {reason}")]
    Command { entity_id: String, reason: String },

    /// A bulk entity fetch failed. The store keeps its previous contents.
    #[error("Discovery failed: {0}")]
    Discovery(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,
}
