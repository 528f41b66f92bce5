//! The single owned connection to the hub's real-time event feed.
//!
//! One background task owns the socket: it dials, runs the auth handshake,
//! replays the desired event subscriptions, then pumps frames until the
//! connection drops. Unexpected drops after a successful connect are retried
//! with the configured backoff ladder; exhausting the ladder parks the
//! manager in [`ConnectionState::Failed`] until a fresh `connect()`.

use crate::config::ConnectionConfig;
use crate::error::HearthError;
use crate::protocol::{
    parse_server_message, ClientMessage, ServerMessage, StateChange, STATE_CHANGED,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time::{sleep_until, timeout, Duration, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Reconnecting { attempt: u32 },
    /// The hub rejected the access token. Configuration error; never retried.
    AuthFailed,
    /// Reconnection attempts exhausted. Callers fall back to polling until a
    /// fresh `connect()` resets the attempt counter.
    Failed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// True once the loop has stopped and only `connect()` can restart it.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::AuthFailed | ConnectionState::Failed
        )
    }
}

enum ConnectionCommand {
    Subscribe(String),
    Disconnect,
}

struct ManagerInner {
    ws_url: String,
    access_token: String,
    config: ConnectionConfig,
    state: Arc<watch::Sender<ConnectionState>>,
    /// Event types to register with the hub, replayed after every successful
    /// (re)authentication. Subscribers never need to re-register.
    event_subscriptions: Arc<RwLock<Vec<String>>>,
    event_tx: mpsc::Sender<StateChange>,
    command_tx: Mutex<Option<mpsc::Sender<ConnectionCommand>>>,
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// Create a manager. No socket is opened until [`connect`](Self::connect).
    ///
    /// Decoded `state_changed` events are pushed into `event_tx` in arrival
    /// order.
    pub fn new(
        ws_url: impl Into<String>,
        access_token: impl Into<String>,
        config: ConnectionConfig,
        event_tx: mpsc::Sender<StateChange>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(ManagerInner {
                ws_url: ws_url.into(),
                access_token: access_token.into(),
                config,
                state: Arc::new(state),
                event_subscriptions: Arc::new(RwLock::new(vec![STATE_CHANGED.to_string()])),
                event_tx,
                command_tx: Mutex::new(None),
            }),
        }
    }

    /// Establish the link: open the socket, run the auth handshake, and
    /// register the event subscriptions. Resolves once connected.
    ///
    /// `auth_invalid` from the hub fails permanently (no retry). Transient
    /// failures are retried with backoff while `auto_reconnect` is set;
    /// exhausting the attempt cap fails with
    /// [`HearthError::MaxReconnectAttempts`]. Calling `connect()` again after
    /// that starts over with a fresh attempt counter.
    pub async fn connect(&self) -> Result<(), HearthError> {
        if self.state().is_connected() {
            return Ok(());
        }

        {
            // Check-and-spawn under the command_tx lock so two racing
            // connect() calls cannot start competing loops.
            let mut command_slot = self.inner.command_tx.lock().await;
            if self.state().is_terminal() {
                let (command_tx, command_rx) = mpsc::channel(16);
                *command_slot = Some(command_tx);
                self.inner.state.send_replace(ConnectionState::Connecting);
                spawn_connection_loop(
                    self.inner.ws_url.clone(),
                    self.inner.access_token.clone(),
                    self.inner.config.clone(),
                    self.inner.state.clone(),
                    self.inner.event_subscriptions.clone(),
                    self.inner.event_tx.clone(),
                    command_rx,
                );
            }
        }

        let mut rx = self.inner.state.subscribe();
        loop {
            match *rx.borrow_and_update() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::AuthFailed => return Err(HearthError::AuthInvalid),
                ConnectionState::Failed => {
                    return Err(HearthError::MaxReconnectAttempts(
                        self.inner.config.max_reconnect_attempts,
                    ))
                }
                ConnectionState::Disconnected => return Err(HearthError::ConnectionClosed),
                _ => {}
            }
            if rx.changed().await.is_err() {
                return Err(HearthError::ConnectionClosed);
            }
        }
    }

    /// Tear down the socket and stop the connection loop.
    ///
    /// The event-type replay registry survives, so a later `connect()`
    /// restores the same hub subscriptions without callers re-registering.
    /// Listener callbacks live in the router and are dropped by
    /// [`crate::HearthClient::teardown`], not here.
    pub async fn disconnect(&self) {
        let command_tx = self.inner.command_tx.lock().await.take();
        if let Some(tx) = command_tx {
            let _ = tx.send(ConnectionCommand::Disconnect).await;
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Observe state transitions (used by the polling-fallback supervisor).
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Register interest in an additional hub event type. Sent immediately
    /// when connected, and replayed after every reconnect.
    pub async fn add_event_subscription(&self, event_type: impl Into<String>) {
        let event_type = event_type.into();
        let command_tx = self.inner.command_tx.lock().await.clone();
        match command_tx {
            Some(tx) => {
                if tx
                    .send(ConnectionCommand::Subscribe(event_type.clone()))
                    .await
                    .is_err()
                {
                    register_event_type(&self.inner.event_subscriptions, event_type).await;
                }
            }
            None => register_event_type(&self.inner.event_subscriptions, event_type).await,
        }
    }
}

async fn register_event_type(registry: &Arc<RwLock<Vec<String>>>, event_type: String) {
    let mut registry = registry.write().await;
    if !registry.contains(&event_type) {
        registry.push(event_type);
    }
}

enum SessionEnd {
    /// `auth_invalid` from the hub. Fatal.
    AuthRejected,
    /// Explicit `disconnect()`.
    ShutDown,
    /// Transient failure; eligible for backoff retry.
    Dropped,
}

fn spawn_connection_loop(
    ws_url: String,
    access_token: String,
    config: ConnectionConfig,
    state: Arc<watch::Sender<ConnectionState>>,
    subscriptions: Arc<RwLock<Vec<String>>>,
    event_tx: mpsc::Sender<StateChange>,
    mut command_rx: mpsc::Receiver<ConnectionCommand>,
) {
    tokio::spawn(async move {
        let mut reconnect_attempt: u32 = 0;
        let mut msg_id: u64 = 0;

        loop {
            state.send_replace(ConnectionState::Connecting);

            let end = run_session(
                &ws_url,
                &access_token,
                &config,
                &state,
                &subscriptions,
                &event_tx,
                &mut command_rx,
                &mut msg_id,
                &mut reconnect_attempt,
            )
            .await;

            match end {
                SessionEnd::AuthRejected => {
                    state.send_replace(ConnectionState::AuthFailed);
                    return;
                }
                SessionEnd::ShutDown => {
                    state.send_replace(ConnectionState::Disconnected);
                    return;
                }
                SessionEnd::Dropped => {}
            }

            if !config.auto_reconnect {
                state.send_replace(ConnectionState::Failed);
                return;
            }
            if reconnect_attempt >= config.max_reconnect_attempts {
                tracing::error!(
                    attempts = reconnect_attempt,
                    "giving up on reconnection, callers should fall back to polling"
                );
                state.send_replace(ConnectionState::Failed);
                return;
            }

            let delay = backoff_delay(&config, reconnect_attempt);
            state.send_replace(ConnectionState::Reconnecting {
                attempt: reconnect_attempt,
            });
            reconnect_attempt += 1;
            tracing::info!(?delay, attempt = reconnect_attempt, "reconnecting");

            // Stay responsive to disconnect/subscribe while waiting out the
            // backoff delay.
            let deadline = Instant::now() + delay;
            loop {
                tokio::select! {
                    _ = sleep_until(deadline) => break,
                    cmd = command_rx.recv() => match cmd {
                        Some(ConnectionCommand::Subscribe(event_type)) => {
                            register_event_type(&subscriptions, event_type).await;
                        }
                        Some(ConnectionCommand::Disconnect) | None => {
                            state.send_replace(ConnectionState::Disconnected);
                            return;
                        }
                    },
                }
            }
        }
    });
}

/// Backoff ladder lookup; the last entry is reused once exhausted.
fn backoff_delay(config: &ConnectionConfig, attempt: u32) -> Duration {
    config
        .reconnect_intervals
        .get(attempt as usize)
        .or_else(|| config.reconnect_intervals.last())
        .copied()
        .unwrap_or(Duration::from_secs(16))
}

#[allow(clippy::too_many_arguments)]
async fn run_session(
    ws_url: &str,
    access_token: &str,
    config: &ConnectionConfig,
    state: &watch::Sender<ConnectionState>,
    subscriptions: &Arc<RwLock<Vec<String>>>,
    event_tx: &mpsc::Sender<StateChange>,
    command_rx: &mut mpsc::Receiver<ConnectionCommand>,
    msg_id: &mut u64,
    reconnect_attempt: &mut u32,
) -> SessionEnd {
    let ws = match timeout(config.connect_timeout, connect_async(ws_url)).await {
        Ok(Ok((ws, _))) => ws,
        Ok(Err(err)) => {
            tracing::warn!(%err, "connection failed");
            return SessionEnd::Dropped;
        }
        Err(_) => {
            tracing::warn!("connection attempt timed out");
            return SessionEnd::Dropped;
        }
    };

    let (mut ws_tx, mut ws_rx) = ws.split();

    state.send_replace(ConnectionState::Authenticating);
    match timeout(
        config.auth_timeout,
        authenticate(&mut ws_tx, &mut ws_rx, access_token),
    )
    .await
    {
        Ok(Ok(())) => {}
        Ok(Err(HearthError::AuthInvalid)) => return SessionEnd::AuthRejected,
        Ok(Err(err)) => {
            tracing::warn!(%err, "authentication handshake failed");
            return SessionEnd::Dropped;
        }
        Err(_) => {
            tracing::warn!("authentication handshake timed out");
            return SessionEnd::Dropped;
        }
    }

    // Replay the desired subscriptions before reporting Connected, so no
    // event can slip past between the two.
    let desired = subscriptions.read().await.clone();
    for event_type in desired {
        if send_subscribe(&mut ws_tx, msg_id, &event_type).await.is_err() {
            return SessionEnd::Dropped;
        }
    }

    *reconnect_attempt = 0;
    state.send_replace(ConnectionState::Connected);
    tracing::info!("connected to hub event feed");

    let mut ping_timer = tokio::time::interval(config.ping_interval);
    ping_timer.tick().await; // the first tick completes immediately

    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => handle_text(&text, event_tx).await,
                Some(Ok(Message::Ping(payload))) => {
                    let _ = ws_tx.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) => {
                    tracing::info!("hub closed the connection");
                    return SessionEnd::Dropped;
                }
                Some(Err(err)) => {
                    tracing::warn!(%err, "socket error");
                    return SessionEnd::Dropped;
                }
                None => return SessionEnd::Dropped,
                _ => {}
            },
            cmd = command_rx.recv() => match cmd {
                Some(ConnectionCommand::Subscribe(event_type)) => {
                    register_event_type(subscriptions, event_type.clone()).await;
                    let _ = send_subscribe(&mut ws_tx, msg_id, &event_type).await;
                }
                Some(ConnectionCommand::Disconnect) | None => {
                    let _ = ws_tx.close().await;
                    return SessionEnd::ShutDown;
                }
            },
            _ = ping_timer.tick() => {
                let _ = ws_tx.send(Message::Ping(Vec::new())).await;
            }
        }
    }
}

/// Drive the hub's auth handshake: wait for `auth_required`, answer with the
/// token, and settle on `auth_ok` / `auth_invalid`. The caller bounds this
/// with `auth_timeout`.
async fn authenticate<S, R>(
    ws_tx: &mut S,
    ws_rx: &mut R,
    access_token: &str,
) -> Result<(), HearthError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let msg = ws_rx.next().await.ok_or(HearthError::ConnectionClosed)??;
        match msg {
            Message::Text(text) => match parse_server_message(&text) {
                Ok(ServerMessage::AuthRequired { .. }) => {
                    let reply = ClientMessage::Auth {
                        access_token: access_token.to_string(),
                    };
                    ws_tx.send(Message::Text(serde_json::to_string(&reply)?)).await?;
                }
                Ok(ServerMessage::AuthOk { ha_version }) => {
                    tracing::debug!(?ha_version, "authentication successful");
                    return Ok(());
                }
                Ok(ServerMessage::AuthInvalid { message }) => {
                    tracing::error!(?message, "hub rejected the access token");
                    return Err(HearthError::AuthInvalid);
                }
                Ok(other) => {
                    tracing::debug!(?other, "unexpected message during handshake");
                }
                Err(err) => {
                    tracing::warn!(%err, "skipping unparseable handshake message");
                }
            },
            Message::Ping(payload) => ws_tx.send(Message::Pong(payload)).await?,
            Message::Close(_) => return Err(HearthError::ConnectionClosed),
            _ => {}
        }
    }
}

async fn send_subscribe(
    ws_tx: &mut (impl Sink<Message, Error = tungstenite::Error> + Unpin),
    msg_id: &mut u64,
    event_type: &str,
) -> Result<(), HearthError> {
    *msg_id += 1;
    let msg = ClientMessage::SubscribeEvents {
        id: *msg_id,
        event_type: event_type.to_string(),
    };
    ws_tx.send(Message::Text(serde_json::to_string(&msg)?)).await?;
    tracing::debug!(event_type, id = *msg_id, "registered event subscription");
    Ok(())
}

/// Decode one inbound frame. A bad message is logged and skipped; it never
/// takes the connection down.
async fn handle_text(text: &str, event_tx: &mpsc::Sender<StateChange>) {
    match parse_server_message(text) {
        Ok(ServerMessage::Event { event, .. }) => {
            if let Some(change) = event.into_state_change() {
                if event_tx.send(change).await.is_err() {
                    tracing::warn!("event consumer dropped, discarding event");
                }
            }
        }
        Ok(ServerMessage::Result { id, success }) => {
            tracing::debug!(?id, success, "subscription ack");
        }
        Ok(other) => {
            tracing::debug!(?other, "ignoring message");
        }
        Err(err) => {
            tracing::warn!(%err, "skipping unparseable message");
        }
    }
}
