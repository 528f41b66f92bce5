//! The owned facade over the synchronization engine.

use crate::command::CommandDispatcher;
use crate::config::HearthConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::HearthError;
use crate::poll::PollingFallback;
use crate::protocol::StateChange;
use crate::rest::RestClient;
use crate::router::SubscriptionRouter;
use crate::store::EntityStore;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use url::Url;

/// Client for one hub: owns the connection, the entity store, the command
/// dispatcher and the polling fallback.
///
/// Construct exactly one per hub and hand clones/references to consumers —
/// the socket and the entity map are single-owner resources, and nothing else
/// may open a competing connection. `init()` brings the engine up;
/// `teardown()` shuts it down.
pub struct HearthClient {
    config: HearthConfig,
    connection: ConnectionManager,
    store: EntityStore,
    router: SubscriptionRouter,
    rest: RestClient,
    dispatcher: CommandDispatcher,
    poller: PollingFallback,
    event_rx: Mutex<Option<mpsc::Receiver<StateChange>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HearthClient {
    /// `ws_url` is the hub's event feed (`ws://hub:8123/api/websocket`),
    /// `api_url` its REST root (`http://hub:8123/api`). When running behind a
    /// reverse proxy that injects the bearer token, point both URLs at the
    /// proxy; the token is still needed for the WebSocket auth handshake.
    pub fn new(
        ws_url: impl Into<String>,
        api_url: Url,
        access_token: impl Into<String>,
        config: HearthConfig,
    ) -> Self {
        let access_token = access_token.into();
        let (event_tx, event_rx) = mpsc::channel(256);

        let store = EntityStore::new();
        let router = SubscriptionRouter::new();
        let rest = RestClient::new(api_url, Some(access_token.clone()));
        let connection =
            ConnectionManager::new(ws_url, access_token, config.clone().into(), event_tx);
        let dispatcher = CommandDispatcher::new(store.clone(), rest.clone());
        let poller = PollingFallback::new(rest.clone(), store.clone());

        Self {
            config,
            connection,
            store,
            router,
            rest,
            dispatcher,
            poller,
            event_rx: Mutex::new(Some(event_rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Bring the engine up: connect, hydrate the store from `GET /states`,
    /// and start pumping events.
    ///
    /// A transient connection failure is not fatal — the polling fallback
    /// takes over the hydration role and `init` still returns `Ok`. A
    /// rejected token is a configuration error and surfaces as
    /// [`HearthError::AuthInvalid`] without starting the fallback.
    pub async fn init(&self) -> Result<(), HearthError> {
        self.spawn_event_pump().await;

        match self.connection.connect().await {
            Ok(()) => {
                match self.rest.states().await {
                    Ok(states) => self.store.hydrate(states).await,
                    // Keep whatever we have; the next resync will catch up.
                    Err(err) => tracing::warn!(%err, "initial discovery failed"),
                }
                Ok(())
            }
            Err(HearthError::AuthInvalid) => Err(HearthError::AuthInvalid),
            Err(err) => {
                tracing::warn!(%err, "real-time feed unavailable, starting polling fallback");
                self.poller.start(self.config.poll_interval).await;
                Ok(())
            }
        }
    }

    /// Stop the engine: close the socket, stop polling, drop all listeners.
    pub async fn teardown(&self) {
        self.connection.disconnect().await;
        self.poller.stop().await;
        self.router.clear();
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
    }

    /// Deliver events to the store and the router, in arrival order, and keep
    /// the polling fallback mutually exclusive with the live feed.
    async fn spawn_event_pump(&self) {
        let Some(mut event_rx) = self.event_rx.lock().await.take() else {
            return; // already initialized
        };

        let store = self.store.clone();
        let router = self.router.clone();
        let pump = tokio::spawn(async move {
            while let Some(change) = event_rx.recv().await {
                store.apply_event(&change).await;
                router.dispatch(&change);
            }
        });

        let mut state_rx = self.connection.watch_state();
        let poller = self.poller.clone();
        let rest = self.rest.clone();
        let store = self.store.clone();
        let poll_interval = self.config.poll_interval;
        let supervisor = tokio::spawn(async move {
            // Set once the feed has been lost; cleared by the resync that
            // runs when it comes back.
            let mut resync_needed = false;
            loop {
                let state = *state_rx.borrow_and_update();
                match state {
                    ConnectionState::Failed => {
                        poller.start(poll_interval).await;
                        resync_needed = true;
                    }
                    ConnectionState::Reconnecting { .. } => {
                        resync_needed = true;
                    }
                    ConnectionState::Connected => {
                        poller.stop().await;
                        if resync_needed {
                            resync_needed = false;
                            match rest.states().await {
                                Ok(states) => store.hydrate(states).await,
                                Err(err) => {
                                    tracing::warn!(%err, "resync after reconnect failed")
                                }
                            }
                        }
                    }
                    _ => {}
                }
                if state_rx.changed().await.is_err() {
                    return;
                }
            }
        });

        self.tasks.lock().await.extend([pump, supervisor]);
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn router(&self) -> &SubscriptionRouter {
        &self.router
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub async fn is_polling(&self) -> bool {
        self.poller.is_running().await
    }
}
