//! Periodic full-resync path used while the real-time feed is unavailable.

use crate::rest::RestClient;
use crate::store::EntityStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Recurring `GET /states` -> hydrate cycle.
///
/// Runs only while the connection manager reports a permanently disconnected
/// state; the client's supervisor stops it the moment the feed comes back, so
/// push and poll never write concurrently for the same entities. Resyncs go
/// through the same store operations as live events.
#[derive(Clone)]
pub struct PollingFallback {
    rest: RestClient,
    store: EntityStore,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PollingFallback {
    pub fn new(rest: RestClient, store: EntityStore) -> Self {
        Self {
            rest,
            store,
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// Begin recurring full resyncs, starting with an immediate one.
    /// Idempotent: a second `start` while running is a no-op.
    pub async fn start(&self, interval: Duration) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        tracing::info!(?interval, "falling back to polling mode");
        let rest = self.rest.clone();
        let store = self.store.clone();
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match rest.states().await {
                    Ok(states) => store.hydrate(states).await,
                    // A failed poll leaves the last-known-good contents in place.
                    Err(err) => tracing::warn!(%err, "poll cycle failed"),
                }
            }
        }));
    }

    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            tracing::info!("stopped polling");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}
