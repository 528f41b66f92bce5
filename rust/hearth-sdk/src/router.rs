//! Fan-out of state-change events to registered listeners.

use crate::protocol::StateChange;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// Where a subscriber wants to listen.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Events for one specific entity id.
    Entity(String),
    /// Every state-change event regardless of entity.
    AllChanges,
}

impl Channel {
    pub fn entity(id: impl Into<String>) -> Self {
        Channel::Entity(id.into())
    }
}

pub type EventCallback = Arc<dyn Fn(&StateChange) + Send + Sync>;

/// Returned by [`SubscriptionRouter::subscribe`]; pass it back to
/// [`SubscriptionRouter::unsubscribe`] to revoke exactly that callback
/// without touching other listeners on the same channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle(u64);

#[derive(Default)]
struct RouterInner {
    next_id: u64,
    channels: HashMap<Channel, Vec<(u64, EventCallback)>>,
}

/// Maps incoming events to the registered interest list.
///
/// Dispatch is synchronous and in arrival order: the listeners on the
/// event's [`Channel::Entity`] channel fire first (in registration order),
/// then the [`Channel::AllChanges`] listeners. Both may fire for the same
/// event. A panicking callback is isolated and logged; the remaining
/// callbacks still run.
#[derive(Clone, Default)]
pub struct SubscriptionRouter {
    inner: Arc<Mutex<RouterInner>>,
}

impl SubscriptionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        channel: Channel,
        callback: impl Fn(&StateChange) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let mut inner = self.inner.lock().expect("router lock poisoned");
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .channels
            .entry(channel)
            .or_default()
            .push((id, Arc::new(callback)));
        SubscriptionHandle(id)
    }

    /// Remove one callback. Returns whether it was still registered.
    pub fn unsubscribe(&self, channel: &Channel, handle: SubscriptionHandle) -> bool {
        let mut inner = self.inner.lock().expect("router lock poisoned");
        let Some(callbacks) = inner.channels.get_mut(channel) else {
            return false;
        };
        let before = callbacks.len();
        callbacks.retain(|(id, _)| *id != handle.0);
        let removed = callbacks.len() != before;
        if callbacks.is_empty() {
            inner.channels.remove(channel);
        }
        removed
    }

    /// Drop every registration. Used at client teardown.
    pub fn clear(&self) {
        self.inner.lock().expect("router lock poisoned").channels.clear();
    }

    pub fn subscriber_count(&self, channel: &Channel) -> usize {
        self.inner
            .lock()
            .expect("router lock poisoned")
            .channels
            .get(channel)
            .map_or(0, Vec::len)
    }

    /// Deliver one event to every matching listener.
    pub fn dispatch(&self, change: &StateChange) {
        // Snapshot the callback list so listeners can (un)subscribe from
        // inside a callback without deadlocking.
        let callbacks: Vec<EventCallback> = {
            let inner = self.inner.lock().expect("router lock poisoned");
            let entity_channel = Channel::Entity(change.entity_id.clone());
            inner
                .channels
                .get(&entity_channel)
                .into_iter()
                .chain(inner.channels.get(&Channel::AllChanges))
                .flatten()
                .map(|(_, cb)| cb.clone())
                .collect()
        };

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(change))).is_err() {
                tracing::error!(entity_id = %change.entity_id, "subscriber callback panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn change(entity_id: &str) -> StateChange {
        StateChange {
            entity_id: entity_id.into(),
            new_state: None,
            old_state: None,
        }
    }

    #[test]
    fn entity_and_wildcard_listeners_both_fire() {
        let router = SubscriptionRouter::new();
        let entity_hits = Arc::new(AtomicUsize::new(0));
        let wildcard_hits = Arc::new(AtomicUsize::new(0));

        let hits = entity_hits.clone();
        router.subscribe(Channel::entity("light.a"), move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
        let hits = wildcard_hits.clone();
        router.subscribe(Channel::AllChanges, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });

        router.dispatch(&change("light.a"));
        router.dispatch(&change("light.b"));

        assert_eq!(entity_hits.load(Ordering::SeqCst), 1);
        assert_eq!(wildcard_hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_leaves_other_listeners_on_the_channel() {
        let router = SubscriptionRouter::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let hits = first.clone();
        let handle = router.subscribe(Channel::entity("light.a"), move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
        let hits = second.clone();
        router.subscribe(Channel::entity("light.a"), move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });

        assert!(router.unsubscribe(&Channel::entity("light.a"), handle));
        assert!(!router.unsubscribe(&Channel::entity("light.a"), handle));
        router.dispatch(&change("light.a"));

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_callback_does_not_block_the_rest() {
        let router = SubscriptionRouter::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        router.subscribe(Channel::AllChanges, |_| panic!("subscriber bug"));
        let hits = delivered.clone();
        router.subscribe(Channel::AllChanges, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });

        router.dispatch(&change("light.a"));

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delivery_follows_registration_order() {
        let router = SubscriptionRouter::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            router.subscribe(Channel::AllChanges, move |_| {
                order.lock().unwrap().push(tag);
            });
        }

        router.dispatch(&change("light.a"));

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn clear_drops_everything() {
        let router = SubscriptionRouter::new();
        router.subscribe(Channel::AllChanges, |_| {});
        router.subscribe(Channel::entity("light.a"), |_| {});

        router.clear();

        assert_eq!(router.subscriber_count(&Channel::AllChanges), 0);
        assert_eq!(router.subscriber_count(&Channel::entity("light.a")), 0);
    }
}
