//! In-memory mirror of hub entity state.
//!
//! The store is the single write target for every authoritative update path:
//! the live event feed, the polling fallback, and optimistic command patches
//! all funnel through [`EntityStore::merge`] / [`EntityStore::hydrate`].
//! Mutations replace whole entity records under the write lock, so readers
//! observe either the pre- or post-merge record, never a partially applied
//! one.

use crate::entity::{domain_of, EntityPatch, EntityState};
use crate::protocol::StateChange;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Map from entity id to last-known-good state. Cheaply clonable handle; all
/// clones share the same map.
#[derive(Clone, Default)]
pub struct EntityStore {
    entities: Arc<RwLock<HashMap<String, EntityState>>>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the full known set. Used after initial discovery and after
    /// every poll cycle; entities absent from `entities` are dropped.
    pub async fn hydrate(&self, entities: Vec<EntityState>) {
        tracing::debug!(count = entities.len(), "hydrating entity store");
        let mut map = self.entities.write().await;
        *map = entities
            .into_iter()
            .map(|e| (e.entity_id.clone(), e))
            .collect();
    }

    /// Apply a partial update, creating the entity if it has not been seen.
    ///
    /// Patch fields overwrite matching fields; fields absent from the patch
    /// keep their stored value. The attribute map merges shallowly so an
    /// update mentioning only `brightness` leaves `friendly_name` intact.
    pub async fn merge(&self, entity_id: &str, patch: EntityPatch) {
        let mut map = self.entities.write().await;
        let mut next = map
            .get(entity_id)
            .cloned()
            .unwrap_or_else(|| EntityState::new(entity_id, Value::Null));

        if let Some(state) = patch.state {
            next.state = state;
        }
        if let Some(attributes) = patch.attributes {
            for (name, value) in attributes {
                next.attributes.insert(name, value);
            }
        }

        map.insert(entity_id.to_string(), next);
    }

    /// Apply one authoritative `state_changed` notification.
    ///
    /// Shared by the push feed and the polling fallback so both take the same
    /// merge path. A removal (`new_state: null`) keeps the last-known-good
    /// record; the canonical entity persists on the hub regardless.
    pub async fn apply_event(&self, change: &StateChange) {
        match &change.new_state {
            Some(new_state) => {
                self.merge(
                    &change.entity_id,
                    EntityPatch {
                        state: Some(new_state.state.clone()),
                        attributes: Some(new_state.attributes.clone()),
                    },
                )
                .await;
            }
            None => {
                tracing::debug!(entity_id = %change.entity_id, "entity removed on hub, keeping local record");
            }
        }
    }

    pub async fn get(&self, entity_id: &str) -> Option<EntityState> {
        self.entities.read().await.get(entity_id).cloned()
    }

    pub async fn all(&self) -> Vec<EntityState> {
        self.entities.read().await.values().cloned().collect()
    }

    /// All entities whose id carries the given domain prefix
    /// (`all_in_domain("light")` -> `light.*`). No guaranteed order.
    pub async fn all_in_domain(&self, domain: &str) -> Vec<EntityState> {
        self.entities
            .read()
            .await
            .values()
            .filter(|e| domain_of(&e.entity_id) == domain)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }

    /// Capture the prior values of exactly the fields `patch` would change.
    ///
    /// Each command takes its own snapshot before applying its optimistic
    /// patch; a failed command hands it back to [`EntityStore::rollback`].
    pub async fn snapshot(&self, entity_id: &str, patch: &EntityPatch) -> CommandSnapshot {
        let map = self.entities.read().await;
        match map.get(entity_id) {
            Some(current) => CommandSnapshot {
                entity_id: entity_id.to_string(),
                existed: true,
                prior_state: patch.state.as_ref().map(|_| current.state.clone()),
                prior_attributes: patch
                    .attributes
                    .as_ref()
                    .map(|attrs| {
                        attrs
                            .keys()
                            .map(|name| (name.clone(), current.attributes.get(name).cloned()))
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            None => CommandSnapshot {
                entity_id: entity_id.to_string(),
                existed: false,
                prior_state: None,
                prior_attributes: Vec::new(),
            },
        }
    }

    /// Revert the fields captured in `snapshot` to their pre-command values.
    ///
    /// Attributes the optimistic patch introduced are removed again; if the
    /// entity did not exist before the command, the whole record is removed.
    pub async fn rollback(&self, snapshot: CommandSnapshot) {
        let mut map = self.entities.write().await;

        if !snapshot.existed {
            map.remove(&snapshot.entity_id);
            return;
        }

        let Some(current) = map.get(&snapshot.entity_id) else {
            return;
        };
        let mut next = current.clone();

        if let Some(state) = snapshot.prior_state {
            next.state = state;
        }
        for (name, prior) in snapshot.prior_attributes {
            match prior {
                Some(value) => {
                    next.attributes.insert(name, value);
                }
                None => {
                    next.attributes.remove(&name);
                }
            }
        }

        map.insert(snapshot.entity_id, next);
    }
}

/// Prior values of the fields one command's optimistic patch changed.
#[derive(Debug, Clone)]
pub struct CommandSnapshot {
    entity_id: String,
    existed: bool,
    prior_state: Option<Value>,
    prior_attributes: Vec<(String, Option<Value>)>,
}
