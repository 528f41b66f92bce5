//! Translation of user intents into hub service calls, with optimistic local
//! updates.

use crate::entity::{domain_of, EntityPatch};
use crate::error::HearthError;
use crate::rest::RestClient;
use crate::store::EntityStore;
use serde_json::{json, Value};

/// A user-facing action on one entity, carrying its parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Turn a light or switch on. `brightness` is 0-100 per cent; the hub
    /// wants 0-255, the scaling happens here.
    TurnOn {
        brightness: Option<u8>,
        hs_color: Option<(f64, f64)>,
    },
    TurnOff,
    /// Target temperature for a climate entity.
    SetTemperature(f64),
    SetHvacMode(String),
    Arm(ArmMode),
    Disarm,
    Lock,
    Unlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmMode {
    Home,
    Away,
    Night,
}

impl ArmMode {
    fn service(self) -> &'static str {
        match self {
            ArmMode::Home => "alarm_arm_home",
            ArmMode::Away => "alarm_arm_away",
            ArmMode::Night => "alarm_arm_night",
        }
    }

    fn target_state(self) -> &'static str {
        match self {
            ArmMode::Home => "armed_home",
            ArmMode::Away => "armed_away",
            ArmMode::Night => "armed_night",
        }
    }
}

fn scale_brightness(percent: u8) -> u64 {
    ((f64::from(percent.min(100)) / 100.0) * 255.0).round() as u64
}

impl Intent {
    /// The `(domain, service, params)` triple for the hub's command endpoint.
    pub fn service_call(&self, entity_id: &str) -> (String, &'static str, Value) {
        match self {
            Intent::TurnOn {
                brightness,
                hs_color,
            } => {
                let mut params = json!({ "entity_id": entity_id });
                // Lights take brightness/color; switches take a bare turn_on.
                if domain_of(entity_id) == "light" {
                    if let Some(percent) = brightness {
                        params["brightness"] = json!(scale_brightness(*percent));
                    }
                    if let Some((h, s)) = hs_color {
                        params["hs_color"] = json!([h, s]);
                    }
                }
                (domain_of(entity_id).to_string(), "turn_on", params)
            }
            Intent::TurnOff => (
                domain_of(entity_id).to_string(),
                "turn_off",
                json!({ "entity_id": entity_id }),
            ),
            Intent::SetTemperature(temperature) => (
                "climate".to_string(),
                "set_temperature",
                json!({ "entity_id": entity_id, "temperature": temperature }),
            ),
            Intent::SetHvacMode(mode) => (
                "climate".to_string(),
                "set_hvac_mode",
                json!({ "entity_id": entity_id, "hvac_mode": mode }),
            ),
            Intent::Arm(mode) => (
                "alarm_control_panel".to_string(),
                mode.service(),
                json!({ "entity_id": entity_id }),
            ),
            Intent::Disarm => (
                "alarm_control_panel".to_string(),
                "alarm_disarm",
                json!({ "entity_id": entity_id }),
            ),
            Intent::Lock => (
                "lock".to_string(),
                "lock",
                json!({ "entity_id": entity_id }),
            ),
            Intent::Unlock => (
                "lock".to_string(),
                "unlock",
                json!({ "entity_id": entity_id }),
            ),
        }
    }

    /// The local patch applied before the remote call is issued.
    pub fn optimistic_patch(&self, entity_id: &str) -> EntityPatch {
        match self {
            Intent::TurnOn {
                brightness,
                hs_color,
            } => {
                let mut patch = EntityPatch::state("on");
                if domain_of(entity_id) == "light" {
                    if let Some(percent) = brightness {
                        patch = patch.with_attribute("brightness", scale_brightness(*percent));
                    }
                    if let Some((h, s)) = hs_color {
                        patch = patch.with_attribute("hs_color", json!([h, s]));
                    }
                }
                patch
            }
            Intent::TurnOff => EntityPatch::state("off"),
            Intent::SetTemperature(temperature) => {
                EntityPatch::default().with_attribute("temperature", *temperature)
            }
            Intent::SetHvacMode(mode) => {
                EntityPatch::state(mode.clone()).with_attribute("hvac_mode", mode.clone())
            }
            Intent::Arm(mode) => EntityPatch::state(mode.target_state()),
            Intent::Disarm => EntityPatch::state("disarmed"),
            Intent::Lock => EntityPatch::state("locked"),
            Intent::Unlock => EntityPatch::state("unlocked"),
        }
    }
}

/// Outcome of a bulk fan-out; failures never abort the remaining entities.
#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub ok: Vec<String>,
    pub failed: Vec<(String, HearthError)>,
}

impl BulkOutcome {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Turns intents into authoritative remote calls.
#[derive(Clone)]
pub struct CommandDispatcher {
    store: EntityStore,
    rest: RestClient,
}

impl CommandDispatcher {
    pub fn new(store: EntityStore, rest: RestClient) -> Self {
        Self { store, rest }
    }

    /// Execute `intent` against one entity.
    ///
    /// The optimistic patch lands in the store before the remote call is
    /// issued, so readers see the change with no round-trip latency. On
    /// success the optimistic state stays in place; the authoritative
    /// `state_changed` event arrives later and overwrites it with the same or
    /// a refined value. On failure the touched fields revert to their
    /// pre-command snapshot and the error surfaces to the caller.
    ///
    /// Safe to retry, and safe to issue concurrently for the same entity:
    /// each call rolls back against its own snapshot, and the last call to
    /// resolve wins the final value.
    pub async fn execute(&self, entity_id: &str, intent: Intent) -> Result<(), HearthError> {
        let patch = intent.optimistic_patch(entity_id);
        let snapshot = self.store.snapshot(entity_id, &patch).await;
        self.store.merge(entity_id, patch).await;

        let (domain, service, params) = intent.service_call(entity_id);
        match self.rest.call_service(&domain, service, &params).await {
            Ok(_) => Ok(()),
            Err(err) => {
                tracing::warn!(entity_id, %err, "command failed, rolling back optimistic update");
                self.store.rollback(snapshot).await;
                match err {
                    cmd @ HearthError::Command { .. } => Err(cmd),
                    other => Err(HearthError::Command {
                        entity_id: entity_id.to_string(),
                        reason: other.to_string(),
                    }),
                }
            }
        }
    }

    /// Fan out one `execute` per entity ("all on" / "all off").
    ///
    /// All calls settle; a failure on one entity rolls back that entity only
    /// and is reported in the outcome, it does not stop the others.
    pub async fn execute_bulk(&self, entity_ids: &[String], intent: Intent) -> BulkOutcome {
        let calls = entity_ids.iter().map(|entity_id| {
            let intent = intent.clone();
            async move { (entity_id.clone(), self.execute(entity_id, intent).await) }
        });

        let mut outcome = BulkOutcome::default();
        for (entity_id, result) in futures_util::future::join_all(calls).await {
            match result {
                Ok(()) => outcome.ok.push(entity_id),
                Err(err) => outcome.failed.push((entity_id, err)),
            }
        }
        outcome
    }
}
