use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One controllable or observable device exposed by the hub.
///
/// `state` is the domain-specific primary status. The hub sends strings for
/// things like on/off and mode names and numbers for sensor readings, so it
/// is kept as a raw JSON value. `attributes` is an open map of secondary
/// properties (brightness, target temperature, friendly name, ...) whose
/// schema varies by entity domain and is not enumerable in advance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: Value,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl EntityState {
    pub fn new(entity_id: impl Into<String>, state: impl Into<Value>) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Domain prefix of the entity id (`light` for `light.kitchen`).
    pub fn domain(&self) -> &str {
        domain_of(&self.entity_id)
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

/// Domain prefix of an entity id; the whole id if it carries no `.`.
pub fn domain_of(entity_id: &str) -> &str {
    entity_id.split('.').next().unwrap_or(entity_id)
}

/// A partial update to one entity.
///
/// Fields left `None` are untouched by a merge. `attributes` merges
/// field-by-field into the stored map rather than replacing it, so an event
/// that mentions only `brightness` does not discard `friendly_name`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityPatch {
    pub state: Option<Value>,
    pub attributes: Option<Map<String, Value>>,
}

impl EntityPatch {
    pub fn state(value: impl Into<Value>) -> Self {
        Self {
            state: Some(value.into()),
            attributes: None,
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes
            .get_or_insert_with(Map::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.attributes.as_ref().map_or(true, |a| a.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn domain_is_prefix_before_dot() {
        assert_eq!(domain_of("light.kitchen"), "light");
        assert_eq!(domain_of("alarm_control_panel.home"), "alarm_control_panel");
        assert_eq!(domain_of("nodot"), "nodot");
    }

    #[test]
    fn entity_deserializes_hub_record() {
        let entity: EntityState = serde_json::from_value(json!({
            "entity_id": "climate.living_room",
            "state": "heat",
            "attributes": {"temperature": 21.5, "friendly_name": "Living Room"}
        }))
        .unwrap();

        assert_eq!(entity.domain(), "climate");
        assert_eq!(entity.attribute("temperature"), Some(&json!(21.5)));
    }

    #[test]
    fn missing_attributes_default_to_empty() {
        let entity: EntityState = serde_json::from_value(json!({
            "entity_id": "sensor.outside",
            "state": 12.3
        }))
        .unwrap();

        assert!(entity.attributes.is_empty());
        assert_eq!(entity.state, json!(12.3));
    }
}
