//! Change detection between consecutive status documents.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::status::StatusMap;

/// Which fields of an object a client asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldFilter {
    All,
    Fields(Vec<String>),
}

/// `{"objects": {"toolhead": null, "extruder": ["temperature"]}}`, parsed.
pub type ObjectRequest = BTreeMap<String, FieldFilter>;

/// Restrict a status document to the requested objects and fields.
/// Requested objects that do not exist are omitted.
pub fn filter_status(status: &StatusMap, request: &ObjectRequest) -> StatusMap {
    let mut filtered = Map::new();
    for (object, filter) in request {
        let Some(Value::Object(fields)) = status.get(object) else {
            continue;
        };
        let selected = match filter {
            FieldFilter::All => fields.clone(),
            FieldFilter::Fields(names) => fields
                .iter()
                .filter(|(k, _)| names.iter().any(|n| n == *k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        filtered.insert(object.clone(), Value::Object(selected));
    }
    filtered
}

/// Remembers the last document sent and produces deltas against it.
#[derive(Debug, Default)]
pub struct StatusEmitter {
    last: StatusMap,
    subscription: Option<ObjectRequest>,
}

impl StatusEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a baseline without emitting anything.
    pub fn prime(&mut self, status: StatusMap) {
        self.last = status;
    }

    /// Limit future deltas to these objects. `None` means everything.
    pub fn set_subscription(&mut self, subscription: Option<ObjectRequest>) {
        self.subscription = subscription;
    }

    pub fn subscription(&self) -> Option<&ObjectRequest> {
        self.subscription.as_ref()
    }

    /// Fields of `current` that differ from the last document, plus any
    /// `forced` (object, field) pairs regardless of change. The baseline
    /// always advances to `current`, including objects the subscription
    /// hides. Returns `None` when nothing is left to send.
    pub fn diff(&mut self, current: StatusMap, forced: &[(String, &'static str)]) -> Option<StatusMap> {
        let mut delta = Map::new();
        for (object, value) in &current {
            let Value::Object(fields) = value else {
                continue;
            };
            let previous = match self.last.get(object) {
                Some(Value::Object(prev)) => Some(prev),
                _ => None,
            };
            let changed: Map<String, Value> = fields
                .iter()
                .filter(|(field, v)| {
                    let is_forced = forced.iter().any(|(o, f)| o == object && *f == field.as_str());
                    is_forced || previous.and_then(|p| p.get(field.as_str())) != Some(*v)
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if !changed.is_empty() {
                delta.insert(object.clone(), Value::Object(changed));
            }
        }
        self.last = current;

        if let Some(subscription) = &self.subscription {
            delta = filter_status(&delta, subscription);
            delta.retain(|_, v| v.as_object().is_some_and(|o| !o.is_empty()));
        }
        if delta.is_empty() { None } else { Some(delta) }
    }
}
