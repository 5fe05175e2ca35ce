//! Event dispatch tables
//!
//! Every machine type declares which inbound event names it understands and
//! how each one turns a validated payload into the next state. Names missing
//! from the table are rejected explicitly.

use std::collections::HashMap;
use std::fmt;

use qc_protocol::{validate_event_name, MachineIdentification, RawEvent};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ControlError, Result};

type Reducer<S> = Box<dyn Fn(&Value, Option<&S>) -> serde_json::Result<S> + Send + Sync>;

/// Event name to reducer mapping for one machine type
pub struct EventTable<S> {
    handlers: HashMap<&'static str, Reducer<S>>,
}

impl<S> Default for EventTable<S> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<S> fmt::Debug for EventTable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("EventTable").field("events", &names).finish()
    }
}

impl<S: 'static> EventTable<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` with a payload schema `P` and a reducer folding it
    /// into the previous state
    pub fn on<P, F>(mut self, name: &'static str, reduce: F) -> Self
    where
        P: DeserializeOwned + 'static,
        F: Fn(P, Option<&S>) -> S + Send + Sync + 'static,
    {
        self.handlers.insert(
            name,
            Box::new(move |data: &Value, current: Option<&S>| {
                let payload = P::deserialize(data)?;
                Ok(reduce(payload, current))
            }),
        );
        self
    }

    /// Register `name` as a full snapshot of the state
    pub fn snapshot(self, name: &'static str) -> Self
    where
        S: DeserializeOwned,
    {
        self.on::<S, _>(name, |state, _| state)
    }

    pub fn handles(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn event_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    /// Check that `name` is well formed and has a handler.
    ///
    /// A malformed name breaks the event contract and fails like a payload
    /// would; a well formed but unknown name is unhandled.
    pub fn accepts(&self, name: &str) -> Result<()> {
        validate_event_name(name).map_err(|reason| ControlError::schema(name, reason))?;
        if self.handles(name) {
            Ok(())
        } else {
            Err(ControlError::unhandled(name))
        }
    }

    /// Validate `event` and compute the resulting state
    pub fn dispatch(&self, event: &RawEvent, current: Option<&S>) -> Result<S> {
        self.accepts(&event.name)?;
        let reduce = self
            .handlers
            .get(event.name.as_str())
            .ok_or_else(|| ControlError::unhandled(&event.name))?;

        reduce(&event.data, current).map_err(|e| ControlError::schema(&event.name, e.to_string()))
    }
}

/// A machine type's client-side protocol surface
pub trait MachineNamespace: Send + Sync + 'static {
    /// Authoritative state pushed by the server
    type State: Clone
        + PartialEq
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// Adjacently tagged (`action` / `value`) mutation vocabulary
    type Mutation: Serialize + fmt::Debug + Send + Sync;

    const MACHINE_IDENTIFICATION: MachineIdentification;

    const SLUG: &'static str;

    fn event_table() -> EventTable<Self::State>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Counter {
        total: u32,
    }

    #[derive(Deserialize)]
    struct Increment {
        by: u32,
    }

    fn table() -> EventTable<Counter> {
        EventTable::new()
            .snapshot("StateEvent")
            .on("IncrementEvent", |p: Increment, current: Option<&Counter>| Counter {
                total: current.map_or(0, |c| c.total) + p.by,
            })
    }

    #[test]
    fn test_snapshot_replaces_state() {
        let event = RawEvent::new("StateEvent", json!({"total": 9}));
        let next = table().dispatch(&event, Some(&Counter { total: 1 })).unwrap();
        assert_eq!(next, Counter { total: 9 });
    }

    #[test]
    fn test_reducer_folds_previous_state() {
        let event = RawEvent::new("IncrementEvent", json!({"by": 3}));
        let next = table().dispatch(&event, Some(&Counter { total: 4 })).unwrap();
        assert_eq!(next.total, 7);
    }

    #[test]
    fn test_unknown_name_is_unhandled() {
        let event = RawEvent::new("Unknown", json!({}));
        let err = table().dispatch(&event, None).unwrap_err();
        assert!(matches!(err, ControlError::UnhandledEvent { ref event } if event == "Unknown"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_malformed_name_is_schema_failure() {
        let event = RawEvent::new("State Event", json!({"total": 1}));
        let err = table().dispatch(&event, None).unwrap_err();
        assert!(err.is_fatal());
        assert!(table().accepts("IncrementEvent").is_ok());
        assert!(matches!(
            table().accepts("Unknown"),
            Err(ControlError::UnhandledEvent { .. })
        ));
        assert!(table().accepts("").unwrap_err().is_fatal());
    }

    #[test]
    fn test_bad_payload_is_schema_failure() {
        let event = RawEvent::new("StateEvent", json!({"total": "nine"}));
        let err = table().dispatch(&event, None).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().starts_with("Event StateEvent failed schema validation"));
    }
}
