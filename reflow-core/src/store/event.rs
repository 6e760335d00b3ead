//! Events and Snapshots
//!
//! An event is the only way state enters the store: a typed message with an
//! arbitrary payload, optionally naming explicit target atoms to process
//! regardless of type-based indexing. Targets carry direct invalidation and
//! initialization, and let an event reach atoms with no statically-known
//! reactive type.
//!
//! A snapshot is the ordered name → value mapping produced by the snapshot
//! collector. The same shape is accepted at store construction as a seed:
//! the computation step consults it on an atom's first computation, so a
//! collected snapshot can rehydrate a fresh store.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::AtomId;

/// A typed message dispatched into the store.
///
/// # Example
///
/// ```
/// use reflow_core::Event;
/// use serde_json::json;
///
/// let event = Event::new("inc", json!(null));
/// assert_eq!(event.event_type, "inc");
/// assert!(event.targets.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The event type, matched against the reverse index.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Arbitrary payload, interpreted only by the computation step.
    #[serde(default)]
    pub payload: Value,
    /// Atoms to process regardless of type-based indexing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<AtomId>,
}

impl Event {
    /// Create an event with no explicit targets.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            targets: Vec::new(),
        }
    }

    /// Add an explicit target atom.
    pub fn with_target(mut self, atom: AtomId) -> Self {
        self.targets.push(atom);
        self
    }

    /// Whether `atom` is an explicit target of this event.
    pub fn targets_atom(&self, atom: AtomId) -> bool {
        self.targets.contains(&atom)
    }
}

/// Ordered mapping from atom name to state value.
///
/// Output of the snapshot collector and seed input for a new store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    entries: IndexMap<String, Value>,
}

impl Snapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed value for an atom name, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    /// Insert or replace an entry.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.entries.insert(name.into(), value);
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Value)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
