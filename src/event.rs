//! Events and pattern matches.
//!
//! Primitive events are immutable and shared by every partial match that
//! contains them. Identity (pointer identity of the shared `Arc`) is what the
//! engine uses to detect that the same event was combined twice.

use crate::pattern::PatternId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Event time.
pub type Timestamp = DateTime<Utc>;

/// Attribute map carried by each event.
pub type Payload = serde_json::Map<String, Value>;

/// Events are shared between every partial match that refers to them.
pub type SharedEvent = Arc<Event>;

/// Partial matches are shared between node storage and parent delivery queues.
pub type SharedMatch = Arc<PatternMatch>;

/// A primitive input event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Type name matched against the primitive event types of a pattern
    pub event_type: String,

    /// Event time
    pub timestamp: Timestamp,

    /// Event attributes
    #[serde(default)]
    pub payload: Payload,

    /// Occurrence probability, present only on probabilistic streams
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,

    /// Arrival index within the stream, assigned by the engine on ingestion
    #[serde(default)]
    pub index: u64,
}

impl Event {
    pub fn new(event_type: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp,
            payload: Payload::new(),
            probability: None,
            index: 0,
        }
    }

    /// Add a single attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(name.into(), value.into());
        self
    }

    /// Replace the whole payload.
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Mark the event as uncertain.
    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = Some(probability);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }
}

/// A group of primitive events standing in for one Kleene-closure slot.
#[derive(Debug, Clone)]
pub struct AggregatedEvent {
    pub event_type: String,
    events: Vec<SharedEvent>,
    first_timestamp: Timestamp,
    last_timestamp: Timestamp,
    probability: Option<f64>,
}

impl AggregatedEvent {
    /// Build a group from its member events in arrival order.
    ///
    /// Returns `None` for an empty group. The joint probability is the product
    /// of the member probabilities that are present.
    pub fn new(event_type: impl Into<String>, events: Vec<SharedEvent>) -> Option<Self> {
        let first_timestamp = events.iter().map(|e| e.timestamp).min()?;
        let last_timestamp = events.iter().map(|e| e.timestamp).max()?;
        let probability = events
            .iter()
            .map(|e| e.probability)
            .fold(None, joint_probability);
        Some(Self {
            event_type: event_type.into(),
            events,
            first_timestamp,
            last_timestamp,
            probability,
        })
    }

    pub fn events(&self) -> &[SharedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn first_timestamp(&self) -> Timestamp {
        self.first_timestamp
    }

    pub fn last_timestamp(&self) -> Timestamp {
        self.last_timestamp
    }

    pub fn probability(&self) -> Option<f64> {
        self.probability
    }
}

/// The content of one slot of a pattern match.
#[derive(Debug, Clone)]
pub enum MatchEvent {
    Primitive(SharedEvent),
    Aggregated(Arc<AggregatedEvent>),
}

impl MatchEvent {
    pub fn event_type(&self) -> &str {
        match self {
            MatchEvent::Primitive(event) => &event.event_type,
            MatchEvent::Aggregated(group) => &group.event_type,
        }
    }

    pub fn first_timestamp(&self) -> Timestamp {
        match self {
            MatchEvent::Primitive(event) => event.timestamp,
            MatchEvent::Aggregated(group) => group.first_timestamp(),
        }
    }

    pub fn last_timestamp(&self) -> Timestamp {
        match self {
            MatchEvent::Primitive(event) => event.timestamp,
            MatchEvent::Aggregated(group) => group.last_timestamp(),
        }
    }

    pub fn probability(&self) -> Option<f64> {
        match self {
            MatchEvent::Primitive(event) => event.probability,
            MatchEvent::Aggregated(group) => group.probability(),
        }
    }

    /// The primitive events behind this slot, in arrival order.
    pub fn primitives(&self) -> &[SharedEvent] {
        match self {
            MatchEvent::Primitive(event) => std::slice::from_ref(event),
            MatchEvent::Aggregated(group) => group.events(),
        }
    }

    pub fn is_aggregated(&self) -> bool {
        matches!(self, MatchEvent::Aggregated(_))
    }
}

impl From<SharedEvent> for MatchEvent {
    fn from(event: SharedEvent) -> Self {
        MatchEvent::Primitive(event)
    }
}

/// A (partial or complete) match of a pattern.
#[derive(Debug, Clone)]
pub struct PatternMatch {
    events: Vec<MatchEvent>,
    first_timestamp: Timestamp,
    last_timestamp: Timestamp,
    probability: Option<f64>,
    pattern_ids: Vec<PatternId>,
}

impl PatternMatch {
    pub fn new(events: Vec<MatchEvent>, probability: Option<f64>) -> Self {
        let first_timestamp = events
            .iter()
            .map(MatchEvent::first_timestamp)
            .min()
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let last_timestamp = events
            .iter()
            .map(MatchEvent::last_timestamp)
            .max()
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self {
            events,
            first_timestamp,
            last_timestamp,
            probability,
            pattern_ids: Vec::new(),
        }
    }

    /// Single-event match produced by a leaf.
    pub fn from_event(event: SharedEvent) -> Self {
        let probability = event.probability;
        Self::new(vec![MatchEvent::Primitive(event)], probability)
    }

    pub fn events(&self) -> &[MatchEvent] {
        &self.events
    }

    pub fn first_timestamp(&self) -> Timestamp {
        self.first_timestamp
    }

    pub fn last_timestamp(&self) -> Timestamp {
        self.last_timestamp
    }

    /// Time covered by the match.
    pub fn span(&self) -> Duration {
        self.last_timestamp - self.first_timestamp
    }

    pub fn probability(&self) -> Option<f64> {
        self.probability
    }

    /// Patterns this match was reported for. Empty until the match leaves an output node.
    pub fn pattern_ids(&self) -> &[PatternId] {
        &self.pattern_ids
    }

    pub fn with_probability(mut self, probability: Option<f64>) -> Self {
        self.probability = probability;
        self
    }

    pub fn with_pattern_ids(mut self, pattern_ids: Vec<PatternId>) -> Self {
        self.pattern_ids = pattern_ids;
        self
    }

    /// All primitive events of the match, slot by slot.
    pub fn primitive_events(&self) -> impl Iterator<Item = &SharedEvent> {
        self.events.iter().flat_map(|slot| slot.primitives().iter())
    }

    /// Whether the given event instance takes part in this match.
    pub fn contains_event(&self, event: &SharedEvent) -> bool {
        self.primitive_events().any(|e| Arc::ptr_eq(e, event))
    }
}

/// Whether the same primitive event instance appears twice across the slots.
pub fn has_duplicate_events(events: &[MatchEvent]) -> bool {
    let mut seen = HashSet::new();
    events
        .iter()
        .flat_map(|slot| slot.primitives().iter())
        .any(|event| !seen.insert(Arc::as_ptr(event) as usize))
}

/// Product of two optional probabilities; absent factors are ignored.
pub fn joint_probability(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x * y),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}
