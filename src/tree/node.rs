//! Tree nodes and the checks every node applies to a candidate match.

use super::types::{EventSlot, Expiry, NodeId, NodeKind};
use crate::condition::{Binding, Condition, ConditionObserver};
use crate::error::{CepError, Result};
use crate::event::{has_duplicate_events, MatchEvent, PatternMatch, SharedEvent, SharedMatch, Timestamp};
use crate::pattern::PatternId;
use crate::storage::{create_storage, CleanupSchedule, PatternMatchStorage, StorageSpec, UnsortedStorage};
use chrono::Duration;
use log::trace;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

/// A node of the evaluation tree.
#[derive(Debug)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,

    /// Maximum span of the matches this node produces
    pub window: Duration,

    /// Minimum probability of produced matches
    pub confidence: Option<f64>,

    /// Sub-condition claimed by this node
    pub condition: Condition,

    pub parents: Vec<NodeId>,
    pub pattern_ids: BTreeSet<PatternId>,

    /// Layout of produced matches
    pub slots: Vec<EventSlot>,

    /// Event types an event of which may be used by one match only
    pub single_event_types: BTreeSet<String>,

    pub(crate) condition_applied: bool,
    consumed_events: Vec<SharedEvent>,
    storage: Box<dyn PatternMatchStorage>,
    unhandled: HashMap<NodeId, VecDeque<SharedMatch>>,
}

impl Node {
    /// Create a node with empty, unsorted storage.
    pub fn new(id: NodeId, kind: NodeKind, window: Duration, slots: Vec<EventSlot>) -> Self {
        Self {
            id,
            kind,
            window,
            confidence: None,
            condition: Condition::always_true(),
            parents: Vec::new(),
            pattern_ids: BTreeSet::new(),
            slots,
            single_event_types: BTreeSet::new(),
            condition_applied: false,
            consumed_events: Vec::new(),
            storage: Box::new(UnsortedStorage::new(
                StorageSpec::unsorted(),
                CleanupSchedule::default(),
            )),
            unhandled: HashMap::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_))
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn children(&self) -> Vec<NodeId> {
        self.kind.children()
    }

    /// Slots visible to this node's condition; negation nodes also see the negative one.
    pub fn condition_slots(&self) -> &[EventSlot] {
        match self.kind.as_negation() {
            Some(n) => &n.combined_slots,
            None => &self.slots,
        }
    }

    /// Event names this node's condition may reference.
    pub fn condition_names(&self) -> BTreeSet<String> {
        self.condition_slots()
            .iter()
            .flat_map(|slot| slot.names.iter().cloned())
            .collect()
    }

    pub fn add_parent(&mut self, parent: NodeId) {
        if !self.parents.contains(&parent) {
            self.parents.push(parent);
        }
    }

    /// Point the edge to `old` at `new` instead.
    pub fn replace_child(&mut self, old: NodeId, new: NodeId) -> Result<()> {
        let mut replaced = false;
        let mut swap = |slot: &mut NodeId| {
            if *slot == old {
                *slot = new;
                replaced = true;
            }
        };
        match &mut self.kind {
            NodeKind::Leaf(_) => {}
            NodeKind::And(j) | NodeKind::Seq(j) => {
                swap(&mut j.left);
                swap(&mut j.right);
            }
            NodeKind::NegationAnd(n) | NodeKind::NegationSeq(n) => {
                swap(&mut n.positive);
                swap(&mut n.negative);
            }
            NodeKind::KleeneClosure(k) => swap(&mut k.child),
        }
        if replaced {
            Ok(())
        } else {
            Err(CepError::NotAChild {
                parent: self.id,
                child: old,
            })
        }
    }

    pub fn storage(&self) -> &dyn PatternMatchStorage {
        self.storage.as_ref()
    }

    pub fn storage_spec(&self) -> &StorageSpec {
        self.storage.spec()
    }

    /// Replace the (empty) storage with one of the given layout.
    pub fn set_storage(&mut self, spec: StorageSpec, clean_up_interval: usize) -> Result<()> {
        self.storage = create_storage(spec, clean_up_interval)?;
        Ok(())
    }

    /// Store a new match, sweeping expired ones unless `expiry` says otherwise.
    ///
    /// Only parents read a node's storage, so a node without parents keeps
    /// nothing.
    pub fn store(&mut self, pm: SharedMatch, expiry: Expiry) {
        let latest = pm.last_timestamp();
        if !self.parents.is_empty() {
            self.storage.add(pm);
        }
        if expiry == Expiry::Enforce {
            self.clean_expired(latest);
        }
    }

    /// Drop stored matches and consumed events that can no longer join anything
    /// ending at or after `latest`.
    pub fn clean_expired(&mut self, latest: Timestamp) {
        let Some(threshold) = latest.checked_sub_signed(self.window) else {
            return;
        };
        let removed = self.storage.try_clean_expired(threshold);
        if removed > 0 {
            trace!("node {}: expired {removed} partial matches", self.id);
        }
        self.consumed_events.retain(|e| e.timestamp >= threshold);
    }

    pub fn push_unhandled(&mut self, parent: NodeId, pm: SharedMatch) {
        self.unhandled.entry(parent).or_default().push_back(pm);
    }

    /// Oldest match not yet handled by `parent`.
    pub fn take_unhandled(&mut self, parent: NodeId) -> Option<SharedMatch> {
        self.unhandled.get_mut(&parent)?.pop_front()
    }

    /// Window, ordering, duplicate and condition checks of a candidate laid out as `slots`.
    pub fn admits(
        &self,
        events: &[MatchEvent],
        slots: &[EventSlot],
        observer: Option<&dyn ConditionObserver>,
    ) -> bool {
        if events.len() != slots.len() || events.is_empty() {
            return false;
        }
        let first = events.iter().map(MatchEvent::first_timestamp).min();
        let last = events.iter().map(MatchEvent::last_timestamp).max();
        if let (Some(first), Some(last)) = (first, last) {
            if last - first > self.window {
                trace!("node {}: candidate exceeds the window", self.id);
                return false;
            }
        }
        if self.kind.is_sequence() && !strictly_ordered(events) {
            return false;
        }
        if has_duplicate_events(events) {
            return false;
        }

        let mut binding = Binding::new();
        for (slot, event) in slots.iter().zip(events) {
            for name in &slot.names {
                binding.bind(name, event);
            }
        }
        self.condition.evaluate(&binding, observer)
    }

    /// Confidence and consumption checks; records consumed events on success.
    pub fn finalize(&mut self, events: Vec<MatchEvent>, probability: Option<f64>) -> Option<PatternMatch> {
        if let (Some(threshold), Some(p)) = (self.confidence, probability) {
            if p < threshold {
                trace!("node {}: probability {p} below confidence {threshold}", self.id);
                return None;
            }
        }
        if !self.single_event_types.is_empty() {
            let singles: Vec<SharedEvent> = events
                .iter()
                .flat_map(|e| e.primitives().iter())
                .filter(|e| self.single_event_types.contains(&e.event_type))
                .cloned()
                .collect();
            let reused = singles
                .iter()
                .any(|e| self.consumed_events.iter().any(|c| Arc::ptr_eq(c, e)));
            if reused {
                return None;
            }
            self.consumed_events.extend(singles);
        }
        Some(PatternMatch::new(events, probability))
    }

    /// Run every check against this node's own slots.
    pub fn accept(
        &mut self,
        events: Vec<MatchEvent>,
        probability: Option<f64>,
        observer: Option<&dyn ConditionObserver>,
    ) -> Option<PatternMatch> {
        if !self.admits(&events, &self.slots, observer) {
            return None;
        }
        self.finalize(events, probability)
    }
}

/// Each slot ends strictly before the next one starts.
fn strictly_ordered(events: &[MatchEvent]) -> bool {
    events
        .windows(2)
        .all(|pair| pair[0].last_timestamp() < pair[1].first_timestamp())
}
