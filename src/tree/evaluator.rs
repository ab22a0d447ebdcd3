//! Push-based evaluation of a built tree.
//!
//! Every input event is routed to the leaves of its type. A leaf turns it into
//! a one-event partial match; from there matches travel upward. A node that
//! accepts a match stores it, queues it for each parent and lets each parent
//! handle it before the next match is processed. Matches reaching an output
//! node are tagged with the patterns whose window they satisfy.

use super::arena::EvaluationTree;
use super::types::{merge_events, Expiry, FreezeKey, LeafNode, NodeId, NodeKind, NodeTag, TreeStatistics};
use crate::condition::ConditionObserver;
use crate::error::{CepError, Result};
use crate::event::{joint_probability, MatchEvent, PatternMatch, SharedEvent, SharedMatch, Timestamp};
use crate::pattern::PatternId;
use chrono::Duration;
use log::{trace, warn};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub struct TreeEvaluator {
    pub(super) tree: EvaluationTree,
    routes: HashMap<String, Vec<NodeId>>,
    pub(super) chain_tops: Vec<NodeId>,
    ready: Vec<PatternMatch>,
    pub(super) observer: Option<Arc<dyn ConditionObserver>>,
    /// Freezer events still inside their window: (arrival, window)
    active_freezes: HashMap<FreezeKey, (Timestamp, Duration)>,
    last_timestamp: Option<Timestamp>,
}

impl TreeEvaluator {
    pub fn new(tree: EvaluationTree) -> Self {
        let routes = tree.routes();
        let chain_tops = tree.chain_tops();
        Self {
            tree,
            routes,
            chain_tops,
            ready: Vec::new(),
            observer: None,
            active_freezes: HashMap::new(),
            last_timestamp: None,
        }
    }

    /// Report every atomic condition evaluation to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn ConditionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn tree(&self) -> &EvaluationTree {
        &self.tree
    }

    /// Feed one event. Timestamps are expected in non-decreasing order.
    pub fn process_event(&mut self, event: SharedEvent) -> Result<()> {
        if let Some(last) = self.last_timestamp {
            if event.timestamp < last {
                warn!(
                    "event {} at {} arrived after {last}; results may be incomplete",
                    event.index, event.timestamp
                );
            }
        }
        self.flush_expired_pending(event.timestamp)?;
        self.expire_freezes(event.timestamp);

        let leaves = match self.routes.get(&event.event_type) {
            Some(leaves) => leaves.clone(),
            None => {
                trace!("no leaf for event type {}", event.event_type);
                Vec::new()
            }
        };
        for leaf in leaves {
            self.handle_event(leaf, &event)?;
        }

        self.last_timestamp = Some(
            self.last_timestamp
                .map_or(event.timestamp, |last| last.max(event.timestamp)),
        );
        Ok(())
    }

    /// Take the matches reported so far.
    pub fn drain_matches(&mut self) -> Vec<PatternMatch> {
        std::mem::take(&mut self.ready)
    }

    pub fn pending_matches(&self) -> usize {
        self.ready.len()
    }

    pub fn statistics(&self) -> TreeStatistics {
        self.tree.statistics()
    }

    fn expire_freezes(&mut self, now: Timestamp) {
        self.active_freezes
            .retain(|_, (since, window)| now - *since <= *window);
    }

    fn handle_event(&mut self, id: NodeId, event: &SharedEvent) -> Result<()> {
        let observer = self.observer.clone();
        let node = self.tree.arena.get_mut(id)?;
        let NodeKind::Leaf(leaf) = &node.kind else {
            return Ok(());
        };
        if is_frozen(leaf, &self.active_freezes, event.timestamp) {
            trace!("leaf {id}: frozen, ignoring event {}", event.index);
            return Ok(());
        }
        let freezer = leaf.freezer.clone();
        let window = node.window;

        node.clean_expired(event.timestamp);
        let Some(pm) = node.accept(
            vec![MatchEvent::Primitive(event.clone())],
            event.probability,
            observer.as_deref(),
        ) else {
            return Ok(());
        };
        if let Some(key) = freezer {
            self.active_freezes.insert(key, (event.timestamp, window));
        }
        self.propagate(id, Arc::new(pm), Expiry::Enforce)
    }

    /// Store an accepted match at `id`, report it if `id` is an output, and
    /// let every parent handle it.
    pub(super) fn propagate(&mut self, id: NodeId, pm: SharedMatch, expiry: Expiry) -> Result<()> {
        let parents = {
            let node = self.tree.arena.get_mut(id)?;
            node.store(pm.clone(), expiry);
            let parents = node.parents.clone();
            for parent in &parents {
                node.push_unhandled(*parent, pm.clone());
            }
            parents
        };
        self.emit(id, &pm);
        for parent in parents {
            self.handle_new_partial_match(parent, id)?;
        }
        Ok(())
    }

    fn emit(&mut self, id: NodeId, pm: &SharedMatch) {
        let Some(bindings) = self.tree.outputs.get(&id) else {
            return;
        };
        let span = pm.span();
        let mut patterns: Vec<PatternId> = bindings
            .iter()
            .filter(|binding| span <= binding.window)
            .map(|binding| binding.pattern_id)
            .collect();
        patterns.sort_unstable();
        patterns.dedup();
        if patterns.is_empty() {
            trace!("node {id}: match outside every pattern window");
            return;
        }
        self.ready
            .push(PatternMatch::clone(pm).with_pattern_ids(patterns));
    }

    fn handle_new_partial_match(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        match self.tree.arena.get(parent)?.kind.tag() {
            NodeTag::Leaf => Err(CepError::NotAChild { parent, child }),
            NodeTag::And | NodeTag::Seq => self.handle_join(parent, child),
            NodeTag::NegationAnd | NodeTag::NegationSeq => self.handle_negation(parent, child),
            NodeTag::KleeneClosure => self.handle_kleene(parent, child),
        }
    }

    fn handle_join(&mut self, id: NodeId, child: NodeId) -> Result<()> {
        let observer = self.observer.clone();
        let arena = &mut self.tree.arena;
        let join = arena
            .get(id)?
            .kind
            .as_join()
            .cloned()
            .ok_or(CepError::NotAChild { parent: id, child })?;
        let new_is_left = if child == join.left {
            true
        } else if child == join.right {
            false
        } else {
            return Err(CepError::NotAChild { parent: id, child });
        };
        let pm = arena
            .get_mut(child)?
            .take_unhandled(id)
            .ok_or(CepError::MissingPartialMatch { parent: id, child })?;

        let (sibling, probe) = if new_is_left {
            (join.right, &join.left_key)
        } else {
            (join.left, &join.right_key)
        };
        let candidates = {
            let sibling = arena.get_mut(sibling)?;
            sibling.clean_expired(pm.last_timestamp());
            match probe {
                Some(key) => sibling.storage().get(&key.key(&pm)),
                None => sibling.storage().all().to_vec(),
            }
        };

        let node = arena.get_mut(id)?;
        let mut accepted = Vec::new();
        for candidate in &candidates {
            let (left, right) = if new_is_left {
                (&pm, candidate)
            } else {
                (candidate, &pm)
            };
            let events = merge_events(left.events(), right.events(), &join.merge_order);
            let probability = joint_probability(left.probability(), right.probability());
            if let Some(joined) = node.accept(events, probability, observer.as_deref()) {
                accepted.push(Arc::new(joined));
            }
        }
        for joined in accepted {
            self.propagate(id, joined, Expiry::Enforce)?;
        }
        Ok(())
    }
}

fn is_frozen(
    leaf: &LeafNode,
    active: &HashMap<FreezeKey, (Timestamp, Duration)>,
    at: Timestamp,
) -> bool {
    leaf.frozen_by.iter().any(|key| {
        active
            .get(key)
            .is_some_and(|(since, window)| at >= *since && at - *since <= *window)
    })
}

impl fmt::Debug for TreeEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeEvaluator")
            .field("tree", &self.tree)
            .field("chain_tops", &self.chain_tops)
            .field("ready", &self.ready.len())
            .field("observed", &self.observer.is_some())
            .finish()
    }
}
