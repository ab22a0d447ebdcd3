//! Core evaluation-tree types.

use crate::event::{MatchEvent, SharedMatch};
use crate::pattern::PatternId;
use crate::storage::SortingKey;
use chrono::Duration;

/// Unique identifier for tree nodes.
pub type NodeId = u32;

/// One slot of a node's output matches.
///
/// A slot holds one primitive event, or one Kleene group. `index` is the
/// declaration position of the (first) pattern argument it stands for; slots
/// of a node are always ordered by it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSlot {
    pub index: usize,
    pub names: Vec<String>,
    pub event_types: Vec<String>,
}

impl EventSlot {
    pub fn new(index: usize, name: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            index,
            names: vec![name.into()],
            event_types: vec![event_type.into()],
        }
    }

    /// Fold several slots into one Kleene slot.
    pub fn group(slots: &[EventSlot]) -> Option<Self> {
        let index = slots.iter().map(|s| s.index).min()?;
        Some(Self {
            index,
            names: slots.iter().flat_map(|s| s.names.iter().cloned()).collect(),
            event_types: slots
                .iter()
                .flat_map(|s| s.event_types.iter().cloned())
                .collect(),
        })
    }
}

/// Which operand a merged slot comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn flipped(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Interleave two slot lists by declaration index.
///
/// Returns the merged slots and, for each merged position, the side it came from.
pub fn merge_slots(left: &[EventSlot], right: &[EventSlot]) -> (Vec<EventSlot>, Vec<Side>) {
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut order = Vec::with_capacity(left.len() + right.len());
    let (mut l, mut r) = (left.iter().peekable(), right.iter().peekable());
    loop {
        let side = match (l.peek(), r.peek()) {
            (Some(a), Some(b)) if a.index <= b.index => Side::Left,
            (Some(_), Some(_)) => Side::Right,
            (Some(_), None) => Side::Left,
            (None, Some(_)) => Side::Right,
            (None, None) => break,
        };
        let slot = match side {
            Side::Left => l.next(),
            Side::Right => r.next(),
        };
        if let Some(slot) = slot {
            merged.push(slot.clone());
            order.push(side);
        }
    }
    (merged, order)
}

/// Interleave the events of two matches following a precomputed merge order.
pub fn merge_events(left: &[MatchEvent], right: &[MatchEvent], order: &[Side]) -> Vec<MatchEvent> {
    let (mut l, mut r) = (left.iter(), right.iter());
    order
        .iter()
        .filter_map(|side| match side {
            Side::Left => l.next(),
            Side::Right => r.next(),
        })
        .cloned()
        .collect()
}

/// Identifies a freeze-policy event of one pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FreezeKey {
    pub pattern_id: PatternId,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct LeafNode {
    pub event_type: String,
    pub name: String,
    pub index: usize,
    /// Set when events at this leaf freeze earlier names of the pattern
    pub freezer: Option<FreezeKey>,
    /// Freezers that suspend this leaf while inside the window
    pub frozen_by: Vec<FreezeKey>,
}

/// And / Seq join payload.
#[derive(Debug, Clone)]
pub struct JoinNode {
    pub left: NodeId,
    pub right: NodeId,
    pub merge_order: Vec<Side>,
    /// Probe key for new left matches against the right child's storage
    pub left_key: Option<SortingKey>,
    /// Probe key for new right matches against the left child's storage
    pub right_key: Option<SortingKey>,
}

/// Negation payload. The positive operand is the left child.
#[derive(Debug, Clone)]
pub struct NegationNode {
    pub positive: NodeId,
    pub negative: NodeId,
    /// Merge order of positive and negative slots
    pub combined_order: Vec<Side>,
    /// Positive and negative slots, interleaved by declaration index
    pub combined_slots: Vec<EventSlot>,
    pub positive_key: Option<SortingKey>,
    pub is_unbounded: bool,
    /// Top of the unbounded chain this node belongs to
    pub chain_top: Option<NodeId>,
    /// Matches awaiting the end of their window (chain tops only)
    pub pending: Vec<SharedMatch>,
}

#[derive(Debug, Clone)]
pub struct KleeneNode {
    pub child: NodeId,
    pub min_size: usize,
    pub max_size: Option<usize>,
}

/// Node variants with their specific payloads.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Leaf(LeafNode),
    And(JoinNode),
    Seq(JoinNode),
    NegationAnd(NegationNode),
    NegationSeq(NegationNode),
    KleeneClosure(KleeneNode),
}

/// Payload-free variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeTag {
    Leaf,
    And,
    Seq,
    NegationAnd,
    NegationSeq,
    KleeneClosure,
}

impl NodeKind {
    pub fn tag(&self) -> NodeTag {
        match self {
            NodeKind::Leaf(_) => NodeTag::Leaf,
            NodeKind::And(_) => NodeTag::And,
            NodeKind::Seq(_) => NodeTag::Seq,
            NodeKind::NegationAnd(_) => NodeTag::NegationAnd,
            NodeKind::NegationSeq(_) => NodeTag::NegationSeq,
            NodeKind::KleeneClosure(_) => NodeTag::KleeneClosure,
        }
    }

    pub fn children(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Leaf(_) => Vec::new(),
            NodeKind::And(j) | NodeKind::Seq(j) => vec![j.left, j.right],
            NodeKind::NegationAnd(n) | NodeKind::NegationSeq(n) => vec![n.positive, n.negative],
            NodeKind::KleeneClosure(k) => vec![k.child],
        }
    }

    /// Whether combined matches must be strictly timestamp ordered.
    pub fn is_sequence(&self) -> bool {
        matches!(self, NodeKind::Seq(_) | NodeKind::NegationSeq(_))
    }

    pub fn as_join(&self) -> Option<&JoinNode> {
        match self {
            NodeKind::And(j) | NodeKind::Seq(j) => Some(j),
            _ => None,
        }
    }

    pub fn as_join_mut(&mut self) -> Option<&mut JoinNode> {
        match self {
            NodeKind::And(j) | NodeKind::Seq(j) => Some(j),
            _ => None,
        }
    }

    pub fn as_negation(&self) -> Option<&NegationNode> {
        match self {
            NodeKind::NegationAnd(n) | NodeKind::NegationSeq(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_negation_mut(&mut self) -> Option<&mut NegationNode> {
        match self {
            NodeKind::NegationAnd(n) | NodeKind::NegationSeq(n) => Some(n),
            _ => None,
        }
    }
}

/// Whether storage clean-up runs when a match is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Enforce,
    /// Used for matches released late from a pending buffer
    Bypass,
}

/// Registration of a node as the output of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputBinding {
    pub pattern_id: PatternId,
    pub window: Duration,
}

/// Statistics about an evaluation tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeStatistics {
    pub total_nodes: usize,
    pub leaf_nodes: usize,
    pub join_nodes: usize,
    pub negation_nodes: usize,
    pub kleene_nodes: usize,
    /// Nodes with more than one parent
    pub shared_nodes: usize,
    pub output_nodes: usize,
    pub max_depth: usize,
    pub stored_matches: usize,
    pub pending_matches: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use chrono::DateTime;
    use std::sync::Arc;

    fn slot(index: usize, name: &str) -> EventSlot {
        EventSlot::new(index, name, name.to_uppercase())
    }

    #[test]
    fn test_merge_slots_by_index() {
        let (merged, order) = merge_slots(&[slot(0, "a"), slot(3, "d")], &[slot(1, "b"), slot(2, "c")]);
        let names: Vec<_> = merged.iter().map(|s| s.names[0].as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d"]);
        assert_eq!(order, vec![Side::Left, Side::Right, Side::Right, Side::Left]);
    }

    #[test]
    fn test_merge_events_follows_order() {
        let ev = |t: &str| MatchEvent::Primitive(Arc::new(Event::new(t, DateTime::from_timestamp(0, 0).unwrap())));
        let merged = merge_events(
            &[ev("A"), ev("D")],
            &[ev("B"), ev("C")],
            &[Side::Left, Side::Right, Side::Right, Side::Left],
        );
        let types: Vec<_> = merged.iter().map(|e| e.event_type().to_string()).collect();
        assert_eq!(types, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_group_slot() {
        let grouped = EventSlot::group(&[slot(2, "b"), slot(1, "a")]).unwrap();
        assert_eq!(grouped.index, 1);
        assert_eq!(grouped.names, vec!["b".to_string(), "a".to_string()]);
        assert!(EventSlot::group(&[]).is_none());
    }

    #[test]
    fn test_node_kind_helpers() {
        let join = JoinNode {
            left: 1,
            right: 2,
            merge_order: vec![Side::Left, Side::Right],
            left_key: None,
            right_key: None,
        };
        let seq = NodeKind::Seq(join.clone());
        assert!(seq.is_sequence());
        assert_eq!(seq.children(), vec![1, 2]);
        assert_eq!(seq.tag(), NodeTag::Seq);
        assert!(!NodeKind::And(join).is_sequence());
        assert_eq!(Side::Left.flipped(), Side::Right);
    }
}
