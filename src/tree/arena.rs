//! Node storage for evaluation trees.
//!
//! Nodes live in a single arena and refer to each other by [`NodeId`]. A tree
//! built for several patterns is a DAG: shared nodes have several parents.
//! Removed nodes leave a hole so that ids stay stable.

use super::node::Node;
use super::types::{EventSlot, NodeId, NodeKind, OutputBinding, TreeStatistics};
use crate::error::{CepError, Result};
use crate::pattern::PatternId;
use chrono::Duration;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: Vec<Option<Node>>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: NodeKind, window: Duration, slots: Vec<EventSlot>) -> Result<NodeId> {
        let id = NodeId::try_from(self.nodes.len()).map_err(|_| {
            CepError::Configuration(format!("node limit of {} exceeded", NodeId::MAX))
        })?;
        self.nodes.push(Some(Node::new(id, kind, window, slots)));
        Ok(id)
    }

    pub fn get(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id as usize)
            .and_then(Option::as_ref)
            .ok_or(CepError::UnknownNode(id))
    }

    pub fn get_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id as usize)
            .and_then(Option::as_mut)
            .ok_or(CepError::UnknownNode(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_ok()
    }

    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        self.nodes.get_mut(id as usize).and_then(Option::take)
    }

    /// Live nodes in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter_map(Option::as_ref)
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.iter().map(|node| node.id).collect()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Node ids of the subtree under `root`, parents before children.
    pub fn subtree(&self, root: NodeId) -> Result<Vec<NodeId>> {
        let mut visited = BTreeSet::new();
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let node = self.get(id)?;
            order.push(id);
            stack.extend(node.children().into_iter().rev());
        }
        Ok(order)
    }

    /// Number of nodes on the longest path from `root` down to a leaf.
    pub fn depth(&self, root: NodeId) -> Result<usize> {
        let mut deepest = 0;
        for child in self.get(root)?.children() {
            deepest = deepest.max(self.depth(child)?);
        }
        Ok(deepest + 1)
    }

    /// Raise the window of every node under `root` to at least `window`.
    pub fn widen_window(&mut self, root: NodeId, window: Duration) -> Result<()> {
        for id in self.subtree(root)? {
            let node = self.get_mut(id)?;
            if node.window < window {
                node.window = window;
            }
        }
        Ok(())
    }

    pub fn add_pattern_ids(&mut self, root: NodeId, ids: &BTreeSet<PatternId>) -> Result<()> {
        for id in self.subtree(root)? {
            self.get_mut(id)?.pattern_ids.extend(ids.iter().copied());
        }
        Ok(())
    }

    /// Rewire `parent` from `old` to `new`.
    pub fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) -> Result<()> {
        self.get_mut(parent)?.replace_child(old, new)?;
        self.get_mut(new)?.add_parent(parent);
        Ok(())
    }
}

/// A built tree: its nodes plus the nodes reporting matches for each pattern.
#[derive(Debug, Default)]
pub struct EvaluationTree {
    pub arena: NodeArena,
    pub outputs: HashMap<NodeId, Vec<OutputBinding>>,
}

impl EvaluationTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_output(&mut self, node: NodeId, binding: OutputBinding) {
        let bindings = self.outputs.entry(node).or_default();
        if !bindings.contains(&binding) {
            bindings.push(binding);
        }
    }

    /// Move output registrations of a discarded node to its replacement.
    pub fn move_outputs(&mut self, from: NodeId, to: NodeId) {
        if let Some(bindings) = self.outputs.remove(&from) {
            for binding in bindings {
                self.register_output(to, binding);
            }
        }
    }

    /// Leaves receiving each event type.
    pub fn routes(&self) -> HashMap<String, Vec<NodeId>> {
        let mut routes: HashMap<String, Vec<NodeId>> = HashMap::new();
        for node in self.arena.iter() {
            if let NodeKind::Leaf(leaf) = &node.kind {
                routes.entry(leaf.event_type.clone()).or_default().push(node.id);
            }
        }
        routes
    }

    /// Nodes holding pending buffers of unbounded negation chains.
    pub fn chain_tops(&self) -> Vec<NodeId> {
        self.arena
            .iter()
            .filter(|node| {
                node.kind
                    .as_negation()
                    .is_some_and(|n| n.is_unbounded && n.chain_top == Some(node.id))
            })
            .map(|node| node.id)
            .collect()
    }

    pub fn roots(&self) -> Vec<NodeId> {
        self.arena
            .iter()
            .filter(|node| node.is_root())
            .map(|node| node.id)
            .collect()
    }

    pub fn statistics(&self) -> TreeStatistics {
        let mut stats = TreeStatistics {
            output_nodes: self.outputs.len(),
            ..TreeStatistics::default()
        };
        for node in self.arena.iter() {
            stats.total_nodes += 1;
            match &node.kind {
                NodeKind::Leaf(_) => stats.leaf_nodes += 1,
                NodeKind::And(_) | NodeKind::Seq(_) => stats.join_nodes += 1,
                NodeKind::NegationAnd(n) | NodeKind::NegationSeq(n) => {
                    stats.negation_nodes += 1;
                    stats.pending_matches += n.pending.len();
                }
                NodeKind::KleeneClosure(_) => stats.kleene_nodes += 1,
            }
            if node.parents.len() > 1 {
                stats.shared_nodes += 1;
            }
            stats.stored_matches += node.storage().len();
        }
        stats.max_depth = self
            .roots()
            .into_iter()
            .filter_map(|root| self.arena.depth(root).ok())
            .max()
            .unwrap_or(0);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::types::{JoinNode, LeafNode, Side};

    fn leaf(arena: &mut NodeArena, index: usize, name: &str, event_type: &str) -> NodeId {
        arena
            .insert(
                NodeKind::Leaf(LeafNode {
                    event_type: event_type.into(),
                    name: name.into(),
                    index,
                    freezer: None,
                    frozen_by: Vec::new(),
                }),
                Duration::seconds(5),
                vec![EventSlot::new(index, name, event_type)],
            )
            .unwrap()
    }

    fn join(arena: &mut NodeArena, left: NodeId, right: NodeId) -> NodeId {
        let id = arena
            .insert(
                NodeKind::Seq(JoinNode {
                    left,
                    right,
                    merge_order: vec![Side::Left, Side::Right],
                    left_key: None,
                    right_key: None,
                }),
                Duration::seconds(5),
                Vec::new(),
            )
            .unwrap();
        arena.get_mut(left).unwrap().add_parent(id);
        arena.get_mut(right).unwrap().add_parent(id);
        id
    }

    #[test]
    fn test_insert_get_remove() {
        let mut arena = NodeArena::new();
        let a = leaf(&mut arena, 0, "a", "A");
        assert_eq!(a, 0);
        assert!(arena.contains(a));
        assert!(arena.remove(a).is_some());
        assert_eq!(arena.get(a).unwrap_err(), CepError::UnknownNode(0));
        assert!(arena.is_empty());
        // ids are not reused
        assert_eq!(leaf(&mut arena, 1, "b", "B"), 1);
    }

    #[test]
    fn test_subtree_depth_and_window() {
        let mut arena = NodeArena::new();
        let a = leaf(&mut arena, 0, "a", "A");
        let b = leaf(&mut arena, 1, "b", "B");
        let ab = join(&mut arena, a, b);
        let c = leaf(&mut arena, 2, "c", "C");
        let root = join(&mut arena, ab, c);

        assert_eq!(arena.subtree(root).unwrap(), vec![root, ab, a, b, c]);
        assert_eq!(arena.depth(root).unwrap(), 3);

        arena.widen_window(ab, Duration::seconds(9)).unwrap();
        assert_eq!(arena.get(a).unwrap().window, Duration::seconds(9));
        assert_eq!(arena.get(c).unwrap().window, Duration::seconds(5));
        arena.widen_window(ab, Duration::seconds(1)).unwrap();
        assert_eq!(arena.get(ab).unwrap().window, Duration::seconds(9));
    }

    #[test]
    fn test_replace_child_rewires_parents() {
        let mut arena = NodeArena::new();
        let a = leaf(&mut arena, 0, "a", "A");
        let b = leaf(&mut arena, 1, "b", "B");
        let root = join(&mut arena, a, b);
        let other = leaf(&mut arena, 1, "x", "B");

        arena.replace_child(root, b, other).unwrap();
        assert_eq!(arena.get(root).unwrap().children(), vec![a, other]);
        assert_eq!(arena.get(other).unwrap().parents, vec![root]);
        assert!(matches!(
            arena.replace_child(root, b, other),
            Err(CepError::NotAChild { .. })
        ));
    }

    #[test]
    fn test_tree_statistics_and_routes() {
        let mut tree = EvaluationTree::new();
        let a = leaf(&mut tree.arena, 0, "a", "A");
        let b = leaf(&mut tree.arena, 1, "b", "B");
        let root = join(&mut tree.arena, a, b);
        let binding = OutputBinding {
            pattern_id: 1,
            window: Duration::seconds(5),
        };
        tree.register_output(root, binding);
        tree.register_output(root, binding);

        let stats = tree.statistics();
        assert_eq!(stats.total_nodes, 3);
        assert_eq!(stats.leaf_nodes, 2);
        assert_eq!(stats.join_nodes, 1);
        assert_eq!(stats.output_nodes, 1);
        assert_eq!(stats.max_depth, 2);
        assert_eq!(tree.outputs[&root].len(), 1);
        assert_eq!(tree.routes()["A"], vec![a]);
        assert_eq!(tree.roots(), vec![root]);
        assert!(tree.chain_tops().is_empty());
    }
}
