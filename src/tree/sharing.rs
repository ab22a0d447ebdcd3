//! Multi-pattern trees.
//!
//! Patterns are built one at a time into a single arena. Depending on the
//! [`SharingStrategy`], parts of each new tree are then merged into
//! equivalent nodes that earlier patterns already own:
//!
//! * `LeafSharing` merges equivalent leaves.
//! * `SubtreeUnion` walks the new tree from its root down and merges every
//!   maximal subtree that has an equivalent.
//!
//! Two nodes are equivalent when they compute the same partial matches up to
//! the naming of events. Slots correspond by position, so conditions are
//! compared after renaming one node's names to the other's.

use super::arena::{EvaluationTree, NodeArena};
use super::builder::TreeBuilder;
use super::types::{EventSlot, NodeId, NodeKind, OutputBinding};
use crate::config::{SharingStrategy, TreeStorageParameters};
use crate::error::Result;
use crate::pattern::{Pattern, TreePlan};
use crate::storage::StorageSpec;
use log::debug;
use std::collections::HashMap;

/// Slots hold the same event types and name counts, position by position.
fn same_layout(a: &[EventSlot], b: &[EventSlot]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| x.event_types == y.event_types && x.names.len() == y.names.len())
}

/// Map the names of `from` to the names at the same positions in `to`.
fn positional_renaming(from: &[EventSlot], to: &[EventSlot]) -> HashMap<String, String> {
    from.iter()
        .zip(to)
        .flat_map(|(x, y)| x.names.iter().cloned().zip(y.names.iter().cloned()))
        .collect()
}

/// Whether nodes `a` and `b` produce the same matches.
pub fn nodes_equivalent(arena: &NodeArena, a: NodeId, b: NodeId) -> bool {
    if a == b {
        return true;
    }
    let (Ok(x), Ok(y)) = (arena.get(a), arena.get(b)) else {
        return false;
    };
    if x.kind.tag() != y.kind.tag()
        || !same_layout(&x.slots, &y.slots)
        || !same_layout(x.condition_slots(), y.condition_slots())
        || x.confidence != y.confidence
        || x.single_event_types != y.single_event_types
    {
        return false;
    }
    let renaming = positional_renaming(y.condition_slots(), x.condition_slots());
    if !x.condition.equivalent(&y.condition.renamed(&renaming)) {
        return false;
    }

    match (&x.kind, &y.kind) {
        (NodeKind::Leaf(l), NodeKind::Leaf(m)) => {
            l.event_type == m.event_type
                && l.freezer.is_none()
                && m.freezer.is_none()
                && l.frozen_by.is_empty()
                && m.frozen_by.is_empty()
        }
        (NodeKind::Seq(j), NodeKind::Seq(k)) => {
            j.merge_order == k.merge_order
                && nodes_equivalent(arena, j.left, k.left)
                && nodes_equivalent(arena, j.right, k.right)
        }
        (NodeKind::And(j), NodeKind::And(k)) => {
            let straight = j.merge_order == k.merge_order
                && nodes_equivalent(arena, j.left, k.left)
                && nodes_equivalent(arena, j.right, k.right);
            straight || {
                j.merge_order
                    .iter()
                    .zip(&k.merge_order)
                    .all(|(s, t)| *s == t.flipped())
                    && nodes_equivalent(arena, j.left, k.right)
                    && nodes_equivalent(arena, j.right, k.left)
            }
        }
        (NodeKind::NegationSeq(n), NodeKind::NegationSeq(m))
        | (NodeKind::NegationAnd(n), NodeKind::NegationAnd(m)) => {
            // pending buffers cannot serve two patterns, and a wider window
            // lets more negative events cancel
            !n.is_unbounded
                && !m.is_unbounded
                && x.window == y.window
                && n.combined_order == m.combined_order
                && nodes_equivalent(arena, n.positive, m.positive)
                && nodes_equivalent(arena, n.negative, m.negative)
        }
        (NodeKind::KleeneClosure(k), NodeKind::KleeneClosure(l)) => {
            k.min_size == l.min_size
                && k.max_size == l.max_size
                && nodes_equivalent(arena, k.child, l.child)
        }
        _ => false,
    }
}

/// Builds one evaluation tree for many patterns.
#[derive(Debug, Default)]
pub struct MultiPatternTreeBuilder {
    builder: TreeBuilder,
    strategy: SharingStrategy,
    tree: EvaluationTree,
    merged_nodes: usize,
}

impl MultiPatternTreeBuilder {
    pub fn new(params: TreeStorageParameters, strategy: SharingStrategy) -> Self {
        Self {
            builder: TreeBuilder::new(params),
            strategy,
            tree: EvaluationTree::new(),
            merged_nodes: 0,
        }
    }

    pub fn tree(&self) -> &EvaluationTree {
        &self.tree
    }

    /// Number of nodes removed because an equivalent node already existed.
    pub fn merged_nodes(&self) -> usize {
        self.merged_nodes
    }

    /// Build `pattern` into the shared tree and apply the sharing strategy.
    ///
    /// Returns the node reporting the pattern's matches.
    pub fn add_pattern(&mut self, pattern: &Pattern, plan: &TreePlan) -> Result<NodeId> {
        let existing = self.tree.arena.ids();
        let root = self.builder.build(&mut self.tree.arena, pattern, plan)?;
        self.tree.register_output(
            root,
            OutputBinding {
                pattern_id: pattern.id,
                window: pattern.window,
            },
        );

        let before = self.merged_nodes;
        let output = match self.strategy {
            SharingStrategy::None => root,
            SharingStrategy::LeafSharing => self.share_leaves(root, &existing)?,
            SharingStrategy::SubtreeUnion => self.share_subtrees(root, &existing)?,
        };
        if self.merged_nodes > before {
            debug!(
                "pattern {}: {} nodes shared with earlier patterns",
                pattern.id,
                self.merged_nodes - before
            );
        }
        Ok(output)
    }

    pub fn build(self) -> EvaluationTree {
        self.tree
    }

    fn find_equivalent(&self, id: NodeId, existing: &[NodeId]) -> Option<NodeId> {
        existing
            .iter()
            .copied()
            .filter(|candidate| self.tree.arena.contains(*candidate))
            .find(|candidate| nodes_equivalent(&self.tree.arena, *candidate, id))
    }

    fn share_leaves(&mut self, root: NodeId, existing: &[NodeId]) -> Result<NodeId> {
        let mut output = root;
        for id in self.tree.arena.subtree(root)? {
            if !self.tree.arena.get(id)?.is_leaf() {
                continue;
            }
            if let Some(survivor) = self.find_equivalent(id, existing) {
                self.merge(survivor, id)?;
                if id == root {
                    output = survivor;
                }
            }
        }
        Ok(output)
    }

    fn share_subtrees(&mut self, root: NodeId, existing: &[NodeId]) -> Result<NodeId> {
        let mut output = root;
        let mut queue = vec![root];
        while let Some(id) = queue.pop() {
            match self.find_equivalent(id, existing) {
                Some(survivor) => {
                    self.merge(survivor, id)?;
                    if id == root {
                        output = survivor;
                    }
                }
                None => queue.extend(self.tree.arena.get(id)?.children()),
            }
        }
        Ok(output)
    }

    /// Replace `discarded` (and its subtree) by the equivalent `survivor`.
    fn merge(&mut self, survivor: NodeId, discarded: NodeId) -> Result<()> {
        let (window, pattern_ids, parents, spec) = {
            let node = self.tree.arena.get(discarded)?;
            (
                node.window,
                node.pattern_ids.clone(),
                node.parents.clone(),
                node.storage_spec().clone(),
            )
        };
        debug!("merging node {discarded} into equivalent node {survivor}");

        let arena = &mut self.tree.arena;
        arena.widen_window(survivor, window)?;
        arena.add_pattern_ids(survivor, &pattern_ids)?;

        let survivor_had_parents = !arena.get(survivor)?.parents.is_empty();
        for parent in &parents {
            arena.replace_child(*parent, discarded, survivor)?;
        }
        if !parents.is_empty() {
            let interval = self.builder.params().clean_up_interval;
            let node = arena.get_mut(survivor)?;
            if !survivor_had_parents {
                node.set_storage(spec, interval)?;
            } else if *node.storage_spec() != spec {
                debug!("node {survivor}: parents disagree on storage layout, using unsorted storage");
                node.set_storage(StorageSpec::unsorted(), interval)?;
            }
        }

        self.tree.move_outputs(discarded, survivor);
        for id in self.tree.arena.subtree(discarded)? {
            self.tree.arena.remove(id);
            self.tree.outputs.remove(&id);
            self.merged_nodes += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{BinaryCondition, Condition, Variable};
    use crate::error::CepError;
    use crate::pattern::PatternStructure;
    use chrono::Duration;

    fn p(t: &str, n: &str) -> PatternStructure {
        PatternStructure::primitive(t, n)
    }

    fn smaller(l: &str, r: &str) -> Condition {
        BinaryCondition::smaller(Variable::attribute(l, "x"), Variable::attribute(r, "x")).into()
    }

    fn pattern(id: u32, names: [&str; 3], window: i64) -> Pattern {
        Pattern::new(
            id,
            PatternStructure::seq(vec![p("A", names[0]), p("B", names[1]), p("C", names[2])]),
            smaller(names[0], names[1]),
            Duration::seconds(window),
        )
    }

    fn build(strategy: SharingStrategy, patterns: &[Pattern]) -> MultiPatternTreeBuilder {
        let mut builder = MultiPatternTreeBuilder::new(TreeStorageParameters::default(), strategy);
        for pattern in patterns {
            let plan = TreePlan::left_deep(pattern).unwrap();
            builder.add_pattern(pattern, &plan).unwrap();
        }
        builder
    }

    #[test]
    fn test_no_sharing() {
        let builder = build(
            SharingStrategy::None,
            &[pattern(1, ["a", "b", "c"], 10), pattern(2, ["a", "b", "c"], 10)],
        );
        assert_eq!(builder.tree().arena.len(), 10);
        assert_eq!(builder.merged_nodes(), 0);
    }

    #[test]
    fn test_identical_patterns_share_root() {
        let builder = build(
            SharingStrategy::SubtreeUnion,
            &[pattern(1, ["a", "b", "c"], 10), pattern(2, ["x", "y", "z"], 20)],
        );
        let tree = builder.tree();
        assert_eq!(tree.arena.len(), 5);
        assert_eq!(tree.outputs.len(), 1);
        let (root, bindings) = tree.outputs.iter().next().unwrap();
        assert_eq!(bindings.len(), 2);
        let node = tree.arena.get(*root).unwrap();
        assert_eq!(node.window, Duration::seconds(20));
        assert!(node.pattern_ids.contains(&1) && node.pattern_ids.contains(&2));
        // windows are widened all the way down
        assert!(tree.arena.iter().all(|n| n.window == Duration::seconds(20)));
    }

    #[test]
    fn test_common_prefix_shared() {
        let other = Pattern::new(
            2,
            PatternStructure::seq(vec![p("A", "q"), p("B", "r"), p("D", "s")]),
            smaller("q", "r"),
            Duration::seconds(10),
        );
        let builder = build(SharingStrategy::SubtreeUnion, &[pattern(1, ["a", "b", "c"], 10), other]);
        let tree = builder.tree();
        // SEQ(a, b) and its leaves are shared; roots and the C / D leaves are not.
        assert_eq!(tree.arena.len(), 7);
        assert_eq!(tree.statistics().shared_nodes, 1);
        assert_eq!(builder.merged_nodes(), 3);
    }

    #[test]
    fn test_different_conditions_not_shared() {
        let other = Pattern::new(
            2,
            PatternStructure::seq(vec![p("A", "a"), p("B", "b"), p("C", "c")]),
            smaller("b", "a"),
            Duration::seconds(10),
        );
        let builder = build(SharingStrategy::SubtreeUnion, &[pattern(1, ["a", "b", "c"], 10), other]);
        // only the three leaves merge
        assert_eq!(builder.tree().arena.len(), 7);
        assert_eq!(builder.merged_nodes(), 3);
    }

    #[test]
    fn test_leaf_sharing_only_merges_leaves() {
        let builder = build(
            SharingStrategy::LeafSharing,
            &[pattern(1, ["a", "b", "c"], 10), pattern(2, ["a", "b", "c"], 10)],
        );
        let tree = builder.tree();
        assert_eq!(tree.arena.len(), 7);
        assert_eq!(tree.routes()["A"].len(), 1);
        assert_eq!(tree.outputs.len(), 2);
    }

    #[test]
    fn test_and_children_swapped() {
        let first = Pattern::new(
            1,
            PatternStructure::and(vec![p("A", "a"), p("B", "b")]),
            smaller("a", "b"),
            Duration::seconds(10),
        );
        let second = Pattern::new(
            2,
            PatternStructure::and(vec![p("A", "a"), p("B", "b")]),
            smaller("a", "b"),
            Duration::seconds(10),
        );
        let mut builder =
            MultiPatternTreeBuilder::new(TreeStorageParameters::default(), SharingStrategy::SubtreeUnion);
        builder.add_pattern(&first, &TreePlan::left_deep(&first).unwrap()).unwrap();
        let swapped = TreePlan::binary(crate::pattern::PlanOperator::And, TreePlan::leaf(1), TreePlan::leaf(0)).unwrap();
        builder.add_pattern(&second, &swapped).unwrap();
        assert_eq!(builder.tree().arena.len(), 3);
    }

    #[test]
    fn test_unbounded_negation_never_shared() {
        let negated = |id| {
            Pattern::new(
                id,
                PatternStructure::seq(vec![p("A", "a"), PatternStructure::negation(p("B", "b"))]),
                Condition::always_true(),
                Duration::seconds(10),
            )
        };
        let builder = build(SharingStrategy::SubtreeUnion, &[negated(1), negated(2)]);
        let tree = builder.tree();
        assert_eq!(tree.statistics().negation_nodes, 2);
        assert_eq!(tree.chain_tops().len(), 2);
        // the leaves are still shared
        assert_eq!(tree.arena.len(), 4);
    }

    #[test]
    fn test_negation_shared_only_with_equal_windows() {
        let leading = |id, window| {
            Pattern::new(
                id,
                PatternStructure::seq(vec![PatternStructure::negation(p("A", "a")), p("B", "b"), p("C", "c")]),
                Condition::always_true(),
                Duration::seconds(window),
            )
        };

        let builder = build(SharingStrategy::SubtreeUnion, &[leading(1, 5), leading(2, 20)]);
        let tree = builder.tree();
        assert_eq!(tree.statistics().negation_nodes, 2);
        assert_eq!(tree.outputs.len(), 2);
        assert!(tree
            .arena
            .iter()
            .filter(|n| n.kind.as_negation().is_some())
            .any(|n| n.window == Duration::seconds(5)));

        let builder = build(SharingStrategy::SubtreeUnion, &[leading(1, 20), leading(2, 20)]);
        assert_eq!(builder.tree().statistics().negation_nodes, 1);
        assert_eq!(builder.tree().outputs.len(), 1);
    }

    #[test]
    fn test_rewiring_missing_child_fails() {
        let mut builder = build(SharingStrategy::None, &[pattern(1, ["a", "b", "c"], 10)]);
        let root = builder.tree().roots()[0];
        let leaf = builder.tree().routes()["A"][0];
        assert!(matches!(
            builder.tree.arena.replace_child(leaf, root, leaf),
            Err(CepError::NotAChild { .. })
        ));
    }

    #[test]
    fn test_storage_downgraded_when_layouts_differ() {
        let first = Pattern::new(
            1,
            PatternStructure::seq(vec![p("A", "a"), p("B", "b")]),
            Condition::always_true(),
            Duration::seconds(10),
        );
        let second = Pattern::new(
            2,
            PatternStructure::and(vec![p("A", "a"), p("B", "b")]),
            smaller("a", "b"),
            Duration::seconds(10),
        );
        let mut builder =
            MultiPatternTreeBuilder::new(TreeStorageParameters::sorted(), SharingStrategy::LeafSharing);
        builder.add_pattern(&first, &TreePlan::left_deep(&first).unwrap()).unwrap();
        builder.add_pattern(&second, &TreePlan::left_deep(&second).unwrap()).unwrap();
        let tree = builder.build();
        let a = tree.routes()["A"][0];
        let node = tree.arena.get(a).unwrap();
        assert_eq!(node.parents.len(), 2);
        assert!(!node.storage_spec().is_sorted());
    }
}
