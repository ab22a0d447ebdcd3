//! Tree builder for turning a pattern and its tree plan into evaluation nodes.
//!
//! Construction runs in fixed passes:
//!
//! 1. instantiate one node per plan node, checking the plan against the pattern
//! 2. push the pattern condition down the tree; every node claims the
//!    sub-conditions over the names it binds
//! 3. lay out node storage from the claimed join conditions
//! 4. mark chains of unbounded negation nodes
//! 5. apply the consumption policy (single-use types, freeze roles)

use super::arena::NodeArena;
use super::types::{
    merge_slots, EventSlot, FreezeKey, JoinNode, KleeneNode, LeafNode, NegationNode, NodeId,
    NodeKind,
};
use crate::condition::{Accessor, AtomicCondition, Condition, RelationOp, Variable};
use crate::config::TreeStorageParameters;
use crate::error::{CepError, Result};
use crate::event::{MatchEvent, PatternMatch};
use crate::pattern::{
    is_unbounded_negative, ArgumentRole, Pattern, PatternArgument, PlanOperator,
    TopLevelOperator, TreePlan,
};
use crate::storage::{EquationSide, SortingKey, StorageSpec};
use crate::value::timestamp_value;
use log::debug;
use serde_json::Value;
use std::collections::BTreeSet;

/// Where a plan subtree sits relative to the operators above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Positive,
    Kleene,
    Negative,
}

struct PlanContext<'p> {
    pattern: &'p Pattern,
    op: TopLevelOperator,
    arguments: &'p [PatternArgument],
}

/// Storage layouts for the two children of a binary node, with the probe keys
/// the node uses against them.
#[derive(Debug, Default)]
struct KeyPlan {
    left_spec: StorageSpec,
    right_spec: StorageSpec,
    left_key: Option<SortingKey>,
    right_key: Option<SortingKey>,
}

/// Builds single-pattern trees into a shared arena.
#[derive(Debug, Clone, Default)]
pub struct TreeBuilder {
    params: TreeStorageParameters,
}

impl TreeBuilder {
    pub fn new(params: TreeStorageParameters) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &TreeStorageParameters {
        &self.params
    }

    /// Build the tree of `pattern` shaped as `plan`. Returns the root node.
    pub fn build(&self, arena: &mut NodeArena, pattern: &Pattern, plan: &TreePlan) -> Result<NodeId> {
        pattern.validate()?;
        self.params.validate()?;
        let (op, arguments) = pattern.structure.top_level()?;
        validate_plan_leaves(plan, &arguments)?;

        let ctx = PlanContext {
            pattern,
            op,
            arguments: &arguments,
        };
        let root = self.instantiate(arena, &ctx, plan, Position::Positive)?;

        let residual = apply_condition(arena, root, pattern.effective_condition())?;
        if !residual.is_empty() {
            return Err(CepError::UnconsumedConditions(residual.labels()));
        }

        self.assign_storage(arena, root, StorageSpec::unsorted())?;
        mark_negation_chains(arena, root, root, None)?;

        let single_types =
            pattern
                .policy
                .single_event_types(arguments.iter().map(|a| a.event.event_type.as_str()));
        register_single_types(arena, root, &single_types)?;
        apply_freeze_policy(arena, root, pattern, &arguments)?;

        debug!(
            "built tree for pattern {} rooted at node {root} ({} nodes)",
            pattern.id,
            arena.subtree(root)?.len()
        );
        Ok(root)
    }

    fn add_node(
        &self,
        arena: &mut NodeArena,
        ctx: &PlanContext<'_>,
        kind: NodeKind,
        slots: Vec<EventSlot>,
    ) -> Result<NodeId> {
        let children = kind.children();
        let id = arena.insert(kind, ctx.pattern.window, slots)?;
        let node = arena.get_mut(id)?;
        node.confidence = ctx.pattern.confidence;
        node.pattern_ids.insert(ctx.pattern.id);
        for child in children {
            arena.get_mut(child)?.add_parent(id);
        }
        Ok(id)
    }

    fn instantiate(
        &self,
        arena: &mut NodeArena,
        ctx: &PlanContext<'_>,
        plan: &TreePlan,
        position: Position,
    ) -> Result<NodeId> {
        match plan {
            TreePlan::Leaf(index) => {
                let arg = &ctx.arguments[*index];
                check_leaf_position(arg, position)?;
                let kind = NodeKind::Leaf(LeafNode {
                    event_type: arg.event.event_type.clone(),
                    name: arg.event.name.clone(),
                    index: *index,
                    freezer: None,
                    frozen_by: Vec::new(),
                });
                let slot = EventSlot::new(*index, arg.event.name.clone(), arg.event.event_type.clone());
                self.add_node(arena, ctx, kind, vec![slot])
            }
            TreePlan::Unary {
                op: PlanOperator::KleeneClosure { min_size, max_size },
                child,
            } => {
                if position == Position::Negative {
                    return Err(CepError::InvalidPlan(
                        "the negative operand of a negation must be a single event".to_string(),
                    ));
                }
                if *min_size == 0 || max_size.is_some_and(|max| max < *min_size) {
                    return Err(CepError::InvalidPlan(format!(
                        "invalid Kleene closure bounds {min_size}..{max_size:?}"
                    )));
                }
                let child = self.instantiate(arena, ctx, child, Position::Kleene)?;
                let slot = EventSlot::group(&arena.get(child)?.slots).ok_or_else(|| {
                    CepError::InvalidPlan("Kleene closure over an empty subtree".to_string())
                })?;
                let kind = NodeKind::KleeneClosure(KleeneNode {
                    child,
                    min_size: *min_size,
                    max_size: *max_size,
                });
                self.add_node(arena, ctx, kind, vec![slot])
            }
            TreePlan::Unary { op, .. } => Err(CepError::InvalidPlan(format!(
                "{op} cannot be used as a unary operator"
            ))),
            TreePlan::Binary { op, left, right } => {
                if position == Position::Negative {
                    return Err(CepError::InvalidPlan(
                        "the negative operand of a negation must be a single event".to_string(),
                    ));
                }
                match op {
                    PlanOperator::And | PlanOperator::Seq => {
                        let left = self.instantiate(arena, ctx, left, position)?;
                        let right = self.instantiate(arena, ctx, right, position)?;
                        let (slots, merge_order) =
                            merge_slots(&arena.get(left)?.slots, &arena.get(right)?.slots);
                        let join = JoinNode {
                            left,
                            right,
                            merge_order,
                            left_key: None,
                            right_key: None,
                        };
                        let kind = if *op == PlanOperator::And {
                            NodeKind::And(join)
                        } else {
                            NodeKind::Seq(join)
                        };
                        self.add_node(arena, ctx, kind, slots)
                    }
                    PlanOperator::NegationSeq | PlanOperator::NegationAnd => {
                        if position == Position::Kleene {
                            return Err(CepError::InvalidPlan(
                                "negation inside a Kleene closure".to_string(),
                            ));
                        }
                        let TreePlan::Leaf(negative_index) = right.as_ref() else {
                            return Err(CepError::InvalidPlan(
                                "the negative operand of a negation must be a single event"
                                    .to_string(),
                            ));
                        };
                        let positive = self.instantiate(arena, ctx, left, position)?;
                        let negative = self.instantiate(arena, ctx, right, Position::Negative)?;
                        let slots = arena.get(positive)?.slots.clone();
                        let (combined_slots, combined_order) =
                            merge_slots(&slots, &arena.get(negative)?.slots);
                        let negation = NegationNode {
                            positive,
                            negative,
                            combined_order,
                            combined_slots,
                            positive_key: None,
                            is_unbounded: is_unbounded_negative(
                                ctx.op,
                                ctx.arguments,
                                *negative_index,
                            ),
                            chain_top: None,
                            pending: Vec::new(),
                        };
                        let kind = if *op == PlanOperator::NegationSeq {
                            NodeKind::NegationSeq(negation)
                        } else {
                            NodeKind::NegationAnd(negation)
                        };
                        self.add_node(arena, ctx, kind, slots)
                    }
                    PlanOperator::KleeneClosure { .. } => Err(CepError::InvalidPlan(format!(
                        "{op} cannot be used as a binary operator"
                    ))),
                }
            }
        }
    }

    /// Set the storage of `id` and lay out its children's storage for its joins.
    fn assign_storage(&self, arena: &mut NodeArena, id: NodeId, spec: StorageSpec) -> Result<()> {
        arena
            .get_mut(id)?
            .set_storage(spec, self.params.clean_up_interval)?;

        let node = arena.get(id)?;
        match &node.kind {
            NodeKind::Leaf(_) => Ok(()),
            NodeKind::And(join) | NodeKind::Seq(join) => {
                let (left, right) = (join.left, join.right);
                let plan = self.key_plan(arena, id, left, right, true)?;
                if let Some(join) = arena.get_mut(id)?.kind.as_join_mut() {
                    join.left_key = plan.left_key;
                    join.right_key = plan.right_key;
                }
                self.assign_storage(arena, left, plan.left_spec)?;
                self.assign_storage(arena, right, plan.right_spec)
            }
            NodeKind::NegationAnd(negation) | NodeKind::NegationSeq(negation) => {
                let (positive, negative) = (negation.positive, negation.negative);
                // A negative may sit between positives: no timestamp keys.
                let plan = self.key_plan(arena, id, positive, negative, false)?;
                if let Some(negation) = arena.get_mut(id)?.kind.as_negation_mut() {
                    negation.positive_key = plan.left_key;
                }
                self.assign_storage(arena, positive, StorageSpec::unsorted())?;
                self.assign_storage(arena, negative, plan.right_spec)
            }
            NodeKind::KleeneClosure(kleene) => {
                let child = kleene.child;
                self.assign_storage(arena, child, StorageSpec::arrival_ordered())
            }
        }
    }

    fn key_plan(
        &self,
        arena: &NodeArena,
        id: NodeId,
        left: NodeId,
        right: NodeId,
        allow_timestamp: bool,
    ) -> Result<KeyPlan> {
        if !self.params.sort_storage {
            return Ok(KeyPlan::default());
        }
        let node = arena.get(id)?;
        let left_slots = &arena.get(left)?.slots;
        let right_slots = &arena.get(right)?.slots;

        if allow_timestamp && node.kind.is_sequence() && self.params.prioritize_sorting_by_timestamp {
            let left_max = left_slots.iter().map(|s| s.index).max();
            let right_min = right_slots.iter().map(|s| s.index).min();
            if let (Some(left_max), Some(right_min)) = (left_max, right_min) {
                if left_max < right_min {
                    let left_key = SortingKey::new("@last_timestamp", |pm: &PatternMatch| {
                        timestamp_value(&pm.last_timestamp())
                    });
                    let right_key = SortingKey::new("@first_timestamp", |pm: &PatternMatch| {
                        timestamp_value(&pm.first_timestamp())
                    });
                    return Ok(KeyPlan {
                        left_spec: StorageSpec::sorted(
                            left_key.clone(),
                            RelationOp::Smaller,
                            EquationSide::Left,
                        )
                        .with_in_order(true),
                        right_spec: StorageSpec::sorted(
                            right_key.clone(),
                            RelationOp::Smaller,
                            EquationSide::Right,
                        ),
                        left_key: Some(left_key),
                        right_key: Some(right_key),
                    });
                }
            }
        }

        let left_names = slot_names(left_slots);
        let right_names = slot_names(right_slots);
        let mut best: Option<(i32, &Variable, RelationOp, &Variable)> = None;
        for atomic in node.condition.extract_atomic_conditions() {
            let AtomicCondition::Binary(binary) = atomic else {
                continue;
            };
            let Some((l, op, r)) = binary.oriented(&left_names, &right_names) else {
                continue;
            };
            if op == RelationOp::NotEqual {
                continue;
            }
            let priority = self.priority(l).max(self.priority(r));
            if best.as_ref().map_or(true, |(p, ..)| priority > *p) {
                best = Some((priority, l, op, r));
            }
        }

        let Some((_, l, op, r)) = best else {
            return Ok(KeyPlan::default());
        };
        let (Some(left_key), Some(right_key)) = (slot_key(left_slots, l), slot_key(right_slots, r))
        else {
            return Ok(KeyPlan::default());
        };
        Ok(KeyPlan {
            left_spec: StorageSpec::sorted(left_key.clone(), op, EquationSide::Left),
            right_spec: StorageSpec::sorted(right_key.clone(), op, EquationSide::Right),
            left_key: Some(left_key),
            right_key: Some(right_key),
        })
    }

    fn priority(&self, variable: &Variable) -> i32 {
        variable
            .accessor
            .attribute_name()
            .map_or(0, |name| self.params.attribute_priority(name))
    }
}

/// Push `condition` down the subtree under `root`, post-order. Every node
/// claims the sub-conditions over names it binds; the rest is returned.
pub fn apply_condition(arena: &mut NodeArena, root: NodeId, condition: Condition) -> Result<Condition> {
    let node = arena.get(root)?;
    if node.condition_applied {
        return Err(CepError::ConditionsAlreadyApplied);
    }
    let mut residual = condition;
    for child in node.children() {
        residual = apply_condition(arena, child, residual)?;
    }

    let node = arena.get_mut(root)?;
    let names = node.condition_names();
    let kleene = matches!(node.kind, NodeKind::KleeneClosure(_));
    let (claimed, residual) = residual.split_by_names(&names, kleene);
    node.condition = claimed;
    node.condition_applied = true;
    Ok(residual)
}

fn validate_plan_leaves(plan: &TreePlan, arguments: &[PatternArgument]) -> Result<()> {
    let indices = plan.leaf_indices();
    let mut seen = BTreeSet::new();
    for index in &indices {
        if *index >= arguments.len() {
            return Err(CepError::InvalidPlan(format!(
                "leaf {index} refers to no pattern event"
            )));
        }
        if !seen.insert(*index) {
            return Err(CepError::InvalidPlan(format!(
                "pattern event {index} appears twice in the plan"
            )));
        }
    }
    if seen.len() != arguments.len() {
        return Err(CepError::InvalidPlan(format!(
            "plan covers {} of {} pattern events",
            seen.len(),
            arguments.len()
        )));
    }
    Ok(())
}

fn check_leaf_position(arg: &PatternArgument, position: Position) -> Result<()> {
    let name = &arg.event.name;
    match (arg.role, position) {
        (ArgumentRole::Negative, Position::Negative) => Ok(()),
        (ArgumentRole::Negative, _) => Err(CepError::InvalidPlan(format!(
            "negative event '{name}' must be the right operand of a negation"
        ))),
        (_, Position::Negative) => Err(CepError::InvalidPlan(format!(
            "event '{name}' is not negated but is the operand of a negation"
        ))),
        (ArgumentRole::Kleene { .. }, Position::Positive) => Err(CepError::InvalidPlan(format!(
            "Kleene event '{name}' is not under a Kleene closure"
        ))),
        _ => Ok(()),
    }
}

fn slot_names(slots: &[EventSlot]) -> BTreeSet<String> {
    slots
        .iter()
        .flat_map(|slot| slot.names.iter().cloned())
        .collect()
}

/// Sort key reading `variable` from the slot binding its name. The label is
/// positional so that equivalent nodes of different patterns agree on it.
fn slot_key(slots: &[EventSlot], variable: &Variable) -> Option<SortingKey> {
    let position = slots
        .iter()
        .position(|slot| slot.names.iter().any(|n| *n == variable.name))?;
    let accessor = variable.accessor.clone();
    let label = format!("#{position}.{}", accessor.label());
    Some(SortingKey::new(label, move |pm: &PatternMatch| {
        slot_value(pm, position, &accessor)
    }))
}

fn slot_value(pm: &PatternMatch, position: usize, accessor: &Accessor) -> Value {
    match pm.events().get(position) {
        Some(MatchEvent::Primitive(event)) => accessor.read(event).unwrap_or(Value::Null),
        Some(MatchEvent::Aggregated(group)) => Value::Array(
            group
                .events()
                .iter()
                .map(|event| accessor.read(event).unwrap_or(Value::Null))
                .collect(),
        ),
        None => Value::Null,
    }
}

/// Record chain tops. Unbounded negation nodes must form a chain from `root` down.
fn mark_negation_chains(
    arena: &mut NodeArena,
    root: NodeId,
    id: NodeId,
    chain_top: Option<NodeId>,
) -> Result<()> {
    let node = arena.get(id)?;
    let children = node.children();
    match node.kind.as_negation() {
        Some(negation) if negation.is_unbounded => {
            if chain_top.is_none() && id != root {
                return Err(CepError::InvalidPlan(
                    "unbounded negations must be applied above all positive operators".to_string(),
                ));
            }
            let top = chain_top.unwrap_or(id);
            let (positive, negative) = (negation.positive, negation.negative);
            if let Some(negation) = arena.get_mut(id)?.kind.as_negation_mut() {
                negation.chain_top = Some(top);
            }
            mark_negation_chains(arena, root, positive, Some(top))?;
            mark_negation_chains(arena, root, negative, None)
        }
        _ => {
            for child in children {
                mark_negation_chains(arena, root, child, None)?;
            }
            Ok(())
        }
    }
}

fn register_single_types(arena: &mut NodeArena, root: NodeId, types: &BTreeSet<String>) -> Result<()> {
    if types.is_empty() {
        return Ok(());
    }
    for id in arena.subtree(root)? {
        let node = arena.get_mut(id)?;
        let present: Vec<String> = node
            .slots
            .iter()
            .flat_map(|slot| slot.event_types.iter())
            .filter(|t| types.contains(*t))
            .cloned()
            .collect();
        node.single_event_types.extend(present);
    }
    Ok(())
}

fn apply_freeze_policy(
    arena: &mut NodeArena,
    root: NodeId,
    pattern: &Pattern,
    arguments: &[PatternArgument],
) -> Result<()> {
    for name in &pattern.policy.freeze {
        let freezer = arguments
            .iter()
            .find(|arg| arg.event.name == *name)
            .ok_or_else(|| {
                CepError::InvalidPattern(format!("freeze name '{name}' is not a pattern event"))
            })?;
        let key = FreezeKey {
            pattern_id: pattern.id,
            name: name.clone(),
        };
        for id in arena.subtree(root)? {
            let NodeKind::Leaf(leaf) = &mut arena.get_mut(id)?.kind else {
                continue;
            };
            if leaf.name == *name {
                leaf.freezer = Some(key.clone());
            } else if leaf.index < freezer.index && arguments[leaf.index].role != ArgumentRole::Negative
            {
                leaf.frozen_by.push(key.clone());
            }
        }
    }
    Ok(())
}
