//! Condition model.
//!
//! A pattern carries one condition tree. During tree construction the tree is
//! split up: every node claims the sub-conditions whose referenced event
//! names it binds, and hands the residual to its ancestors. Evaluation runs
//! against a [`Binding`] from event names to the match slots they denote.
//!
//! # Example
//! ```rust,ignore
//! use cep_tree_engine::condition::{BinaryCondition, Condition, Variable};
//!
//! let cond = Condition::and(vec![
//!     BinaryCondition::smaller(Variable::attribute("a", "Open"), Variable::attribute("b", "Open")).into(),
//!     BinaryCondition::smaller(Variable::attribute("b", "Open"), Variable::attribute("c", "Peak")).into(),
//! ]);
//! ```

pub mod atomic;
pub mod composite;
pub mod kleene;
pub mod variable;

pub use atomic::{
    AtomicCondition, BinaryCondition, Comparison, Relation, RelationFn, RelationOp,
    SimpleCondition,
};
pub use composite::{CompositeCondition, CompositeKind};
pub use kleene::{KCIndexCondition, KCValueCondition, KleeneIndexing};
pub use variable::{Accessor, AccessorFn, Term, Variable};

use crate::event::MatchEvent;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

/// Maps pattern event names to the match slots bound to them.
#[derive(Debug, Default)]
pub struct Binding<'a> {
    slots: HashMap<&'a str, &'a MatchEvent>,
}

impl<'a> Binding<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: &'a str, event: &'a MatchEvent) {
        self.slots.insert(name, event);
    }

    pub fn get(&self, name: &str) -> Option<&'a MatchEvent> {
        self.slots.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Receives the outcome of every atomic condition evaluation.
///
/// Used by external statistics collectors to estimate selectivities. The
/// engine never reads anything back.
pub trait ConditionObserver: Send + Sync {
    fn record(&self, condition: &AtomicCondition, passed: bool);
}

/// Pass/fail counts for one condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConditionTally {
    pub evaluated: u64,
    pub passed: u64,
}

impl ConditionTally {
    pub fn selectivity(&self) -> Option<f64> {
        (self.evaluated > 0).then(|| self.passed as f64 / self.evaluated as f64)
    }
}

/// Observer tallying outcomes per condition label.
#[derive(Debug, Default)]
pub struct SelectivityCounter {
    tallies: Mutex<HashMap<String, ConditionTally>>,
}

impl SelectivityCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tally(&self, label: &str) -> Option<ConditionTally> {
        self.tallies.lock().ok()?.get(label).copied()
    }

    pub fn snapshot(&self) -> HashMap<String, ConditionTally> {
        self.tallies
            .lock()
            .map(|tallies| tallies.clone())
            .unwrap_or_default()
    }
}

impl ConditionObserver for SelectivityCounter {
    fn record(&self, condition: &AtomicCondition, passed: bool) {
        if let Ok(mut tallies) = self.tallies.lock() {
            let tally = tallies.entry(condition.to_string()).or_default();
            tally.evaluated += 1;
            if passed {
                tally.passed += 1;
            }
        }
    }
}

/// A condition tree.
#[derive(Debug, Clone)]
pub enum Condition {
    Atomic(AtomicCondition),
    Composite(CompositeCondition),
}

impl Condition {
    /// The empty conjunction.
    pub fn always_true() -> Self {
        Condition::Composite(CompositeCondition::new(CompositeKind::And, Vec::new()))
    }

    /// Conjunction, flattening nested conjunctions and dropping empty ones.
    pub fn and(conditions: Vec<Condition>) -> Self {
        let mut flat = Vec::with_capacity(conditions.len());
        for condition in conditions {
            match condition {
                Condition::Composite(CompositeCondition {
                    kind: CompositeKind::And,
                    conditions: inner,
                }) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            if let Some(only) = flat.pop() {
                return only;
            }
        }
        Condition::Composite(CompositeCondition::new(CompositeKind::And, flat))
    }

    pub fn or(conditions: Vec<Condition>) -> Self {
        Condition::Composite(CompositeCondition::new(CompositeKind::Or, conditions))
    }

    /// Conjunction of `self` and `other`.
    pub fn combine(self, other: Condition) -> Self {
        Condition::and(vec![self, other])
    }

    /// True when the tree holds no atomic condition.
    pub fn is_empty(&self) -> bool {
        match self {
            Condition::Atomic(_) => false,
            Condition::Composite(c) => c.conditions.iter().all(Condition::is_empty),
        }
    }

    /// Whether any atomic condition in the tree is a Kleene condition.
    pub fn is_kleene(&self) -> bool {
        self.extract_atomic_conditions()
            .iter()
            .any(|c| c.is_kleene())
    }

    /// Event names referenced anywhere in the tree.
    pub fn names(&self) -> BTreeSet<String> {
        self.extract_atomic_conditions()
            .into_iter()
            .flat_map(|c| c.names())
            .collect()
    }

    pub fn extract_atomic_conditions(&self) -> Vec<&AtomicCondition> {
        let mut out = Vec::new();
        self.collect_atomics(&mut out);
        out
    }

    fn collect_atomics<'a>(&'a self, out: &mut Vec<&'a AtomicCondition>) {
        match self {
            Condition::Atomic(c) => out.push(c),
            Condition::Composite(c) => c.conditions.iter().for_each(|c| c.collect_atomics(out)),
        }
    }

    pub fn evaluate(&self, binding: &Binding<'_>, observer: Option<&dyn ConditionObserver>) -> bool {
        match self {
            Condition::Atomic(c) => {
                let passed = c.evaluate(binding);
                if let Some(observer) = observer {
                    observer.record(c, passed);
                }
                passed
            }
            Condition::Composite(c) => c.evaluate(binding, observer),
        }
    }

    fn claimable(&self, names: &BTreeSet<String>, kleene: bool) -> bool {
        self.is_kleene() == kleene && self.names().is_subset(names)
    }

    /// The sub-conditions referencing only `names`, cloned.
    ///
    /// `kleene` selects Kleene conditions instead of ordinary ones. Nested
    /// conjunctions are searched; any other composite is taken whole or not at all.
    pub fn get_condition_of(&self, names: &BTreeSet<String>, kleene: bool) -> Condition {
        self.clone().split_by_names(names, kleene).0
    }

    /// Split into `(claimed, residual)` by the rule of [`Condition::get_condition_of`].
    pub fn split_by_names(self, names: &BTreeSet<String>, kleene: bool) -> (Condition, Condition) {
        match self {
            Condition::Composite(CompositeCondition {
                kind: CompositeKind::And,
                conditions,
            }) => {
                let mut claimed = Vec::new();
                let mut residual = Vec::new();
                for condition in conditions {
                    let (mine, rest) = condition.split_by_names(names, kleene);
                    if !mine.is_empty() {
                        claimed.push(mine);
                    }
                    if !rest.is_empty() {
                        residual.push(rest);
                    }
                }
                (Condition::and(claimed), Condition::and(residual))
            }
            other if other.is_empty() => (Condition::always_true(), Condition::always_true()),
            other if other.claimable(names, kleene) => (other, Condition::always_true()),
            other => (Condition::always_true(), other),
        }
    }

    /// Rename event names, leaving unmapped names alone.
    pub fn renamed(&self, names: &HashMap<String, String>) -> Self {
        match self {
            Condition::Atomic(c) => Condition::Atomic(c.renamed(names)),
            Condition::Composite(c) => Condition::Composite(CompositeCondition::new(
                c.kind,
                c.conditions.iter().map(|c| c.renamed(names)).collect(),
            )),
        }
    }

    /// Structural equality, insensitive to the order of composite members and
    /// to operand reflection of binary conditions.
    pub fn equivalent(&self, other: &Condition) -> bool {
        match (self, other) {
            (Condition::Atomic(a), Condition::Atomic(b)) => a == b,
            (Condition::Composite(a), Condition::Composite(b)) => {
                (a.is_empty() && b.is_empty()) || a.equivalent(b)
            }
            _ => false,
        }
    }

    /// Labels of every atomic condition, for error reporting.
    pub fn labels(&self) -> Vec<String> {
        self.extract_atomic_conditions()
            .iter()
            .map(ToString::to_string)
            .collect()
    }
}

impl Default for Condition {
    fn default() -> Self {
        Condition::always_true()
    }
}

impl PartialEq for Condition {
    fn eq(&self, other: &Self) -> bool {
        self.equivalent(other)
    }
}

impl From<AtomicCondition> for Condition {
    fn from(c: AtomicCondition) -> Self {
        Condition::Atomic(c)
    }
}

impl From<BinaryCondition> for Condition {
    fn from(c: BinaryCondition) -> Self {
        Condition::Atomic(AtomicCondition::Binary(c))
    }
}

impl From<SimpleCondition> for Condition {
    fn from(c: SimpleCondition) -> Self {
        Condition::Atomic(AtomicCondition::Simple(c))
    }
}

impl From<KCIndexCondition> for Condition {
    fn from(c: KCIndexCondition) -> Self {
        Condition::Atomic(AtomicCondition::KleeneIndex(c))
    }
}

impl From<KCValueCondition> for Condition {
    fn from(c: KCValueCondition) -> Self {
        Condition::Atomic(AtomicCondition::KleeneValue(c))
    }
}
