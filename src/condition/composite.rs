//! Conjunctions and disjunctions of conditions.

use super::{Binding, Condition, ConditionObserver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompositeKind {
    And,
    Or,
}

/// An ordered list of conditions joined by one connective.
///
/// An empty composite is vacuously true regardless of its kind.
#[derive(Debug, Clone)]
pub struct CompositeCondition {
    pub kind: CompositeKind,
    pub conditions: Vec<Condition>,
}

impl CompositeCondition {
    pub fn new(kind: CompositeKind, conditions: Vec<Condition>) -> Self {
        Self { kind, conditions }
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Short-circuits: And stops at the first false, Or at the first true.
    pub fn evaluate(&self, binding: &Binding<'_>, observer: Option<&dyn ConditionObserver>) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        match self.kind {
            CompositeKind::And => self
                .conditions
                .iter()
                .all(|c| c.evaluate(binding, observer)),
            CompositeKind::Or => self
                .conditions
                .iter()
                .any(|c| c.evaluate(binding, observer)),
        }
    }

    /// Order-insensitive structural equality.
    pub(crate) fn equivalent(&self, other: &Self) -> bool {
        if self.kind != other.kind || self.conditions.len() != other.conditions.len() {
            return false;
        }
        let mut used = vec![false; other.conditions.len()];
        self.conditions.iter().all(|mine| {
            let found = other
                .conditions
                .iter()
                .enumerate()
                .position(|(i, theirs)| !used[i] && mine.equivalent(theirs));
            match found {
                Some(i) => {
                    used[i] = true;
                    true
                }
                None => false,
            }
        })
    }
}
