//! Consumption policies.

use crate::condition::{Accessor, Condition, Relation, SimpleCondition, Term, Variable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How many matches a single event may take part in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionStrategy {
    /// No restriction
    #[default]
    MatchAny,
    /// Every event type of the pattern is single-use
    MatchSingle,
}

/// Restrictions on how events are consumed by a pattern.
///
/// * `single_types`: events of these types take part in at most one match
///   per node; once used they are remembered until they leave the window.
/// * `contiguous`: each listed name sequence must be made of events that
///   arrived back to back in the stream.
/// * `freeze`: while an event bound to one of these names is inside the
///   window, events for names declared before it are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionPolicy {
    #[serde(default)]
    pub selection: SelectionStrategy,

    #[serde(default)]
    pub single_types: Vec<String>,

    #[serde(default)]
    pub contiguous: Vec<Vec<String>>,

    #[serde(default)]
    pub freeze: Vec<String>,
}

impl ConsumptionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_selection(mut self, selection: SelectionStrategy) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_single_types(mut self, types: &[&str]) -> Self {
        self.single_types = types.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_contiguous(mut self, names: &[&str]) -> Self {
        self.contiguous
            .push(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn with_freeze(mut self, names: &[&str]) -> Self {
        self.freeze = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.selection == SelectionStrategy::MatchAny
            && self.single_types.is_empty()
            && self.contiguous.is_empty()
            && self.freeze.is_empty()
    }

    /// The single-use event types among `pattern_types`.
    pub fn single_event_types<'a>(
        &self,
        pattern_types: impl IntoIterator<Item = &'a str>,
    ) -> BTreeSet<String> {
        match self.selection {
            SelectionStrategy::MatchSingle => pattern_types.into_iter().map(str::to_string).collect(),
            SelectionStrategy::MatchAny => pattern_types
                .into_iter()
                .filter(|t| self.single_types.iter().any(|s| s == t))
                .map(str::to_string)
                .collect(),
        }
    }

    /// Arrival-index adjacency conditions enforcing the contiguity sequences.
    pub fn contiguity_condition(&self) -> Condition {
        let pairs: Vec<Condition> = self
            .contiguous
            .iter()
            .flat_map(|names| names.windows(2))
            .map(|pair| {
                Condition::from(SimpleCondition::new(
                    vec![
                        Term::Variable(Variable::new(pair[0].as_str(), Accessor::Index)),
                        Term::Variable(Variable::new(pair[1].as_str(), Accessor::Index)),
                    ],
                    Relation::new("consecutive", |values| {
                        match (values[0].as_u64(), values[1].as_u64()) {
                            (Some(first), Some(second)) => first.checked_add(1) == Some(second),
                            _ => false,
                        }
                    }),
                ))
            })
            .collect();
        Condition::and(pairs)
    }
}
