//! Atomic conditions: relations over terms.

use super::kleene::{KCIndexCondition, KCValueCondition};
use super::variable::{Term, Variable};
use super::Binding;
use crate::error::{CepError, Result};
use crate::value::compare_values;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Relational operators with a known mirror image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationOp {
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Smaller,
    SmallerEqual,
}

impl RelationOp {
    pub fn evaluate(self, left: &Value, right: &Value) -> bool {
        let ord = compare_values(left, right);
        match self {
            RelationOp::Equal => ord == Ordering::Equal,
            RelationOp::NotEqual => ord != Ordering::Equal,
            RelationOp::Greater => ord == Ordering::Greater,
            RelationOp::GreaterEqual => ord != Ordering::Less,
            RelationOp::Smaller => ord == Ordering::Less,
            RelationOp::SmallerEqual => ord != Ordering::Greater,
        }
    }

    /// The operator that holds after swapping operands: `a > b` iff `b < a`.
    pub fn reflect(self) -> Self {
        match self {
            RelationOp::Greater => RelationOp::Smaller,
            RelationOp::GreaterEqual => RelationOp::SmallerEqual,
            RelationOp::Smaller => RelationOp::Greater,
            RelationOp::SmallerEqual => RelationOp::GreaterEqual,
            op => op,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            RelationOp::Equal => "==",
            RelationOp::NotEqual => "!=",
            RelationOp::Greater => ">",
            RelationOp::GreaterEqual => ">=",
            RelationOp::Smaller => "<",
            RelationOp::SmallerEqual => "<=",
        }
    }
}

impl FromStr for RelationOp {
    type Err = CepError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "==" | "=" | "eq" => Ok(RelationOp::Equal),
            "!=" | "<>" | "ne" => Ok(RelationOp::NotEqual),
            ">" | "gt" => Ok(RelationOp::Greater),
            ">=" | "ge" => Ok(RelationOp::GreaterEqual),
            "<" | "lt" => Ok(RelationOp::Smaller),
            "<=" | "le" => Ok(RelationOp::SmallerEqual),
            other => Err(CepError::UnknownOperator(other.to_string())),
        }
    }
}

/// N-ary relation function over resolved term values.
pub type RelationFn = Arc<dyn Fn(&[Value]) -> bool + Send + Sync>;

/// A labelled user-supplied relation. Two relations are equal when their labels are.
#[derive(Clone)]
pub struct Relation {
    label: String,
    func: RelationFn,
}

impl Relation {
    pub fn new(
        label: impl Into<String>,
        func: impl Fn(&[Value]) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            func: Arc::new(func),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn apply(&self, values: &[Value]) -> bool {
        (self.func)(values)
    }
}

impl PartialEq for Relation {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
    }
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Relation({})", self.label)
    }
}

/// The relation of a two-operand condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Op(RelationOp),
    Custom(Relation),
}

impl Comparison {
    pub fn evaluate(&self, left: &Value, right: &Value) -> bool {
        match self {
            Comparison::Op(op) => op.evaluate(left, right),
            Comparison::Custom(relation) => relation.apply(&[left.clone(), right.clone()]),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Comparison::Op(op) => op.symbol(),
            Comparison::Custom(relation) => relation.label(),
        }
    }
}

impl From<RelationOp> for Comparison {
    fn from(op: RelationOp) -> Self {
        Comparison::Op(op)
    }
}

/// A condition over any number of terms.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleCondition {
    pub terms: Vec<Term>,
    pub relation: Relation,
}

impl SimpleCondition {
    pub fn new(terms: Vec<Term>, relation: Relation) -> Self {
        Self { terms, relation }
    }

    pub fn evaluate(&self, binding: &Binding<'_>) -> bool {
        let values: Option<Vec<Value>> = self.terms.iter().map(|t| t.value(binding)).collect();
        values.is_some_and(|values| self.relation.apply(&values))
    }
}

/// A condition relating two terms.
#[derive(Debug, Clone)]
pub struct BinaryCondition {
    pub left: Term,
    pub right: Term,
    pub comparison: Comparison,
}

impl BinaryCondition {
    pub fn new(left: impl Into<Term>, right: impl Into<Term>, comparison: Comparison) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
            comparison,
        }
    }

    pub fn with_op(left: impl Into<Term>, right: impl Into<Term>, op: RelationOp) -> Self {
        Self::new(left, right, Comparison::Op(op))
    }

    pub fn equal(left: impl Into<Term>, right: impl Into<Term>) -> Self {
        Self::with_op(left, right, RelationOp::Equal)
    }

    pub fn not_equal(left: impl Into<Term>, right: impl Into<Term>) -> Self {
        Self::with_op(left, right, RelationOp::NotEqual)
    }

    pub fn greater(left: impl Into<Term>, right: impl Into<Term>) -> Self {
        Self::with_op(left, right, RelationOp::Greater)
    }

    pub fn greater_equal(left: impl Into<Term>, right: impl Into<Term>) -> Self {
        Self::with_op(left, right, RelationOp::GreaterEqual)
    }

    pub fn smaller(left: impl Into<Term>, right: impl Into<Term>) -> Self {
        Self::with_op(left, right, RelationOp::Smaller)
    }

    pub fn smaller_equal(left: impl Into<Term>, right: impl Into<Term>) -> Self {
        Self::with_op(left, right, RelationOp::SmallerEqual)
    }

    pub fn evaluate(&self, binding: &Binding<'_>) -> bool {
        match (self.left.value(binding), self.right.value(binding)) {
            (Some(left), Some(right)) => self.comparison.evaluate(&left, &right),
            _ => false,
        }
    }

    /// Orient the condition as `left_var OP right_var`, where `left_var` names
    /// an event in `left_names` and `right_var` one in `right_names`.
    ///
    /// Returns `None` for custom relations or when the condition does not
    /// straddle the two name sets.
    pub fn oriented(
        &self,
        left_names: &BTreeSet<String>,
        right_names: &BTreeSet<String>,
    ) -> Option<(&Variable, RelationOp, &Variable)> {
        let Comparison::Op(op) = self.comparison else {
            return None;
        };
        let (Term::Variable(l), Term::Variable(r)) = (&self.left, &self.right) else {
            return None;
        };
        if left_names.contains(&l.name) && right_names.contains(&r.name) {
            Some((l, op, r))
        } else if left_names.contains(&r.name) && right_names.contains(&l.name) {
            Some((r, op.reflect(), l))
        } else {
            None
        }
    }
}

impl PartialEq for BinaryCondition {
    fn eq(&self, other: &Self) -> bool {
        if self.left == other.left
            && self.right == other.right
            && self.comparison == other.comparison
        {
            return true;
        }
        match (&self.comparison, &other.comparison) {
            (Comparison::Op(a), Comparison::Op(b)) => {
                self.left == other.right && self.right == other.left && a.reflect() == *b
            }
            _ => false,
        }
    }
}

/// The leaves of a condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum AtomicCondition {
    Simple(SimpleCondition),
    Binary(BinaryCondition),
    KleeneIndex(KCIndexCondition),
    KleeneValue(KCValueCondition),
}

impl AtomicCondition {
    /// Event names referenced by the condition.
    pub fn names(&self) -> BTreeSet<String> {
        match self {
            AtomicCondition::Simple(c) => c
                .terms
                .iter()
                .filter_map(Term::name)
                .map(str::to_string)
                .collect(),
            AtomicCondition::Binary(c) => [&c.left, &c.right]
                .into_iter()
                .filter_map(Term::name)
                .map(str::to_string)
                .collect(),
            AtomicCondition::KleeneIndex(c) => BTreeSet::from([c.name.clone()]),
            AtomicCondition::KleeneValue(c) => BTreeSet::from([c.name.clone()]),
        }
    }

    pub fn is_kleene(&self) -> bool {
        matches!(
            self,
            AtomicCondition::KleeneIndex(_) | AtomicCondition::KleeneValue(_)
        )
    }

    pub fn evaluate(&self, binding: &Binding<'_>) -> bool {
        match self {
            AtomicCondition::Simple(c) => c.evaluate(binding),
            AtomicCondition::Binary(c) => c.evaluate(binding),
            AtomicCondition::KleeneIndex(c) => c.evaluate(binding),
            AtomicCondition::KleeneValue(c) => c.evaluate(binding),
        }
    }

    pub fn renamed(&self, names: &HashMap<String, String>) -> Self {
        let rename = |name: &String| names.get(name).cloned().unwrap_or_else(|| name.clone());
        match self {
            AtomicCondition::Simple(c) => AtomicCondition::Simple(SimpleCondition {
                terms: c.terms.iter().map(|t| t.renamed(names)).collect(),
                relation: c.relation.clone(),
            }),
            AtomicCondition::Binary(c) => AtomicCondition::Binary(BinaryCondition {
                left: c.left.renamed(names),
                right: c.right.renamed(names),
                comparison: c.comparison.clone(),
            }),
            AtomicCondition::KleeneIndex(c) => {
                let mut renamed = c.clone();
                renamed.name = rename(&c.name);
                AtomicCondition::KleeneIndex(renamed)
            }
            AtomicCondition::KleeneValue(c) => {
                let mut renamed = c.clone();
                renamed.name = rename(&c.name);
                AtomicCondition::KleeneValue(renamed)
            }
        }
    }
}

impl fmt::Display for AtomicCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtomicCondition::Simple(c) => {
                let terms: Vec<String> = c.terms.iter().map(ToString::to_string).collect();
                write!(f, "{}({})", c.relation.label(), terms.join(", "))
            }
            AtomicCondition::Binary(c) => {
                write!(f, "{} {} {}", c.left, c.comparison.label(), c.right)
            }
            AtomicCondition::KleeneIndex(c) => c.fmt(f),
            AtomicCondition::KleeneValue(c) => c.fmt(f),
        }
    }
}

impl From<BinaryCondition> for AtomicCondition {
    fn from(c: BinaryCondition) -> Self {
        AtomicCondition::Binary(c)
    }
}

impl From<SimpleCondition> for AtomicCondition {
    fn from(c: SimpleCondition) -> Self {
        AtomicCondition::Simple(c)
    }
}
