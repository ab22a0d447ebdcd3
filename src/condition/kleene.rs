//! Conditions over the members of a Kleene-closure group.
//!
//! Both kinds bind a single pattern name whose slot holds an aggregated
//! event, and evaluate over its primitive members in arrival order. Negative
//! indices count from the end of the group.

use super::atomic::Comparison;
use super::variable::Accessor;
use super::Binding;
use crate::error::{CepError, Result};
use serde_json::Value;
use std::fmt;

/// Which members a [`KCIndexCondition`] relates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KleeneIndexing {
    /// Relate the members at two explicit positions.
    Pair { first: isize, second: isize },
    /// Relate every member `i` with member `i + offset`.
    Offset(isize),
}

fn resolve_index(index: isize, len: usize) -> Option<usize> {
    let resolved = if index < 0 {
        len.checked_sub(index.unsigned_abs())?
    } else {
        index as usize
    };
    (resolved < len).then_some(resolved)
}

fn member_values(binding: &Binding<'_>, name: &str, accessor: &Accessor) -> Option<Vec<Value>> {
    binding
        .get(name)?
        .primitives()
        .iter()
        .map(|event| accessor.read(event))
        .collect()
}

/// Relates members of a Kleene group to each other.
#[derive(Debug, Clone, PartialEq)]
pub struct KCIndexCondition {
    pub name: String,
    pub accessor: Accessor,
    pub comparison: Comparison,
    pub indexing: KleeneIndexing,
}

impl KCIndexCondition {
    /// Exactly one of an index pair or an offset must be given.
    pub fn new(
        name: impl Into<String>,
        accessor: Accessor,
        comparison: impl Into<Comparison>,
        first: Option<isize>,
        second: Option<isize>,
        offset: Option<isize>,
    ) -> Result<Self> {
        let indexing = match (first, second, offset) {
            (Some(first), Some(second), None) => KleeneIndexing::Pair { first, second },
            (None, None, Some(offset)) => KleeneIndexing::Offset(offset),
            (None, None, None) => {
                return Err(CepError::InvalidKleeneCondition(
                    "either an index pair or an offset is required".to_string(),
                ))
            }
            _ => {
                return Err(CepError::InvalidKleeneCondition(
                    "index pair and offset are mutually exclusive".to_string(),
                ))
            }
        };
        Ok(Self {
            name: name.into(),
            accessor,
            comparison: comparison.into(),
            indexing,
        })
    }

    /// Relate each member with the next one.
    pub fn consecutive(
        name: impl Into<String>,
        accessor: Accessor,
        comparison: impl Into<Comparison>,
    ) -> Self {
        Self {
            name: name.into(),
            accessor,
            comparison: comparison.into(),
            indexing: KleeneIndexing::Offset(1),
        }
    }

    /// Out-of-range positions make a pair condition false; an offset with no
    /// pair in range is vacuously true.
    pub fn evaluate(&self, binding: &Binding<'_>) -> bool {
        let Some(values) = member_values(binding, &self.name, &self.accessor) else {
            return false;
        };
        let len = values.len();
        match self.indexing {
            KleeneIndexing::Pair { first, second } => {
                match (resolve_index(first, len), resolve_index(second, len)) {
                    (Some(i), Some(j)) => self.comparison.evaluate(&values[i], &values[j]),
                    _ => false,
                }
            }
            KleeneIndexing::Offset(offset) => (0..len).all(|i| {
                let Some(j) = i.checked_add_signed(offset).filter(|j| *j < len) else {
                    return true;
                };
                self.comparison.evaluate(&values[i], &values[j])
            }),
        }
    }
}

impl fmt::Display for KCIndexCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attr = self.accessor.label();
        let op = self.comparison.label();
        match self.indexing {
            KleeneIndexing::Pair { first, second } => write!(
                f,
                "{name}[{first}].{attr} {op} {name}[{second}].{attr}",
                name = self.name
            ),
            KleeneIndexing::Offset(offset) => write!(
                f,
                "{name}[i].{attr} {op} {name}[i{offset:+}].{attr}",
                name = self.name
            ),
        }
    }
}

/// Compares members of a Kleene group against a literal.
#[derive(Debug, Clone, PartialEq)]
pub struct KCValueCondition {
    pub name: String,
    pub accessor: Accessor,
    pub comparison: Comparison,
    pub value: Value,
    /// Only this member when set, every member otherwise
    pub index: Option<isize>,
}

impl KCValueCondition {
    pub fn new(
        name: impl Into<String>,
        accessor: Accessor,
        comparison: impl Into<Comparison>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            accessor,
            comparison: comparison.into(),
            value: value.into(),
            index: None,
        }
    }

    pub fn at_index(mut self, index: isize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn evaluate(&self, binding: &Binding<'_>) -> bool {
        let Some(values) = member_values(binding, &self.name, &self.accessor) else {
            return false;
        };
        match self.index {
            Some(index) => resolve_index(index, values.len())
                .is_some_and(|i| self.comparison.evaluate(&values[i], &self.value)),
            None => values
                .iter()
                .all(|v| self.comparison.evaluate(v, &self.value)),
        }
    }
}

impl fmt::Display for KCValueCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let position = self.index.map_or("*".to_string(), |i| i.to_string());
        write!(
            f,
            "{}[{}].{} {} {}",
            self.name,
            position,
            self.accessor.label(),
            self.comparison.label(),
            self.value
        )
    }
}
