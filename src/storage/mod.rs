//! Partial-match storage.
//!
//! Every node keeps the partial matches it produced so that a sibling can
//! join new matches against them. When a parent's condition relates the two
//! sides by a comparable key, the storage is kept sorted by that key and
//! [`PatternMatchStorage::get`] returns only the candidates that can satisfy
//! the relation.
//!
//! # Storage Layouts
//!
//! | Layout | Insert | `get` | Expiry |
//! |--------|--------|-------|--------|
//! | Unsorted | append | everything | sweep |
//! | Arrival-ordered | append | everything | prefix trim |
//! | Sorted | binary search | one or two slices | sweep |
//!
//! Expiry is lazy: a storage only sweeps once per `clean_up_interval`
//! additions, whatever the number of clean-up requests in between.

mod sorted;
mod unsorted;

pub use sorted::SortedStorage;
pub use unsorted::UnsortedStorage;

use crate::condition::RelationOp;
use crate::error::{CepError, Result};
use crate::event::{PatternMatch, SharedMatch, Timestamp};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Extracts the sort key of a partial match.
pub type SortKeyFn = Arc<dyn Fn(&PatternMatch) -> Value + Send + Sync>;

/// A labelled sort-key function. Keys with the same label are interchangeable.
#[derive(Clone)]
pub struct SortingKey {
    label: String,
    func: SortKeyFn,
}

impl SortingKey {
    pub fn new(
        label: impl Into<String>,
        func: impl Fn(&PatternMatch) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            func: Arc::new(func),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn key(&self, pm: &PatternMatch) -> Value {
        (self.func)(pm)
    }
}

impl PartialEq for SortingKey {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
    }
}

impl fmt::Debug for SortingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SortingKey({})", self.label)
    }
}

/// Which side of the parent's relation the stored matches sit on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EquationSide {
    /// Stored matches are the left operand: `get(v)` returns `key OP v`.
    Left,
    /// Stored matches are the right operand: `get(v)` returns `v OP key`.
    Right,
}

/// How a node's storage is laid out.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageSpec {
    /// Sort key; `None` for unsorted storage
    pub sort_key: Option<SortingKey>,

    /// Relation of the parent condition the key serves
    pub relation: RelationOp,

    /// Side of the relation the stored matches take
    pub side: EquationSide,

    /// Matches arrive in key order (or, unsorted, in arrival order)
    pub in_order: bool,
}

impl StorageSpec {
    pub fn unsorted() -> Self {
        Self {
            sort_key: None,
            relation: RelationOp::Equal,
            side: EquationSide::Left,
            in_order: false,
        }
    }

    /// Unsorted, kept in arrival order.
    pub fn arrival_ordered() -> Self {
        Self {
            in_order: true,
            ..Self::unsorted()
        }
    }

    pub fn sorted(sort_key: SortingKey, relation: RelationOp, side: EquationSide) -> Self {
        Self {
            sort_key: Some(sort_key),
            relation,
            side,
            in_order: false,
        }
    }

    pub fn with_in_order(mut self, in_order: bool) -> Self {
        self.in_order = in_order;
        self
    }

    pub fn is_sorted(&self) -> bool {
        self.sort_key.is_some()
    }
}

impl Default for StorageSpec {
    fn default() -> Self {
        Self::unsorted()
    }
}

/// Storage contract shared by all layouts.
pub trait PatternMatchStorage: fmt::Debug + Send {
    fn add(&mut self, pm: SharedMatch);

    /// Candidates able to satisfy the relation against `key`. Unsorted
    /// storage returns everything.
    fn get(&self, key: &Value) -> Vec<SharedMatch>;

    /// All stored matches, in storage order.
    fn all(&self) -> &[SharedMatch];

    /// Lazily drop matches whose first timestamp is before `threshold`.
    /// Returns the number of matches removed.
    fn try_clean_expired(&mut self, threshold: Timestamp) -> usize;

    /// Drop expired matches regardless of the clean-up schedule.
    fn clean_expired_now(&mut self, threshold: Timestamp) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn spec(&self) -> &StorageSpec;
}

/// Build the storage for a layout.
pub fn create_storage(
    spec: StorageSpec,
    clean_up_interval: usize,
) -> Result<Box<dyn PatternMatchStorage>> {
    let schedule = CleanupSchedule::new(clean_up_interval)?;
    Ok(match spec.sort_key.clone() {
        Some(key) => Box::new(SortedStorage::new(key, spec, schedule)),
        None => Box::new(UnsortedStorage::new(spec, schedule)),
    })
}

/// Counts additions between expiry sweeps.
#[derive(Debug, Clone)]
pub struct CleanupSchedule {
    interval: usize,
    additions: usize,
}

impl Default for CleanupSchedule {
    /// Sweep on every addition.
    fn default() -> Self {
        Self {
            interval: 1,
            additions: 0,
        }
    }
}

impl CleanupSchedule {
    pub fn new(interval: usize) -> Result<Self> {
        if interval == 0 {
            return Err(CepError::InvalidCleanupInterval(interval));
        }
        Ok(Self {
            interval,
            additions: 0,
        })
    }

    pub fn record_addition(&mut self) {
        self.additions += 1;
    }

    /// True (and reset) once `interval` additions have been recorded.
    pub fn take_due(&mut self) -> bool {
        if self.additions >= self.interval {
            self.additions = 0;
            true
        } else {
            false
        }
    }
}
