use super::{CleanupSchedule, EquationSide, PatternMatchStorage, SortingKey, StorageSpec};
use crate::condition::RelationOp;
use crate::event::{SharedMatch, Timestamp};
use crate::value::compare_values;
use serde_json::Value;
use std::cmp::Ordering;

/// Storage ordered by a key, answering relational lookups with binary search.
#[derive(Debug)]
pub struct SortedStorage {
    key: SortingKey,
    keys: Vec<Value>,
    matches: Vec<SharedMatch>,
    spec: StorageSpec,
    schedule: CleanupSchedule,
}

impl SortedStorage {
    pub fn new(key: SortingKey, spec: StorageSpec, schedule: CleanupSchedule) -> Self {
        Self {
            key,
            keys: Vec::new(),
            matches: Vec::new(),
            spec,
            schedule,
        }
    }

    /// The operator in `stored_key OP probe` form.
    fn effective_op(&self) -> RelationOp {
        match self.spec.side {
            EquationSide::Left => self.spec.relation,
            EquationSide::Right => self.spec.relation.reflect(),
        }
    }

    /// `[lo, hi)` is the run of keys equal to `probe`.
    fn equal_range(&self, probe: &Value) -> (usize, usize) {
        let lo = self
            .keys
            .partition_point(|k| compare_values(k, probe) == Ordering::Less);
        let hi = self
            .keys
            .partition_point(|k| compare_values(k, probe) != Ordering::Greater);
        (lo, hi)
    }

    fn sweep(&mut self, threshold: Timestamp) -> usize {
        let before = self.matches.len();
        let mut keys = Vec::with_capacity(before);
        let mut matches = Vec::with_capacity(before);
        for (key, pm) in self.keys.drain(..).zip(self.matches.drain(..)) {
            if pm.first_timestamp() >= threshold {
                keys.push(key);
                matches.push(pm);
            }
        }
        self.keys = keys;
        self.matches = matches;
        before - self.matches.len()
    }
}

impl PatternMatchStorage for SortedStorage {
    fn add(&mut self, pm: SharedMatch) {
        let key = self.key.key(&pm);
        let appends = self.spec.in_order
            && self
                .keys
                .last()
                .map_or(true, |last| compare_values(last, &key) != Ordering::Greater);
        if appends {
            self.keys.push(key);
            self.matches.push(pm);
        } else {
            let at = self
                .keys
                .partition_point(|k| compare_values(k, &key) != Ordering::Greater);
            self.keys.insert(at, key);
            self.matches.insert(at, pm);
        }
        self.schedule.record_addition();
    }

    fn get(&self, probe: &Value) -> Vec<SharedMatch> {
        let (lo, hi) = self.equal_range(probe);
        let all = &self.matches;
        match self.effective_op() {
            RelationOp::Equal => all[lo..hi].to_vec(),
            RelationOp::NotEqual => all[..lo].iter().chain(&all[hi..]).cloned().collect(),
            RelationOp::Greater => all[hi..].to_vec(),
            RelationOp::GreaterEqual => all[lo..].to_vec(),
            RelationOp::Smaller => all[..lo].to_vec(),
            RelationOp::SmallerEqual => all[..hi].to_vec(),
        }
    }

    fn all(&self) -> &[SharedMatch] {
        &self.matches
    }

    fn try_clean_expired(&mut self, threshold: Timestamp) -> usize {
        if self.schedule.take_due() {
            self.sweep(threshold)
        } else {
            0
        }
    }

    fn clean_expired_now(&mut self, threshold: Timestamp) -> usize {
        self.sweep(threshold)
    }

    fn len(&self) -> usize {
        self.matches.len()
    }

    fn spec(&self) -> &StorageSpec {
        &self.spec
    }
}
