use super::{CleanupSchedule, PatternMatchStorage, StorageSpec};
use crate::event::{SharedMatch, Timestamp};
use serde_json::Value;

/// Append-only storage; every stored match is a join candidate.
#[derive(Debug)]
pub struct UnsortedStorage {
    matches: Vec<SharedMatch>,
    spec: StorageSpec,
    schedule: CleanupSchedule,
}

impl UnsortedStorage {
    pub fn new(spec: StorageSpec, schedule: CleanupSchedule) -> Self {
        Self {
            matches: Vec::new(),
            spec,
            schedule,
        }
    }

    fn sweep(&mut self, threshold: Timestamp) -> usize {
        let before = self.matches.len();
        if self.spec.in_order {
            // Arrival order: stop at the first live match.
            let live = self
                .matches
                .iter()
                .position(|pm| pm.first_timestamp() >= threshold)
                .unwrap_or(self.matches.len());
            self.matches.drain(..live);
        } else {
            self.matches.retain(|pm| pm.first_timestamp() >= threshold);
        }
        before - self.matches.len()
    }
}

impl PatternMatchStorage for UnsortedStorage {
    fn add(&mut self, pm: SharedMatch) {
        self.matches.push(pm);
        self.schedule.record_addition();
    }

    fn get(&self, _key: &Value) -> Vec<SharedMatch> {
        self.matches.clone()
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
