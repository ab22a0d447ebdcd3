//! Kleene closure handling.
//!
//! When the child produces a match, the closure emits one aggregated match
//! for every arrival-ordered selection of earlier child matches that ends with
//! the new one, fits in the window and respects the size bounds. Every
//! selection is therefore produced exactly once, when its last member arrives.

use super::evaluator::TreeEvaluator;
use super::types::{Expiry, NodeId, NodeKind};
use crate::error::{CepError, Result};
use crate::event::{AggregatedEvent, MatchEvent, SharedEvent, SharedMatch};
use std::sync::Arc;

/// Strictly increasing index selections from `0..count` with a length in
/// `min_len..=max_len`, generated one at a time, shortest first.
struct Selections {
    count: usize,
    max_len: usize,
    current: Option<Vec<usize>>,
}

impl Selections {
    fn new(count: usize, min_len: usize, max_len: usize) -> Self {
        let max_len = max_len.min(count);
        Self {
            count,
            max_len,
            current: (min_len <= max_len).then(|| (0..min_len).collect()),
        }
    }

    /// Next selection of the same length in lexicographic order, or the
    /// first one of the next length.
    fn successor(&self, selection: &[usize]) -> Option<Vec<usize>> {
        let len = selection.len();
        let mut next = selection.to_vec();
        for pos in (0..len).rev() {
            if next[pos] < self.count - len + pos {
                next[pos] += 1;
                for later in pos + 1..len {
                    next[later] = next[later - 1] + 1;
                }
                return Some(next);
            }
        }
        (len < self.max_len).then(|| (0..=len).collect())
    }
}

impl Iterator for Selections {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        let current = self.current.take()?;
        self.current = self.successor(&current);
        Some(current)
    }
}

impl TreeEvaluator {
    pub(super) fn handle_kleene(&mut self, id: NodeId, child: NodeId) -> Result<()> {
        let observer = self.observer.clone();
        let arena = &mut self.tree.arena;
        let (min_size, max_size, window, event_type) = {
            let node = arena.get(id)?;
            let NodeKind::KleeneClosure(kleene) = &node.kind else {
                return Err(CepError::NotAChild { parent: id, child });
            };
            if kleene.child != child {
                return Err(CepError::NotAChild { parent: id, child });
            }
            let event_type = node
                .slots
                .first()
                .map(|slot| slot.event_types.join("|"))
                .unwrap_or_default();
            (kleene.min_size, kleene.max_size, node.window, event_type)
        };
        let pm = arena
            .get_mut(child)?
            .take_unhandled(id)
            .ok_or(CepError::MissingPartialMatch { parent: id, child })?;

        let earlier: Vec<SharedMatch> = {
            let child = arena.get_mut(child)?;
            child.clean_expired(pm.last_timestamp());
            let stored = child.storage().all();
            let end = stored
                .iter()
                .position(|m| Arc::ptr_eq(m, &pm))
                .unwrap_or(stored.len());
            stored[..end]
                .iter()
                .filter(|m| pm.last_timestamp() - m.first_timestamp() <= window)
                .cloned()
                .collect()
        };

        let max_extra = max_size.map_or(earlier.len(), |max| max.saturating_sub(1));
        let min_extra = min_size.saturating_sub(1);

        let node = arena.get_mut(id)?;
        let mut accepted = Vec::new();
        for selection in Selections::new(earlier.len(), min_extra, max_extra) {
            let members: Vec<SharedEvent> = selection
                .iter()
                .flat_map(|&i| earlier[i].primitive_events())
                .chain(pm.primitive_events())
                .cloned()
                .collect();
            let Some(group) = AggregatedEvent::new(event_type.clone(), members) else {
                continue;
            };
            let probability = group.probability();
            let events = vec![MatchEvent::Aggregated(Arc::new(group))];
            if let Some(aggregated) = node.accept(events, probability, observer.as_deref()) {
                accepted.push(Arc::new(aggregated));
            }
        }
        for aggregated in accepted {
            self.propagate(id, aggregated, Expiry::Enforce)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selections(count: usize, min_len: usize, max_len: usize) -> Vec<Vec<usize>> {
        Selections::new(count, min_len, max_len).collect()
    }

    #[test]
    fn test_selections() {
        assert_eq!(selections(0, 0, 3), vec![Vec::<usize>::new()]);
        assert_eq!(
            selections(3, 0, 2),
            vec![
                vec![],
                vec![0],
                vec![1],
                vec![2],
                vec![0, 1],
                vec![0, 2],
                vec![1, 2]
            ]
        );
        assert_eq!(selections(4, 0, 4).len(), 16);
        assert_eq!(selections(4, 0, 0).len(), 1);
    }

    #[test]
    fn test_selections_skip_short_ones() {
        assert_eq!(
            selections(4, 3, 3),
            vec![vec![0, 1, 2], vec![0, 1, 3], vec![0, 2, 3], vec![1, 2, 3]]
        );
        assert_eq!(selections(4, 2, 3).len(), 10);
        assert!(selections(2, 3, 5).is_empty());
        assert_eq!(selections(3, 3, 10), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_long_unbounded_selection_is_lazy() {
        // 2^40 selections in total, only the first few are generated
        let first: Vec<Vec<usize>> = Selections::new(40, 39, 40).take(3).collect();
        assert_eq!(first[0], (0..39).collect::<Vec<_>>());
        assert_eq!(first[1], (0..38).chain([39]).collect::<Vec<_>>());
        assert_eq!(first.len(), 3);
    }
}
