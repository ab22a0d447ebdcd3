//! Negation handling.
//!
//! A bounded negation (a positive event follows the negated one) is decided
//! when the positive match arrives: every stored negative match is already
//! known. An unbounded negation can still be violated by later negative
//! events, so accepted matches wait at the top of their chain until their
//! window has passed, and each newly arriving negative event scans them.
//!
//! On a certain stream a matching negative event cancels the positive match.
//! On a probabilistic stream it multiplies the match probability by the
//! probability that the negative event did not happen.

use super::evaluator::TreeEvaluator;
use super::types::{merge_events, Expiry, NodeId};
use crate::error::{CepError, Result};
use crate::event::{PatternMatch, SharedMatch, Timestamp};
use crate::storage::SortingKey;
use log::{debug, trace};
use std::sync::Arc;

struct NegationView {
    positive: NodeId,
    negative: NodeId,
    is_unbounded: bool,
    chain_top: Option<NodeId>,
    positive_key: Option<SortingKey>,
}

/// Probability left after discounting one matching negative event, or `None`
/// when the positive match is cancelled outright.
fn discount(probability: Option<f64>, negative: Option<f64>) -> Option<Option<f64>> {
    let p = negative?;
    Some(Some(probability.unwrap_or(1.0) * (1.0 - p)))
}

impl TreeEvaluator {
    pub(super) fn handle_negation(&mut self, id: NodeId, child: NodeId) -> Result<()> {
        let view = {
            let node = self.tree.arena.get(id)?;
            let negation = node
                .kind
                .as_negation()
                .ok_or(CepError::NotANegationNode(id))?;
            NegationView {
                positive: negation.positive,
                negative: negation.negative,
                is_unbounded: negation.is_unbounded,
                chain_top: negation.chain_top,
                positive_key: negation.positive_key.clone(),
            }
        };
        if child == view.positive {
            self.handle_positive(id, &view)
        } else if child == view.negative {
            self.handle_negative(id, &view)
        } else {
            Err(CepError::NotAChild { parent: id, child })
        }
    }

    fn handle_positive(&mut self, id: NodeId, view: &NegationView) -> Result<()> {
        let observer = self.observer.clone();
        let arena = &mut self.tree.arena;
        let pm = arena
            .get_mut(view.positive)?
            .take_unhandled(id)
            .ok_or(CepError::MissingPartialMatch {
                parent: id,
                child: view.positive,
            })?;

        let negatives = {
            let negative = arena.get_mut(view.negative)?;
            negative.clean_expired(pm.last_timestamp());
            match &view.positive_key {
                Some(key) => negative.storage().get(&key.key(&pm)),
                None => negative.storage().all().to_vec(),
            }
        };

        let mut probability = pm.probability();
        {
            let node = arena.get(id)?;
            let negation = node
                .kind
                .as_negation()
                .ok_or(CepError::NotANegationNode(id))?;
            for negative in &negatives {
                let combined = merge_events(pm.events(), negative.events(), &negation.combined_order);
                if !node.admits(&combined, &negation.combined_slots, observer.as_deref()) {
                    continue;
                }
                match discount(probability, negative.probability()) {
                    Some(discounted) => probability = discounted,
                    None => {
                        trace!("node {id}: match cancelled by a negative event");
                        return Ok(());
                    }
                }
            }
        }

        let node = arena.get_mut(id)?;
        let Some(accepted) = node.finalize(pm.events().to_vec(), probability) else {
            return Ok(());
        };
        let accepted = Arc::new(accepted);
        if view.is_unbounded && view.chain_top == Some(id) {
            let negation = node
                .kind
                .as_negation_mut()
                .ok_or(CepError::NotANegationNode(id))?;
            negation.pending.push(accepted);
            Ok(())
        } else {
            self.propagate(id, accepted, Expiry::Enforce)
        }
    }

    /// Bounded negatives only wait in storage. Unbounded ones are checked
    /// against everything pending at the chain top.
    fn handle_negative(&mut self, id: NodeId, view: &NegationView) -> Result<()> {
        let observer = self.observer.clone();
        let arena = &mut self.tree.arena;
        let negative = arena
            .get_mut(view.negative)?
            .take_unhandled(id)
            .ok_or(CepError::MissingPartialMatch {
                parent: id,
                child: view.negative,
            })?;
        let (true, Some(top)) = (view.is_unbounded, view.chain_top) else {
            return Ok(());
        };

        let pending = std::mem::take(
            &mut arena
                .get_mut(top)?
                .kind
                .as_negation_mut()
                .ok_or(CepError::NotANegationNode(top))?
                .pending,
        );
        if pending.is_empty() {
            return Ok(());
        }

        let node = arena.get(id)?;
        let negation = node
            .kind
            .as_negation()
            .ok_or(CepError::NotANegationNode(id))?;
        let mut kept: Vec<SharedMatch> = Vec::with_capacity(pending.len());
        for pm in pending {
            let combined = merge_events(pm.events(), negative.events(), &negation.combined_order);
            if !node.admits(&combined, &negation.combined_slots, observer.as_deref()) {
                kept.push(pm);
                continue;
            }
            match discount(pm.probability(), negative.probability()) {
                None => trace!("node {id}: pending match cancelled by a negative event"),
                Some(discounted) => {
                    if let (Some(threshold), Some(p)) = (node.confidence, discounted) {
                        if p < threshold {
                            trace!("node {id}: pending match fell below confidence {threshold}");
                            continue;
                        }
                    }
                    kept.push(Arc::new(PatternMatch::clone(&pm).with_probability(discounted)));
                }
            }
        }

        arena
            .get_mut(top)?
            .kind
            .as_negation_mut()
            .ok_or(CepError::NotANegationNode(top))?
            .pending = kept;
        Ok(())
    }

    /// Release pending matches whose window has passed by `now`.
    pub fn flush_expired_pending(&mut self, now: Timestamp) -> Result<()> {
        self.flush_pending(|pm, window| now - pm.first_timestamp() > window)
    }

    /// Release every pending match, at the end of the stream.
    pub fn flush_all_pending(&mut self) -> Result<()> {
        self.flush_pending(|_, _| true)
    }

    fn flush_pending(&mut self, due: impl Fn(&SharedMatch, chrono::Duration) -> bool) -> Result<()> {
        for i in 0..self.chain_tops.len() {
            let top = self.chain_tops[i];
            let released = {
                let node = self.tree.arena.get_mut(top)?;
                let window = node.window;
                let negation = node
                    .kind
                    .as_negation_mut()
                    .ok_or(CepError::NotANegationNode(top))?;
                if negation.pending.is_empty() {
                    continue;
                }
                let (released, kept): (Vec<SharedMatch>, Vec<SharedMatch>) =
                    std::mem::take(&mut negation.pending)
                        .into_iter()
                        .partition(|pm| due(pm, window));
                negation.pending = kept;
                released
            };
            if !released.is_empty() {
                debug!("node {top}: releasing {} pending matches", released.len());
            }
            for pm in released {
                self.propagate(top, pm, Expiry::Bypass)?;
            }
        }
        Ok(())
    }
}
