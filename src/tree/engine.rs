//! Primary engine interface.
//!
//! `TreeEngine` builds one evaluation tree for a set of patterns and feeds it
//! a stream of events, collecting the matches reported for each pattern.

use super::evaluator::TreeEvaluator;
use super::sharing::MultiPatternTreeBuilder;
use super::types::TreeStatistics;
use crate::condition::ConditionObserver;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::event::{Event, PatternMatch};
use crate::pattern::{load_patterns_from_yaml, Pattern, PatternId, TreePlan};
use log::debug;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Streaming pattern matcher over a tree of operator nodes.
///
/// # Usage Patterns
///
/// ## Event at a time
/// ```rust,ignore
/// engine.process(event)?;
/// for m in engine.drain_matches() {
///     println!("patterns {:?} matched {} events", m.pattern_ids(), m.events().len());
/// }
/// ```
///
/// ## Whole stream
/// ```rust,ignore
/// let matches = engine.evaluate_all(events)?;
/// ```
///
/// # Examples
///
/// ```rust,ignore
/// use cep_tree_engine::{EngineConfig, TreeEngine};
///
/// let mut engine = TreeEngine::from_yaml(patterns_yaml, EngineConfig::shared())?;
/// for event in stream {
///     engine.process(event)?;
/// }
/// engine.finish()?;
/// let matches = engine.drain_matches();
/// ```
pub struct TreeEngine {
    evaluator: TreeEvaluator,
    config: EngineConfig,
    pattern_ids: BTreeSet<PatternId>,
    next_index: u64,
}

impl TreeEngine {
    /// Build an engine using a left-deep plan for every pattern.
    ///
    /// Patterns whose structure is a top-level disjunction are split into one
    /// sub-pattern per branch, all reporting under the ID of `pattern`.
    pub fn from_patterns(patterns: &[Pattern], config: EngineConfig) -> Result<Self> {
        let mut pairs = Vec::new();
        for pattern in patterns {
            for branch in pattern.split_disjunction()? {
                let plan = TreePlan::left_deep(&branch)?;
                pairs.push((branch, plan));
            }
        }
        Self::from_plans(pairs, config)
    }

    /// Build an engine from explicit evaluation plans.
    pub fn from_plans(pairs: Vec<(Pattern, TreePlan)>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let mut builder = MultiPatternTreeBuilder::new(config.storage.clone(), config.sharing);
        let mut pattern_ids = BTreeSet::new();
        for (pattern, plan) in &pairs {
            builder.add_pattern(pattern, plan)?;
            pattern_ids.insert(pattern.id);
        }
        let tree = builder.build();
        let stats = tree.statistics();
        debug!(
            "built tree for {} patterns: {} nodes ({} leaves, {} shared)",
            pattern_ids.len(),
            stats.total_nodes,
            stats.leaf_nodes,
            stats.shared_nodes
        );
        Ok(Self {
            evaluator: TreeEvaluator::new(tree),
            config,
            pattern_ids,
            next_index: 0,
        })
    }

    /// Build an engine from YAML pattern definitions.
    pub fn from_yaml(yaml: &str, config: EngineConfig) -> Result<Self> {
        let patterns = load_patterns_from_yaml(yaml)?;
        Self::from_patterns(&patterns, config)
    }

    /// Report every atomic condition evaluation to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn ConditionObserver>) -> Self {
        self.evaluator = self.evaluator.with_observer(observer);
        self
    }

    /// Feed one event. Its arrival index is assigned here.
    pub fn process(&mut self, mut event: Event) -> Result<()> {
        event.index = self.next_index;
        self.next_index += 1;
        self.evaluator.process_event(Arc::new(event))
    }

    /// Feed a sequence of events in order.
    pub fn process_stream(&mut self, events: impl IntoIterator<Item = Event>) -> Result<()> {
        for event in events {
            self.process(event)?;
        }
        Ok(())
    }

    /// Feed a whole stream, finish it and return every match.
    pub fn evaluate_all(&mut self, events: impl IntoIterator<Item = Event>) -> Result<Vec<PatternMatch>> {
        self.process_stream(events)?;
        self.finish()?;
        Ok(self.drain_matches())
    }

    /// Take the matches reported so far.
    pub fn drain_matches(&mut self) -> Vec<PatternMatch> {
        self.evaluator.drain_matches()
    }

    /// Mark the end of the stream, releasing matches held back by
    /// unbounded negations when `flush_pending_on_finish` is set.
    pub fn finish(&mut self) -> Result<()> {
        if self.config.flush_pending_on_finish {
            self.evaluator.flush_all_pending()?;
        }
        Ok(())
    }

    pub fn statistics(&self) -> TreeStatistics {
        self.evaluator.statistics()
    }

    pub fn pattern_count(&self) -> usize {
        self.pattern_ids.len()
    }

    pub fn contains_pattern(&self, pattern_id: PatternId) -> bool {
        self.pattern_ids.contains(&pattern_id)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events_processed(&self) -> u64 {
        self.next_index
    }
}
