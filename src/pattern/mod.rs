//! Pattern definitions.
//!
//! A [`Pattern`] couples a [`PatternStructure`] with its condition, sliding
//! window, consumption policy and confidence threshold. Patterns are either
//! built in code or loaded from YAML through [`loader`].

pub mod loader;
pub mod plan;
pub mod policy;
pub mod structure;

pub use loader::{load_patterns_from_file, load_patterns_from_yaml, PatternDefinition};
pub use plan::{PlanOperator, TreePlan};
pub use policy::{ConsumptionPolicy, SelectionStrategy};
pub use structure::{
    is_unbounded_negative, ArgumentRole, PatternArgument, PatternStructure,
    PrimitiveEventStructure, TopLevelOperator,
};

use crate::condition::Condition;
use crate::error::{CepError, Result};
use chrono::Duration;
use std::collections::BTreeSet;

/// Unique identifier for patterns.
pub type PatternId = u32;

#[derive(Debug, Clone)]
pub struct Pattern {
    pub id: PatternId,
    pub structure: PatternStructure,
    pub condition: Condition,
    pub window: Duration,
    pub policy: ConsumptionPolicy,
    pub confidence: Option<f64>,
}

impl Pattern {
    pub fn new(
        id: PatternId,
        structure: PatternStructure,
        condition: Condition,
        window: Duration,
    ) -> Self {
        Self {
            id,
            structure,
            condition,
            window,
            policy: ConsumptionPolicy::default(),
            confidence: None,
        }
    }

    pub fn with_policy(mut self, policy: ConsumptionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.window < Duration::zero() {
            return Err(CepError::InvalidPattern(format!(
                "pattern {} has a negative window",
                self.id
            )));
        }
        if let Some(confidence) = self.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(CepError::InvalidPattern(format!(
                    "pattern {} confidence {confidence} is outside [0, 1]",
                    self.id
                )));
            }
        }
        for branch in self.structure.branches() {
            branch.top_level()?;
        }
        Ok(())
    }

    /// The pattern condition plus the conditions its policy compiles into.
    pub fn effective_condition(&self) -> Condition {
        let contiguity = self.policy.contiguity_condition();
        if contiguity.is_empty() {
            self.condition.clone()
        } else {
            self.condition.clone().combine(contiguity)
        }
    }

    /// One pattern per disjunction branch, all sharing this pattern's ID.
    ///
    /// Each branch keeps the part of the condition its own event names cover.
    pub fn split_disjunction(&self) -> Result<Vec<Pattern>> {
        let branches = self.structure.branches();
        if branches.len() == 1 {
            return Ok(vec![self.clone()]);
        }
        branches
            .into_iter()
            .map(|structure| {
                let (_, arguments) = structure.top_level()?;
                let names: BTreeSet<String> = arguments.iter().map(|a| a.event.name.clone()).collect();
                let condition = Condition::and(vec![
                    self.condition.get_condition_of(&names, false),
                    self.condition.get_condition_of(&names, true),
                ]);
                Ok(Pattern {
                    id: self.id,
                    structure,
                    condition,
                    window: self.window,
                    policy: self.policy.clone(),
                    confidence: self.confidence,
                })
            })
            .collect()
    }
}
