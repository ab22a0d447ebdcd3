//! Tree plans: the shape of the evaluation tree for one pattern.
//!
//! A plan is produced by an external planner (or by [`TreePlan::left_deep`])
//! and refers to pattern events by their top-level argument index.

use super::structure::{is_unbounded_negative, ArgumentRole, PatternArgument, TopLevelOperator};
use super::Pattern;
use crate::error::{CepError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operators allowed at internal plan nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanOperator {
    And,
    Seq,
    KleeneClosure {
        min_size: usize,
        max_size: Option<usize>,
    },
    NegationSeq,
    NegationAnd,
}

impl PlanOperator {
    pub fn is_unary(self) -> bool {
        matches!(self, PlanOperator::KleeneClosure { .. })
    }

    pub fn is_negation(self) -> bool {
        matches!(self, PlanOperator::NegationSeq | PlanOperator::NegationAnd)
    }
}

impl FromStr for PlanOperator {
    type Err = CepError;

    /// Parses `AND`, `SEQ`, `KC`, `NSEQ` and `NAND`. `KC` gets bounds `1..`.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "AND" => Ok(PlanOperator::And),
            "SEQ" => Ok(PlanOperator::Seq),
            "KC" => Ok(PlanOperator::KleeneClosure {
                min_size: 1,
                max_size: None,
            }),
            "NSEQ" => Ok(PlanOperator::NegationSeq),
            "NAND" => Ok(PlanOperator::NegationAnd),
            _ => Err(CepError::UnknownOperator(s.to_string())),
        }
    }
}

impl fmt::Display for PlanOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanOperator::And => write!(f, "AND"),
            PlanOperator::Seq => write!(f, "SEQ"),
            PlanOperator::KleeneClosure { .. } => write!(f, "KC"),
            PlanOperator::NegationSeq => write!(f, "NSEQ"),
            PlanOperator::NegationAnd => write!(f, "NAND"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TreePlan {
    Leaf(usize),
    Unary {
        op: PlanOperator,
        child: Box<TreePlan>,
    },
    Binary {
        op: PlanOperator,
        left: Box<TreePlan>,
        right: Box<TreePlan>,
    },
}

impl TreePlan {
    pub fn leaf(index: usize) -> Self {
        TreePlan::Leaf(index)
    }

    pub fn unary(op: PlanOperator, child: TreePlan) -> Result<Self> {
        if !op.is_unary() {
            return Err(CepError::InvalidPlan(format!(
                "{op} cannot be used as a unary operator"
            )));
        }
        Ok(TreePlan::Unary {
            op,
            child: Box::new(child),
        })
    }

    pub fn binary(op: PlanOperator, left: TreePlan, right: TreePlan) -> Result<Self> {
        if op.is_unary() {
            return Err(CepError::InvalidPlan(format!(
                "{op} cannot be used as a binary operator"
            )));
        }
        Ok(TreePlan::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// Leaf argument indices, left to right.
    pub fn leaf_indices(&self) -> Vec<usize> {
        match self {
            TreePlan::Leaf(index) => vec![*index],
            TreePlan::Unary { child, .. } => child.leaf_indices(),
            TreePlan::Binary { left, right, .. } => {
                let mut indices = left.leaf_indices();
                indices.extend(right.leaf_indices());
                indices
            }
        }
    }

    pub fn height(&self) -> usize {
        match self {
            TreePlan::Leaf(_) => 0,
            TreePlan::Unary { child, .. } => child.height() + 1,
            TreePlan::Binary { left, right, .. } => left.height().max(right.height()) + 1,
        }
    }

    /// A left-deep plan in declaration order, without cost estimation.
    ///
    /// Positive arguments (Kleene-wrapped where annotated) are joined first,
    /// then bounded negations, then unbounded negations so that these form a
    /// chain directly below the root.
    pub fn left_deep(pattern: &Pattern) -> Result<TreePlan> {
        let (op, arguments) = pattern.structure.top_level()?;
        let (join, negate) = match op {
            TopLevelOperator::Seq => (PlanOperator::Seq, PlanOperator::NegationSeq),
            TopLevelOperator::And => (PlanOperator::And, PlanOperator::NegationAnd),
        };

        let mut plan: Option<TreePlan> = None;
        for arg in arguments.iter().filter(|a| !a.is_negative()) {
            let next = positive_leaf(arg)?;
            plan = Some(match plan {
                None => next,
                Some(acc) => TreePlan::binary(join, acc, next)?,
            });
        }
        let mut plan = plan.ok_or_else(|| {
            CepError::InvalidPattern("pattern has no positive events".to_string())
        })?;

        let (unbounded, bounded): (Vec<&PatternArgument>, Vec<&PatternArgument>) = arguments
            .iter()
            .filter(|a| a.is_negative())
            .partition(|a| is_unbounded_negative(op, &arguments, a.index));
        for arg in bounded.into_iter().chain(unbounded) {
            plan = TreePlan::binary(negate, plan, TreePlan::Leaf(arg.index))?;
        }
        Ok(plan)
    }
}

fn positive_leaf(arg: &PatternArgument) -> Result<TreePlan> {
    match arg.role {
        ArgumentRole::Kleene { min_size, max_size } => TreePlan::unary(
            PlanOperator::KleeneClosure { min_size, max_size },
            TreePlan::Leaf(arg.index),
        ),
        _ => Ok(TreePlan::Leaf(arg.index)),
    }
}
