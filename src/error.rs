//! Error types for the CEP tree engine.
//!
//! Errors fall into two families. Configuration errors are raised while a
//! pattern, plan or tree is being constructed. Structural errors signal a
//! violated invariant of the node graph. Candidate rejection during evaluation
//! is never an error.

use crate::tree::types::NodeId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CepError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CepError {
    #[error("invalid Kleene condition: {0}")]
    InvalidKleeneCondition(String),

    #[error("invalid clean-up interval {0}: must be greater than zero")]
    InvalidCleanupInterval(usize),

    #[error("unknown operator type '{0}'")]
    UnknownOperator(String),

    #[error("invalid tree plan: {0}")]
    InvalidPlan(String),

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("node {child} is not a child of node {parent}")]
    NotAChild { parent: NodeId, child: NodeId },

    #[error("node {0} is not a negation node")]
    NotANegationNode(NodeId),

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("conditions left unconsumed after distribution: {}", .0.join(", "))]
    UnconsumedConditions(Vec<String>),

    #[error("conditions have already been applied to this tree")]
    ConditionsAlreadyApplied,

    #[error("no pending partial match from node {child} for node {parent}")]
    MissingPartialMatch { parent: NodeId, child: NodeId },
}

impl CepError {
    /// Errors raised while constructing patterns, plans, storage or trees.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            CepError::InvalidKleeneCondition(_)
                | CepError::InvalidCleanupInterval(_)
                | CepError::UnknownOperator(_)
                | CepError::InvalidPlan(_)
                | CepError::InvalidPattern(_)
                | CepError::Configuration(_)
                | CepError::YamlError(_)
                | CepError::IoError(_)
        )
    }

    /// Errors signalling a violated node-graph invariant.
    pub fn is_structural_error(&self) -> bool {
        !self.is_configuration_error()
    }
}

impl From<std::io::Error> for CepError {
    fn from(err: std::io::Error) -> Self {
        CepError::IoError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CepError {
    fn from(err: serde_yaml::Error) -> Self {
        CepError::YamlError(err.to_string())
    }
}
