//! Pattern structure: operators over primitive events.

use crate::error::{CepError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A typed, named primitive event of a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrimitiveEventStructure {
    pub event_type: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PatternStructure {
    Primitive(PrimitiveEventStructure),
    Seq(Vec<PatternStructure>),
    And(Vec<PatternStructure>),
    Or(Vec<PatternStructure>),
    Negation(Box<PatternStructure>),
    KleeneClosure {
        arg: Box<PatternStructure>,
        min_size: usize,
        max_size: Option<usize>,
    },
}

impl PatternStructure {
    pub fn primitive(event_type: impl Into<String>, name: impl Into<String>) -> Self {
        PatternStructure::Primitive(PrimitiveEventStructure {
            event_type: event_type.into(),
            name: name.into(),
        })
    }

    pub fn seq(args: Vec<PatternStructure>) -> Self {
        PatternStructure::Seq(args)
    }

    pub fn and(args: Vec<PatternStructure>) -> Self {
        PatternStructure::And(args)
    }

    pub fn or(branches: Vec<PatternStructure>) -> Self {
        PatternStructure::Or(branches)
    }

    pub fn negation(arg: PatternStructure) -> Self {
        PatternStructure::Negation(Box::new(arg))
    }

    pub fn kleene(arg: PatternStructure, min_size: usize, max_size: Option<usize>) -> Self {
        PatternStructure::KleeneClosure {
            arg: Box::new(arg),
            min_size,
            max_size,
        }
    }
}

/// The operator joining the top-level arguments of an evaluable pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopLevelOperator {
    Seq,
    And,
}

/// How a top-level argument takes part in a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentRole {
    Positive,
    Negative,
    Kleene {
        min_size: usize,
        max_size: Option<usize>,
    },
}

/// One top-level argument, positioned by declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternArgument {
    pub index: usize,
    pub event: PrimitiveEventStructure,
    pub role: ArgumentRole,
}

impl PatternArgument {
    pub fn is_negative(&self) -> bool {
        self.role == ArgumentRole::Negative
    }
}

fn kleene_bounds(min_size: usize, max_size: Option<usize>) -> Result<()> {
    if min_size == 0 {
        return Err(CepError::InvalidPattern(
            "Kleene closure minimum size must be at least 1".to_string(),
        ));
    }
    if let Some(max) = max_size {
        if max < min_size {
            return Err(CepError::InvalidPattern(format!(
                "Kleene closure maximum size {max} is below minimum size {min_size}"
            )));
        }
    }
    Ok(())
}

fn argument(index: usize, arg: &PatternStructure) -> Result<PatternArgument> {
    let (inner, role) = match arg {
        PatternStructure::Primitive(p) => (p, ArgumentRole::Positive),
        PatternStructure::Negation(inner) => match inner.as_ref() {
            PatternStructure::Primitive(p) => (p, ArgumentRole::Negative),
            _ => {
                return Err(CepError::InvalidPattern(
                    "negation is supported over a single primitive event only".to_string(),
                ))
            }
        },
        PatternStructure::KleeneClosure {
            arg,
            min_size,
            max_size,
        } => match arg.as_ref() {
            PatternStructure::Primitive(p) => {
                kleene_bounds(*min_size, *max_size)?;
                (
                    p,
                    ArgumentRole::Kleene {
                        min_size: *min_size,
                        max_size: *max_size,
                    },
                )
            }
            _ => {
                return Err(CepError::InvalidPattern(
                    "Kleene closure is supported over a single primitive event only".to_string(),
                ))
            }
        },
        _ => {
            return Err(CepError::InvalidPattern(
                "nested operators below the top level are not supported".to_string(),
            ))
        }
    };
    Ok(PatternArgument {
        index,
        event: inner.clone(),
        role,
    })
}

impl PatternStructure {
    /// The top-level operator and its arguments.
    ///
    /// A bare primitive (or a wrapped one) counts as a one-argument sequence.
    /// Disjunctions must be split before calling this.
    pub fn top_level(&self) -> Result<(TopLevelOperator, Vec<PatternArgument>)> {
        let (op, args) = match self {
            PatternStructure::Seq(args) => (TopLevelOperator::Seq, args.as_slice()),
            PatternStructure::And(args) => (TopLevelOperator::And, args.as_slice()),
            PatternStructure::Or(_) => {
                return Err(CepError::InvalidPattern(
                    "disjunction must be split into branches before tree construction"
                        .to_string(),
                ))
            }
            single => (TopLevelOperator::Seq, std::slice::from_ref(single)),
        };
        if args.is_empty() {
            return Err(CepError::InvalidPattern(
                "operator without arguments".to_string(),
            ));
        }
        let arguments = args
            .iter()
            .enumerate()
            .map(|(index, arg)| argument(index, arg))
            .collect::<Result<Vec<_>>>()?;

        let mut names = HashSet::new();
        for arg in &arguments {
            if !names.insert(arg.event.name.as_str()) {
                return Err(CepError::InvalidPattern(format!(
                    "duplicate event name '{}'",
                    arg.event.name
                )));
            }
        }
        if arguments.iter().all(PatternArgument::is_negative) {
            return Err(CepError::InvalidPattern(
                "pattern has no positive events".to_string(),
            ));
        }
        Ok((op, arguments))
    }

    /// Branches of a top-level disjunction, or the structure itself.
    pub fn branches(&self) -> Vec<PatternStructure> {
        match self {
            PatternStructure::Or(branches) => branches.iter().flat_map(|b| b.branches()).collect(),
            other => vec![other.clone()],
        }
    }
}

/// A negative argument is unbounded when nothing after it can close the
/// match: always under And, and under Seq when no positive argument follows.
pub fn is_unbounded_negative(
    op: TopLevelOperator,
    arguments: &[PatternArgument],
    index: usize,
) -> bool {
    match op {
        TopLevelOperator::And => true,
        TopLevelOperator::Seq => !arguments
            .iter()
            .any(|arg| arg.index > index && !arg.is_negative()),
    }
}
