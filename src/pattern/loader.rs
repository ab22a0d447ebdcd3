//! YAML pattern definitions.
//!
//! ```yaml
//! patterns:
//!   - id: 1
//!     operator: SEQ
//!     events:
//!       - { type: AAPL, name: a }
//!       - { type: AMZN, name: b, negated: true }
//!       - { type: GOOG, name: c, kleene: { min: 1, max: 3 } }
//!     conditions:
//!       - { left: a.Open, op: "<", right: c.Peak }
//!       - { left: a.Symbol, op: matches, value: "^AA" }
//!       - { kleene: c, attribute: Peak, op: "<", offset: 1 }
//!     window_secs: 300
//!     confidence: 0.9
//!     policy: { selection: MatchSingle }
//! ```
//!
//! Variable paths are `name.attribute`; `@timestamp`, `@index` and
//! `@probability` select the built-in accessors.

use super::plan::PlanOperator;
use super::{ConsumptionPolicy, Pattern, PatternId, PatternStructure};
use crate::condition::{
    Accessor, BinaryCondition, Comparison, Condition, KCIndexCondition, KCValueCondition,
    Relation, RelationOp, Term, Variable,
};
use crate::error::{CepError, Result};
use chrono::Duration;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternFile {
    pub patterns: Vec<PatternDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KleeneBounds {
    #[serde(default = "default_min")]
    pub min: usize,
    #[serde(default)]
    pub max: Option<usize>,
}

fn default_min() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDefinition {
    #[serde(rename = "type")]
    pub event_type: String,
    pub name: String,
    #[serde(default)]
    pub negated: bool,
    #[serde(default)]
    pub kleene: Option<KleeneBounds>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureDefinition {
    pub operator: String,
    #[serde(default)]
    pub events: Vec<EventDefinition>,
    #[serde(default)]
    pub branches: Vec<StructureDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionDefinition {
    Kleene {
        kleene: String,
        attribute: String,
        op: String,
        #[serde(default)]
        first: Option<isize>,
        #[serde(default)]
        second: Option<isize>,
        #[serde(default)]
        offset: Option<isize>,
        #[serde(default)]
        value: Option<Value>,
        #[serde(default)]
        index: Option<isize>,
    },
    Binary {
        left: String,
        op: String,
        #[serde(default)]
        right: Option<String>,
        #[serde(default)]
        value: Option<Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternDefinition {
    pub id: PatternId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub structure: StructureDefinition,
    #[serde(default)]
    pub conditions: Vec<ConditionDefinition>,
    pub window_secs: u64,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub policy: ConsumptionPolicy,
}

fn accessor(attribute: &str) -> Accessor {
    match attribute {
        "@timestamp" => Accessor::Timestamp,
        "@index" => Accessor::Index,
        "@probability" => Accessor::Probability,
        other => Accessor::Attribute(other.to_string()),
    }
}

fn variable(path: &str) -> Result<Variable> {
    let (name, attribute) = path.split_once('.').ok_or_else(|| {
        CepError::InvalidPattern(format!("expected 'name.attribute', found '{path}'"))
    })?;
    if name.is_empty() || attribute.is_empty() {
        return Err(CepError::InvalidPattern(format!(
            "expected 'name.attribute', found '{path}'"
        )));
    }
    Ok(Variable::new(name, accessor(attribute)))
}

fn comparison(op: &str) -> Result<Comparison> {
    Ok(Comparison::Op(op.parse::<RelationOp>()?))
}

/// `matches`: the left value must be a string the regex finds a match in.
fn regex_condition(left: Variable, pattern: &str) -> Result<BinaryCondition> {
    let regex = Regex::new(pattern)
        .map_err(|e| CepError::InvalidPattern(format!("invalid regex '{pattern}': {e}")))?;
    let relation = Relation::new("matches", move |values| {
        values[0].as_str().is_some_and(|s| regex.is_match(s))
    });
    Ok(BinaryCondition::new(
        left,
        Term::Constant(Value::String(pattern.to_string())),
        Comparison::Custom(relation),
    ))
}

impl ConditionDefinition {
    pub fn to_condition(&self) -> Result<Condition> {
        match self {
            ConditionDefinition::Binary {
                left,
                op,
                right,
                value,
            } => {
                let left = variable(left)?;
                if op == "matches" {
                    let Some(Value::String(pattern)) = value else {
                        return Err(CepError::InvalidPattern(
                            "'matches' requires a string value".to_string(),
                        ));
                    };
                    return Ok(regex_condition(left, pattern)?.into());
                }
                let right = match (right, value) {
                    (Some(path), None) => Term::Variable(variable(path)?),
                    (None, Some(value)) => Term::Constant(value.clone()),
                    _ => {
                        return Err(CepError::InvalidPattern(format!(
                            "condition on '{}' needs exactly one of 'right' or 'value'",
                            left
                        )))
                    }
                };
                Ok(BinaryCondition::new(left, right, comparison(op)?).into())
            }
            ConditionDefinition::Kleene {
                kleene,
                attribute,
                op,
                first,
                second,
                offset,
                value,
                index,
            } => {
                let accessor = accessor(attribute);
                let comparison = comparison(op)?;
                match value {
                    Some(value) => {
                        if first.is_some() || second.is_some() || offset.is_some() {
                            return Err(CepError::InvalidKleeneCondition(
                                "a value condition takes no index pair or offset".to_string(),
                            ));
                        }
                        let mut cond =
                            KCValueCondition::new(kleene.as_str(), accessor, comparison, value.clone());
                        cond.index = *index;
                        Ok(cond.into())
                    }
                    None => Ok(KCIndexCondition::new(
                        kleene.as_str(),
                        accessor,
                        comparison,
                        *first,
                        *second,
                        *offset,
                    )?
                    .into()),
                }
            }
        }
    }
}

impl StructureDefinition {
    pub fn to_structure(&self) -> Result<PatternStructure> {
        let operator = self.operator.to_ascii_uppercase();
        if operator == "OR" {
            if self.branches.is_empty() {
                return Err(CepError::InvalidPattern(
                    "OR requires at least one branch".to_string(),
                ));
            }
            let branches = self
                .branches
                .iter()
                .map(StructureDefinition::to_structure)
                .collect::<Result<Vec<_>>>()?;
            return Ok(PatternStructure::or(branches));
        }

        let args = self
            .events
            .iter()
            .map(|event| {
                let primitive = PatternStructure::primitive(&event.event_type, &event.name);
                match (&event.kleene, event.negated) {
                    (Some(_), true) => Err(CepError::InvalidPattern(format!(
                        "event '{}' cannot be both negated and a Kleene closure",
                        event.name
                    ))),
                    (Some(bounds), false) => {
                        Ok(PatternStructure::kleene(primitive, bounds.min, bounds.max))
                    }
                    (None, true) => Ok(PatternStructure::negation(primitive)),
                    (None, false) => Ok(primitive),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        match operator.parse::<PlanOperator>()? {
            PlanOperator::Seq => Ok(PatternStructure::seq(args)),
            PlanOperator::And => Ok(PatternStructure::and(args)),
            other => Err(CepError::InvalidPattern(format!(
                "'{other}' cannot be used as a pattern operator"
            ))),
        }
    }
}

impl PatternDefinition {
    pub fn into_pattern(self) -> Result<Pattern> {
        let structure = self.structure.to_structure()?;
        let conditions = self
            .conditions
            .iter()
            .map(ConditionDefinition::to_condition)
            .collect::<Result<Vec<_>>>()?;
        let window_secs = i64::try_from(self.window_secs).map_err(|_| {
            CepError::InvalidPattern(format!("window of {} seconds is too large", self.window_secs))
        })?;
        let mut pattern = Pattern::new(
            self.id,
            structure,
            Condition::and(conditions),
            Duration::seconds(window_secs),
        )
        .with_policy(self.policy);
        pattern.confidence = self.confidence;
        pattern.validate()?;
        Ok(pattern)
    }
}

pub fn load_patterns_from_yaml(yaml: &str) -> Result<Vec<Pattern>> {
    let file: PatternFile = serde_yaml::from_str(yaml)?;
    file.patterns
        .into_iter()
        .map(PatternDefinition::into_pattern)
        .collect()
}

pub fn load_patterns_from_file(path: impl AsRef<Path>) -> Result<Vec<Pattern>> {
    let yaml = std::fs::read_to_string(path)?;
    load_patterns_from_yaml(&yaml)
}
