//! Variables and terms referenced by conditions.

use super::Binding;
use crate::event::{Event, MatchEvent};
use crate::value::timestamp_value;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Custom attribute extraction function.
///
/// # Example
/// ```rust,ignore
/// let spread: AccessorFn = Arc::new(|event| {
///     let high = event.attribute("High")?.as_f64()?;
///     let low = event.attribute("Low")?.as_f64()?;
///     Some(serde_json::json!(high - low))
/// });
/// ```
pub type AccessorFn = Arc<dyn Fn(&Event) -> Option<Value> + Send + Sync>;

/// How a variable reads a value out of an event.
#[derive(Clone)]
pub enum Accessor {
    /// Payload attribute by name
    Attribute(String),
    /// Event timestamp, as microseconds since the epoch
    Timestamp,
    /// Arrival index assigned by the engine
    Index,
    /// Occurrence probability (null on certain streams)
    Probability,
    /// User-supplied extraction; compared by label
    Custom { label: String, func: AccessorFn },
}

impl Accessor {
    pub fn custom(
        label: impl Into<String>,
        func: impl Fn(&Event) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        Accessor::Custom {
            label: label.into(),
            func: Arc::new(func),
        }
    }

    /// Read the value from one primitive event. `None` when the attribute is missing.
    pub fn read(&self, event: &Event) -> Option<Value> {
        match self {
            Accessor::Attribute(name) => event.attribute(name).cloned(),
            Accessor::Timestamp => Some(timestamp_value(&event.timestamp)),
            Accessor::Index => Some(Value::from(event.index)),
            Accessor::Probability => Some(event.probability.map_or(Value::Null, Value::from)),
            Accessor::Custom { func, .. } => func(event),
        }
    }

    /// Attribute name for attribute accessors, used for sort-key priorities.
    pub fn attribute_name(&self) -> Option<&str> {
        match self {
            Accessor::Attribute(name) => Some(name),
            _ => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Accessor::Attribute(name) => name.clone(),
            Accessor::Timestamp => "@timestamp".to_string(),
            Accessor::Index => "@index".to_string(),
            Accessor::Probability => "@probability".to_string(),
            Accessor::Custom { label, .. } => format!("<{label}>"),
        }
    }
}

impl PartialEq for Accessor {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Accessor::Attribute(a), Accessor::Attribute(b)) => a == b,
            (Accessor::Timestamp, Accessor::Timestamp)
            | (Accessor::Index, Accessor::Index)
            | (Accessor::Probability, Accessor::Probability) => true,
            (Accessor::Custom { label: a, .. }, Accessor::Custom { label: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Accessor({})", self.label())
    }
}

/// A named reference to a pattern event plus the way to read a value from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub accessor: Accessor,
}

impl Variable {
    pub fn new(name: impl Into<String>, accessor: Accessor) -> Self {
        Self {
            name: name.into(),
            accessor,
        }
    }

    pub fn attribute(name: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::new(name, Accessor::Attribute(attribute.into()))
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, Accessor::Timestamp)
    }

    pub fn index(name: impl Into<String>) -> Self {
        Self::new(name, Accessor::Index)
    }

    /// Value of the variable under a binding.
    ///
    /// A Kleene group yields an array holding one value per member, with null
    /// for members missing the attribute.
    pub fn value(&self, binding: &Binding<'_>) -> Option<Value> {
        match binding.get(&self.name)? {
            MatchEvent::Primitive(event) => self.accessor.read(event),
            MatchEvent::Aggregated(group) => Some(Value::Array(
                group
                    .events()
                    .iter()
                    .map(|event| self.accessor.read(event).unwrap_or(Value::Null))
                    .collect(),
            )),
        }
    }

    pub fn renamed(&self, names: &HashMap<String, String>) -> Self {
        Self {
            name: names.get(&self.name).cloned().unwrap_or_else(|| self.name.clone()),
            accessor: self.accessor.clone(),
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.accessor.label())
    }
}

/// Operand of a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Variable(Variable),
    Constant(Value),
}

impl Term {
    pub fn name(&self) -> Option<&str> {
        match self {
            Term::Variable(var) => Some(&var.name),
            Term::Constant(_) => None,
        }
    }

    pub fn value(&self, binding: &Binding<'_>) -> Option<Value> {
        match self {
            Term::Variable(var) => var.value(binding),
            Term::Constant(value) => Some(value.clone()),
        }
    }

    pub fn renamed(&self, names: &HashMap<String, String>) -> Self {
        match self {
            Term::Variable(var) => Term::Variable(var.renamed(names)),
            Term::Constant(value) => Term::Constant(value.clone()),
        }
    }
}

impl From<Variable> for Term {
    fn from(var: Variable) -> Self {
        Term::Variable(var)
    }
}

impl From<Value> for Term {
    fn from(value: Value) -> Self {
        Term::Constant(value)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Variable(var) => var.fmt(f),
            Term::Constant(value) => write!(f, "{value}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AggregatedEvent;
    use chrono::DateTime;
    use serde_json::json;

    fn event(open: f64, secs: i64) -> Arc<Event> {
        Arc::new(
            Event::new("AAPL", DateTime::from_timestamp(secs, 0).unwrap())
                .with_attribute("Open", open),
        )
    }

    #[test]
    fn test_attribute_variable() {
        let bound = MatchEvent::Primitive(event(10.0, 1));
        let mut binding = Binding::new();
        binding.bind("a", &bound);
        assert_eq!(Variable::attribute("a", "Open").value(&binding), Some(json!(10.0)));
        assert_eq!(Variable::attribute("a", "Close").value(&binding), None);
        assert_eq!(Variable::attribute("b", "Open").value(&binding), None);
    }

    #[test]
    fn test_aggregated_variable_yields_array() {
        let group = AggregatedEvent::new("AAPL", vec![event(1.0, 1), event(2.0, 2)]).unwrap();
        let bound = MatchEvent::Aggregated(Arc::new(group));
        let mut binding = Binding::new();
        binding.bind("a", &bound);
        assert_eq!(
            Variable::attribute("a", "Open").value(&binding),
            Some(json!([1.0, 2.0]))
        );
    }

    #[test]
    fn test_custom_accessor_equality_by_label() {
        let first = Accessor::custom("double", |e| {
            e.attribute("Open")?.as_f64().map(|v| json!(v * 2.0))
        });
        let second = Accessor::custom("double", |_| None);
        assert_eq!(first, second);
        assert_ne!(first, Accessor::custom("triple", |_| None));
        assert_eq!(first.read(&event(4.0, 0)), Some(json!(8.0)));
    }

    #[test]
    fn test_builtin_accessors() {
        let mut raw = Event::new("A", DateTime::from_timestamp(2, 0).unwrap());
        raw.index = 42;
        assert_eq!(Accessor::Index.read(&raw), Some(json!(42)));
        assert_eq!(Accessor::Timestamp.read(&raw), Some(json!(2_000_000)));
        assert_eq!(Accessor::Probability.read(&raw), Some(Value::Null));
    }

    #[test]
    fn test_display_and_rename() {
        let var = Variable::attribute("a", "Open");
        assert_eq!(var.to_string(), "a.Open");
        let names = HashMap::from([("a".to_string(), "x".to_string())]);
        assert_eq!(var.renamed(&names).to_string(), "x.Open");
        assert_eq!(Term::from(json!(5)).to_string(), "5");
    }
}
