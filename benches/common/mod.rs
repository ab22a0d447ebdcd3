//! Common utilities for CEP tree engine benchmarks.
//!
//! Shared stream and pattern generators, so that every benchmark measures the
//! same workloads.

#![allow(dead_code)]

use cep_tree_engine::{
    BinaryCondition, Condition, Event, Pattern, PatternStructure, Variable,
};
use chrono::{DateTime, Duration, Utc};

/// Standard benchmark configuration for consistent testing.
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    /// Number of patterns to generate
    pub pattern_count: usize,
    /// Number of events in the generated stream
    pub event_count: usize,
    /// Number of distinct event types in the stream
    pub type_count: usize,
    /// Pattern window in seconds
    pub window_secs: i64,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            pattern_count: 10,
            event_count: 2_000,
            type_count: 5,
            window_secs: 30,
        }
    }
}

impl BenchmarkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pattern_count(mut self, count: usize) -> Self {
        self.pattern_count = count;
        self
    }

    pub fn with_event_count(mut self, count: usize) -> Self {
        self.event_count = count;
        self
    }
}

pub fn type_name(i: usize) -> String {
    format!("T{i}")
}

/// A deterministic stream of one event per second, cycling through the
/// configured types with pseudo-random prices.
pub fn generate_stream(config: &BenchmarkConfig) -> Vec<Event> {
    let start = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default();
    let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
    (0..config.event_count)
        .map(|i| {
            // xorshift
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let price = (seed % 1_000) as f64 / 10.0;
            Event::new(
                type_name(i % config.type_count),
                start + Duration::seconds(i as i64),
            )
            .with_attribute("Price", price)
        })
        .collect()
}

fn price_smaller(left: &str, right: &str) -> Condition {
    BinaryCondition::smaller(Variable::attribute(left, "Price"), Variable::attribute(right, "Price"))
        .into()
}

/// SEQ(T0 a, T1 b, T{k} c) patterns with a rising price between a and b.
///
/// All patterns share the `SEQ(a, b)` prefix; the last event type varies.
pub fn generate_patterns(config: &BenchmarkConfig) -> Vec<Pattern> {
    (0..config.pattern_count)
        .map(|i| {
            let last = 2 + i % config.type_count.saturating_sub(2).max(1);
            Pattern::new(
                i as u32,
                PatternStructure::seq(vec![
                    PatternStructure::primitive(type_name(0), "a"),
                    PatternStructure::primitive(type_name(1), "b"),
                    PatternStructure::primitive(type_name(last), "c"),
                ]),
                price_smaller("a", "b"),
                Duration::seconds(config.window_secs + i as i64),
            )
        })
        .collect()
}

/// SEQ(T0 a, NOT T1 b, T2 c): no T1 between a and c.
pub fn negation_pattern(config: &BenchmarkConfig) -> Pattern {
    Pattern::new(
        0,
        PatternStructure::seq(vec![
            PatternStructure::primitive(type_name(0), "a"),
            PatternStructure::negation(PatternStructure::primitive(type_name(1), "b")),
            PatternStructure::primitive(type_name(2), "c"),
        ]),
        price_smaller("a", "c"),
        Duration::seconds(config.window_secs),
    )
}

/// SEQ(T0 a, KC(T1 b, 1..=3)).
pub fn kleene_pattern(config: &BenchmarkConfig) -> Pattern {
    Pattern::new(
        0,
        PatternStructure::seq(vec![
            PatternStructure::primitive(type_name(0), "a"),
            PatternStructure::kleene(PatternStructure::primitive(type_name(1), "b"), 1, Some(3)),
        ]),
        Condition::always_true(),
        Duration::seconds(config.window_secs / 3),
    )
}
