//! End-to-end tests for the CEP tree engine.
//!
//! These tests run complete patterns over small realistic streams through the
//! public `TreeEngine` interface.

use cep_tree_engine::{
    BinaryCondition, CepError, Condition, ConsumptionPolicy, EngineConfig, Event, Pattern,
    PatternMatch, PatternStructure, SelectionStrategy, TreeEngine, Variable,
};
use chrono::{DateTime, Duration, Utc};
use std::io::Write;

fn at(secs: i64) -> DateTime<Utc> {
    // 2024-01-01 10:00:00 UTC
    DateTime::from_timestamp(1_704_103_200 + secs, 0).unwrap()
}

fn stock(symbol: &str, secs: i64, open: f64) -> Event {
    Event::new(symbol, at(secs)).with_attribute("Open", open)
}

fn aapl_then_amzn(id: u32, window: Duration) -> Pattern {
    Pattern::new(
        id,
        PatternStructure::seq(vec![
            PatternStructure::primitive("AAPL", "a"),
            PatternStructure::primitive("AMZN", "b"),
        ]),
        BinaryCondition::greater(Variable::attribute("a", "Open"), Variable::attribute("b", "Open"))
            .into(),
        window,
    )
}

fn indices(m: &PatternMatch) -> Vec<u64> {
    m.primitive_events().map(|e| e.index).collect()
}

#[test]
fn test_aapl_amzn_single_match() {
    for config in [EngineConfig::default(), EngineConfig::sorted(), EngineConfig::shared()] {
        let mut engine =
            TreeEngine::from_patterns(&[aapl_then_amzn(1, Duration::minutes(5))], config).unwrap();
        let matches = engine
            .evaluate_all(vec![stock("AAPL", 0, 10.0), stock("AMZN", 60, 5.0)])
            .unwrap();

        assert_eq!(matches.len(), 1);
        let events: Vec<(String, DateTime<Utc>)> = matches[0]
            .primitive_events()
            .map(|e| (e.event_type.clone(), e.timestamp))
            .collect();
        assert_eq!(
            events,
            vec![("AAPL".to_string(), at(0)), ("AMZN".to_string(), at(60))]
        );
        assert_eq!(matches[0].pattern_ids(), &[1]);
    }
}

#[test]
fn test_aapl_amzn_reversed_values_no_match() {
    let mut engine =
        TreeEngine::from_patterns(&[aapl_then_amzn(1, Duration::minutes(5))], EngineConfig::sorted())
            .unwrap();
    let matches = engine
        .evaluate_all(vec![stock("AAPL", 0, 5.0), stock("AMZN", 60, 10.0)])
        .unwrap();
    assert!(matches.is_empty());
}

#[test]
fn test_sequence_order_and_window() {
    let mut engine =
        TreeEngine::from_patterns(&[aapl_then_amzn(1, Duration::minutes(5))], EngineConfig::default())
            .unwrap();
    let matches = engine
        .evaluate_all(vec![
            // AMZN before AAPL never forms a sequence
            stock("AMZN", 0, 1.0),
            stock("AAPL", 10, 10.0),
            // too late for the AAPL above
            stock("AMZN", 400, 1.0),
            stock("AAPL", 500, 10.0),
            stock("AMZN", 800, 1.0),
        ])
        .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(indices(&matches[0]), vec![3, 4]);
}

#[test]
fn test_matches_tagged_by_pattern_window() {
    let patterns = [
        aapl_then_amzn(1, Duration::minutes(5)),
        aapl_then_amzn(2, Duration::seconds(30)),
    ];
    for config in [EngineConfig::default(), EngineConfig::shared()] {
        let mut engine = TreeEngine::from_patterns(&patterns, config).unwrap();
        engine.process(stock("AAPL", 0, 10.0)).unwrap();
        engine.process(stock("AMZN", 20, 5.0)).unwrap();
        engine.process(stock("AMZN", 60, 5.0)).unwrap();
        engine.finish().unwrap();

        let mut tagged: Vec<(u32, Vec<u64>)> = engine
            .drain_matches()
            .iter()
            .flat_map(|m| m.pattern_ids().iter().map(move |id| (*id, indices(m))))
            .collect();
        tagged.sort();
        assert_eq!(
            tagged,
            vec![(1, vec![0, 1]), (1, vec![0, 2]), (2, vec![0, 1])]
        );
    }
}

#[test]
fn test_match_single_policy() {
    let pattern = aapl_then_amzn(1, Duration::minutes(5))
        .with_policy(ConsumptionPolicy::new().with_selection(SelectionStrategy::MatchSingle));
    let mut engine = TreeEngine::from_patterns(&[pattern], EngineConfig::default()).unwrap();
    let matches = engine
        .evaluate_all(vec![
            stock("AAPL", 0, 10.0),
            stock("AAPL", 1, 11.0),
            stock("AMZN", 2, 5.0),
        ])
        .unwrap();
    assert_eq!(matches.len(), 1);
}

#[test]
fn test_contiguous_policy() {
    let pattern = Pattern::new(
        1,
        PatternStructure::seq(vec![
            PatternStructure::primitive("A", "a"),
            PatternStructure::primitive("B", "b"),
        ]),
        Condition::always_true(),
        Duration::minutes(1),
    )
    .with_policy(ConsumptionPolicy::new().with_contiguous(&["a", "b"]));
    let mut engine = TreeEngine::from_patterns(&[pattern], EngineConfig::default()).unwrap();
    let matches = engine
        .evaluate_all(vec![
            Event::new("A", at(0)),
            Event::new("C", at(1)),
            Event::new("B", at(2)),
            Event::new("A", at(3)),
            Event::new("B", at(4)),
        ])
        .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(indices(&matches[0]), vec![3, 4]);
}

#[test]
fn test_patterns_from_yaml_file() {
    let yaml = r#"
patterns:
  - id: 10
    operator: SEQ
    events:
      - { type: AAPL, name: a }
      - { type: AMZN, name: b }
    conditions:
      - { left: a.Open, op: ">", right: b.Open }
    window_secs: 300
  - id: 11
    operator: AND
    events:
      - { type: AAPL, name: x }
      - { type: GOOG, name: y }
    window_secs: 60
"#;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    let patterns = cep_tree_engine::load_patterns_from_file(file.path()).unwrap();
    assert_eq!(patterns.len(), 2);

    let mut engine = TreeEngine::from_patterns(&patterns, EngineConfig::shared()).unwrap();
    assert_eq!(engine.pattern_count(), 2);
    let matches = engine
        .evaluate_all(vec![
            Event::new("GOOG", at(0)),
            stock("AAPL", 10, 10.0),
            stock("AMZN", 20, 5.0),
        ])
        .unwrap();
    let mut ids: Vec<u32> = matches.iter().flat_map(|m| m.pattern_ids().to_vec()).collect();
    ids.sort();
    assert_eq!(ids, vec![10, 11]);
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = cep_tree_engine::load_patterns_from_file(dir.path().join("missing.yaml"));
    assert!(matches!(result, Err(CepError::IoError(_))));
}

#[test]
fn test_unconsumed_condition_rejected() {
    let pattern = Pattern::new(
        1,
        PatternStructure::seq(vec![
            PatternStructure::primitive("A", "a"),
            PatternStructure::primitive("B", "b"),
        ]),
        BinaryCondition::smaller(Variable::attribute("a", "x"), Variable::attribute("z", "x")).into(),
        Duration::seconds(10),
    );
    let err = TreeEngine::from_patterns(&[pattern], EngineConfig::default())
        .err()
        .unwrap();
    assert!(matches!(err, CepError::UnconsumedConditions(_)));
    assert!(err.is_structural_error());
}
