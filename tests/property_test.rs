//! Property tests: engine output against a brute-force reference, across
//! storage layouts and sharing strategies.

use cep_tree_engine::{
    BinaryCondition, Condition, EngineConfig, Event, Pattern, PatternStructure, SharingStrategy, TreeEngine,
    TreeStorageParameters, Variable,
};
use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;

const WINDOW: i64 = 10;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

/// (type, seconds, x) triples with non-decreasing timestamps.
fn events_strategy() -> impl Strategy<Value = Vec<(usize, i64, i64)>> {
    proptest::collection::vec((0usize..3, 0i64..4, -5i64..5), 0..30).prop_map(|raw| {
        let mut now = 0;
        raw.into_iter()
            .map(|(t, gap, x)| {
                now += gap;
                (t, now, x)
            })
            .collect()
    })
}

const TYPES: [&str; 3] = ["A", "B", "C"];

fn to_events(raw: &[(usize, i64, i64)]) -> Vec<Event> {
    raw.iter()
        .map(|(t, secs, x)| Event::new(TYPES[*t], at(*secs)).with_attribute("x", *x))
        .collect()
}

/// SEQ(A a, B b) where a.x < b.x.
fn seq_ab(id: u32, window: i64) -> Pattern {
    Pattern::new(
        id,
        PatternStructure::seq(vec![
            PatternStructure::primitive("A", "a"),
            PatternStructure::primitive("B", "b"),
        ]),
        BinaryCondition::smaller(Variable::attribute("a", "x"), Variable::attribute("b", "x")).into(),
        Duration::seconds(window),
    )
}

/// SEQ(A a, B b, C c) where a.x < b.x.
fn seq_abc(id: u32, window: i64) -> Pattern {
    Pattern::new(
        id,
        PatternStructure::seq(vec![
            PatternStructure::primitive("A", "a"),
            PatternStructure::primitive("B", "b"),
            PatternStructure::primitive("C", "c"),
        ]),
        BinaryCondition::smaller(Variable::attribute("a", "x"), Variable::attribute("b", "x")).into(),
        Duration::seconds(window),
    )
}

fn reference_seq_ab(raw: &[(usize, i64, i64)], window: i64) -> Vec<Vec<u64>> {
    let mut expected = Vec::new();
    for (i, (ta, sa, xa)) in raw.iter().enumerate() {
        for (j, (tb, sb, xb)) in raw.iter().enumerate() {
            if *ta == 0 && *tb == 1 && sa < sb && sb - sa <= window && xa < xb {
                expected.push(vec![i as u64, j as u64]);
            }
        }
    }
    expected.sort();
    expected
}

/// SEQ(A a, NOT C c, B b) and SEQ(NOT A a, B b, C c).
fn negations(id: u32, window: i64) -> [Pattern; 2] {
    let p = |t: &str, n: &str| PatternStructure::primitive(t, n);
    [
        Pattern::new(
            id,
            PatternStructure::seq(vec![p("A", "a"), PatternStructure::negation(p("C", "c")), p("B", "b")]),
            Condition::always_true(),
            Duration::seconds(window),
        ),
        Pattern::new(
            id + 1,
            PatternStructure::seq(vec![PatternStructure::negation(p("A", "a")), p("B", "b"), p("C", "c")]),
            Condition::always_true(),
            Duration::seconds(window),
        ),
    ]
}

/// SEQ(A a, KC(B b, 1..=2)).
fn seq_a_kleene_b(id: u32, window: i64) -> Pattern {
    Pattern::new(
        id,
        PatternStructure::seq(vec![
            PatternStructure::primitive("A", "a"),
            PatternStructure::kleene(PatternStructure::primitive("B", "b"), 1, Some(2)),
        ]),
        Condition::always_true(),
        Duration::seconds(window),
    )
}

/// Tagged results of `patterns` under every sharing strategy and layout.
fn across_sharing(patterns: &[Pattern], raw: &[(usize, i64, i64)]) -> Vec<Vec<(u32, Vec<u64>)>> {
    let mut results = Vec::new();
    for sharing in [SharingStrategy::None, SharingStrategy::LeafSharing, SharingStrategy::SubtreeUnion] {
        for params in [TreeStorageParameters::default(), TreeStorageParameters::sorted()] {
            let config = EngineConfig::new().with_storage(params).with_sharing(sharing);
            let mut engine = TreeEngine::from_patterns(patterns, config).unwrap();
            results.push(tagged(&mut engine, to_events(raw)));
        }
    }
    results
}

/// (pattern id, member indices) pairs, sorted.
fn tagged(engine: &mut TreeEngine, events: Vec<Event>) -> Vec<(u32, Vec<u64>)> {
    let mut out: Vec<(u32, Vec<u64>)> = engine
        .evaluate_all(events)
        .unwrap()
        .iter()
        .flat_map(|m| {
            let members: Vec<u64> = m.primitive_events().map(|e| e.index).collect();
            m.pattern_ids()
                .iter()
                .map(move |id| (*id, members.clone()))
                .collect::<Vec<_>>()
        })
        .collect();
    out.sort();
    out
}

proptest! {
    #[test]
    fn prop_sequence_matches_reference(raw in events_strategy()) {
        let expected = reference_seq_ab(&raw, WINDOW);
        let layouts = [
            TreeStorageParameters::default(),
            TreeStorageParameters::sorted(),
            TreeStorageParameters::sorted().with_timestamp_priority(false),
            TreeStorageParameters::sorted().with_clean_up_interval(1),
        ];
        for params in layouts {
            let config = EngineConfig::new().with_storage(params);
            let mut engine = TreeEngine::from_patterns(&[seq_ab(1, WINDOW)], config).unwrap();
            let found: Vec<Vec<u64>> = tagged(&mut engine, to_events(&raw))
                .into_iter()
                .map(|(_, members)| members)
                .collect();
            prop_assert_eq!(&found, &expected);
        }
    }

    #[test]
    fn prop_matches_respect_window_and_order(raw in events_strategy()) {
        let mut engine =
            TreeEngine::from_patterns(&[seq_abc(1, WINDOW)], EngineConfig::sorted()).unwrap();
        for m in engine.evaluate_all(to_events(&raw)).unwrap() {
            prop_assert!(m.span() <= Duration::seconds(WINDOW));
            let times: Vec<DateTime<Utc>> = m.primitive_events().map(|e| e.timestamp).collect();
            prop_assert!(times.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn prop_sharing_preserves_results(raw in events_strategy()) {
        let patterns = [seq_ab(1, WINDOW), seq_ab(2, WINDOW / 2), seq_abc(3, WINDOW)];
        let results = across_sharing(&patterns, &raw);
        for other in &results[1..] {
            prop_assert_eq!(other, &results[0]);
        }
    }

    #[test]
    fn prop_sharing_preserves_negation_results(raw in events_strategy()) {
        let mut patterns = vec![seq_ab(1, WINDOW)];
        patterns.extend(negations(2, WINDOW));
        patterns.extend(negations(4, WINDOW / 2));
        patterns.extend(negations(6, WINDOW));
        let results = across_sharing(&patterns, &raw);
        for other in &results[1..] {
            prop_assert_eq!(other, &results[0]);
        }
    }

    #[test]
    fn prop_sharing_preserves_kleene_results(raw in events_strategy()) {
        let patterns = [
            seq_ab(1, WINDOW),
            seq_a_kleene_b(2, WINDOW),
            seq_a_kleene_b(3, WINDOW / 2),
            seq_a_kleene_b(4, WINDOW),
        ];
        let results = across_sharing(&patterns, &raw);
        for other in &results[1..] {
            prop_assert_eq!(other, &results[0]);
        }
    }
}
