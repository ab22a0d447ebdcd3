//! # CEP Tree Engine
//!
//! A streaming complex event processing engine. Patterns over typed,
//! timestamped events (sequences, conjunctions, negations and Kleene closures,
//! constrained by conditions and a time window) are compiled into trees of
//! operator nodes. Events flow up from the leaves as partial matches until
//! they reach an output node and are reported as full matches.
//!
//! ## Quick Start
//!
//! ### Basic Usage
//!
//! ```rust,ignore
//! use cep_tree_engine::{EngineConfig, Event, TreeEngine};
//!
//! let patterns = r#"
//! patterns:
//!   - id: 1
//!     operator: SEQ
//!     events:
//!       - { type: AAPL, name: a }
//!       - { type: AMZN, name: b }
//!     conditions:
//!       - { left: a.Opening_Price, op: ">", right: b.Opening_Price }
//!     window_secs: 300
//! "#;
//!
//! let mut engine = TreeEngine::from_yaml(patterns, EngineConfig::default())?;
//!
//! engine.process(
//!     Event::new("AAPL", timestamp).with_attribute("Opening_Price", 135.0),
//! )?;
//! engine.process(
//!     Event::new("AMZN", timestamp + chrono::Duration::seconds(60))
//!         .with_attribute("Opening_Price", 120.0),
//! )?;
//!
//! for m in engine.drain_matches() {
//!     println!("patterns {:?}: {} events", m.pattern_ids(), m.events().len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Many Patterns, Shared Nodes
//!
//! ```rust,ignore
//! use cep_tree_engine::{EngineConfig, TreeEngine};
//!
//! // Sorted storage plus subtree sharing between patterns
//! let mut engine = TreeEngine::from_patterns(&patterns, EngineConfig::shared())?;
//! let matches = engine.evaluate_all(events)?;
//! println!("{} matches", matches.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Explicit Plans
//!
//! ```rust,ignore
//! use cep_tree_engine::{EngineConfig, PlanOperator, TreeEngine, TreePlan};
//!
//! // SEQ(a, SEQ(b, c)) instead of the default left-deep shape
//! let plan = TreePlan::binary(
//!     PlanOperator::Seq,
//!     TreePlan::leaf(0),
//!     TreePlan::binary(PlanOperator::Seq, TreePlan::leaf(1), TreePlan::leaf(2))?,
//! )?;
//! let engine = TreeEngine::from_plans(vec![(pattern, plan)], EngineConfig::sorted())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod condition;
pub mod config;
pub mod error;
pub mod event;
pub mod pattern;
pub mod storage;
pub mod tree;
pub mod value;

// Primary engine interface
pub use tree::TreeEngine;

// Configuration
pub use config::{EngineConfig, SharingStrategy, TreeStorageParameters};

// Core types and errors
pub use error::{CepError, Result};
pub use event::{AggregatedEvent, Event, MatchEvent, PatternMatch, Timestamp};

// Patterns and conditions
pub use condition::{
    BinaryCondition, Condition, ConditionObserver, KCIndexCondition, KCValueCondition,
    RelationOp, SelectivityCounter, Variable,
};
pub use pattern::{
    load_patterns_from_file, load_patterns_from_yaml, ConsumptionPolicy, Pattern, PatternId,
    PatternStructure, PlanOperator, SelectionStrategy, TreePlan,
};

// Tree construction and evaluation (for advanced use cases)
pub use tree::{
    EvaluationTree, MultiPatternTreeBuilder, NodeId, NodeKind, TreeBuilder, TreeEvaluator,
    TreeStatistics,
};
