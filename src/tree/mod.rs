//! Tree-based pattern evaluation.
//!
//! A pattern is compiled into a tree of operator nodes following a
//! [`TreePlan`](crate::pattern::TreePlan). Leaves receive primitive events,
//! internal nodes join, negate or aggregate the partial matches of their
//! children, and output nodes report full matches. Several patterns can be
//! built into one tree, sharing equivalent nodes.
//!
//! # Example
//!
//! ```rust,ignore
//! use cep_tree_engine::tree::{MultiPatternTreeBuilder, TreeEvaluator};
//!
//! let mut builder = MultiPatternTreeBuilder::new(params, SharingStrategy::SubtreeUnion);
//! builder.add_pattern(&pattern, &TreePlan::left_deep(&pattern)?)?;
//! let mut evaluator = TreeEvaluator::new(builder.build());
//! evaluator.process_event(event)?;
//! let matches = evaluator.drain_matches();
//! ```

pub mod arena;
pub mod builder;
pub mod engine;
pub mod evaluator;
mod kleene;
mod negation;
pub mod node;
pub mod sharing;
pub mod types;

// Re-export main types for convenience
pub use arena::{EvaluationTree, NodeArena};
pub use builder::{apply_condition, TreeBuilder};
pub use engine::TreeEngine;
pub use evaluator::TreeEvaluator;
pub use node::Node;
pub use sharing::{nodes_equivalent, MultiPatternTreeBuilder};
pub use types::{
    EventSlot, FreezeKey, NodeId, NodeKind, NodeTag, OutputBinding, Side, TreeStatistics,
};
