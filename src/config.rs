//! Unified configuration for the tree evaluation engine.
//!
//! This module controls how partial matches are stored at tree nodes and
//! whether patterns evaluated together share nodes.

use crate::error::{CepError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Storage parameters applied to every node of an evaluation tree.
///
/// # Storage Modes
///
/// | `sort_storage` | `prioritize_sorting_by_timestamp` | Sequence joins | Attribute joins |
/// |----------------|-----------------------------------|----------------|-----------------|
/// | `false` | any | unsorted | unsorted |
/// | `true` | `true` | timestamp sorted | attribute sorted |
/// | `true` | `false` | attribute sorted | attribute sorted |
///
/// When a join condition offers several attributes, the one with the highest
/// entry in `attributes_priorities` becomes the sort key.
///
/// # Examples
///
/// ```rust
/// use cep_tree_engine::TreeStorageParameters;
///
/// let params = TreeStorageParameters::sorted()
///     .with_attribute_priority("Peak", 10)
///     .with_clean_up_interval(50);
/// assert!(params.sort_storage);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeStorageParameters {
    /// Keep node storage sorted by a key derived from the parent condition.
    ///
    /// Default: false
    pub sort_storage: bool,

    /// Priority of each attribute as a sort key. Higher wins; absent is 0.
    pub attributes_priorities: HashMap<String, i32>,

    /// Number of additions between expiry sweeps of a storage.
    ///
    /// Must be at least 1. Default: 10
    pub clean_up_interval: usize,

    /// Prefer timestamp keys for sequence joins over attribute keys.
    ///
    /// Default: true
    pub prioritize_sorting_by_timestamp: bool,
}

impl Default for TreeStorageParameters {
    fn default() -> Self {
        Self {
            sort_storage: false,
            attributes_priorities: HashMap::new(),
            clean_up_interval: 10,
            prioritize_sorting_by_timestamp: true,
        }
    }
}

impl TreeStorageParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorted storage with timestamp keys preferred for sequences.
    pub fn sorted() -> Self {
        Self {
            sort_storage: true,
            ..Self::default()
        }
    }

    pub fn with_sort_storage(mut self, enable: bool) -> Self {
        self.sort_storage = enable;
        self
    }

    pub fn with_attribute_priority(mut self, attribute: impl Into<String>, priority: i32) -> Self {
        self.attributes_priorities.insert(attribute.into(), priority);
        self
    }

    pub fn with_clean_up_interval(mut self, interval: usize) -> Self {
        self.clean_up_interval = interval;
        self
    }

    pub fn with_timestamp_priority(mut self, enable: bool) -> Self {
        self.prioritize_sorting_by_timestamp = enable;
        self
    }

    pub fn attribute_priority(&self, attribute: &str) -> i32 {
        self.attributes_priorities
            .get(attribute)
            .copied()
            .unwrap_or(0)
    }

    pub fn validate(&self) -> Result<()> {
        if self.clean_up_interval == 0 {
            return Err(CepError::InvalidCleanupInterval(self.clean_up_interval));
        }
        Ok(())
    }
}

/// How patterns evaluated by one engine share tree nodes.
///
/// # Strategy Comparison
///
/// | Strategy | Shared | Construction cost |
/// |----------|--------|-------------------|
/// | `None` | nothing | lowest |
/// | `LeafSharing` | equivalent leaves | low |
/// | `SubtreeUnion` | largest equivalent subtrees | quadratic in nodes |
///
/// A node is only ever merged into an equivalent one: same operator, same
/// event types per slot, same conditions up to renaming of event names, same
/// consumption policy and confidence threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SharingStrategy {
    /// Every pattern gets its own tree
    #[default]
    None,

    /// Equivalent leaves are merged; internal nodes stay separate
    LeafSharing,

    /// Equivalent subtrees are merged, searching from the new tree's root down
    SubtreeUnion,
}

/// Engine configuration.
///
/// # Examples
///
/// ```rust
/// use cep_tree_engine::{EngineConfig, SharingStrategy};
///
/// // Defaults: unsorted storage, no sharing
/// let config = EngineConfig::default();
/// assert_eq!(config.sharing, SharingStrategy::None);
///
/// // Many similar patterns over one stream
/// let config = EngineConfig::shared();
/// assert_eq!(config.sharing, SharingStrategy::SubtreeUnion);
///
/// let config = EngineConfig::new()
///     .with_sharing(SharingStrategy::LeafSharing)
///     .with_flush_pending_on_finish(false);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: TreeStorageParameters,
    pub sharing: SharingStrategy,

    /// Release matches still waiting on unbounded negations when the stream ends.
    ///
    /// Default: true
    pub flush_pending_on_finish: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage: TreeStorageParameters::default(),
            sharing: SharingStrategy::None,
            flush_pending_on_finish: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorted storage, no sharing.
    pub fn sorted() -> Self {
        Self::new().with_storage(TreeStorageParameters::sorted())
    }

    /// Sorted storage with subtree union across patterns.
    pub fn shared() -> Self {
        Self::sorted().with_sharing(SharingStrategy::SubtreeUnion)
    }

    pub fn with_storage(mut self, storage: TreeStorageParameters) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_sharing(mut self, sharing: SharingStrategy) -> Self {
        self.sharing = sharing;
        self
    }

    pub fn with_flush_pending_on_finish(mut self, enable: bool) -> Self {
        self.flush_pending_on_finish = enable;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.storage.validate()
    }

    /// Parse and validate a YAML configuration. Missing fields take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::new();
        assert!(!config.storage.sort_storage);
        assert_eq!(config.storage.clean_up_interval, 10);
        assert!(config.storage.prioritize_sorting_by_timestamp);
        assert_eq!(config.sharing, SharingStrategy::None);
        assert!(config.flush_pending_on_finish);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets() {
        assert!(EngineConfig::sorted().storage.sort_storage);
        let shared = EngineConfig::shared();
        assert!(shared.storage.sort_storage);
        assert_eq!(shared.sharing, SharingStrategy::SubtreeUnion);
    }

    #[test]
    fn test_builder_methods() {
        let config = EngineConfig::new()
            .with_storage(
                TreeStorageParameters::new()
                    .with_sort_storage(true)
                    .with_attribute_priority("Open", 5)
                    .with_timestamp_priority(false)
                    .with_clean_up_interval(3),
            )
            .with_sharing(SharingStrategy::LeafSharing)
            .with_flush_pending_on_finish(false);

        assert_eq!(config.storage.attribute_priority("Open"), 5);
        assert_eq!(config.storage.attribute_priority("Close"), 0);
        assert!(!config.storage.prioritize_sorting_by_timestamp);
        assert_eq!(config.storage.clean_up_interval, 3);
        assert_eq!(config.sharing, SharingStrategy::LeafSharing);
        assert!(!config.flush_pending_on_finish);
    }

    #[test]
    fn test_zero_clean_up_interval_rejected() {
        let config = EngineConfig::new()
            .with_storage(TreeStorageParameters::new().with_clean_up_interval(0));
        assert_eq!(
            config.validate().unwrap_err(),
            CepError::InvalidCleanupInterval(0)
        );
    }

    #[test]
    fn test_from_yaml() {
        let config = EngineConfig::from_yaml_str(
            r#"
storage:
  sort_storage: true
  attributes_priorities:
    Peak: 3
sharing: SubtreeUnion
"#,
        )
        .unwrap();
        assert!(config.storage.sort_storage);
        assert_eq!(config.storage.attribute_priority("Peak"), 3);
        assert_eq!(config.storage.clean_up_interval, 10);
        assert_eq!(config.sharing, SharingStrategy::SubtreeUnion);
        assert!(config.flush_pending_on_finish);

        assert!(EngineConfig::from_yaml_str("storage:\n  clean_up_interval: 0\n").is_err());
        assert!(matches!(
            EngineConfig::from_yaml_str("sharing: [oops"),
            Err(CepError::YamlError(_))
        ));
    }
}
