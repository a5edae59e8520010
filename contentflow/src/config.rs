//! Run configuration: feature toggles, model selection, and tunable
//! thresholds.
//!
//! The numeric thresholds are configurable defaults rather than hard
//! constants; the orchestrator, executor, and validators all read them from
//! here.

use crate::state::StepId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tunable numeric thresholds with production defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    /// Rounds the parallel group executor runs before failing the group.
    pub group_rounds: usize,
    /// Per-step retry attempt limit.
    pub step_retry_limit: u32,
    /// Base delay for retryable-error backoff, in milliseconds.
    pub backoff_base_ms: u64,
    /// Delay cap for retryable-error backoff, in milliseconds.
    pub backoff_max_ms: u64,
    /// Minimum acceptable article-length ratio against the outline estimate.
    pub article_min_length_ratio: f64,
    /// Maximum acceptable article-length ratio against the outline estimate.
    pub article_max_length_ratio: f64,
    /// Maximum Markdown heading depth; deeper headings are repairable issues.
    pub heading_max_depth: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            group_rounds: 3,
            step_retry_limit: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
            article_min_length_ratio: 0.5,
            article_max_length_ratio: 2.0,
            heading_max_depth: 4,
        }
    }
}

/// Per-run configuration: feature toggles plus model selection.
///
/// Opaque to the core beyond toggle lookups; toggles default to enabled when
/// absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Model identifier used by the Generator. Retries must reuse it
    /// unchanged; no provider substitution on failure.
    pub model: String,
    /// Feature toggles keyed by step id. Missing entries mean enabled.
    #[serde(default)]
    pub toggles: HashMap<StepId, bool>,
    /// Tunable thresholds.
    #[serde(default)]
    pub thresholds: Thresholds,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model: "default-model".to_string(),
            toggles: HashMap::new(),
            thresholds: Thresholds::default(),
        }
    }
}

impl RunConfig {
    /// Creates a config for the given model with all steps enabled.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Disables a step.
    #[must_use]
    pub fn with_disabled(mut self, step: StepId) -> Self {
        self.toggles.insert(step, false);
        self
    }

    /// Overrides the thresholds.
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Returns whether a step is enabled. Defaults to enabled.
    #[must_use]
    pub fn is_enabled(&self, step: StepId) -> bool {
        self.toggles.get(&step).copied().unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_defaults_to_enabled() {
        let config = RunConfig::default();
        assert!(config.is_enabled(StepId::SeoPass));
    }

    #[test]
    fn test_disable_step() {
        let config = RunConfig::new("model-a").with_disabled(StepId::SeoPass);
        assert!(!config.is_enabled(StepId::SeoPass));
        assert!(config.is_enabled(StepId::Outline));
    }

    #[test]
    fn test_threshold_defaults() {
        let t = Thresholds::default();
        assert_eq!(t.group_rounds, 3);
        assert_eq!(t.step_retry_limit, 3);
        assert_eq!(t.backoff_base_ms, 1000);
        assert_eq!(t.backoff_max_ms, 30_000);
    }

    #[test]
    fn test_config_serialization() {
        let config = RunConfig::new("model-a").with_disabled(StepId::ImageBrief);
        let json = serde_json::to_string(&config).unwrap();
        let back: RunConfig = serde_json::from_str(&json).unwrap();
        assert!(!back.is_enabled(StepId::ImageBrief));
        assert_eq!(back.model, "model-a");
    }
}
