//! Generator capability seam.
//!
//! A single entry point wrapping provider-specific language-model calls,
//! returning either free text or schema-validated structured output. Failures
//! carry exactly one of the three error classifications; no automatic
//! model/provider substitution is permitted on failure, so retries reuse the
//! request unchanged.

use crate::errors::StepError;
use crate::state::StepId;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

/// One generation request. Retries must reuse it verbatim.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// The step this generation serves.
    pub step: StepId,
    /// Model identifier from the run config.
    pub model: String,
    /// Prompt text.
    pub prompt: String,
    /// When present, the provider must return structured output validated
    /// against this schema.
    pub schema: Option<serde_json::Value>,
    /// Free-text hint applied only on retry of a previously failed step.
    pub supplementary: Option<String>,
}

impl GenerateRequest {
    /// Creates a free-text request.
    #[must_use]
    pub fn text(step: StepId, model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            step,
            model: model.into(),
            prompt: prompt.into(),
            schema: None,
            supplementary: None,
        }
    }

    /// Attaches a structured-output schema.
    #[must_use]
    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Attaches a retry hint.
    #[must_use]
    pub fn with_supplementary(mut self, hint: impl Into<String>) -> Self {
        self.supplementary = Some(hint.into());
        self
    }
}

/// Output of a generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedContent {
    /// Free text.
    Text(String),
    /// Schema-validated structured output.
    Structured(serde_json::Value),
}

impl GeneratedContent {
    /// The content as text, serializing structured output.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Structured(v) => serde_json::to_string_pretty(v).unwrap_or_default(),
        }
    }
}

/// Provider-agnostic generation capability.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generates content for a request, raising a classified [`StepError`]
    /// on failure.
    async fn generate(&self, request: GenerateRequest) -> Result<GeneratedContent, StepError>;
}
