//! Validation & repair engine.
//!
//! Three validators share one contract: classify content into an immutable
//! [`ValidationReport`], never mutating input. The [`Repairer`] is the only
//! component that mutates content, via a closed allow-list of deterministic
//! operations, and fails closed when any error-severity issue has no mapped
//! repair. [`ValidationEngine`] chains the two for step-completion gating.

mod article;
mod csv;
mod json;
mod repair;
mod report;

pub use article::ArticleValidator;
pub use csv::CsvValidator;
pub use json::JsonValidator;
pub use repair::{RepairError, RepairOp, Repairer};
pub use report::{
    content_hash, ContentFormat, IssueCode, RepairAction, Severity, ValidationIssue,
    ValidationReport,
};

use crate::config::Thresholds;

/// Shared validator contract. Validators never mutate input.
pub trait Validator: Send + Sync {
    /// The format this validator understands.
    fn format(&self) -> ContentFormat;

    /// Classifies content structurally.
    fn validate(&self, content: &str) -> ValidationReport;

    /// Classifies content against a format-specific schema. Defaults to the
    /// schema-less validation.
    fn validate_with_schema(&self, content: &str, schema: &serde_json::Value) -> ValidationReport {
        let _ = schema;
        self.validate(content)
    }
}

/// Builds the validator for a format. Static dispatch table; validators are
/// constructed once at engine setup, not looked up through a runtime
/// registry.
#[must_use]
pub fn validator_for(format: ContentFormat, thresholds: &Thresholds) -> Box<dyn Validator> {
    match format {
        ContentFormat::Json => Box::new(JsonValidator::new()),
        ContentFormat::Csv => Box::new(CsvValidator::new()),
        ContentFormat::Article => Box::new(ArticleValidator::new(thresholds)),
    }
}

/// Lints shared by every format: byte-order mark, line endings, trailing
/// whitespace. All three are deterministically repairable.
#[must_use]
pub(crate) fn common_lints(content: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if content.starts_with('\u{feff}') {
        issues.push(ValidationIssue::error(
            IssueCode::LeadingBom,
            "offset 0",
            "Content starts with a byte-order mark",
        ));
    }

    if content.contains('\r') {
        issues.push(ValidationIssue::error(
            IssueCode::CrlfLineEndings,
            "document",
            "Content uses CR or CRLF line endings",
        ));
    }

    for (i, line) in content.lines().enumerate() {
        if line.ends_with(' ') || line.ends_with('\t') {
            issues.push(ValidationIssue::warning(
                IssueCode::TrailingWhitespace,
                format!("line {}", i + 1),
                "Line has trailing whitespace",
            ));
        }
    }

    issues
}

/// Validate-then-repair gate consulted before any step output is accepted.
#[derive(Debug, Clone)]
pub struct ValidationEngine {
    repairer: Repairer,
}

impl ValidationEngine {
    /// Creates an engine from configured thresholds.
    #[must_use]
    pub fn new(thresholds: &Thresholds) -> Self {
        Self {
            repairer: Repairer::new(thresholds.heading_max_depth),
        }
    }

    /// Direct access to the repairer.
    #[must_use]
    pub fn repairer(&self) -> &Repairer {
        &self.repairer
    }

    /// Validates content, repairing deterministically when possible.
    ///
    /// Returns the (possibly repaired) content and the final report. When the
    /// repairer refuses (fail-closed) or repaired content still fails
    /// validation, the report's `valid` is false and the caller decides
    /// between regeneration and manual intervention.
    #[must_use]
    pub fn validate_and_repair(
        &self,
        validator: &dyn Validator,
        content: &str,
        schema: Option<&serde_json::Value>,
    ) -> (String, ValidationReport) {
        let validate = |c: &str| match schema {
            Some(s) => validator.validate_with_schema(c, s),
            None => validator.validate(c),
        };

        let initial = validate(content);
        if initial.valid && initial.issues.is_empty() {
            return (content.to_string(), initial);
        }

        match self.repairer.repair(content, &initial.issues) {
            Ok((repaired, actions)) if !actions.is_empty() => {
                let mut report = validate(&repaired);
                report.original_hash = initial.original_hash;
                report.repaired_hash = Some(content_hash(&repaired));
                report.repairs_applied = actions;
                (repaired, report)
            }
            Ok(_) => (content.to_string(), initial),
            Err(err) => {
                tracing::warn!(error = %err, format = %validator.format(), "Repair refused");
                (content.to_string(), initial)
            }
        }
    }
}
