//! Validation report types shared by all validators and the repairer.

use crate::utils::iso_timestamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// The structural format a validator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFormat {
    /// Tree-structured serialization (JSON).
    Json,
    /// Tabular serialization (CSV).
    Csv,
    /// Domain output: generated Markdown article.
    Article,
}

impl fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Csv => write!(f, "csv"),
            Self::Article => write!(f, "article"),
        }
    }
}

/// Severity of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Content is unusable as-is.
    Error,
    /// Content is usable but flawed.
    Warning,
    /// Informational finding.
    Info,
}

/// Machine-readable issue codes emitted by the validators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    /// Content starts with a byte-order mark.
    LeadingBom,
    /// Content uses CRLF line endings.
    CrlfLineEndings,
    /// A trailing delimiter precedes a closing bracket.
    TrailingDelimiter,
    /// A line carries trailing whitespace.
    TrailingWhitespace,
    /// A Markdown heading is nested beyond the configured depth.
    HeadingTooDeep,
    /// Content could not be parsed at all.
    ParseError,
    /// A schema-required key is missing.
    SchemaRequiredMissing,
    /// A value has the wrong type for its schema entry.
    SchemaTypeMismatch,
    /// A CSV row has a different column count than the header.
    InconsistentColumns,
    /// Content is empty or whitespace-only.
    EmptyContent,
    /// A Markdown code fence is never closed.
    UnbalancedFence,
    /// The article has no top-level title.
    MissingTitle,
    /// The article length is outside the configured ratio bounds.
    LengthRatioOutOfBounds,
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_string(self).unwrap_or_default();
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// One finding produced by a validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Severity of the finding.
    pub severity: Severity,
    /// Machine-readable code.
    pub code: IssueCode,
    /// Where the issue was found (line, key path, or similar).
    pub location: String,
    /// Human-readable description.
    pub message: String,
}

impl ValidationIssue {
    /// Creates an error-severity issue.
    #[must_use]
    pub fn error(code: IssueCode, location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            location: location.into(),
            message: message.into(),
        }
    }

    /// Creates a warning-severity issue.
    #[must_use]
    pub fn warning(
        code: IssueCode,
        location: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            location: location.into(),
            message: message.into(),
        }
    }

    /// Creates an info-severity issue.
    #[must_use]
    pub fn info(code: IssueCode, location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            code,
            location: location.into(),
            message: message.into(),
        }
    }
}

/// A deterministic content fix actually applied by the repairer.
///
/// Immutable once recorded; repairs are themselves audit events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairAction {
    /// Allow-listed repair operation code.
    pub code: String,
    /// Human-readable description of what was done.
    pub description: String,
    /// When the repair was applied (ISO 8601).
    pub timestamp: String,
    /// Content snippet before the repair.
    pub before: String,
    /// Content snippet after the repair.
    pub after: String,
}

impl RepairAction {
    /// Records a repair with before/after snippets.
    #[must_use]
    pub fn new(
        code: impl Into<String>,
        description: impl Into<String>,
        before: impl Into<String>,
        after: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            timestamp: iso_timestamp(),
            before: before.into(),
            after: after.into(),
        }
    }
}

/// The immutable outcome of one validation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// True when no error-severity issues were found.
    pub valid: bool,
    /// The format that was validated.
    pub format: ContentFormat,
    /// Ordered findings.
    pub issues: Vec<ValidationIssue>,
    /// Repairs actually applied (populated by the repairer, not validators).
    pub repairs_applied: Vec<RepairAction>,
    /// SHA-256 of the validated content.
    pub original_hash: String,
    /// SHA-256 of the repaired content, when a repair ran.
    pub repaired_hash: Option<String>,
}

impl ValidationReport {
    /// Builds a report from findings over `content`.
    #[must_use]
    pub fn from_issues(
        format: ContentFormat,
        content: &str,
        issues: Vec<ValidationIssue>,
    ) -> Self {
        let valid = !issues.iter().any(|i| i.severity == Severity::Error);
        Self {
            valid,
            format,
            issues,
            repairs_applied: Vec::new(),
            original_hash: content_hash(content),
            repaired_hash: None,
        }
    }

    /// Error-severity issues only.
    #[must_use]
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .collect()
    }
}

/// SHA-256 hex digest of content, used for report hashes and artifact
/// addressing.
#[must_use]
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_valid_without_errors() {
        let report = ValidationReport::from_issues(
            ContentFormat::Json,
            "{}",
            vec![ValidationIssue::warning(
                IssueCode::TrailingWhitespace,
                "line 1",
                "trailing whitespace",
            )],
        );
        assert!(report.valid);
        assert!(report.errors().is_empty());
    }

    #[test]
    fn test_report_invalid_with_error() {
        let report = ValidationReport::from_issues(
            ContentFormat::Json,
            "{",
            vec![ValidationIssue::error(IssueCode::ParseError, "line 1", "eof")],
        );
        assert!(!report.valid);
        assert_eq!(report.errors().len(), 1);
    }

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("abc").len(), 64);
    }

    #[test]
    fn test_issue_code_display() {
        assert_eq!(IssueCode::LeadingBom.to_string(), "leading_bom");
        assert_eq!(
            IssueCode::LengthRatioOutOfBounds.to_string(),
            "length_ratio_out_of_bounds"
        );
    }
}
