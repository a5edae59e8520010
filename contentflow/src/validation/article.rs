//! Domain output validator for generated Markdown articles.

use crate::config::Thresholds;
use crate::validation::common_lints;
use crate::validation::report::{
    ContentFormat, IssueCode, ValidationIssue, ValidationReport,
};
use crate::validation::Validator;
use regex::Regex;

/// Validates generated article Markdown: title presence, heading depth,
/// balanced code fences, and (with a schema) section coverage and length
/// ratio. Classifies only; never mutates input.
#[derive(Debug, Clone)]
pub struct ArticleValidator {
    max_heading_depth: usize,
    min_length_ratio: f64,
    max_length_ratio: f64,
    heading_re: Regex,
}

impl ArticleValidator {
    /// Creates a validator from configured thresholds.
    #[must_use]
    pub fn new(thresholds: &Thresholds) -> Self {
        Self {
            max_heading_depth: thresholds.heading_max_depth,
            min_length_ratio: thresholds.article_min_length_ratio,
            max_length_ratio: thresholds.article_max_length_ratio,
            // Headings at line start; fenced blocks are excluded separately.
            #[allow(clippy::unwrap_used)]
            heading_re: Regex::new(r"^(#+)\s").unwrap(),
        }
    }

    fn structural_issues(&self, content: &str) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let stripped = content.trim_start_matches('\u{feff}');

        if stripped.trim().is_empty() {
            issues.push(ValidationIssue::error(
                IssueCode::EmptyContent,
                "document",
                "Content is empty",
            ));
            return issues;
        }

        let mut fence_open = false;
        let mut has_title = false;

        for (i, line) in stripped.lines().enumerate() {
            if line.trim_start().starts_with("```") {
                fence_open = !fence_open;
                continue;
            }
            if fence_open {
                continue;
            }
            if let Some(caps) = self.heading_re.captures(line) {
                let depth = caps[1].len();
                if depth == 1 {
                    has_title = true;
                }
                if depth > self.max_heading_depth {
                    issues.push(ValidationIssue::error(
                        IssueCode::HeadingTooDeep,
                        format!("line {}", i + 1),
                        format!(
                            "Heading depth {depth} exceeds maximum {}",
                            self.max_heading_depth
                        ),
                    ));
                }
            }
        }

        if fence_open {
            issues.push(ValidationIssue::error(
                IssueCode::UnbalancedFence,
                "document",
                "A code fence is never closed",
            ));
        }

        if !has_title {
            issues.push(ValidationIssue::error(
                IssueCode::MissingTitle,
                "document",
                "Article has no top-level title heading",
            ));
        }

        issues
    }

    fn word_count(content: &str) -> usize {
        content.split_whitespace().count()
    }
}

impl Validator for ArticleValidator {
    fn format(&self) -> ContentFormat {
        ContentFormat::Article
    }

    fn validate(&self, content: &str) -> ValidationReport {
        let mut issues = common_lints(content);
        issues.extend(self.structural_issues(content));
        ValidationReport::from_issues(ContentFormat::Article, content, issues)
    }

    /// Validates against an outline schema of the form
    /// `{"expected_word_count": 1200, "required_sections": ["Background"]}`.
    ///
    /// The length check compares the article's word count against the
    /// outline's estimate using the configured ratio bounds.
    fn validate_with_schema(&self, content: &str, schema: &serde_json::Value) -> ValidationReport {
        let mut issues = common_lints(content);
        issues.extend(self.structural_issues(content));

        let stripped = content.trim_start_matches('\u{feff}');

        if let Some(expected) = schema
            .get("expected_word_count")
            .and_then(serde_json::Value::as_u64)
        {
            if expected > 0 {
                let actual = Self::word_count(stripped);
                let ratio = actual as f64 / expected as f64;
                if ratio < self.min_length_ratio || ratio > self.max_length_ratio {
                    issues.push(ValidationIssue::error(
                        IssueCode::LengthRatioOutOfBounds,
                        "document",
                        format!(
                            "Article length ratio {ratio:.2} outside [{}, {}] \
                             ({actual} words vs {expected} expected)",
                            self.min_length_ratio, self.max_length_ratio
                        ),
                    ));
                }
            }
        }

        if let Some(sections) = schema
            .get("required_sections")
            .and_then(|s| s.as_array())
        {
            for section in sections {
                let Some(name) = section.as_str() else { continue };
                let present = stripped.lines().any(|line| {
                    self.heading_re.is_match(line)
                        && line.trim_start_matches('#').trim() == name
                });
                if !present {
                    issues.push(ValidationIssue::error(
                        IssueCode::SchemaRequiredMissing,
                        format!("section '{name}'"),
                        format!("Required section '{name}' is missing"),
                    ));
                }
            }
        }

        ValidationReport::from_issues(ContentFormat::Article, content, issues)
    }
}
