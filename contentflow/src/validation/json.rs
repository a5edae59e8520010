//! Structural validator for tree-structured (JSON) content.

use crate::validation::common_lints;
use crate::validation::report::{
    ContentFormat, IssueCode, ValidationIssue, ValidationReport,
};
use crate::validation::Validator;

/// Validates JSON documents. Classifies only; never mutates input.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonValidator;

impl JsonValidator {
    /// Creates a new JSON validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn parse_issues(content: &str) -> Vec<ValidationIssue> {
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

        if serde_json::from_str::<serde_json::Value>(stripped).is_err() {
            // A trailing delimiter before a closing bracket is the one parse
            // failure with a deterministic repair; report it as such instead
            // of an opaque parse error.
            if let Some(pos) = find_trailing_delimiter(stripped) {
                issues.push(ValidationIssue::error(
                    IssueCode::TrailingDelimiter,
                    format!("offset {pos}"),
                    "Trailing delimiter before closing bracket",
                ));
            } else if let Err(e) = serde_json::from_str::<serde_json::Value>(stripped) {
                issues.push(ValidationIssue::error(
                    IssueCode::ParseError,
                    format!("line {}, column {}", e.line(), e.column()),
                    format!("Invalid JSON: {e}"),
                ));
            }
        }

        issues
    }
}

/// Returns the byte offset of a `,` directly preceding a closing bracket,
/// outside of string literals.
fn find_trailing_delimiter(content: &str) -> Option<usize> {
    let bytes = content.as_bytes();
    let mut in_string = false;
    let mut escaped = false;
    let mut last_comma: Option<usize> = None;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b',' => last_comma = Some(i),
            b'}' | b']' => {
                if let Some(pos) = last_comma {
                    return Some(pos);
                }
            }
            b if b.is_ascii_whitespace() => {}
            _ => last_comma = None,
        }
    }
    None
}

impl Validator for JsonValidator {
    fn format(&self) -> ContentFormat {
        ContentFormat::Json
    }

    fn validate(&self, content: &str) -> ValidationReport {
        let mut issues = common_lints(content);
        issues.extend(Self::parse_issues(content));
        ValidationReport::from_issues(ContentFormat::Json, content, issues)
    }

    /// Validates against a schema mapping required top-level keys to expected
    /// type names (`"string"`, `"number"`, `"array"`, `"object"`, `"bool"`).
    fn validate_with_schema(&self, content: &str, schema: &serde_json::Value) -> ValidationReport {
        let mut issues = common_lints(content);
        issues.extend(Self::parse_issues(content));

        let stripped = content.trim_start_matches('\u{feff}');
        if let (Ok(value), Some(required)) = (
            serde_json::from_str::<serde_json::Value>(stripped),
            schema.as_object(),
        ) {
            let object = value.as_object();
            for (key, expected) in required {
                let Some(expected_type) = expected.as_str() else {
                    continue;
                };
                match object.and_then(|o| o.get(key)) {
                    None => issues.push(ValidationIssue::error(
                        IssueCode::SchemaRequiredMissing,
                        format!("$.{key}"),
                        format!("Required key '{key}' is missing"),
                    )),
                    Some(actual) if !type_matches(actual, expected_type) => {
                        issues.push(ValidationIssue::error(
                            IssueCode::SchemaTypeMismatch,
                            format!("$.{key}"),
                            format!("Expected '{key}' to be {expected_type}"),
                        ));
                    }
                    Some(_) => {}
                }
            }
        }

        ValidationReport::from_issues(ContentFormat::Json, content, issues)
    }
}

fn type_matches(value: &serde_json::Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "bool" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_json_passes() {
        let report = JsonValidator::new().validate(r#"{"title": "hello"}"#);
        assert!(report.valid);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_invalid_json_reports_parse_error() {
        let report = JsonValidator::new().validate(r#"{"title": "#);
        assert!(!report.valid);
        assert!(report
            .issues
            .iter()
            .any(|i| i.code == IssueCode::ParseError));
    }

    #[test]
    fn test_trailing_comma_classified_as_repairable() {
        let report = JsonValidator::new().validate(r#"{"a": 1, "b": 2,}"#);
        assert!(!report.valid);
        assert!(report
            .issues
            .iter()
            .any(|i| i.code == IssueCode::TrailingDelimiter));
        assert!(!report.issues.iter().any(|i| i.code == IssueCode::ParseError));
    }

    #[test]
    fn test_comma_inside_string_not_flagged() {
        let report = JsonValidator::new().validate(r#"{"a": "x,}"}"#);
        assert!(report.valid);
    }

    #[test]
    fn test_bom_reported() {
        let report = JsonValidator::new().validate("\u{feff}{\"a\": 1}");
        assert!(report
            .issues
            .iter()
            .any(|i| i.code == IssueCode::LeadingBom));
    }

    #[test]
    fn test_empty_content() {
        let report = JsonValidator::new().validate("   ");
        assert!(!report.valid);
        assert!(report
            .issues
            .iter()
            .any(|i| i.code == IssueCode::EmptyContent));
    }

    #[test]
    fn test_schema_required_missing() {
        let schema = serde_json::json!({"title": "string", "sections": "array"});
        let report =
            JsonValidator::new().validate_with_schema(r#"{"title": "t"}"#, &schema);
        assert!(!report.valid);
        assert!(report
            .issues
            .iter()
            .any(|i| i.code == IssueCode::SchemaRequiredMissing));
    }

    #[test]
    fn test_schema_type_mismatch() {
        let schema = serde_json::json!({"sections": "array"});
        let report =
            JsonValidator::new().validate_with_schema(r#"{"sections": "nope"}"#, &schema);
        assert!(!report.valid);
        assert!(report
            .issues
            .iter()
            .any(|i| i.code == IssueCode::SchemaTypeMismatch));
    }

    #[test]
    fn test_schema_satisfied() {
        let schema = serde_json::json!({"title": "string", "sections": "array"});
        let report = JsonValidator::new()
            .validate_with_schema(r#"{"title": "t", "sections": []}"#, &schema);
        assert!(report.valid);
    }
}
