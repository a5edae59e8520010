//! Structural validator for tabular (CSV) content.

use crate::validation::common_lints;
use crate::validation::report::{
    ContentFormat, IssueCode, ValidationIssue, ValidationReport,
};
use crate::validation::Validator;

/// Validates CSV documents: a header row plus consistent column counts.
/// Classifies only; never mutates input.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvValidator;

impl CsvValidator {
    /// Creates a new CSV validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn structural_issues(content: &str) -> (Vec<ValidationIssue>, Vec<String>) {
        let mut issues = Vec::new();
        let stripped = content.trim_start_matches('\u{feff}');

        if stripped.trim().is_empty() {
            issues.push(ValidationIssue::error(
                IssueCode::EmptyContent,
                "document",
                "Content is empty",
            ));
            return (issues, Vec::new());
        }

        let lines: Vec<&str> = stripped.lines().collect();
        let header = split_row(lines[0]);
        let expected = header.len();

        for (i, line) in lines.iter().enumerate().skip(1) {
            if line.is_empty() {
                continue;
            }
            let count = split_row(line).len();
            if count != expected {
                issues.push(ValidationIssue::error(
                    IssueCode::InconsistentColumns,
                    format!("row {}", i + 1),
                    format!("Expected {expected} columns, found {count}"),
                ));
            }
        }

        (issues, header)
    }
}

/// Splits one CSV row on commas, honoring double-quoted fields.
fn split_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

impl Validator for CsvValidator {
    fn format(&self) -> ContentFormat {
        ContentFormat::Csv
    }

    fn validate(&self, content: &str) -> ValidationReport {
        let mut issues = common_lints(content);
        let (structural, _) = Self::structural_issues(content);
        issues.extend(structural);
        ValidationReport::from_issues(ContentFormat::Csv, content, issues)
    }

    /// Validates against a schema of the form `{"columns": ["a", "b", ...]}`:
    /// every listed column must appear in the header row.
    fn validate_with_schema(&self, content: &str, schema: &serde_json::Value) -> ValidationReport {
        let mut issues = common_lints(content);
        let (structural, header) = Self::structural_issues(content);
        issues.extend(structural);

        if let Some(columns) = schema.get("columns").and_then(|c| c.as_array()) {
            for column in columns {
                let Some(name) = column.as_str() else { continue };
                if !header.iter().any(|h| h.trim() == name) {
                    issues.push(ValidationIssue::error(
                        IssueCode::SchemaRequiredMissing,
                        "header",
                        format!("Required column '{name}' is missing"),
                    ));
                }
            }
        }

        ValidationReport::from_issues(ContentFormat::Csv, content, issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_csv_passes() {
        let report = CsvValidator::new().validate("a,b,c\n1,2,3\n4,5,6\n");
        assert!(report.valid);
    }

    #[test]
    fn test_inconsistent_columns() {
        let report = CsvValidator::new().validate("a,b,c\n1,2\n");
        assert!(!report.valid);
        let issue = report
            .issues
            .iter()
            .find(|i| i.code == IssueCode::InconsistentColumns)
            .unwrap();
        assert_eq!(issue.location, "row 2");
    }

    #[test]
    fn test_quoted_commas_respected() {
        let report = CsvValidator::new().validate("a,b\n\"1,5\",2\n");
        assert!(report.valid);
    }

    #[test]
    fn test_empty_document() {
        let report = CsvValidator::new().validate("");
        assert!(!report.valid);
        assert!(report
            .issues
            .iter()
            .any(|i| i.code == IssueCode::EmptyContent));
    }

    #[test]
    fn test_crlf_reported() {
        let report = CsvValidator::new().validate("a,b\r\n1,2\r\n");
        assert!(report
            .issues
            .iter()
            .any(|i| i.code == IssueCode::CrlfLineEndings));
    }

    #[test]
    fn test_schema_missing_column() {
        let schema = serde_json::json!({"columns": ["keyword", "volume"]});
        let report = CsvValidator::new().validate_with_schema("keyword,score\nx,1\n", &schema);
        assert!(!report.valid);
        assert!(report
            .issues
            .iter()
            .any(|i| i.code == IssueCode::SchemaRequiredMissing));
    }

    #[test]
    fn test_schema_satisfied() {
        let schema = serde_json::json!({"columns": ["keyword", "volume"]});
        let report =
            CsvValidator::new().validate_with_schema("keyword,volume\nx,100\n", &schema);
        assert!(report.valid);
    }

    #[test]
    fn test_split_row_escaped_quotes() {
        assert_eq!(split_row(r#""say ""hi""",b"#), vec!["say \"hi\"", "b"]);
    }
}
