//! Deterministic content repairer.
//!
//! The repairer is the only component permitted to mutate content, and only
//! through a closed allow-list of deterministic operations. If any
//! error-severity issue has no mapped repair the whole batch is refused and
//! zero changes are applied, forcing an explicit regenerate-or-fix decision
//! instead of a silently partial repair.

use crate::validation::report::{IssueCode, RepairAction, Severity, ValidationIssue};
use thiserror::Error;

/// Allow-listed repair operations, in canonical application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RepairOp {
    /// Strip a leading byte-order mark.
    StripBom,
    /// Normalize CRLF (and stray CR) line endings to LF.
    NormalizeLineEndings,
    /// Drop a trailing delimiter before a closing bracket.
    DropTrailingDelimiter,
    /// Trim trailing whitespace from every line.
    TrimTrailingWhitespace,
    /// Collapse heading markup beyond the configured nesting depth.
    CollapseHeadingDepth,
}

impl RepairOp {
    /// Stable operation code recorded on [`RepairAction`]s.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::StripBom => "strip_bom",
            Self::NormalizeLineEndings => "normalize_line_endings",
            Self::DropTrailingDelimiter => "drop_trailing_delimiter",
            Self::TrimTrailingWhitespace => "trim_trailing_whitespace",
            Self::CollapseHeadingDepth => "collapse_heading_depth",
        }
    }

    /// The repair mapped to an issue code, if one exists. Each issue code
    /// maps to at most one operation.
    #[must_use]
    pub fn for_issue(code: IssueCode) -> Option<Self> {
        match code {
            IssueCode::LeadingBom => Some(Self::StripBom),
            IssueCode::CrlfLineEndings => Some(Self::NormalizeLineEndings),
            IssueCode::TrailingDelimiter => Some(Self::DropTrailingDelimiter),
            IssueCode::TrailingWhitespace => Some(Self::TrimTrailingWhitespace),
            IssueCode::HeadingTooDeep => Some(Self::CollapseHeadingDepth),
            _ => None,
        }
    }
}

/// Refusal to repair.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepairError {
    /// At least one error-severity issue has no mapped deterministic repair;
    /// the whole batch is refused and no changes were applied.
    #[error("No deterministic repair for error issues {codes:?}; refusing batch")]
    Unrepairable {
        /// The unrepairable issue codes.
        codes: Vec<IssueCode>,
    },
}

/// Applies allow-listed deterministic repairs. Fail-closed per batch.
#[derive(Debug, Clone)]
pub struct Repairer {
    max_heading_depth: usize,
}

impl Repairer {
    /// Creates a repairer; `max_heading_depth` bounds heading collapse.
    #[must_use]
    pub fn new(max_heading_depth: usize) -> Self {
        Self { max_heading_depth }
    }

    /// Repairs `content` for the given issues.
    ///
    /// Returns the repaired content and the list of repairs actually applied
    /// (operations that change nothing are not recorded). Refuses the whole
    /// batch if any error-severity issue lacks a mapped repair.
    pub fn repair(
        &self,
        content: &str,
        issues: &[ValidationIssue],
    ) -> Result<(String, Vec<RepairAction>), RepairError> {
        let mut unrepairable: Vec<IssueCode> = issues
            .iter()
            .filter(|i| i.severity == Severity::Error && RepairOp::for_issue(i.code).is_none())
            .map(|i| i.code)
            .collect();
        unrepairable.sort_by_key(|c| format!("{c}"));
        unrepairable.dedup();
        if !unrepairable.is_empty() {
            return Err(RepairError::Unrepairable {
                codes: unrepairable,
            });
        }

        let mut ops: Vec<RepairOp> = issues
            .iter()
            .filter_map(|i| RepairOp::for_issue(i.code))
            .collect();
        ops.sort();
        ops.dedup();

        let mut current = content.to_string();
        let mut actions = Vec::new();

        for op in ops {
            let repaired = self.apply(op, &current);
            if repaired != current {
                let (before, after) = first_diff_snippet(&current, &repaired);
                actions.push(RepairAction::new(
                    op.code(),
                    describe(op),
                    before,
                    after,
                ));
                tracing::debug!(op = op.code(), "Applied deterministic repair");
                current = repaired;
            }
        }

        Ok((current, actions))
    }

    fn apply(&self, op: RepairOp, content: &str) -> String {
        match op {
            RepairOp::StripBom => content.trim_start_matches('\u{feff}').to_string(),
            RepairOp::NormalizeLineEndings => content.replace("\r\n", "\n").replace('\r', "\n"),
            RepairOp::DropTrailingDelimiter => drop_trailing_delimiters(content),
            RepairOp::TrimTrailingWhitespace => trim_trailing_whitespace(content),
            RepairOp::CollapseHeadingDepth => collapse_headings(content, self.max_heading_depth),
        }
    }
}

fn describe(op: RepairOp) -> &'static str {
    match op {
        RepairOp::StripBom => "Stripped leading byte-order mark",
        RepairOp::NormalizeLineEndings => "Normalized line endings to LF",
        RepairOp::DropTrailingDelimiter => "Dropped trailing delimiter before closing bracket",
        RepairOp::TrimTrailingWhitespace => "Trimmed trailing whitespace",
        RepairOp::CollapseHeadingDepth => "Collapsed over-deep heading markup",
    }
}

/// Removes commas that directly precede (modulo whitespace) a closing
/// bracket, outside string literals.
fn drop_trailing_delimiters(content: &str) -> String {
    let chars: Vec<char> = content.chars().collect();
    let mut out = String::with_capacity(content.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if matches!(next, Some('}') | Some(']')) {
                    // Trailing delimiter; drop it.
                } else {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn trim_trailing_whitespace(content: &str) -> String {
    let had_final_newline = content.ends_with('\n');
    let mut out: String = content
        .lines()
        .map(|line| line.trim_end_matches([' ', '\t']))
        .collect::<Vec<_>>()
        .join("\n");
    if had_final_newline {
        out.push('\n');
    }
    out
}

fn collapse_headings(content: &str, max_depth: usize) -> String {
    let had_final_newline = content.ends_with('\n');
    let mut fence_open = false;
    let mut out: Vec<String> = Vec::new();

    for line in content.lines() {
        if line.trim_start().starts_with("```") {
            fence_open = !fence_open;
            out.push(line.to_string());
            continue;
        }
        if !fence_open {
            let depth = line.chars().take_while(|c| *c == '#').count();
            if depth > max_depth && line.chars().nth(depth) == Some(' ') {
                out.push(format!("{}{}", "#".repeat(max_depth), &line[depth..]));
                continue;
            }
        }
        out.push(line.to_string());
    }

    let mut result = out.join("\n");
    if had_final_newline {
        result.push('\n');
    }
    result
}

/// First differing line pair between two versions, for audit snippets.
fn first_diff_snippet(before: &str, after: &str) -> (String, String) {
    let before_lines: Vec<&str> = before.lines().collect();
    let after_lines: Vec<&str> = after.lines().collect();
    for i in 0..before_lines.len().max(after_lines.len()) {
        let b = before_lines.get(i).copied().unwrap_or("");
        let a = after_lines.get(i).copied().unwrap_or("");
        if b != a {
            return (truncate(b), truncate(a));
        }
    }
    (truncate(before), truncate(after))
}

fn truncate(s: &str) -> String {
    const LIMIT: usize = 80;
    if s.chars().count() <= LIMIT {
        s.to_string()
    } else {
        let cut: String = s.chars().take(LIMIT).collect();
        format!("{cut}...")
    }
}
