//! Step vocabulary, per-step status, and attempt records.
//!
//! The step vocabulary is static configuration: a fixed ordered list of 18
//! steps, one parallel group, and a dependency map used by the recommendation
//! engine. [`validate_step_tables`] checks the tables at startup.

use crate::errors::{ErrorCode, StepError};
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One named unit of pipeline work, in fixed declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    /// Input intake; always considered completed once a run exists.
    BriefIntake,
    /// Research pass over the brief's topic.
    SourceResearch,
    /// Audience profiling.
    AudienceProfile,
    /// Keyword extraction and analysis.
    KeywordAnalysis,
    /// Article outline generation.
    Outline,
    /// Human approval checkpoint for the outline.
    OutlineApproval,
    /// Parent of the parallel drafting group.
    SectionDrafts,
    /// Parallel group member: introduction section.
    DraftIntro,
    /// Parallel group member: body sections.
    DraftBody,
    /// Parallel group member: conclusion section.
    DraftConclusion,
    /// Parallel group member: FAQ section.
    DraftFaq,
    /// Assembles drafted sections into one document.
    Assemble,
    /// Style and tone pass over the assembled document.
    StylePass,
    /// SEO adjustments driven by keyword analysis.
    SeoPass,
    /// Image brief generation.
    ImageBrief,
    /// Waits for externally produced images.
    ImageInput,
    /// Final structural and content validation.
    FinalValidation,
    /// Packages the final deliverable.
    Packaging,
}

/// All steps in declaration order.
pub const STEP_ORDER: [StepId; 18] = [
    StepId::BriefIntake,
    StepId::SourceResearch,
    StepId::AudienceProfile,
    StepId::KeywordAnalysis,
    StepId::Outline,
    StepId::OutlineApproval,
    StepId::SectionDrafts,
    StepId::DraftIntro,
    StepId::DraftBody,
    StepId::DraftConclusion,
    StepId::DraftFaq,
    StepId::Assemble,
    StepId::StylePass,
    StepId::SeoPass,
    StepId::ImageBrief,
    StepId::ImageInput,
    StepId::FinalValidation,
    StepId::Packaging,
];

/// Members of the section-drafting parallel group, children of
/// [`StepId::SectionDrafts`].
pub const DRAFT_GROUP: [StepId; 4] = [
    StepId::DraftIntro,
    StepId::DraftBody,
    StepId::DraftConclusion,
    StepId::DraftFaq,
];

impl StepId {
    /// The position of this step in the ordered vocabulary.
    #[must_use]
    pub fn ordinal(self) -> usize {
        STEP_ORDER
            .iter()
            .position(|s| *s == self)
            .unwrap_or(usize::MAX)
    }

    /// Snake-case identifier, matching storage paths and serialized form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BriefIntake => "brief_intake",
            Self::SourceResearch => "source_research",
            Self::AudienceProfile => "audience_profile",
            Self::KeywordAnalysis => "keyword_analysis",
            Self::Outline => "outline",
            Self::OutlineApproval => "outline_approval",
            Self::SectionDrafts => "section_drafts",
            Self::DraftIntro => "draft_intro",
            Self::DraftBody => "draft_body",
            Self::DraftConclusion => "draft_conclusion",
            Self::DraftFaq => "draft_faq",
            Self::Assemble => "assemble",
            Self::StylePass => "style_pass",
            Self::SeoPass => "seo_pass",
            Self::ImageBrief => "image_brief",
            Self::ImageInput => "image_input",
            Self::FinalValidation => "final_validation",
            Self::Packaging => "packaging",
        }
    }

    /// Parses a snake-case step identifier.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        STEP_ORDER.iter().copied().find(|step| step.as_str() == s)
    }

    /// Returns true if this step belongs to the parallel drafting group.
    #[must_use]
    pub fn is_group_member(self) -> bool {
        DRAFT_GROUP.contains(&self)
    }

    /// Returns true if a failed run may be resumed at this step.
    ///
    /// Parallel group members are internal sub-phases of `section_drafts` and
    /// must be entered via their parent.
    #[must_use]
    pub fn is_resume_point(self) -> bool {
        !self.is_group_member()
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ordered upstream producer candidates consulted when a step fails with
/// `validation_fail`. First enabled, resumable candidate wins.
pub const DEPENDENCY_MAP: &[(StepId, &[StepId])] = &[
    (StepId::KeywordAnalysis, &[StepId::SourceResearch]),
    (StepId::Outline, &[StepId::SourceResearch]),
    (StepId::SectionDrafts, &[StepId::Outline]),
    (StepId::Assemble, &[StepId::SectionDrafts]),
    (StepId::StylePass, &[StepId::Assemble]),
    (StepId::SeoPass, &[StepId::KeywordAnalysis]),
    (StepId::ImageBrief, &[StepId::Outline]),
    (StepId::FinalValidation, &[StepId::StylePass, StepId::Assemble]),
    (StepId::Packaging, &[StepId::FinalValidation]),
];

/// Looks up the upstream producer candidates for a step.
#[must_use]
pub fn upstream_candidates(step: StepId) -> &'static [StepId] {
    DEPENDENCY_MAP
        .iter()
        .find(|(s, _)| *s == step)
        .map_or(&[], |(_, candidates)| candidates)
}

/// Error raised when the static step tables are inconsistent.
#[derive(Debug, Clone, Error)]
pub enum StepTableError {
    /// A dependency-map candidate is not a valid resume point.
    #[error("Dependency candidate '{candidate}' for step '{step}' is not a valid resume point")]
    CandidateNotResumable {
        /// The failing step entry.
        step: StepId,
        /// The offending candidate.
        candidate: StepId,
    },

    /// A dependency-map candidate does not precede the step it produces for.
    #[error("Dependency candidate '{candidate}' does not precede step '{step}'")]
    CandidateOutOfOrder {
        /// The failing step entry.
        step: StepId,
        /// The offending candidate.
        candidate: StepId,
    },
}

/// Validates the static step vocabulary and dependency map.
///
/// Run at startup; the tables are compile-time constants but their invariants
/// (candidates precede their consumers and are valid resume points) are not
/// expressible in the type system.
pub fn validate_step_tables() -> Result<(), StepTableError> {
    for (step, candidates) in DEPENDENCY_MAP {
        for candidate in *candidates {
            if !candidate.is_resume_point() {
                return Err(StepTableError::CandidateNotResumable {
                    step: *step,
                    candidate: *candidate,
                });
            }
            if candidate.ordinal() >= step.ordinal() {
                return Err(StepTableError::CandidateOutOfOrder {
                    step: *step,
                    candidate: *candidate,
                });
            }
        }
    }
    Ok(())
}

/// The execution status of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step has not started.
    #[default]
    Pending,
    /// Step is currently running.
    Running,
    /// Step failed and is being retried.
    Retrying,
    /// Step completed successfully.
    Completed,
    /// Step failed terminally.
    Failed,
    /// Step was skipped by a feature-toggle decision before it started.
    Skipped,
}

impl StepStatus {
    /// Returns true if the status is terminal for the step.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Retrying => write!(f, "retrying"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// One execution try of a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepAttempt {
    /// 1-based attempt number.
    pub number: u32,
    /// Status reached by this attempt.
    pub status: StepStatus,
    /// When the attempt started.
    pub started_at: Timestamp,
    /// When the attempt ended, if it has.
    pub ended_at: Option<Timestamp>,
    /// Typed error for failed attempts.
    pub error: Option<StepError>,
}

impl StepAttempt {
    /// Starts a new attempt.
    #[must_use]
    pub fn start(number: u32) -> Self {
        Self {
            number,
            status: StepStatus::Running,
            started_at: now_utc(),
            ended_at: None,
            error: None,
        }
    }

    /// Marks the attempt completed.
    pub fn complete(&mut self) {
        self.status = StepStatus::Completed;
        self.ended_at = Some(now_utc());
    }

    /// Marks the attempt failed with a typed error.
    pub fn fail(&mut self, error: StepError) {
        self.status = StepStatus::Failed;
        self.ended_at = Some(now_utc());
        self.error = Some(error);
    }
}

/// Persisted record of one step within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Which step this record tracks.
    pub step: StepId,
    /// Current status.
    pub status: StepStatus,
    /// Attempt history, oldest first.
    pub attempts: Vec<StepAttempt>,
}

impl StepRecord {
    /// Creates a pending record for a step.
    #[must_use]
    pub fn new(step: StepId) -> Self {
        Self {
            step,
            status: StepStatus::Pending,
            attempts: Vec::new(),
        }
    }

    /// Begins a new attempt, moving the step into `running` (first attempt)
    /// or `retrying` (subsequent attempts).
    pub fn begin_attempt(&mut self) -> u32 {
        let number = self.attempts.len() as u32 + 1;
        self.status = if number == 1 {
            StepStatus::Running
        } else {
            StepStatus::Retrying
        };
        self.attempts.push(StepAttempt::start(number));
        number
    }

    /// Marks the current attempt (and the step) completed.
    pub fn complete(&mut self) {
        if let Some(attempt) = self.attempts.last_mut() {
            attempt.complete();
        }
        self.status = StepStatus::Completed;
    }

    /// Marks the current attempt (and the step) failed.
    pub fn fail(&mut self, error: StepError) {
        if let Some(attempt) = self.attempts.last_mut() {
            attempt.fail(error);
        }
        self.status = StepStatus::Failed;
    }

    /// Marks the step skipped. Only legal from `pending`.
    pub fn skip(&mut self) {
        if self.status == StepStatus::Pending {
            self.status = StepStatus::Skipped;
        }
    }

    /// Returns true if another retry attempt is allowed under `limit`.
    #[must_use]
    pub fn can_retry(&self, limit: u32) -> bool {
        (self.attempts.len() as u32) < limit
    }

    /// The typed error of the most recent failed attempt, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&StepError> {
        self.attempts.iter().rev().find_map(|a| a.error.as_ref())
    }

    /// The classified error code of the most recent failure.
    #[must_use]
    pub fn last_error_code(&self) -> Option<ErrorCode> {
        self.last_error().map(|e| e.code)
    }

    /// When the most recent attempt ended.
    #[must_use]
    pub fn last_ended_at(&self) -> Option<Timestamp> {
        self.attempts.iter().rev().find_map(|a| a.ended_at)
    }
}
