//! Artifact-presence-based step-status inference.
//!
//! A best-effort reconciliation view used when no attempt records were
//! persisted for a step. Persisted attempt records are authoritative and
//! always win over inference. Paths follow the `tenant/run/step/filename`
//! storage convention.

use crate::state::step::{StepId, StepRecord, StepStatus, DRAFT_GROUP, STEP_ORDER};
use std::collections::{HashMap, HashSet};

/// Index of which steps have at least one durable output artifact.
#[derive(Debug, Clone, Default)]
pub struct ArtifactIndex {
    steps: HashSet<StepId>,
}

impl ArtifactIndex {
    /// Builds an index from `tenant/run/step/filename` paths.
    ///
    /// Path segments that do not name a known step are ignored.
    #[must_use]
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut steps = HashSet::new();
        for path in paths {
            if let Some(segment) = path.as_ref().split('/').nth(2) {
                if let Some(step) = StepId::parse(segment) {
                    steps.insert(step);
                }
            }
        }
        Self { steps }
    }

    /// Returns true if the step has at least one artifact.
    #[must_use]
    pub fn has_artifact(&self, step: StepId) -> bool {
        self.steps.contains(&step)
    }

    /// Returns true if any step at or after `ordinal` has an artifact.
    fn any_at_or_after(&self, ordinal: usize) -> bool {
        STEP_ORDER
            .iter()
            .skip(ordinal)
            .any(|s| self.steps.contains(s))
    }
}

/// Returns true if `step` has begun or completed, per records or artifacts.
fn has_begun(
    step: StepId,
    artifacts: &ArtifactIndex,
    records: &HashMap<StepId, StepRecord>,
) -> bool {
    if let Some(record) = records.get(&step) {
        if !record.attempts.is_empty() || record.status != StepStatus::Pending {
            return true;
        }
    }
    artifacts.has_artifact(step)
}

/// Infers a step's status when no attempt records exist for it.
///
/// Special cases:
/// - `brief_intake` is always completed once the run exists;
/// - `section_drafts` derives from its parallel child group: the parent's own
///   work ended before the group began, so it is completed once any child has
///   started or completed;
/// - parallel-group members are inferred completed when a later step in the
///   ordered vocabulary has begun or completed.
#[must_use]
pub fn infer_step_status(
    step: StepId,
    artifacts: &ArtifactIndex,
    records: &HashMap<StepId, StepRecord>,
) -> StepStatus {
    // Attempt records are authoritative when present.
    if let Some(record) = records.get(&step) {
        if !record.attempts.is_empty() {
            return record.status;
        }
    }

    if step == StepId::BriefIntake {
        return StepStatus::Completed;
    }

    if step == StepId::SectionDrafts {
        let any_child_begun = DRAFT_GROUP
            .iter()
            .any(|child| has_begun(*child, artifacts, records));
        return if any_child_begun {
            StepStatus::Completed
        } else if artifacts.has_artifact(step) {
            StepStatus::Completed
        } else {
            StepStatus::Pending
        };
    }

    if step.is_group_member() {
        // Siblings carry no ordering among themselves; completion is inferred
        // from whether anything after this member has begun.
        if artifacts.has_artifact(step) || artifacts.any_at_or_after(step.ordinal() + 1) {
            return StepStatus::Completed;
        }
        return StepStatus::Pending;
    }

    if artifacts.has_artifact(step) {
        StepStatus::Completed
    } else {
        StepStatus::Pending
    }
}
