//! Resume and retry-recommendation engine.
//!
//! Given a run in a terminal `failed` state, decides whether the operator
//! should re-enter at the same step or at an upstream producer step, and why.
//! Recommendations are derived on demand from run and step state, never
//! persisted.

use crate::errors::ErrorCode;
use crate::state::{upstream_candidates, Run, RunStatus, StepId, StepRecord, StepStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What the operator should do with a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationAction {
    /// Re-run the failed step itself.
    RetrySame,
    /// Re-enter at an upstream producer step.
    RetryPrevious,
}

/// Computed guidance on whether and where to resume a failed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryRecommendation {
    /// Recommended action.
    pub action: RecommendationAction,
    /// The step to re-enter at.
    pub target_step: StepId,
    /// Human-readable explanation.
    pub reason: String,
}

/// Finds the most recently failed step, tie-broken by latest completion
/// timestamp, falling back to the run's current step.
fn most_recent_failure(
    run: &Run,
    steps: &HashMap<StepId, StepRecord>,
) -> Option<StepId> {
    steps
        .values()
        .filter(|r| r.status == StepStatus::Failed)
        .max_by_key(|r| r.last_ended_at())
        .map(|r| r.step)
        .or(run.current_step)
}

/// Computes a retry recommendation for a failed run.
///
/// Returns `None` when the run is not in `failed`, when no failed step can be
/// identified, or when the run's external-fix condition holds (it previously
/// resumed at exactly the step that is failing now and an external
/// remediation is already pending) — recommendation and external-fix guidance
/// are mutually exclusive per run.
#[must_use]
pub fn recommend(run: &Run, steps: &HashMap<StepId, StepRecord>) -> Option<RetryRecommendation> {
    if run.status != RunStatus::Failed {
        return None;
    }

    let failed_step = most_recent_failure(run, steps)?;

    if run.external_fix_pending && run.last_resumed_step == Some(failed_step) {
        tracing::debug!(
            run_id = %run.id,
            step = %failed_step,
            "Recommendation suppressed; external fix already pending"
        );
        return None;
    }

    let code = steps
        .get(&failed_step)
        .and_then(StepRecord::last_error_code)
        .or(run.error_code)
        .unwrap_or(ErrorCode::Unknown);

    let recommendation = match code {
        ErrorCode::ValidationFail => {
            let upstream = upstream_candidates(failed_step)
                .iter()
                .copied()
                .find(|candidate| {
                    candidate.is_resume_point() && run.config.is_enabled(*candidate)
                });

            match upstream {
                Some(target) => RetryRecommendation {
                    action: RecommendationAction::RetryPrevious,
                    target_step: target,
                    reason: format!(
                        "Output of '{failed_step}' failed validation; regenerating its input \
                         at '{target}' is more likely to fix it than retrying in place"
                    ),
                },
                None => RetryRecommendation {
                    action: RecommendationAction::RetrySame,
                    target_step: failed_step,
                    reason: format!(
                        "Output of '{failed_step}' failed validation and no enabled upstream \
                         producer is available; retry the step itself"
                    ),
                },
            }
        }
        ErrorCode::Retryable => RetryRecommendation {
            action: RecommendationAction::RetrySame,
            target_step: failed_step,
            reason: format!(
                "'{failed_step}' hit a transient failure; retrying with unchanged \
                 parameters is expected to succeed"
            ),
        },
        ErrorCode::NonRetryable => RetryRecommendation {
            action: RecommendationAction::RetrySame,
            target_step: failed_step,
            reason: format!(
                "'{failed_step}' failed permanently; fix the configuration or credentials, \
                 then retry the step"
            ),
        },
        ErrorCode::Unknown => RetryRecommendation {
            action: RecommendationAction::RetrySame,
            target_step: failed_step,
            reason: format!("'{failed_step}' failed with an unclassified error; retry the step"),
        },
    };

    Some(recommendation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::errors::StepError;

    fn failed_run_at(step: StepId, code: ErrorCode, config: RunConfig) -> (Run, HashMap<StepId, StepRecord>) {
        let mut run = Run::new("tenant-a", config);
        run.transition(RunStatus::Running);
        run.current_step = Some(step);
        run.fail(code, "test failure");

        let mut record = StepRecord::new(step);
        record.begin_attempt();
        record.fail(StepError::new(step, code, "test failure"));

        let mut steps = HashMap::new();
        steps.insert(step, record);
        (run, steps)
    }

    #[test]
    fn test_validation_fail_with_upstream_enabled() {
        let (run, steps) = failed_run_at(
            StepId::SeoPass,
            ErrorCode::ValidationFail,
            RunConfig::default(),
        );
        let rec = recommend(&run, &steps).unwrap();
        assert_eq!(rec.action, RecommendationAction::RetryPrevious);
        assert_eq!(rec.target_step, StepId::KeywordAnalysis);
    }

    #[test]
    fn test_validation_fail_with_upstream_disabled() {
        let config = RunConfig::default().with_disabled(StepId::KeywordAnalysis);
        let (run, steps) = failed_run_at(StepId::SeoPass, ErrorCode::ValidationFail, config);
        let rec = recommend(&run, &steps).unwrap();
        assert_eq!(rec.action, RecommendationAction::RetrySame);
        assert_eq!(rec.target_step, StepId::SeoPass);
    }

    #[test]
    fn test_validation_fail_walks_candidates_in_order() {
        // final_validation's candidates are [style_pass, assemble]; disabling
        // style_pass falls through to assemble.
        let config = RunConfig::default().with_disabled(StepId::StylePass);
        let (run, steps) =
            failed_run_at(StepId::FinalValidation, ErrorCode::ValidationFail, config);
        let rec = recommend(&run, &steps).unwrap();
        assert_eq!(rec.action, RecommendationAction::RetryPrevious);
        assert_eq!(rec.target_step, StepId::Assemble);
    }

    #[test]
    fn test_retryable_recommends_same_step() {
        let (run, steps) =
            failed_run_at(StepId::Outline, ErrorCode::Retryable, RunConfig::default());
        let rec = recommend(&run, &steps).unwrap();
        assert_eq!(rec.action, RecommendationAction::RetrySame);
        assert_eq!(rec.target_step, StepId::Outline);
        assert!(rec.reason.contains("transient"));
    }

    #[test]
    fn test_non_retryable_reason_differs_from_retryable() {
        let (run_a, steps_a) =
            failed_run_at(StepId::Outline, ErrorCode::Retryable, RunConfig::default());
        let (run_b, steps_b) =
            failed_run_at(StepId::Outline, ErrorCode::NonRetryable, RunConfig::default());

        let transient = recommend(&run_a, &steps_a).unwrap();
        let permanent = recommend(&run_b, &steps_b).unwrap();
        assert_eq!(transient.action, permanent.action);
        assert_ne!(transient.reason, permanent.reason);
        assert!(permanent.reason.contains("fix the configuration"));
    }

    #[test]
    fn test_unknown_code_recommends_same_step() {
        let (run, steps) =
            failed_run_at(StepId::Outline, ErrorCode::Unknown, RunConfig::default());
        let rec = recommend(&run, &steps).unwrap();
        assert_eq!(rec.action, RecommendationAction::RetrySame);
    }

    #[test]
    fn test_no_recommendation_for_non_failed_run() {
        let run = Run::new("tenant-a", RunConfig::default());
        assert!(recommend(&run, &HashMap::new()).is_none());
    }

    #[test]
    fn test_external_fix_suppresses_recommendation() {
        let (mut run, steps) = failed_run_at(
            StepId::Outline,
            ErrorCode::ValidationFail,
            RunConfig::default(),
        );
        run.external_fix_pending = true;
        run.last_resumed_step = Some(StepId::Outline);
        assert!(recommend(&run, &steps).is_none());
    }

    #[test]
    fn test_external_fix_at_other_step_does_not_suppress() {
        let (mut run, steps) = failed_run_at(
            StepId::Outline,
            ErrorCode::ValidationFail,
            RunConfig::default(),
        );
        run.external_fix_pending = true;
        run.last_resumed_step = Some(StepId::SourceResearch);
        assert!(recommend(&run, &steps).is_some());
    }

    #[test]
    fn test_most_recent_failure_tie_broken_by_end_time() {
        let config = RunConfig::default();
        let mut run = Run::new("tenant-a", config);
        run.transition(RunStatus::Running);
        run.fail(ErrorCode::Retryable, "late failure");

        let mut early = StepRecord::new(StepId::Outline);
        early.begin_attempt();
        early.fail(StepError::retryable(StepId::Outline, "early"));

        std::thread::sleep(std::time::Duration::from_millis(5));

        let mut late = StepRecord::new(StepId::StylePass);
        late.begin_attempt();
        late.fail(StepError::retryable(StepId::StylePass, "late"));

        let mut steps = HashMap::new();
        steps.insert(StepId::Outline, early);
        steps.insert(StepId::StylePass, late);

        let rec = recommend(&run, &steps).unwrap();
        assert_eq!(rec.target_step, StepId::StylePass);
    }
}
