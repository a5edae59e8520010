//! Parallel step-group executor.
//!
//! Fans a named set of steps out concurrently and retries only the members
//! that failed: a failure in one member never forces re-execution of members
//! that already succeeded, and never cancels siblings mid-round. After the
//! round budget is exhausted the call fails with an aggregate error naming
//! every still-failing member.

use crate::errors::{GroupError, StepError};
use crate::state::StepId;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;

/// Executes one step of a parallel group. The executor owns scheduling and
/// retry; the runner owns the actual work.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Runs a single step, optionally with a retry hint.
    async fn run_step(
        &self,
        step: StepId,
        supplementary: Option<String>,
    ) -> Result<serde_json::Value, StepError>;
}

/// A request to execute a group, possibly scoped to a subset for targeted
/// re-runs of previously failed members.
#[derive(Debug, Clone, Default)]
pub struct GroupRequest {
    /// The steps to execute. Order carries no meaning within a round.
    pub steps: Vec<StepId>,
    /// Per-step free-text hints for retried invocations.
    pub supplementary: HashMap<StepId, String>,
    /// Marks a targeted re-run of previously failed members. Hints then
    /// apply from the very first round, since the whole call is the retry.
    pub is_retry: bool,
}

impl GroupRequest {
    /// Requests a fresh execution of the given steps.
    #[must_use]
    pub fn new(steps: Vec<StepId>) -> Self {
        Self {
            steps,
            supplementary: HashMap::new(),
            is_retry: false,
        }
    }

    /// Requests a targeted re-run of previously failed members.
    #[must_use]
    pub fn retry(steps: Vec<StepId>) -> Self {
        Self {
            is_retry: true,
            ..Self::new(steps)
        }
    }

    /// Adds a retry hint for one step.
    #[must_use]
    pub fn with_supplementary(mut self, step: StepId, hint: impl Into<String>) -> Self {
        self.supplementary.insert(step, hint.into());
        self
    }
}

/// Round-based fan-out/fan-in coordinator with subset-only retry.
#[derive(Debug, Clone)]
pub struct GroupExecutor {
    rounds: usize,
}

impl GroupExecutor {
    /// Creates an executor with the given round budget.
    #[must_use]
    pub fn new(rounds: usize) -> Self {
        Self {
            rounds: rounds.max(1),
        }
    }

    /// Executes the requested steps until all succeed or rounds run out.
    ///
    /// Each round launches every not-yet-succeeded member concurrently and
    /// captures all results; wall-clock cost is bounded by
    /// `rounds x per-step-timeout`, not `rounds x steps x per-step-timeout`.
    pub async fn execute(
        &self,
        group: StepId,
        request: GroupRequest,
        runner: &dyn StepRunner,
    ) -> Result<HashMap<StepId, serde_json::Value>, GroupError> {
        let mut pending: Vec<StepId> = request.steps.clone();
        let mut results: HashMap<StepId, serde_json::Value> = HashMap::new();
        let mut last_errors: HashMap<StepId, StepError> = HashMap::new();

        for round in 1..=self.rounds {
            if pending.is_empty() {
                break;
            }

            tracing::info!(
                group = %group,
                round,
                members = pending.len(),
                "Launching parallel group round"
            );

            let launches = pending.iter().map(|&step| {
                // Hints accompany retried invocations only. On a fresh run
                // that means rounds after the first; on a targeted re-run
                // every invocation is already a retry.
                let hint = if round > 1 || request.is_retry {
                    request.supplementary.get(&step).cloned()
                } else {
                    None
                };
                async move { (step, runner.run_step(step, hint).await) }
            });

            let outcomes = join_all(launches).await;

            let mut still_pending = Vec::new();
            for (step, outcome) in outcomes {
                match outcome {
                    Ok(value) => {
                        last_errors.remove(&step);
                        results.insert(step, value);
                    }
                    Err(error) => {
                        tracing::warn!(
                            group = %group,
                            step = %step,
                            round,
                            error = %error,
                            "Group member failed"
                        );
                        last_errors.insert(step, error);
                        still_pending.push(step);
                    }
                }
            }
            pending = still_pending;
        }

        if pending.is_empty() {
            Ok(results)
        } else {
            Err(GroupError::new(
                group,
                self.rounds,
                last_errors.into_values().collect(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use crate::state::DRAFT_GROUP;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Runner scripted with per-step failure counts before success.
    struct ScriptedRunner {
        failures_before_success: HashMap<StepId, usize>,
        invocations: Mutex<HashMap<StepId, usize>>,
        hints_seen: Mutex<Vec<(StepId, Option<String>)>>,
    }

    impl ScriptedRunner {
        fn new(failures: &[(StepId, usize)]) -> Self {
            Self {
                failures_before_success: failures.iter().copied().collect(),
                invocations: Mutex::new(HashMap::new()),
                hints_seen: Mutex::new(Vec::new()),
            }
        }

        fn invocations_of(&self, step: StepId) -> usize {
            self.invocations.lock().get(&step).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl StepRunner for ScriptedRunner {
        async fn run_step(
            &self,
            step: StepId,
            supplementary: Option<String>,
        ) -> Result<serde_json::Value, StepError> {
            let call = {
                let mut invocations = self.invocations.lock();
                let entry = invocations.entry(step).or_insert(0);
                *entry += 1;
                *entry
            };
            self.hints_seen.lock().push((step, supplementary));

            let budget = self.failures_before_success.get(&step).copied().unwrap_or(0);
            if call <= budget {
                Err(StepError::retryable(step, format!("scripted failure {call}")))
            } else {
                Ok(serde_json::json!({"step": step.as_str(), "call": call}))
            }
        }
    }

    fn intro_body_conclusion() -> Vec<StepId> {
        vec![StepId::DraftIntro, StepId::DraftBody, StepId::DraftConclusion]
    }

    #[tokio::test]
    async fn test_all_succeed_first_round() {
        let runner = ScriptedRunner::new(&[]);
        let executor = GroupExecutor::new(3);
        let results = executor
            .execute(
                StepId::SectionDrafts,
                GroupRequest::new(DRAFT_GROUP.to_vec()),
                &runner,
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        for member in DRAFT_GROUP {
            assert_eq!(runner.invocations_of(member), 1);
        }
    }

    #[tokio::test]
    async fn test_subset_only_retry() {
        // A succeeds immediately, B fails once then succeeds, C succeeds
        // immediately: total invocations A=1, B=2, C=1.
        let runner = ScriptedRunner::new(&[(StepId::DraftBody, 1)]);
        let executor = GroupExecutor::new(3);
        let results = executor
            .execute(
                StepId::SectionDrafts,
                GroupRequest::new(intro_body_conclusion()),
                &runner,
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(runner.invocations_of(StepId::DraftIntro), 1);
        assert_eq!(runner.invocations_of(StepId::DraftBody), 2);
        assert_eq!(runner.invocations_of(StepId::DraftConclusion), 1);
    }

    #[tokio::test]
    async fn test_aggregate_error_names_every_failure() {
        let runner = ScriptedRunner::new(&[
            (StepId::DraftIntro, 99),
            (StepId::DraftFaq, 99),
        ]);
        let executor = GroupExecutor::new(2);
        let err = executor
            .execute(
                StepId::SectionDrafts,
                GroupRequest::new(DRAFT_GROUP.to_vec()),
                &runner,
            )
            .await
            .unwrap_err();

        assert_eq!(err.rounds, 2);
        assert_eq!(
            err.failed_steps(),
            vec![StepId::DraftIntro, StepId::DraftFaq]
        );
        for failure in &err.failures {
            assert_eq!(failure.code, ErrorCode::Retryable);
            assert!(!failure.message.is_empty());
        }
        // Succeeded members are not re-invoked after their success.
        assert_eq!(runner.invocations_of(StepId::DraftBody), 1);
        assert_eq!(runner.invocations_of(StepId::DraftIntro), 2);
    }

    #[tokio::test]
    async fn test_caller_supplied_subset() {
        let runner = ScriptedRunner::new(&[]);
        let executor = GroupExecutor::new(3);
        let results = executor
            .execute(
                StepId::SectionDrafts,
                GroupRequest::new(vec![StepId::DraftFaq]),
                &runner,
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(runner.invocations_of(StepId::DraftFaq), 1);
        assert_eq!(runner.invocations_of(StepId::DraftIntro), 0);
    }

    #[tokio::test]
    async fn test_supplementary_applied_only_on_retry() {
        let runner = ScriptedRunner::new(&[(StepId::DraftBody, 1)]);
        let executor = GroupExecutor::new(3);
        let request = GroupRequest::new(intro_body_conclusion())
            .with_supplementary(StepId::DraftBody, "keep it under 300 words");

        executor
            .execute(StepId::SectionDrafts, request, &runner)
            .await
            .unwrap();

        let hints = runner.hints_seen.lock();
        let body_hints: Vec<&Option<String>> = hints
            .iter()
            .filter(|(s, _)| *s == StepId::DraftBody)
            .map(|(_, h)| h)
            .collect();
        assert_eq!(body_hints.len(), 2);
        assert_eq!(body_hints[0], &None);
        assert_eq!(
            body_hints[1].as_deref(),
            Some("keep it under 300 words")
        );
    }

    #[tokio::test]
    async fn test_retry_subset_gets_hint_from_first_round() {
        let runner = ScriptedRunner::new(&[]);
        let executor = GroupExecutor::new(3);
        let request = GroupRequest::retry(vec![StepId::DraftBody])
            .with_supplementary(StepId::DraftBody, "keep it under 300 words");

        executor
            .execute(StepId::SectionDrafts, request, &runner)
            .await
            .unwrap();

        let hints = runner.hints_seen.lock();
        assert_eq!(hints.len(), 1);
        assert_eq!(
            hints[0],
            (
                StepId::DraftBody,
                Some("keep it under 300 words".to_string())
            )
        );
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_siblings() {
        // All members run in the failing round; the failure is captured, not
        // propagated mid-round.
        let runner = ScriptedRunner::new(&[(StepId::DraftIntro, 99)]);
        let executor = GroupExecutor::new(1);
        let err = executor
            .execute(
                StepId::SectionDrafts,
                GroupRequest::new(intro_body_conclusion()),
                &runner,
            )
            .await
            .unwrap_err();

        assert_eq!(err.failed_steps(), vec![StepId::DraftIntro]);
        assert_eq!(runner.invocations_of(StepId::DraftBody), 1);
        assert_eq!(runner.invocations_of(StepId::DraftConclusion), 1);
    }

    #[tokio::test]
    async fn test_empty_request_succeeds_trivially() {
        let runner = ScriptedRunner::new(&[]);
        let executor = GroupExecutor::new(3);
        let results = executor
            .execute(StepId::SectionDrafts, GroupRequest::default(), &runner)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_members_run_concurrently() {
        use std::time::Duration;

        struct SlowRunner {
            concurrent: AtomicUsize,
            peak: AtomicUsize,
        }

        #[async_trait]
        impl StepRunner for SlowRunner {
            async fn run_step(
                &self,
                step: StepId,
                _supplementary: Option<String>,
            ) -> Result<serde_json::Value, StepError> {
                let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok(serde_json::json!(step.as_str()))
            }
        }

        let runner = SlowRunner {
            concurrent: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        };
        GroupExecutor::new(1)
            .execute(
                StepId::SectionDrafts,
                GroupRequest::new(DRAFT_GROUP.to_vec()),
                &runner,
            )
            .await
            .unwrap();

        assert!(runner.peak.load(Ordering::SeqCst) >= 2);
    }
}
