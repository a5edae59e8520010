//! Top-level run orchestrator.
//!
//! Drives the 18-step pipeline sequentially through the state machine, hands
//! the drafting group to the parallel executor, gates every step output
//! through the validation engine before completion, suspends on the approval
//! and image-input signals, and appends every status-affecting event to the
//! audit chain. On terminal failure it computes a retry recommendation so
//! operators never see a bare error as the only signal.

use crate::audit::AuditLogger;
use crate::config::{RunConfig, Thresholds};
use crate::errors::{ContentflowError, ErrorCode, StepError};
use crate::executor::{GroupExecutor, GroupRequest, StepRunner};
use crate::generator::{GenerateRequest, Generator};
use crate::recovery::{recommend, RetryRecommendation};
use crate::state::{
    validate_step_tables, Run, RunStatus, StepId, StepRecord, StepStatus, DRAFT_GROUP, STEP_ORDER,
};
use crate::storage::ArtifactStore;
use crate::substrate::{
    execute_unit, SharedSignals, UnitRetryPolicy, WorkflowLauncher, SIGNAL_APPROVAL, SIGNAL_CANCEL,
    SIGNAL_IMAGE_INPUT,
};
use crate::validation::{content_hash, validator_for, ContentFormat, ValidationEngine, ValidationReport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const ACTOR: &str = "orchestrator";

/// Final state of a run after the orchestrator returns.
#[derive(Debug)]
pub struct RunOutcome {
    /// The run in its terminal (or cancelled) state.
    pub run: Run,
    /// Per-step records.
    pub steps: HashMap<StepId, StepRecord>,
    /// Guidance for failed runs, when derivable.
    pub recommendation: Option<RetryRecommendation>,
}

impl RunOutcome {
    /// Returns true if the run completed successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.run.status == RunStatus::Completed
    }
}

/// Control-flow result of one driven step.
enum StepFlow {
    Continue,
    Cancelled,
}

/// Sequential pipeline driver for one run at a time.
///
/// Long-lived service object: construct once with its collaborators and pass
/// by reference, rather than reaching for hidden module-level state.
#[derive(Clone)]
pub struct Orchestrator {
    generator: Arc<dyn Generator>,
    store: Arc<dyn ArtifactStore>,
    launcher: Arc<dyn WorkflowLauncher>,
    audit: Arc<AuditLogger>,
    signals: SharedSignals,
    unit_timeout: Duration,
}

impl Orchestrator {
    /// Creates an orchestrator with its collaborators.
    #[must_use]
    pub fn new(
        generator: Arc<dyn Generator>,
        store: Arc<dyn ArtifactStore>,
        launcher: Arc<dyn WorkflowLauncher>,
        audit: Arc<AuditLogger>,
        signals: SharedSignals,
    ) -> Self {
        Self {
            generator,
            store,
            launcher,
            audit,
            signals,
            unit_timeout: Duration::from_secs(120),
        }
    }

    /// Overrides the per-unit timeout.
    #[must_use]
    pub fn with_unit_timeout(mut self, timeout: Duration) -> Self {
        self.unit_timeout = timeout;
        self
    }

    /// Executes a new run of the full pipeline for one brief.
    ///
    /// Always returns an outcome; failures are recorded on the run itself
    /// with the originating error code and, when derivable, a retry
    /// recommendation.
    pub async fn execute(
        &self,
        tenant: impl Into<String>,
        config: RunConfig,
        brief: &str,
    ) -> Result<RunOutcome, ContentflowError> {
        validate_step_tables().map_err(|e| ContentflowError::Internal(e.to_string()))?;

        let mut run = Run::new(tenant, config);
        let mut steps: HashMap<StepId, StepRecord> = STEP_ORDER
            .iter()
            .map(|&s| (s, StepRecord::new(s)))
            .collect();

        self.log(
            "run.created",
            run.id.to_string(),
            HashMap::from([("tenant".to_string(), serde_json::json!(run.tenant))]),
        );

        run.begin_launch();
        self.log_transition(&run);
        if !self.hand_off(&mut run).await {
            return Ok(self.outcome(run, steps));
        }

        self.drive(&mut run, &mut steps, 0, brief).await;
        Ok(self.outcome(run, steps))
    }

    /// Resumes a failed run at `target`, keeping completed work before it.
    ///
    /// The target and every later step are reset to pending and re-driven;
    /// records of earlier steps stand. A rejected resume request (wrong run
    /// state or invalid resume point) returns the outcome unchanged.
    pub async fn resume(
        &self,
        mut run: Run,
        mut steps: HashMap<StepId, StepRecord>,
        target: StepId,
        brief: &str,
    ) -> Result<RunOutcome, ContentflowError> {
        if !run.begin_resume(target).is_applied() {
            return Ok(self.outcome(run, steps));
        }
        run.external_fix_pending = false;

        self.log(
            "run.resumed",
            run.id.to_string(),
            HashMap::from([("step".to_string(), serde_json::json!(target.as_str()))]),
        );

        for step in STEP_ORDER.iter().copied() {
            if step.ordinal() >= target.ordinal() {
                steps.insert(step, StepRecord::new(step));
            }
        }

        self.log_transition(&run);
        if !self.hand_off(&mut run).await {
            return Ok(self.outcome(run, steps));
        }

        self.drive(&mut run, &mut steps, target.ordinal(), brief).await;
        Ok(self.outcome(run, steps))
    }

    /// Hands a run already in `workflow_starting` to the execution substrate.
    /// Acceptance failure is fatal: the run goes straight to `failed` without
    /// ever claiming `running`.
    async fn hand_off(&self, run: &mut Run) -> bool {
        match self.launcher.launch(run.id).await {
            Ok(()) => {
                run.transition(RunStatus::Running);
                self.log_transition(run);
                true
            }
            Err(error) => {
                tracing::error!(run_id = %run.id, error = %error, "Substrate refused run");
                run.fail(ErrorCode::NonRetryable, error.to_string());
                self.log_transition(run);
                false
            }
        }
    }

    /// Drives steps in vocabulary order starting at `start`, leaving the run
    /// in a terminal state.
    async fn drive(
        &self,
        run: &mut Run,
        steps: &mut HashMap<StepId, StepRecord>,
        start: usize,
        brief: &str,
    ) {
        for step in STEP_ORDER.iter().copied().skip(start) {
            // Group members are driven by their parent.
            if step.is_group_member() {
                continue;
            }
            // Consumed on acceptance so a hub shared across successive runs
            // does not cancel every later run too.
            if self.signals.take(SIGNAL_CANCEL).is_some() {
                self.cancel_run(run);
                return;
            }
            if record_mut(steps, step).status == StepStatus::Completed {
                continue;
            }
            if !run.config.is_enabled(step) {
                record_mut(steps, step).skip();
                self.log_step(run, step, "step.skipped", HashMap::new());
                continue;
            }

            run.current_step = Some(step);
            let flow = match step {
                StepId::BriefIntake => self.run_brief_intake(run, steps, brief).await,
                StepId::OutlineApproval => self.run_approval(run, steps).await,
                StepId::ImageInput => self.run_image_input(run, steps).await,
                StepId::SectionDrafts => self.run_draft_group(run, steps, brief).await,
                other => self.run_generative(run, steps, other, brief).await,
            };

            match flow {
                Ok(StepFlow::Continue) => {}
                Ok(StepFlow::Cancelled) => {
                    self.cancel_run(run);
                    return;
                }
                Err(error) => {
                    self.fail_run(run, &error);
                    return;
                }
            }
        }

        run.transition(RunStatus::Completed);
        self.log_transition(run);
    }

    /// The input step: persists the brief and is always considered done.
    async fn run_brief_intake(
        &self,
        run: &mut Run,
        steps: &mut HashMap<StepId, StepRecord>,
        brief: &str,
    ) -> Result<StepFlow, StepError> {
        let step = StepId::BriefIntake;
        record_mut(steps, step).begin_attempt();
        self.log_step(run, step, "step.started", HashMap::new());

        self.store
            .put(&run.tenant, run.id, step, "output.md", brief.as_bytes())
            .await
            .map_err(|e| StepError::retryable(step, format!("artifact write failed: {e}")))?;

        record_mut(steps, step).complete();
        self.log_step(run, step, "step.completed", HashMap::new());
        Ok(StepFlow::Continue)
    }

    /// Suspends on the approval signal. A rejection fails the run; a cancel
    /// signal received while suspended cancels it cleanly.
    async fn run_approval(
        &self,
        run: &mut Run,
        steps: &mut HashMap<StepId, StepRecord>,
    ) -> Result<StepFlow, StepError> {
        let step = StepId::OutlineApproval;
        record_mut(steps, step).begin_attempt();
        self.log_step(run, step, "step.started", HashMap::new());

        run.transition(RunStatus::WaitingApproval);
        self.log_transition(run);

        let payload = tokio::select! {
            payload = self.signals.wait_until(SIGNAL_APPROVAL) => Some(payload),
            _ = self.signals.wait_until(SIGNAL_CANCEL) => None,
        };

        let Some(payload) = payload else {
            record_mut(steps, step).fail(StepError::non_retryable(
                step,
                "run cancelled while suspended",
            ));
            return Ok(StepFlow::Cancelled);
        };

        let approved = payload
            .get("approved")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        if !approved {
            let error = StepError::non_retryable(step, "outline rejected by reviewer");
            record_mut(steps, step).fail(error.clone());
            self.log_step(run, step, "step.failed", error.to_dict());
            return Err(error);
        }

        run.transition(RunStatus::Running);
        self.log_transition(run);
        record_mut(steps, step).complete();
        self.log_step(run, step, "step.completed", HashMap::new());
        Ok(StepFlow::Continue)
    }

    /// Suspends on the external image-input signal and persists its payload.
    async fn run_image_input(
        &self,
        run: &mut Run,
        steps: &mut HashMap<StepId, StepRecord>,
    ) -> Result<StepFlow, StepError> {
        let step = StepId::ImageInput;
        record_mut(steps, step).begin_attempt();
        self.log_step(run, step, "step.started", HashMap::new());

        run.transition(RunStatus::WaitingImageInput);
        self.log_transition(run);

        let payload = tokio::select! {
            payload = self.signals.wait_until(SIGNAL_IMAGE_INPUT) => Some(payload),
            _ = self.signals.wait_until(SIGNAL_CANCEL) => None,
        };

        let Some(payload) = payload else {
            record_mut(steps, step).fail(StepError::non_retryable(
                step,
                "run cancelled while suspended",
            ));
            return Ok(StepFlow::Cancelled);
        };

        let bytes = serde_json::to_vec(&payload)
            .map_err(|e| StepError::non_retryable(step, format!("bad image payload: {e}")))?;
        self.store
            .put(&run.tenant, run.id, step, "output.json", &bytes)
            .await
            .map_err(|e| StepError::retryable(step, format!("artifact write failed: {e}")))?;

        run.transition(RunStatus::Running);
        self.log_transition(run);
        record_mut(steps, step).complete();
        self.log_step(run, step, "step.completed", HashMap::new());
        Ok(StepFlow::Continue)
    }

    /// Hands the drafting group to the parallel executor. The group is a
    /// barrier: no later step starts until every member succeeded or the
    /// round budget is exhausted.
    async fn run_draft_group(
        &self,
        run: &mut Run,
        steps: &mut HashMap<StepId, StepRecord>,
        brief: &str,
    ) -> Result<StepFlow, StepError> {
        let parent = StepId::SectionDrafts;
        record_mut(steps, parent).begin_attempt();
        self.log_step(run, parent, "step.started", HashMap::new());

        let mut members = Vec::new();
        for member in DRAFT_GROUP {
            if run.config.is_enabled(member) {
                members.push(member);
            } else {
                record_mut(steps, member).skip();
                self.log_step(run, member, "step.skipped", HashMap::new());
            }
        }

        let runner = DraftRunner {
            generator: Arc::clone(&self.generator),
            store: Arc::clone(&self.store),
            audit: Arc::clone(&self.audit),
            tenant: run.tenant.clone(),
            run_id: run.id,
            model: run.config.model.clone(),
            thresholds: run.config.thresholds.clone(),
            brief: brief.to_string(),
            timeout: self.unit_timeout,
        };
        let executor = GroupExecutor::new(run.config.thresholds.group_rounds);

        match executor
            .execute(parent, GroupRequest::new(members.clone()), &runner)
            .await
        {
            Ok(results) => {
                for member in members {
                    // Member records carry one logical attempt; round-level
                    // retry detail lives with the executor.
                    let record = record_mut(steps, member);
                    record.begin_attempt();
                    record.complete();
                    let details = results
                        .get(&member)
                        .map(|v| HashMap::from([("result".to_string(), v.clone())]))
                        .unwrap_or_default();
                    self.log_step(run, member, "step.completed", details);
                }
                record_mut(steps, parent).complete();
                self.log_step(run, parent, "step.completed", HashMap::new());
                Ok(StepFlow::Continue)
            }
            Err(group_error) => {
                let failed = group_error.failed_steps();
                for failure in &group_error.failures {
                    let record = record_mut(steps, failure.step);
                    record.begin_attempt();
                    record.fail(failure.clone());
                    self.log_step(run, failure.step, "step.failed", failure.to_dict());
                }
                for member in members {
                    if !failed.contains(&member) {
                        let record = record_mut(steps, member);
                        record.begin_attempt();
                        record.complete();
                    }
                }
                let error = StepError::new(
                    parent,
                    group_error.dominant_code(),
                    group_error.to_string(),
                );
                record_mut(steps, parent).fail(error.clone());
                self.log_step(run, parent, "step.failed", error.to_dict());
                Err(error)
            }
        }
    }

    /// One sequential generative step: generate, gate through validation and
    /// repair, persist the artifact. Retryable failures are re-attempted with
    /// unchanged parameters up to the configured limit, with capped
    /// exponential backoff between attempts.
    async fn run_generative(
        &self,
        run: &mut Run,
        steps: &mut HashMap<StepId, StepRecord>,
        step: StepId,
        brief: &str,
    ) -> Result<StepFlow, StepError> {
        let limit = run.config.thresholds.step_retry_limit;
        let backoff = UnitRetryPolicy {
            max_attempts: limit,
            base_delay_ms: run.config.thresholds.backoff_base_ms,
            max_delay_ms: run.config.thresholds.backoff_max_ms,
        };
        let model = run.config.model.clone();
        let thresholds = run.config.thresholds.clone();

        loop {
            let attempt = record_mut(steps, step).begin_attempt();
            self.log_step(
                run,
                step,
                "step.started",
                HashMap::from([("attempt".to_string(), serde_json::json!(attempt))]),
            );

            let request = GenerateRequest::text(step, &model, prompt_for(step, brief));
            let step_result = match generate_and_gate(
                self.generator.as_ref(),
                request,
                &thresholds,
                self.unit_timeout,
            )
            .await
            {
                Ok((content, report)) => {
                    self.log_repairs(run, step, &report);
                    self.store
                        .put(
                            &run.tenant,
                            run.id,
                            step,
                            artifact_filename(step),
                            content.as_bytes(),
                        )
                        .await
                        .map_err(|e| {
                            StepError::retryable(step, format!("artifact write failed: {e}"))
                        })
                }
                Err(error) => Err(error),
            };

            match step_result {
                Ok(path) => {
                    record_mut(steps, step).complete();
                    self.log_step(
                        run,
                        step,
                        "step.completed",
                        HashMap::from([("path".to_string(), serde_json::json!(path))]),
                    );
                    return Ok(StepFlow::Continue);
                }
                Err(error) => {
                    record_mut(steps, step).fail(error.clone());
                    self.log_step(run, step, "step.failed", error.to_dict());

                    if error.code.is_retryable() && record_mut(steps, step).can_retry(limit) {
                        let delay = backoff.backoff_delay(attempt.saturating_sub(1));
                        tracing::info!(
                            run_id = %run.id,
                            step = %step,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "Retrying step after transient failure"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(error);
                }
            }
        }
    }

    fn fail_run(&self, run: &mut Run, error: &StepError) {
        run.fail(error.code, error.message.clone());
        self.log(
            "run.failed",
            run.id.to_string(),
            error.to_dict(),
        );
    }

    fn cancel_run(&self, run: &mut Run) {
        run.cancel();
        self.log("run.cancelled", run.id.to_string(), HashMap::new());
    }

    fn outcome(&self, run: Run, steps: HashMap<StepId, StepRecord>) -> RunOutcome {
        let recommendation = recommend(&run, &steps);
        RunOutcome {
            run,
            steps,
            recommendation,
        }
    }

    fn log(
        &self,
        event_type: &str,
        resource: String,
        details: HashMap<String, serde_json::Value>,
    ) {
        self.audit.log(event_type, ACTOR, resource, details);
    }

    fn log_transition(&self, run: &Run) {
        self.log(
            "run.transition",
            run.id.to_string(),
            HashMap::from([("status".to_string(), serde_json::json!(run.status))]),
        );
    }

    fn log_step(
        &self,
        run: &Run,
        step: StepId,
        event_type: &str,
        details: HashMap<String, serde_json::Value>,
    ) {
        self.log(event_type, format!("{}/{step}", run.id), details);
    }

    fn log_repairs(&self, run: &Run, step: StepId, report: &ValidationReport) {
        for action in &report.repairs_applied {
            self.log_step(
                run,
                step,
                "repair.applied",
                HashMap::from([
                    ("code".to_string(), serde_json::json!(action.code)),
                    ("description".to_string(), serde_json::json!(action.description)),
                    ("before".to_string(), serde_json::json!(action.before)),
                    ("after".to_string(), serde_json::json!(action.after)),
                ]),
            );
        }
    }
}

fn record_mut(steps: &mut HashMap<StepId, StepRecord>, step: StepId) -> &mut StepRecord {
    steps.entry(step).or_insert_with(|| StepRecord::new(step))
}

/// Executes one generation unit and gates its output through validation and
/// deterministic repair. Invalid output after repair is a `validation_fail`.
async fn generate_and_gate(
    generator: &dyn Generator,
    request: GenerateRequest,
    thresholds: &Thresholds,
    timeout: Duration,
) -> Result<(String, ValidationReport), StepError> {
    let step = request.step;
    // Attempt budget is owned by the caller; the unit wrapper contributes
    // timeout bounding and its retryable classification.
    let policy = UnitRetryPolicy {
        max_attempts: 1,
        base_delay_ms: thresholds.backoff_base_ms,
        max_delay_ms: thresholds.backoff_max_ms,
    };

    let generated = execute_unit("generate", step, timeout, &policy, || {
        let request = request.clone();
        async move { generator.generate(request).await }
    })
    .await?;

    let content = generated.as_text();
    let engine = ValidationEngine::new(thresholds);
    let validator = validator_for(step_format(step), thresholds);
    let (gated, report) =
        engine.validate_and_repair(validator.as_ref(), &content, request.schema.as_ref());

    if report.valid {
        Ok((gated, report))
    } else {
        let findings: Vec<String> = report
            .errors()
            .iter()
            .map(|i| format!("{} at {}", i.code, i.location))
            .collect();
        Err(StepError::validation_fail(
            step,
            format!("output failed validation: {}", findings.join("; ")),
        ))
    }
}

/// The content format each generative step's output is validated as.
fn step_format(step: StepId) -> ContentFormat {
    match step {
        StepId::SourceResearch
        | StepId::AudienceProfile
        | StepId::KeywordAnalysis
        | StepId::ImageBrief
        | StepId::FinalValidation
        | StepId::Packaging => ContentFormat::Json,
        _ => ContentFormat::Article,
    }
}

fn artifact_filename(step: StepId) -> &'static str {
    match step_format(step) {
        ContentFormat::Json => "output.json",
        ContentFormat::Csv => "output.csv",
        ContentFormat::Article => "output.md",
    }
}

fn prompt_for(step: StepId, brief: &str) -> String {
    match step {
        StepId::SourceResearch => format!("Research sources for: {brief}"),
        StepId::AudienceProfile => format!("Profile the target audience for: {brief}"),
        StepId::KeywordAnalysis => format!("Extract and analyze keywords for: {brief}"),
        StepId::Outline => format!("Produce an article outline for: {brief}"),
        StepId::DraftIntro => format!("Draft the introduction section for: {brief}"),
        StepId::DraftBody => format!("Draft the body sections for: {brief}"),
        StepId::DraftConclusion => format!("Draft the conclusion section for: {brief}"),
        StepId::DraftFaq => format!("Draft the FAQ section for: {brief}"),
        StepId::Assemble => format!("Assemble the drafted sections into one article for: {brief}"),
        StepId::StylePass => format!("Apply the house style to the article for: {brief}"),
        StepId::SeoPass => format!("Apply SEO adjustments to the article for: {brief}"),
        StepId::ImageBrief => format!("Write an image brief for: {brief}"),
        StepId::FinalValidation => format!("Run the final review checklist for: {brief}"),
        StepId::Packaging => format!("Package the final deliverable for: {brief}"),
        _ => brief.to_string(),
    }
}

/// Runs one drafting-group member: generate, gate, persist.
struct DraftRunner {
    generator: Arc<dyn Generator>,
    store: Arc<dyn ArtifactStore>,
    audit: Arc<AuditLogger>,
    tenant: String,
    run_id: Uuid,
    model: String,
    thresholds: Thresholds,
    brief: String,
    timeout: Duration,
}

#[async_trait]
impl StepRunner for DraftRunner {
    async fn run_step(
        &self,
        step: StepId,
        supplementary: Option<String>,
    ) -> Result<serde_json::Value, StepError> {
        let mut request = GenerateRequest::text(step, &self.model, prompt_for(step, &self.brief));
        if let Some(hint) = supplementary {
            request = request.with_supplementary(hint);
        }

        let (content, report) =
            generate_and_gate(self.generator.as_ref(), request, &self.thresholds, self.timeout)
                .await?;

        for action in &report.repairs_applied {
            self.audit.log(
                "repair.applied",
                ACTOR,
                format!("{}/{step}", self.run_id),
                HashMap::from([
                    ("code".to_string(), serde_json::json!(action.code)),
                    ("description".to_string(), serde_json::json!(action.description)),
                ]),
            );
        }

        let path = self
            .store
            .put(
                &self.tenant,
                self.run_id,
                step,
                artifact_filename(step),
                content.as_bytes(),
            )
            .await
            .map_err(|e| StepError::retryable(step, format!("artifact write failed: {e}")))?;

        Ok(serde_json::json!({
            "path": path,
            "hash": content_hash(&content),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use crate::generator::{GeneratedContent, MockGenerator};
    use crate::recovery::RecommendationAction;
    use crate::storage::MemoryArtifactStore;
    use crate::substrate::{AlwaysAcceptLauncher, RejectingLauncher, SignalHub};
    use pretty_assertions::{assert_eq, assert_ne};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn clean_output(step: StepId) -> GeneratedContent {
        match step_format(step) {
            ContentFormat::Json => GeneratedContent::Text(format!(
                "{{\"step\": \"{}\", \"ok\": true}}",
                step.as_str()
            )),
            _ => GeneratedContent::Text(format!(
                "# Section for {}\n\nGenerated body text.\n",
                step.as_str()
            )),
        }
    }

    fn well_behaved_generator() -> MockGenerator {
        let mut mock = MockGenerator::new();
        mock.expect_generate()
            .returning(|req| Ok(clean_output(req.step)));
        mock
    }

    struct Fixture {
        orchestrator: Orchestrator,
        store: Arc<MemoryArtifactStore>,
        audit: Arc<AuditLogger>,
        signals: SharedSignals,
    }

    fn fixture(generator: MockGenerator, launcher: Arc<dyn WorkflowLauncher>) -> Fixture {
        init_tracing();
        let store = Arc::new(MemoryArtifactStore::new());
        let audit = Arc::new(AuditLogger::new());
        let signals: SharedSignals = Arc::new(SignalHub::new());
        let orchestrator = Orchestrator::new(
            Arc::new(generator),
            Arc::clone(&store) as Arc<dyn ArtifactStore>,
            launcher,
            Arc::clone(&audit),
            Arc::clone(&signals),
        )
        .with_unit_timeout(Duration::from_secs(2));
        Fixture {
            orchestrator,
            store,
            audit,
            signals,
        }
    }

    fn pre_approve(signals: &SignalHub) {
        signals.signal(SIGNAL_APPROVAL, serde_json::json!({"approved": true}));
        signals.signal(SIGNAL_IMAGE_INPUT, serde_json::json!({"images": ["hero.png"]}));
    }

    #[tokio::test]
    async fn test_happy_path_completes_every_step() {
        let f = fixture(well_behaved_generator(), Arc::new(AlwaysAcceptLauncher));
        pre_approve(&f.signals);

        let outcome = f
            .orchestrator
            .execute("tenant-a", RunConfig::new("model-a"), "Rust memory model")
            .await
            .unwrap();

        assert!(outcome.is_success(), "{:?}", outcome.run.error_message);
        assert!(outcome.recommendation.is_none());
        for step in STEP_ORDER {
            assert_eq!(
                outcome.steps[&step].status,
                StepStatus::Completed,
                "step {step} not completed"
            );
        }
        assert!(f.store.len() >= 15);
        f.audit.verify().unwrap();
    }

    #[tokio::test]
    async fn test_launcher_rejection_is_fatal_without_running() {
        let launcher = RejectingLauncher {
            reason: "quota exhausted".to_string(),
        };
        let f = fixture(well_behaved_generator(), Arc::new(launcher));

        let outcome = f
            .orchestrator
            .execute("tenant-a", RunConfig::new("model-a"), "brief")
            .await
            .unwrap();

        assert_eq!(outcome.run.status, RunStatus::Failed);
        assert_eq!(outcome.run.error_code, Some(ErrorCode::NonRetryable));
        // The run never claimed to be running.
        for event in f.audit.events() {
            if event.event_type == "run.transition" {
                assert_ne!(event.details["status"], serde_json::json!("running"));
            }
        }
        assert_eq!(outcome.steps[&StepId::BriefIntake].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_validation_gate_failure_yields_recommendation() {
        let mut mock = MockGenerator::new();
        mock.expect_generate().returning(|req| {
            if req.step == StepId::Outline {
                // No title, unrepairable for the article validator.
                Ok(GeneratedContent::Text("just some text without heading\n".to_string()))
            } else {
                Ok(clean_output(req.step))
            }
        });
        let f = fixture(mock, Arc::new(AlwaysAcceptLauncher));

        let outcome = f
            .orchestrator
            .execute("tenant-a", RunConfig::new("model-a"), "brief")
            .await
            .unwrap();

        assert_eq!(outcome.run.status, RunStatus::Failed);
        assert_eq!(outcome.run.error_code, Some(ErrorCode::ValidationFail));
        assert_eq!(outcome.steps[&StepId::Outline].status, StepStatus::Failed);

        let rec = outcome.recommendation.unwrap();
        assert_eq!(rec.action, RecommendationAction::RetryPrevious);
        assert_eq!(rec.target_step, StepId::SourceResearch);
    }

    #[tokio::test]
    async fn test_disabled_steps_are_skipped() {
        let f = fixture(well_behaved_generator(), Arc::new(AlwaysAcceptLauncher));
        f.signals
            .signal(SIGNAL_APPROVAL, serde_json::json!({"approved": true}));

        let config = RunConfig::new("model-a")
            .with_disabled(StepId::SeoPass)
            .with_disabled(StepId::ImageBrief)
            .with_disabled(StepId::ImageInput);
        let outcome = f
            .orchestrator
            .execute("tenant-a", config, "brief")
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.steps[&StepId::SeoPass].status, StepStatus::Skipped);
        assert_eq!(outcome.steps[&StepId::ImageBrief].status, StepStatus::Skipped);
        assert_eq!(outcome.steps[&StepId::ImageInput].status, StepStatus::Skipped);
        assert_eq!(outcome.steps[&StepId::Outline].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_approval() {
        let f = fixture(well_behaved_generator(), Arc::new(AlwaysAcceptLauncher));
        let orchestrator = f.orchestrator.clone();

        let handle = tokio::spawn(async move {
            orchestrator
                .execute("tenant-a", RunConfig::new("model-a"), "brief")
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        f.signals.signal(SIGNAL_CANCEL, serde_json::json!("operator"));

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.run.status, RunStatus::Cancelled);
        // No torn step: the suspended attempt reached a terminal status.
        assert!(outcome.steps[&StepId::OutlineApproval].status.is_terminal());
        f.audit.verify().unwrap();
    }

    #[tokio::test]
    async fn test_cancel_is_consumed_not_sticky() {
        let f = fixture(well_behaved_generator(), Arc::new(AlwaysAcceptLauncher));
        f.signals.signal(SIGNAL_CANCEL, serde_json::json!("operator"));

        let cancelled = f
            .orchestrator
            .execute("tenant-a", RunConfig::new("model-a"), "brief")
            .await
            .unwrap();
        assert_eq!(cancelled.run.status, RunStatus::Cancelled);

        // The consumed cancel must not bleed into the next run on the hub.
        pre_approve(&f.signals);
        let next = f
            .orchestrator
            .execute("tenant-a", RunConfig::new("model-a"), "brief")
            .await
            .unwrap();
        assert!(next.is_success(), "{:?}", next.run.error_message);
    }

    #[tokio::test]
    async fn test_outline_rejection_fails_run() {
        let f = fixture(well_behaved_generator(), Arc::new(AlwaysAcceptLauncher));
        f.signals
            .signal(SIGNAL_APPROVAL, serde_json::json!({"approved": false}));

        let outcome = f
            .orchestrator
            .execute("tenant-a", RunConfig::new("model-a"), "brief")
            .await
            .unwrap();

        assert_eq!(outcome.run.status, RunStatus::Failed);
        assert_eq!(outcome.run.error_code, Some(ErrorCode::NonRetryable));
        assert_eq!(
            outcome.steps[&StepId::OutlineApproval].status,
            StepStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_repairs_are_chain_logged() {
        let mut mock = MockGenerator::new();
        mock.expect_generate().returning(|req| {
            if req.step == StepId::Outline {
                // Trailing whitespace is a repairable finding.
                Ok(GeneratedContent::Text("# Outline \n\nSections here.\n".to_string()))
            } else {
                Ok(clean_output(req.step))
            }
        });
        let f = fixture(mock, Arc::new(AlwaysAcceptLauncher));
        pre_approve(&f.signals);

        let outcome = f
            .orchestrator
            .execute("tenant-a", RunConfig::new("model-a"), "brief")
            .await
            .unwrap();

        assert!(outcome.is_success());
        let repairs: Vec<_> = f
            .audit
            .events()
            .into_iter()
            .filter(|e| e.event_type == "repair.applied")
            .collect();
        assert!(!repairs.is_empty());
        assert_eq!(
            repairs[0].details["code"],
            serde_json::json!("trim_trailing_whitespace")
        );
        f.audit.verify().unwrap();
    }

    #[tokio::test]
    async fn test_group_failure_aggregates_and_fails_run() {
        let body_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&body_calls);
        let mut mock = MockGenerator::new();
        mock.expect_generate().returning(move |req| {
            if req.step == StepId::DraftBody {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StepError::retryable(req.step, "provider overloaded"))
            } else {
                Ok(clean_output(req.step))
            }
        });
        let f = fixture(mock, Arc::new(AlwaysAcceptLauncher));
        pre_approve(&f.signals);

        let outcome = f
            .orchestrator
            .execute("tenant-a", RunConfig::new("model-a"), "brief")
            .await
            .unwrap();

        assert_eq!(outcome.run.status, RunStatus::Failed);
        assert!(outcome
            .run
            .error_message
            .as_deref()
            .unwrap()
            .contains("draft_body"));
        assert_eq!(outcome.steps[&StepId::DraftBody].status, StepStatus::Failed);
        assert_eq!(outcome.steps[&StepId::DraftIntro].status, StepStatus::Completed);
        assert_eq!(
            outcome.steps[&StepId::SectionDrafts].status,
            StepStatus::Failed
        );
        // One invocation per round for the failing member only.
        assert_eq!(body_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retryable_step_failure_retried_then_succeeds() {
        let failed_once = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&failed_once);
        let mut mock = MockGenerator::new();
        mock.expect_generate().returning(move |req| {
            if req.step == StepId::SourceResearch && !flag.swap(true, Ordering::SeqCst) {
                Err(StepError::retryable(req.step, "rate limited"))
            } else {
                Ok(clean_output(req.step))
            }
        });
        let f = fixture(mock, Arc::new(AlwaysAcceptLauncher));
        pre_approve(&f.signals);

        let thresholds = Thresholds {
            backoff_base_ms: 1,
            backoff_max_ms: 2,
            ..Thresholds::default()
        };
        let config = RunConfig::new("model-a").with_thresholds(thresholds);
        let outcome = f
            .orchestrator
            .execute("tenant-a", config, "brief")
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.steps[&StepId::SourceResearch].attempts.len(), 2);
    }

    #[tokio::test]
    async fn test_resume_keeps_earlier_work() {
        let research_calls = Arc::new(AtomicUsize::new(0));
        let outline_fixed = Arc::new(AtomicBool::new(false));
        let calls = Arc::clone(&research_calls);
        let fixed = Arc::clone(&outline_fixed);

        let mut mock = MockGenerator::new();
        mock.expect_generate().returning(move |req| {
            if req.step == StepId::SourceResearch {
                calls.fetch_add(1, Ordering::SeqCst);
            }
            if req.step == StepId::Outline && !fixed.load(Ordering::SeqCst) {
                return Ok(GeneratedContent::Text("no heading\n".to_string()));
            }
            Ok(clean_output(req.step))
        });
        let f = fixture(mock, Arc::new(AlwaysAcceptLauncher));
        pre_approve(&f.signals);

        let outcome = f
            .orchestrator
            .execute("tenant-a", RunConfig::new("model-a"), "brief")
            .await
            .unwrap();
        assert_eq!(outcome.run.status, RunStatus::Failed);

        outline_fixed.store(true, Ordering::SeqCst);
        pre_approve(&f.signals);
        let resumed = f
            .orchestrator
            .resume(outcome.run, outcome.steps, StepId::Outline, "brief")
            .await
            .unwrap();

        assert!(resumed.is_success(), "{:?}", resumed.run.error_message);
        assert_eq!(resumed.run.last_resumed_step, Some(StepId::Outline));
        // Completed upstream work is not re-executed.
        assert_eq!(research_calls.load(Ordering::SeqCst), 1);
        f.audit.verify().unwrap();
    }

    #[tokio::test]
    async fn test_resume_rejected_for_group_member_target() {
        let f = fixture(well_behaved_generator(), Arc::new(AlwaysAcceptLauncher));
        let mut mock_run = Run::new("tenant-a", RunConfig::new("model-a"));
        mock_run.transition(RunStatus::Running);
        mock_run.fail(ErrorCode::Retryable, "boom");

        let resumed = f
            .orchestrator
            .resume(mock_run, HashMap::new(), StepId::DraftBody, "brief")
            .await
            .unwrap();
        assert_eq!(resumed.run.status, RunStatus::Failed);
    }
}
