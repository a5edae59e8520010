//! Run entity, run status, and the transition-legality table.
//!
//! Illegal transitions are rejected and logged, never raised: the caller's
//! view of state stays authoritative, which makes external-system
//! resynchronization safe to call redundantly.

use crate::config::RunConfig;
use crate::errors::ErrorCode;
use crate::state::step::StepId;
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, not yet handed to the execution substrate.
    #[default]
    Pending,
    /// Handed to the substrate but not yet accepted. Prevents a window where
    /// persisted state claims `running` before the substrate has accepted
    /// the work.
    WorkflowStarting,
    /// Pipeline is executing.
    Running,
    /// Suspended on the human-approval signal.
    WaitingApproval,
    /// Suspended on the external image-input signal.
    WaitingImageInput,
    /// Paused by an operator.
    Paused,
    /// Terminal: finished successfully.
    Completed,
    /// Terminal: failed.
    Failed,
    /// Terminal: cancelled.
    Cancelled,
}

impl RunStatus {
    /// Returns true for terminal states (no outgoing transitions).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Legal transition targets from this status.
    #[must_use]
    pub fn legal_targets(&self) -> &'static [RunStatus] {
        match self {
            Self::Pending => &[Self::Running, Self::Cancelled, Self::Failed],
            Self::WorkflowStarting => &[Self::Running, Self::Failed, Self::Cancelled],
            Self::Running => &[
                Self::WaitingApproval,
                Self::WaitingImageInput,
                Self::Paused,
                Self::Completed,
                Self::Failed,
                Self::Cancelled,
            ],
            Self::Paused => &[Self::Running, Self::Completed, Self::Failed, Self::Cancelled],
            Self::WaitingApproval | Self::WaitingImageInput => &[
                Self::Running,
                Self::Paused,
                Self::Completed,
                Self::Failed,
                Self::Cancelled,
            ],
            Self::Completed | Self::Failed | Self::Cancelled => &[],
        }
    }

    /// Returns true if the transition `self -> to` is in the legality table.
    #[must_use]
    pub fn can_transition_to(&self, to: RunStatus) -> bool {
        self.legal_targets().contains(&to)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::WorkflowStarting => write!(f, "workflow_starting"),
            Self::Running => write!(f, "running"),
            Self::WaitingApproval => write!(f, "waiting_approval"),
            Self::WaitingImageInput => write!(f, "waiting_image_input"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of an attempted run-status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition was applied.
    Applied,
    /// The transition is not in the legality table; state is unchanged.
    Rejected,
}

impl TransitionOutcome {
    /// Returns true if the transition was applied.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// One execution of the full pipeline for one input.
///
/// Owned exclusively by the orchestrator; mutated only through defined
/// transitions; never destroyed (terminal states are soft-terminal).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Run identity.
    pub id: Uuid,
    /// Tenant scope.
    pub tenant: String,
    /// Current lifecycle status.
    pub status: RunStatus,
    /// The step the pipeline is currently at, if started.
    pub current_step: Option<StepId>,
    /// Feature toggles, model selection, and thresholds.
    pub config: RunConfig,
    /// Classified code of the terminal failure, if failed.
    pub error_code: Option<ErrorCode>,
    /// Human-readable failure message, if failed.
    pub error_message: Option<String>,
    /// The step this run was most recently resumed at, if any.
    pub last_resumed_step: Option<StepId>,
    /// True when an external remediation is already pending for this run.
    pub external_fix_pending: bool,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last mutation time.
    pub updated_at: Timestamp,
}

impl Run {
    /// Creates a new pending run.
    #[must_use]
    pub fn new(tenant: impl Into<String>, config: RunConfig) -> Self {
        let now = now_utc();
        Self {
            id: Uuid::new_v4(),
            tenant: tenant.into(),
            status: RunStatus::Pending,
            current_step: None,
            config,
            error_code: None,
            error_message: None,
            last_resumed_step: None,
            external_fix_pending: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attempts a status transition.
    ///
    /// Illegal transitions are logged and rejected without mutating the run
    /// and without raising, so redundant resynchronization calls are safe.
    pub fn transition(&mut self, to: RunStatus) -> TransitionOutcome {
        if !self.status.can_transition_to(to) {
            tracing::warn!(
                run_id = %self.id,
                from = %self.status,
                to = %to,
                "Rejected illegal run transition"
            );
            return TransitionOutcome::Rejected;
        }

        tracing::debug!(run_id = %self.id, from = %self.status, to = %to, "Run transition");
        self.status = to;
        self.updated_at = now_utc();
        TransitionOutcome::Applied
    }

    /// Marks the run as handed to the execution substrate.
    ///
    /// This edge is deliberately absent from the resynchronization table so
    /// an external status push can never move a run into `workflow_starting`;
    /// only the launch path enters it, and only from `pending`.
    pub fn begin_launch(&mut self) -> TransitionOutcome {
        if self.status != RunStatus::Pending {
            tracing::warn!(
                run_id = %self.id,
                from = %self.status,
                "Rejected launch from non-pending state"
            );
            return TransitionOutcome::Rejected;
        }
        tracing::debug!(run_id = %self.id, "Run handed to execution substrate");
        self.status = RunStatus::WorkflowStarting;
        self.updated_at = now_utc();
        TransitionOutcome::Applied
    }

    /// Re-enters a failed run at `step` for another pass through the
    /// substrate.
    ///
    /// Failed is soft-terminal: the resynchronization table has no outgoing
    /// edges from it, so resumption is a distinct lifecycle operation rather
    /// than a table transition. Only `failed` runs resume, and only at valid
    /// resume points.
    pub fn begin_resume(&mut self, step: StepId) -> TransitionOutcome {
        if self.status != RunStatus::Failed || !step.is_resume_point() {
            tracing::warn!(
                run_id = %self.id,
                from = %self.status,
                step = %step,
                "Rejected resume request"
            );
            return TransitionOutcome::Rejected;
        }
        tracing::info!(run_id = %self.id, step = %step, "Resuming failed run");
        self.status = RunStatus::WorkflowStarting;
        self.error_code = None;
        self.error_message = None;
        self.last_resumed_step = Some(step);
        self.updated_at = now_utc();
        TransitionOutcome::Applied
    }

    /// Records a terminal failure with its originating classification.
    pub fn fail(&mut self, code: ErrorCode, message: impl Into<String>) -> TransitionOutcome {
        let outcome = self.transition(RunStatus::Failed);
        if outcome.is_applied() {
            self.error_code = Some(code);
            self.error_message = Some(message.into());
        }
        outcome
    }

    /// Requests cancellation.
    ///
    /// Accepted from any non-terminal state; repeated cancellation of an
    /// already-cancelled run is a no-op that still reports success.
    pub fn cancel(&mut self) -> TransitionOutcome {
        if self.status == RunStatus::Cancelled {
            return TransitionOutcome::Applied;
        }
        self.transition(RunStatus::Cancelled)
    }
}
