//! Pipeline state machine: run and step entities, status enums, the
//! transition-legality table, and artifact-based status inference.

mod infer;
mod run;
mod step;

pub use infer::{infer_step_status, ArtifactIndex};
pub use run::{Run, RunStatus, TransitionOutcome};
pub use step::{
    upstream_candidates, validate_step_tables, StepAttempt, StepId, StepRecord, StepStatus,
    StepTableError, DEPENDENCY_MAP, DRAFT_GROUP, STEP_ORDER,
};
