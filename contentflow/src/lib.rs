//! # Contentflow
//!
//! Workflow orchestration and recovery engine for a multi-phase
//! content-generation pipeline.
//!
//! Contentflow drives an 18-step pipeline with support for:
//!
//! - **Run/step state machine**: legal-transition table with reject-and-log
//!   semantics for safe external resynchronization
//! - **Parallel step groups**: fan-out/fan-in drafting with bounded,
//!   subset-only retry and aggregate failure reporting
//! - **Retry recommendations**: dependency-map guidance on whether to retry
//!   a failed step in place or re-enter at an upstream producer
//! - **Deterministic validation & repair**: allow-listed, fail-closed content
//!   fixes gating every step completion
//! - **Tamper-evident auditing**: every status-affecting event appended to a
//!   verifiable hash chain
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use contentflow::prelude::*;
//!
//! let orchestrator = Orchestrator::new(generator, store, launcher, audit, signals);
//! let outcome = orchestrator
//!     .execute("tenant-a", RunConfig::new("model-a"), "Write about Rust")
//!     .await?;
//!
//! if let Some(rec) = outcome.recommendation {
//!     println!("retry guidance: {} at {}", rec.reason, rec.target_step);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod audit;
pub mod config;
pub mod errors;
pub mod executor;
pub mod generator;
pub mod orchestrator;
pub mod recovery;
pub mod state;
pub mod storage;
pub mod substrate;
pub mod utils;
pub mod validation;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::audit::{verify_chain, AuditEvent, AuditLogger, ChainVerifyError};
    pub use crate::config::{RunConfig, Thresholds};
    pub use crate::errors::{ContentflowError, ErrorCode, GroupError, StepError};
    pub use crate::executor::{GroupExecutor, GroupRequest, StepRunner};
    pub use crate::generator::{GenerateRequest, GeneratedContent, Generator};
    pub use crate::orchestrator::{Orchestrator, RunOutcome};
    pub use crate::recovery::{recommend, RecommendationAction, RetryRecommendation};
    pub use crate::state::{
        infer_step_status, upstream_candidates, validate_step_tables, ArtifactIndex, Run,
        RunStatus, StepAttempt, StepId, StepRecord, StepStatus, TransitionOutcome, DRAFT_GROUP,
        STEP_ORDER,
    };
    pub use crate::storage::{artifact_path, ArtifactStore, FsArtifactStore, MemoryArtifactStore};
    pub use crate::substrate::{
        execute_unit, SharedSignals, SignalHub, UnitRetryPolicy, WorkflowLauncher,
        SIGNAL_APPROVAL, SIGNAL_CANCEL, SIGNAL_IMAGE_INPUT,
    };
    pub use crate::validation::{
        content_hash, validator_for, ArticleValidator, ContentFormat, CsvValidator, IssueCode,
        JsonValidator, RepairAction, RepairError, RepairOp, Repairer, Severity, ValidationEngine,
        ValidationIssue, ValidationReport, Validator,
    };
}
