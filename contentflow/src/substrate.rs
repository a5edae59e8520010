//! Durable-execution substrate seam.
//!
//! The orchestration logic assumes an execution substrate exists and only
//! specifies the semantics it needs: timeout-bounded, classified-retry
//! execution of a unit of work; cooperative suspension on external signals;
//! and an acceptance step for launching a run.

use crate::errors::{ContentflowError, StepError};
use crate::state::StepId;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// Signal name for human approval decisions.
pub const SIGNAL_APPROVAL: &str = "approval";
/// Signal name for external image input.
pub const SIGNAL_IMAGE_INPUT: &str = "image_input";
/// Signal name for run cancellation.
pub const SIGNAL_CANCEL: &str = "cancel";

/// Retry policy for one unit of work: capped exponential backoff with full
/// jitter. Retries reuse identical parameters.
#[derive(Debug, Clone)]
pub struct UnitRetryPolicy {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Delay cap in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for UnitRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl UnitRetryPolicy {
    /// Backoff delay for a 0-indexed attempt: `base * 2^attempt`, capped,
    /// with full jitter.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(self.max_delay_ms);
        let jittered = if exp == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=exp)
        };
        Duration::from_millis(jittered)
    }
}

/// Executes a unit of work with per-attempt timeout and classified retry.
///
/// A timeout is classified `retryable`, never silently swallowed. Retryable
/// failures are retried with unchanged parameters up to the policy cap;
/// `non_retryable` and `validation_fail` surface immediately.
pub async fn execute_unit<T, F, Fut>(
    name: &str,
    step: StepId,
    timeout: Duration,
    policy: &UnitRetryPolicy,
    mut op: F,
) -> Result<T, StepError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StepError>>,
{
    let mut attempt: u32 = 0;

    loop {
        let result = match tokio::time::timeout(timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(StepError::retryable(
                step,
                format!("Unit '{name}' timed out after {}ms", timeout.as_millis()),
            )),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(error) => {
                attempt += 1;
                if !error.code.is_retryable() || attempt >= policy.max_attempts {
                    return Err(error);
                }
                let delay = policy.backoff_delay(attempt - 1);
                tracing::debug!(
                    unit = %name,
                    step = %step,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying unit after transient failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// External signal delivery and cooperative suspension.
///
/// `wait_until` blocks on a notification, never polls; a signal delivered
/// before the wait began is observed immediately.
#[derive(Debug, Default)]
pub struct SignalHub {
    payloads: Mutex<HashMap<String, serde_json::Value>>,
    notify: Notify,
}

impl SignalHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a signal with a payload, waking all waiters.
    pub fn signal(&self, name: &str, payload: serde_json::Value) {
        self.payloads.lock().insert(name.to_string(), payload);
        self.notify.notify_waiters();
    }

    /// Returns the most recent payload for a signal, if any, without
    /// consuming it.
    #[must_use]
    pub fn query(&self, name: &str) -> Option<serde_json::Value> {
        self.payloads.lock().get(name).cloned()
    }

    /// Removes and returns the payload for a signal, if one was delivered.
    #[must_use]
    pub fn take(&self, name: &str) -> Option<serde_json::Value> {
        self.payloads.lock().remove(name)
    }

    /// Suspends until the named signal has been delivered, then consumes and
    /// returns its payload.
    pub async fn wait_until(&self, name: &str) -> serde_json::Value {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register the waiter before checking the map; a signal landing
            // between the check and the await would otherwise notify nobody
            // and leave this task asleep with its payload already stored.
            notified.as_mut().enable();
            if let Some(payload) = self.payloads.lock().remove(name) {
                return payload;
            }
            notified.await;
        }
    }
}

/// Acceptance step for handing a run to the durable-execution substrate.
///
/// Failure here is fatal: the run transitions straight to `failed` without
/// ever claiming `running`.
#[async_trait]
pub trait WorkflowLauncher: Send + Sync {
    /// Asks the substrate to accept the run.
    async fn launch(&self, run_id: Uuid) -> Result<(), ContentflowError>;
}

/// Launcher that always accepts; the in-process default.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAcceptLauncher;

#[async_trait]
impl WorkflowLauncher for AlwaysAcceptLauncher {
    async fn launch(&self, _run_id: Uuid) -> Result<(), ContentflowError> {
        Ok(())
    }
}

/// Launcher that always refuses, for exercising fatal-start handling.
#[derive(Debug, Clone, Default)]
pub struct RejectingLauncher {
    /// Reason reported on refusal.
    pub reason: String,
}

#[async_trait]
impl WorkflowLauncher for RejectingLauncher {
    async fn launch(&self, run_id: Uuid) -> Result<(), ContentflowError> {
        Err(ContentflowError::SubstrateRejected(format!(
            "run {run_id}: {}",
            self.reason
        )))
    }
}

/// Shared handle to a signal hub.
pub type SharedSignals = Arc<SignalHub>;
