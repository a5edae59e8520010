//! Append-only audit event log with a tamper-evident hash chain.

use crate::utils::{iso_timestamp, new_event_id};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use uuid::Uuid;

/// Chain head before any event has been logged.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Detail keys that must never reach the audit log in the clear.
const SECRET_KEY_MARKERS: [&str; 5] = ["secret", "token", "api_key", "password", "authorization"];

/// One entry in the audit chain.
///
/// `event_hash` covers a canonical key-sorted serialization of every field
/// except itself, plus `previous_hash`, so any historical mutation or
/// reordering is detectable by [`verify_chain`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Globally unique event id.
    pub event_id: Uuid,
    /// Monotonically increasing local sequence number.
    pub seq: u64,
    /// Event type (e.g., "run.transition", "repair.applied").
    pub event_type: String,
    /// When the event was logged (ISO 8601).
    pub timestamp: String,
    /// Who or what caused the event.
    pub actor: String,
    /// The resource the event concerns (e.g., a run id or step id).
    pub resource: String,
    /// Structured detail payload. Secret-bearing keys are redacted on entry.
    pub details: HashMap<String, serde_json::Value>,
    /// Chain head at the time this event was logged.
    pub previous_hash: String,
    /// SHA-256 over the canonical serialization of this event.
    pub event_hash: String,
}

impl AuditEvent {
    /// Canonical key-sorted serialization of all hash-covered fields.
    fn canonical_payload(&self) -> String {
        let mut fields: BTreeMap<&str, serde_json::Value> = BTreeMap::new();
        fields.insert("event_id", serde_json::json!(self.event_id));
        fields.insert("seq", serde_json::json!(self.seq));
        fields.insert("event_type", serde_json::json!(self.event_type));
        fields.insert("timestamp", serde_json::json!(self.timestamp));
        fields.insert("actor", serde_json::json!(self.actor));
        fields.insert("resource", serde_json::json!(self.resource));
        fields.insert("details", serde_json::json!(self.details));
        fields.insert("previous_hash", serde_json::json!(self.previous_hash));
        serde_json::to_string(&fields).unwrap_or_default()
    }

    /// Recomputes the event hash from current field values.
    #[must_use]
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_payload().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Chain verification failure, distinguishing linkage breaks (log reordered
/// or truncated) from content tampering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainVerifyError {
    /// An event's `previous_hash` does not match its predecessor's hash.
    #[error("Chain broken at event {0}")]
    ChainBroken(usize),

    /// An event's `event_hash` does not match its recomputed hash.
    #[error("Hash mismatch at event {0}")]
    HashMismatch(usize),
}

/// Replays a list of events in order, verifying linkage and content hashes.
///
/// The first event's `previous_hash` is taken as the starting head, so a
/// suffix of a longer chain verifies on its own.
pub fn verify_chain(events: &[AuditEvent]) -> Result<(), ChainVerifyError> {
    let mut expected_prev: Option<&str> = None;

    for (i, event) in events.iter().enumerate() {
        if let Some(prev) = expected_prev {
            if event.previous_hash != prev {
                return Err(ChainVerifyError::ChainBroken(i));
            }
        }
        if event.compute_hash() != event.event_hash {
            return Err(ChainVerifyError::HashMismatch(i));
        }
        expected_prev = Some(&event.event_hash);
    }

    Ok(())
}

struct ChainState {
    head: String,
    next_seq: u64,
    events: Vec<AuditEvent>,
}

/// Appends events to a tamper-evident hash chain.
///
/// The chain head is the one piece of process-scoped mutable state in the
/// system; appends go through a single mutex so concurrent writers serialize.
pub struct AuditLogger {
    state: Mutex<ChainState>,
}

impl AuditLogger {
    /// Creates a logger with an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState {
                head: GENESIS_HASH.to_string(),
                next_seq: 0,
                events: Vec::new(),
            }),
        }
    }

    /// Appends an event to the chain and returns the stored copy.
    ///
    /// Assigns the sequence number, captures the current chain head as
    /// `previous_hash`, computes `event_hash`, and advances the head.
    pub fn log(
        &self,
        event_type: impl Into<String>,
        actor: impl Into<String>,
        resource: impl Into<String>,
        details: HashMap<String, serde_json::Value>,
    ) -> AuditEvent {
        let mut state = self.state.lock();

        let mut event = AuditEvent {
            event_id: new_event_id(),
            seq: state.next_seq,
            event_type: event_type.into(),
            timestamp: iso_timestamp(),
            actor: actor.into(),
            resource: resource.into(),
            details: redact_details(details),
            previous_hash: state.head.clone(),
            event_hash: String::new(),
        };
        event.event_hash = event.compute_hash();

        state.head = event.event_hash.clone();
        state.next_seq += 1;
        state.events.push(event.clone());

        tracing::debug!(
            event_type = %event.event_type,
            seq = event.seq,
            resource = %event.resource,
            "Audit event appended"
        );

        event
    }

    /// Current chain head.
    #[must_use]
    pub fn head(&self) -> String {
        self.state.lock().head.clone()
    }

    /// Number of events logged so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Returns true if no events have been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().events.is_empty()
    }

    /// Snapshot of all events, for projections and verification.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.state.lock().events.clone()
    }

    /// Verifies the logger's own chain.
    pub fn verify(&self) -> Result<(), ChainVerifyError> {
        verify_chain(&self.state.lock().events)
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AuditLogger")
            .field("len", &state.events.len())
            .field("head", &state.head)
            .finish()
    }
}

/// Replaces values of secret-bearing keys with a redaction marker.
fn redact_details(
    details: HashMap<String, serde_json::Value>,
) -> HashMap<String, serde_json::Value> {
    details
        .into_iter()
        .map(|(key, value)| {
            let lower = key.to_lowercase();
            if SECRET_KEY_MARKERS.iter().any(|marker| lower.contains(marker)) {
                (key, serde_json::json!("[REDACTED]"))
            } else {
                (key, value)
            }
        })
        .collect()
}
