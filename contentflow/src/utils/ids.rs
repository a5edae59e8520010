//! Id generation helpers.

use uuid::Uuid;

/// Generates a new random id for runs, attempts, and audit events.
#[must_use]
pub fn new_event_id() -> Uuid {
    Uuid::new_v4()
}
