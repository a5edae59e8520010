//! Utility functions for id generation and timestamp handling.

pub mod ids;
pub mod timestamps;

pub use ids::new_event_id;
pub use timestamps::{iso_timestamp, now_utc, Timestamp};
