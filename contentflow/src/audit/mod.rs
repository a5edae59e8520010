//! Tamper-evident audit logging.
//!
//! Every status-affecting mutation in the pipeline is appended to a hash
//! chain; mutating any historical event invalidates the chain from that point
//! forward, verifiable by replaying it.

mod chain;

pub use chain::{
    verify_chain, AuditEvent, AuditLogger, ChainVerifyError, GENESIS_HASH,
};
