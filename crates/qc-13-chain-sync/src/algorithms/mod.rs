//! # Algorithms Module
//!
//! Pure sync algorithms: consensus by polling, wire envelope, failure ladder.

pub mod consensus;
pub mod envelope;
pub mod escalation;

pub use consensus::find_consensus;
pub use envelope::{decode_header, encode_header, encode_request, read_request};
pub use escalation::{EscalationAction, EscalationPolicy};
