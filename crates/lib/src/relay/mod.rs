//! Relay core: routes user messages to the operator and operator replies back, and
//! escalates failures to the developer chat.

mod engine;
mod escalation;

pub use engine::{RejectReason, RelayEngine, RelayError, RelayResult, RelaySettings};
pub use escalation::{causal_chain, escape_html, Escalator, MAX_MESSAGE_CHARS};
