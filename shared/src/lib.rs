//! Shared types for the undervolt control engine
//!
//! Contains the session data model, status labels, event payloads and error
//! types exchanged between the engine and its backend transport. Transport
//! framing details are kept in the engine's service layer.

pub mod errors;
pub mod logging;
pub mod types;

pub use errors::*;
pub use types::*;
