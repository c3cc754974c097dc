//! Service implementations
//!
//! Production implementations of the engine's service traits: the RPC
//! client toward the privileged voltage backend and the listener for its
//! pushed event frames.

pub mod backend;

pub use backend::{RealBackend, RealEventSource};
