//! Undervolt control engine for a handheld gaming device
//!
//! This library reconciles three asynchronous signal sources - OS
//! process-lifecycle notifications, push events from the privileged voltage
//! backend, and direct user commands - into one consistent view of the
//! voltage configuration that should currently be active, and drives
//! idempotent, timeout-aware apply commands toward the backend.

pub mod autotune;
pub mod bridge;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod resolver;
pub mod services;
pub mod store;
pub mod traits;

// Re-export commonly used types
pub use autotune::{AutotuneOrchestrator, TuneOutcome, TunePhase};
pub use bridge::EventBridge;
pub use coordinator::ApplyCoordinator;
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use resolver::{resolve, ResolvedTarget};
pub use store::{StatePatch, StateStore};
pub use traits::{BackendRpc, EventSource};
