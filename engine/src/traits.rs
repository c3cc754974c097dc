//! Trait definitions with mockall annotations for testing
//!
//! These traits are the engine's only view of its external collaborators:
//! the privileged backend service that performs voltage writes, and the
//! event transport delivering backend push events and OS lifecycle
//! notifications. They are used for dependency injection and enable
//! testing the engine against mocks.

use crate::error::EngineResult;
use shared::{
    BackendConfig, CoreOffsets, DiagnosticsExport, DynamicSettings, ImportSummary, LifecycleEvent,
    PlatformInfo, Preset, RpcAck, ServerEvent, SystemInfo, TestRecord, TuneMode,
};
use tokio::sync::mpsc;

/// RPC surface consumed from the privileged voltage backend
///
/// `init` must complete before any other call. All calls suspend the caller
/// until the backend round-trip settles; transport failures surface as
/// `EngineError::BackendUnavailable`.
#[mockall::automock]
#[async_trait::async_trait]
pub trait BackendRpc: Send + Sync {
    /// Initialize the backend session
    async fn init(&self) -> EngineResult<()>;

    /// Fetch the persisted configuration snapshot
    async fn fetch_config(&self) -> EngineResult<BackendConfig>;

    /// Hardware platform descriptor
    async fn get_platform_info(&self) -> EngineResult<PlatformInfo>;

    /// Stress-test history, most recent first, bounded by the backend
    async fn get_test_history(&self) -> EngineResult<Vec<TestRecord>>;

    /// Apply a per-core offset vector, optionally scheduled after a timeout
    async fn apply_undervolt(&self, cores: CoreOffsets, timeout_secs: u32) -> EngineResult<()>;

    /// Disable undervolting without discarding the stored configuration
    async fn disable_undervolt(&self) -> EngineResult<()>;

    /// Emergency reset of all voltage state
    async fn panic_disable(&self) -> EngineResult<()>;

    /// Start the closed-loop voltage controller
    async fn start_gymdeck(&self, settings: DynamicSettings) -> EngineResult<()>;

    /// Stop the closed-loop voltage controller
    async fn stop_gymdeck(&self) -> EngineResult<()>;

    /// Begin a calibration run; progress and completion arrive as push events
    async fn start_autotune(&self, mode: TuneMode) -> EngineResult<RpcAck>;

    /// Cancel a calibration run
    async fn stop_autotune(&self) -> EngineResult<RpcAck>;

    /// Run a named stress test to completion
    async fn run_test(&self, name: String) -> EngineResult<TestRecord>;

    async fn save_preset(&self, preset: Preset) -> EngineResult<()>;

    async fn update_preset(&self, preset: Preset) -> EngineResult<()>;

    async fn delete_preset(&self, app_id: u32) -> EngineResult<()>;

    /// Serialize all presets to portable text
    async fn export_presets(&self) -> EngineResult<String>;

    /// Replace presets from previously exported text
    async fn import_presets(&self, text: String) -> EngineResult<ImportSummary>;

    /// Reset persisted configuration to factory defaults
    async fn reset_config(&self) -> EngineResult<BackendConfig>;

    async fn export_diagnostics(&self) -> EngineResult<DiagnosticsExport>;

    async fn get_system_info(&self) -> EngineResult<SystemInfo>;
}

/// Subscription source for backend push events and OS lifecycle notifications
///
/// Subscriptions are established once at engine start and released together
/// at teardown; `shutdown` must be safe to call more than once.
#[mockall::automock]
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    /// Subscribe to the backend's push event channel
    async fn subscribe_server_events(&self) -> EngineResult<mpsc::Receiver<ServerEvent>>;

    /// Subscribe to OS process-lifecycle notifications
    async fn subscribe_lifecycle_events(&self) -> EngineResult<mpsc::Receiver<LifecycleEvent>>;

    /// Release all subscriptions and stop listening
    async fn shutdown(&self) -> EngineResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that mock traits can be instantiated
    #[tokio::test]
    async fn test_mock_trait_instantiation() {
        let _mock_backend = MockBackendRpc::new();
        let _mock_events = MockEventSource::new();
    }
}
