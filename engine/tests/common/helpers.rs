//! Test helpers and builder patterns for engine tests
//!
//! Provides a builder for fully mocked engines, a harness exposing the
//! engine's internal components for bridge-level tests, and a gated backend
//! double for exercising out-of-order RPC completion.

use async_trait::async_trait;
use engine::traits::{MockBackendRpc, MockEventSource};
use engine::{
    ApplyCoordinator, AutotuneOrchestrator, BackendRpc, Engine, EngineError, EngineResult,
    EventBridge, StateStore,
};
use shared::{
    BackendConfig, CoreOffsets, DiagnosticsExport, DynamicSettings, ImportSummary, LifecycleEvent,
    PlatformInfo, Preset, RpcAck, ServerEvent, SessionState, SystemInfo, TestRecord, TuneMode,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

/// Builder for engines wired to mocks with sensible default behaviors
pub struct EngineBuilder {
    backend: MockBackendRpc,
    events: MockEventSource,
    config: BackendConfig,
    history: Vec<TestRecord>,
}

/// A built engine plus the senders feeding its event receivers
pub struct EngineHarness {
    pub engine: Engine<MockBackendRpc, MockEventSource>,
    pub server_tx: mpsc::Sender<ServerEvent>,
    pub lifecycle_tx: mpsc::Sender<LifecycleEvent>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            backend: MockBackendRpc::new(),
            events: MockEventSource::new(),
            config: BackendConfig::default(),
            history: Vec::new(),
        }
    }

    /// Configuration returned by the mocked `fetch_config`
    pub fn with_config(mut self, config: BackendConfig) -> Self {
        self.config = config;
        self
    }

    /// History returned by the mocked `get_test_history`
    pub fn with_history(mut self, history: Vec<TestRecord>) -> Self {
        self.history = history;
        self
    }

    /// Configure the backend mock; expectations set here take precedence
    /// over the defaults added at build time
    pub fn with_backend<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&mut MockBackendRpc),
    {
        setup(&mut self.backend);
        self
    }

    /// Configure the event source mock; expectations set here take
    /// precedence over the defaults added at build time
    pub fn with_events<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&mut MockEventSource),
    {
        setup(&mut self.events);
        self
    }

    pub fn build(self) -> EngineHarness {
        let mut backend = self.backend;
        let mut events = self.events;

        // Fallback behaviors so init paths never panic on unexercised calls
        backend.expect_init().times(0..).returning(|| Ok(()));
        let config = self.config;
        backend
            .expect_fetch_config()
            .times(0..)
            .returning(move || Ok(config.clone()));
        backend.expect_get_platform_info().times(0..).returning(|| {
            Ok(PlatformInfo {
                model: "Jupiter".to_string(),
                variant: "LCD".to_string(),
                supported: true,
            })
        });
        let history = self.history;
        backend
            .expect_get_test_history()
            .times(0..)
            .returning(move || Ok(history.clone()));

        let (server_tx, server_rx) = mpsc::channel(16);
        let (lifecycle_tx, lifecycle_rx) = mpsc::channel(16);
        events
            .expect_subscribe_server_events()
            .times(0..=1)
            .return_once(move || Ok(server_rx));
        events
            .expect_subscribe_lifecycle_events()
            .times(0..=1)
            .return_once(move || Ok(lifecycle_rx));
        events.expect_shutdown().times(0..).returning(|| Ok(()));

        EngineHarness {
            engine: Engine::new(Arc::new(backend), events),
            server_tx,
            lifecycle_tx,
        }
    }
}

/// The engine's internal components wired to a backend, for tests that
/// drive the bridge and coordinators directly
pub struct BridgeHarness<B: BackendRpc = MockBackendRpc> {
    pub backend: Arc<B>,
    pub store: Arc<StateStore>,
    pub coordinator: Arc<ApplyCoordinator<B>>,
    pub autotune: Arc<AutotuneOrchestrator<B>>,
    pub bridge: EventBridge<B>,
}

impl<B: BackendRpc> BridgeHarness<B> {
    pub fn new(backend: B, initial: SessionState) -> Self {
        let backend = Arc::new(backend);
        let store = Arc::new(StateStore::new(initial));
        let coordinator = Arc::new(ApplyCoordinator::new(store.clone(), backend.clone()));
        let autotune = Arc::new(AutotuneOrchestrator::new(store.clone(), backend.clone()));
        let bridge = EventBridge::new(
            store.clone(),
            backend.clone(),
            coordinator.clone(),
            autotune.clone(),
        );
        Self {
            backend,
            store,
            coordinator,
            autotune,
            bridge,
        }
    }
}

/// Backend double whose `apply_undervolt` blocks on a gate for one chosen
/// vector, used to force RPC completions out of call order
pub struct GatedBackend {
    slow_cores: CoreOffsets,
    gate: Notify,
    pub applied: Mutex<Vec<(CoreOffsets, u32)>>,
    pub disables: AtomicU32,
}

impl GatedBackend {
    pub fn new(slow_cores: CoreOffsets) -> Self {
        Self {
            slow_cores,
            gate: Notify::new(),
            applied: Mutex::new(Vec::new()),
            disables: AtomicU32::new(0),
        }
    }

    /// Let the gated apply proceed; a stored permit makes this safe even if
    /// the apply has not reached the gate yet
    pub fn release(&self) {
        self.gate.notify_one();
    }

    fn not_wired(operation: &str) -> EngineError {
        EngineError::unavailable(format!("{operation} not wired in GatedBackend"))
    }
}

#[async_trait]
impl BackendRpc for GatedBackend {
    async fn init(&self) -> EngineResult<()> {
        Ok(())
    }

    async fn fetch_config(&self) -> EngineResult<BackendConfig> {
        Err(Self::not_wired("fetch_config"))
    }

    async fn get_platform_info(&self) -> EngineResult<PlatformInfo> {
        Err(Self::not_wired("get_platform_info"))
    }

    async fn get_test_history(&self) -> EngineResult<Vec<TestRecord>> {
        Err(Self::not_wired("get_test_history"))
    }

    async fn apply_undervolt(&self, cores: CoreOffsets, timeout_secs: u32) -> EngineResult<()> {
        if cores == self.slow_cores {
            self.gate.notified().await;
        }
        self.applied.lock().unwrap().push((cores, timeout_secs));
        Ok(())
    }

    async fn disable_undervolt(&self) -> EngineResult<()> {
        self.disables.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn panic_disable(&self) -> EngineResult<()> {
        Ok(())
    }

    async fn start_gymdeck(&self, _settings: DynamicSettings) -> EngineResult<()> {
        Err(Self::not_wired("start_gymdeck"))
    }

    async fn stop_gymdeck(&self) -> EngineResult<()> {
        Err(Self::not_wired("stop_gymdeck"))
    }

    async fn start_autotune(&self, _mode: TuneMode) -> EngineResult<RpcAck> {
        Ok(RpcAck::ok())
    }

    async fn stop_autotune(&self) -> EngineResult<RpcAck> {
        Ok(RpcAck::ok())
    }

    async fn run_test(&self, _name: String) -> EngineResult<TestRecord> {
        Err(Self::not_wired("run_test"))
    }

    async fn save_preset(&self, _preset: Preset) -> EngineResult<()> {
        Ok(())
    }

    async fn update_preset(&self, _preset: Preset) -> EngineResult<()> {
        Err(Self::not_wired("update_preset"))
    }

    async fn delete_preset(&self, _app_id: u32) -> EngineResult<()> {
        Err(Self::not_wired("delete_preset"))
    }

    async fn export_presets(&self) -> EngineResult<String> {
        Err(Self::not_wired("export_presets"))
    }

    async fn import_presets(&self, _text: String) -> EngineResult<ImportSummary> {
        Err(Self::not_wired("import_presets"))
    }

    async fn reset_config(&self) -> EngineResult<BackendConfig> {
        Err(Self::not_wired("reset_config"))
    }

    async fn export_diagnostics(&self) -> EngineResult<DiagnosticsExport> {
        Err(Self::not_wired("export_diagnostics"))
    }

    async fn get_system_info(&self) -> EngineResult<SystemInfo> {
        Err(Self::not_wired("get_system_info"))
    }
}
