//! Engine composition root
//!
//! Owns the state store, the apply coordinator, the autotune orchestrator
//! and the event bridge, and runs the single event loop that serializes all
//! externally driven work. Constructed explicitly and passed to consumers;
//! there is no global instance.

use std::sync::Arc;

use shared::{
    logging, CoreOffsets, DiagnosticsExport, DynamicSettings, EngineSettings, ImportSummary,
    LifecycleEvent, PlatformInfo, Preset, ServerEvent, SessionState, Status, SystemInfo,
    TestRecord, TuneMode,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

use crate::autotune::{AutotuneOrchestrator, TuneOutcome};
use crate::bridge::EventBridge;
use crate::coordinator::ApplyCoordinator;
use crate::error::EngineResult;
use crate::resolver;
use crate::store::{StatePatch, StateStore};
use crate::traits::{BackendRpc, EventSource};

/// The long-lived engine object reconciling all signal sources
pub struct Engine<B, E>
where
    B: BackendRpc + 'static,
    E: EventSource + 'static,
{
    store: Arc<StateStore>,
    backend: Arc<B>,
    events: E,

    coordinator: Arc<ApplyCoordinator<B>>,
    autotune: Arc<AutotuneOrchestrator<B>>,
    bridge: EventBridge<B>,

    /// Active subscription receivers, present between init and shutdown
    server_rx: Option<mpsc::Receiver<ServerEvent>>,
    lifecycle_rx: Option<mpsc::Receiver<LifecycleEvent>>,

    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl<B, E> Engine<B, E>
where
    B: BackendRpc + 'static,
    E: EventSource + 'static,
{
    /// Create a new engine with injected backend and event transport
    pub fn new(backend: Arc<B>, events: E) -> Self {
        let store = Arc::new(StateStore::new(SessionState::default()));
        let coordinator = Arc::new(ApplyCoordinator::new(store.clone(), backend.clone()));
        let autotune = Arc::new(AutotuneOrchestrator::new(store.clone(), backend.clone()));
        let bridge = EventBridge::new(
            store.clone(),
            backend.clone(),
            coordinator.clone(),
            autotune.clone(),
        );
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Self {
            store,
            backend,
            events,
            coordinator,
            autotune,
            bridge,
            server_rx: None,
            lifecycle_rx: None,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Initialize the engine: load backend configuration, subscribe to all
    /// external signal sources, and honor the apply-at-startup setting.
    ///
    /// On any failure every subscription established so far is released
    /// before the error is returned.
    pub async fn init(&mut self) -> EngineResult<()> {
        debug!("🚀 Initializing engine...");

        if let Err(e) = self.init_inner().await {
            // Release whatever was subscribed before the failure
            self.server_rx.take();
            self.lifecycle_rx.take();
            let _ = self.events.shutdown().await;
            return Err(e);
        }

        logging::log_success("Engine initialized");
        Ok(())
    }

    async fn init_inner(&mut self) -> EngineResult<()> {
        self.backend.init().await?;

        let config = self.backend.fetch_config().await?;
        debug!("📦 Loaded backend configuration: status {}", config.status);
        let session = SessionState::from_config(config);
        let startup_apply = session.settings.run_at_startup;
        self.store.merge(StatePatch {
            cores: Some(session.cores),
            global_cores: Some(session.global_cores),
            presets: Some(session.presets.clone()),
            settings: Some(session.settings.clone()),
            dynamic_settings: Some(session.dynamic_settings.clone()),
            status: Some(session.status.clone()),
            ..Default::default()
        });

        let platform = self.backend.get_platform_info().await?;
        info!("🖥️  Platform: {} ({})", platform.model, platform.variant);

        let history = self.backend.get_test_history().await?;
        self.store.merge(StatePatch {
            test_history: Some(history),
            ..Default::default()
        });

        self.server_rx = Some(self.events.subscribe_server_events().await?);
        self.lifecycle_rx = Some(self.events.subscribe_lifecycle_events().await?);

        if startup_apply {
            // A rejected startup apply is logged, not fatal
            if let Err(e) = self
                .coordinator
                .apply(session.cores, session.settings.timeout_apply)
                .await
            {
                logging::log_error("Apply at startup", &e);
            }
        }

        Ok(())
    }

    /// Main event loop: processes push events and lifecycle notifications
    /// until shutdown. A single failed handler never halts the loop.
    pub async fn run(&mut self) -> EngineResult<()> {
        loop {
            tokio::select! {
                Some(event) = async {
                    if let Some(rx) = &mut self.server_rx {
                        rx.recv().await
                    } else {
                        None
                    }
                } => {
                    if let Err(e) = self.bridge.handle_server_event(event).await {
                        error!("❌ Error handling backend event: {e}");
                    }
                },

                Some(event) = async {
                    if let Some(rx) = &mut self.lifecycle_rx {
                        rx.recv().await
                    } else {
                        None
                    }
                } => {
                    if let Err(e) = self.bridge.handle_lifecycle_event(event).await {
                        error!("❌ Error handling lifecycle event: {e}");
                    }
                },

                Some(_) = self.shutdown_rx.recv() => {
                    self.shutdown().await?;
                    break;
                }
            }
        }

        Ok(())
    }

    /// Sender used to request a graceful shutdown from another task
    pub fn get_shutdown_sender(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Release all external subscriptions. Safe to call more than once;
    /// the second call is a no-op.
    pub async fn shutdown(&mut self) -> EngineResult<()> {
        if self.server_rx.is_none() && self.lifecycle_rx.is_none() {
            return Ok(());
        }
        logging::log_shutdown("releasing engine subscriptions");
        self.server_rx.take();
        self.lifecycle_rx.take();
        self.events.shutdown().await
    }

    // ---- state access ----

    /// Snapshot of the current session state
    pub fn state(&self) -> SessionState {
        self.store.get()
    }

    /// Subscribe to post-merge state snapshots
    pub fn subscribe(&self) -> broadcast::Receiver<SessionState> {
        self.store.subscribe()
    }

    /// Shared handle to the store, for collaborators that observe state
    pub fn store(&self) -> Arc<StateStore> {
        self.store.clone()
    }

    // ---- direct user commands ----

    /// Apply an explicit vector now
    pub async fn apply_undervolt(&self, cores: CoreOffsets, timeout_secs: u32) -> EngineResult<()> {
        self.coordinator.apply(cores, timeout_secs).await
    }

    /// Re-resolve and apply the configuration for the current foreground
    /// state (preset, global fallback, or disabled)
    pub async fn apply_for_current_state(&self) -> EngineResult<()> {
        let state = self.store.get();
        let target = resolver::resolve(
            state.running_app.as_ref().map(|a| a.app_id),
            &state.presets,
            state.settings.is_global,
            state.global_cores,
        );
        self.coordinator.apply_target(target).await
    }

    pub async fn disable(&self) -> EngineResult<()> {
        self.coordinator.disable().await
    }

    /// Emergency reset; succeeds from any prior state, including
    /// mid-calibration
    pub async fn panic_disable(&self) -> EngineResult<()> {
        self.autotune.cancel_pending();
        self.coordinator.panic_disable().await
    }

    pub async fn set_dynamic_mode(&self, on: bool, settings: DynamicSettings) -> EngineResult<()> {
        self.coordinator.set_dynamic_mode(on, settings).await
    }

    // ---- autotune ----

    pub async fn start_autotune(&self, mode: TuneMode) -> EngineResult<()> {
        self.autotune.start(mode).await
    }

    pub async fn stop_autotune(&self) -> EngineResult<()> {
        self.autotune.stop().await
    }

    pub async fn tune_for_current_game(&self, mode: TuneMode) -> EngineResult<TuneOutcome> {
        self.autotune.tune_for_current_game(mode).await
    }

    // ---- presets ----

    pub async fn save_preset(&self, preset: Preset) -> EngineResult<()> {
        self.backend.save_preset(preset.clone()).await?;
        self.merge_preset(preset);
        Ok(())
    }

    pub async fn update_preset(&self, preset: Preset) -> EngineResult<()> {
        self.backend.update_preset(preset.clone()).await?;
        self.merge_preset(preset);
        Ok(())
    }

    pub async fn delete_preset(&self, app_id: u32) -> EngineResult<()> {
        self.backend.delete_preset(app_id).await?;

        let state = self.store.get();
        let mut presets = state.presets;
        presets.remove(&app_id);
        let current_preset = if state.current_preset == Some(app_id) {
            Some(None)
        } else {
            None
        };
        self.store.merge(StatePatch {
            presets: Some(presets),
            current_preset,
            ..Default::default()
        });
        Ok(())
    }

    pub async fn export_presets(&self) -> EngineResult<String> {
        self.backend.export_presets().await
    }

    /// Import presets from exported text. On success the local preset map is
    /// refreshed from backend truth, since import replaces wholesale.
    pub async fn import_presets(&self, text: String) -> EngineResult<ImportSummary> {
        let summary = self.backend.import_presets(text).await?;
        if summary.success {
            let config = self.backend.fetch_config().await?;
            let presets = config.presets.into_iter().map(|p| (p.app_id, p)).collect();
            self.store.merge(StatePatch {
                presets: Some(presets),
                ..Default::default()
            });
        }
        Ok(summary)
    }

    fn merge_preset(&self, preset: Preset) {
        let mut presets = self.store.get().presets;
        presets.insert(preset.app_id, preset);
        self.store.merge(StatePatch {
            presets: Some(presets),
            ..Default::default()
        });
    }

    // ---- tests & maintenance ----

    /// Run a named stress test to completion. The backend also pushes a
    /// `test_complete` event which clears the running flags and refreshes
    /// history; the flags are cleared here too so a lost push cannot wedge
    /// the running marker.
    pub async fn run_test(&self, name: String) -> EngineResult<TestRecord> {
        self.store.merge(StatePatch {
            current_test: Some(Some(name.clone())),
            is_test_running: Some(true),
            ..Default::default()
        });

        let result = self.backend.run_test(name).await;

        if result.is_err() {
            self.store.merge(StatePatch {
                current_test: Some(None),
                is_test_running: Some(false),
                ..Default::default()
            });
        }
        result
    }

    /// Re-pull backend-owned test history
    pub async fn refresh_test_history(&self) -> EngineResult<()> {
        let history = self.backend.get_test_history().await?;
        self.store.merge(StatePatch {
            test_history: Some(history),
            ..Default::default()
        });
        Ok(())
    }

    /// Reset persisted configuration to defaults and mirror them locally
    pub async fn reset_config(&self) -> EngineResult<()> {
        let config = self.backend.reset_config().await?;
        info!("♻️  Configuration reset to defaults");
        self.store.merge(StatePatch {
            cores: Some(config.cores),
            global_cores: Some(config.global_cores),
            settings: Some(config.settings),
            dynamic_settings: Some(config.dynamic_settings),
            status: Some(config.status),
            current_preset: Some(None),
            ..Default::default()
        });
        Ok(())
    }

    /// Merge new feature flags into the session and recompute the status
    /// label from the new snapshot.
    ///
    /// Local only: no RPC is issued here, the effective hardware state is
    /// reconciled by the next apply. Manually enabled, closed-loop and
    /// error labels are not derived from the settings and stay untouched.
    pub fn update_settings(&self, settings: EngineSettings) {
        self.store.merge(StatePatch {
            settings: Some(settings),
            ..Default::default()
        });

        let state = self.store.get();
        if matches!(
            state.status,
            Status::Disabled | Status::Global | Status::UsingPreset(_)
        ) {
            let target = resolver::resolve(
                state.running_app.as_ref().map(|a| a.app_id),
                &state.presets,
                state.settings.is_global,
                state.global_cores,
            );
            self.store.merge(StatePatch {
                status: Some(target.status),
                current_preset: Some(target.preset_app_id),
                ..Default::default()
            });
        }
    }

    pub async fn get_platform_info(&self) -> EngineResult<PlatformInfo> {
        self.backend.get_platform_info().await
    }

    pub async fn get_system_info(&self) -> EngineResult<SystemInfo> {
        self.backend.get_system_info().await
    }

    pub async fn export_diagnostics(&self) -> EngineResult<DiagnosticsExport> {
        self.backend.export_diagnostics().await
    }
}
