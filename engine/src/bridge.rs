//! Normalization of external signals into state mutations
//!
//! The bridge translates backend push events and OS lifecycle notifications
//! into store merges or component invocations. Every handler is idempotent:
//! redelivery of the same event must not double-apply or corrupt the status
//! label.

use crate::autotune::AutotuneOrchestrator;
use crate::coordinator::ApplyCoordinator;
use crate::error::EngineResult;
use crate::resolver;
use crate::store::{StatePatch, StateStore};
use crate::traits::BackendRpc;
use shared::{LifecycleEvent, RunningApp, ServerEvent, Status};
use std::sync::Arc;
use tracing::{debug, info};

/// Apply timeout used when re-issuing after resume from suspend, guarding
/// against a backend that forgets volatile register state
const RESUME_APPLY_TIMEOUT_SECS: u32 = 5;

pub struct EventBridge<B: BackendRpc> {
    store: Arc<StateStore>,
    backend: Arc<B>,
    coordinator: Arc<ApplyCoordinator<B>>,
    autotune: Arc<AutotuneOrchestrator<B>>,
}

impl<B: BackendRpc> EventBridge<B> {
    pub fn new(
        store: Arc<StateStore>,
        backend: Arc<B>,
        coordinator: Arc<ApplyCoordinator<B>>,
        autotune: Arc<AutotuneOrchestrator<B>>,
    ) -> Self {
        Self {
            store,
            backend,
            coordinator,
            autotune,
        }
    }

    /// Handle a backend push event
    pub async fn handle_server_event(&self, event: ServerEvent) -> EngineResult<()> {
        match event {
            ServerEvent::TuningProgress(progress) => {
                self.autotune.record_progress(progress);
                Ok(())
            }
            ServerEvent::TuningComplete(result) => {
                self.autotune.complete(result);
                Ok(())
            }
            ServerEvent::TestComplete(record) => {
                debug!("🧪 Test complete: {} passed={}", record.name, record.passed);
                self.store.merge(StatePatch {
                    current_test: Some(None),
                    is_test_running: Some(false),
                    ..Default::default()
                });
                // History is backend-owned truth, so this is the one place a
                // push event triggers a follow-up pull
                let history = self.backend.get_test_history().await?;
                self.store.merge(StatePatch {
                    test_history: Some(history),
                    ..Default::default()
                });
                Ok(())
            }
            ServerEvent::UpdateStatus(label) => {
                debug!("📡 Status update from backend: {label}");
                self.store.merge(StatePatch {
                    status: Some(Status::parse(&label)),
                    ..Default::default()
                });
                Ok(())
            }
        }
    }

    /// Handle an OS lifecycle notification
    pub async fn handle_lifecycle_event(&self, event: LifecycleEvent) -> EngineResult<()> {
        match event {
            LifecycleEvent::AppForegroundChanged {
                app_id,
                display_name,
                running: true,
            } => self.on_game_started(app_id, display_name).await,
            LifecycleEvent::AppForegroundChanged {
                app_id,
                running: false,
                ..
            } => self.on_game_stopped(app_id).await,
            LifecycleEvent::ResumeFromSuspend => self.on_resume().await,
        }
    }

    async fn on_game_started(&self, app_id: u32, display_name: String) -> EngineResult<()> {
        let state = self.store.get();

        // Duplicate notification for the app that is already foreground
        if state.running_app.as_ref().map(|a| a.app_id) == Some(app_id) {
            debug!("Ignoring duplicate foreground event for app {app_id}");
            return Ok(());
        }

        info!("🎮 Game started: {display_name} ({app_id})");
        self.store.merge(StatePatch {
            running_app: Some(Some(RunningApp {
                app_id,
                display_name,
            })),
            ..Default::default()
        });

        if !state.settings.is_run_automatically {
            debug!("Auto-apply disabled, leaving configuration as is");
            return Ok(());
        }

        let target = resolver::resolve(
            Some(app_id),
            &state.presets,
            state.settings.is_global,
            state.global_cores,
        );
        self.coordinator.apply_target(target).await
    }

    async fn on_game_stopped(&self, app_id: u32) -> EngineResult<()> {
        let state = self.store.get();

        // Stale or duplicate close events for an app that is no longer
        // considered foreground are ignored
        match &state.running_app {
            Some(app) if app.app_id == app_id => {}
            _ => {
                debug!("Ignoring foreground-lost event for inactive app {app_id}");
                return Ok(());
            }
        }

        info!("🎮 Game stopped: {app_id}");
        self.store.merge(StatePatch {
            running_app: Some(None),
            current_preset: Some(None),
            ..Default::default()
        });

        let target = resolver::resolve(None, &state.presets, state.settings.is_global, state.global_cores);
        self.coordinator.apply_target(target).await
    }

    async fn on_resume(&self) -> EngineResult<()> {
        let status = self.store.status();
        if !status.is_active() {
            debug!("Resume with status {status}, nothing to re-apply");
            return Ok(());
        }

        info!("🔁 Resume from suspend with active configuration, re-applying");
        self.coordinator.reapply(RESUME_APPLY_TIMEOUT_SECS).await
    }
}
