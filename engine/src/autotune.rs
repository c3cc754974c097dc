//! Calibration run orchestration
//!
//! Drives a backend autotune run to completion, converting the event-driven
//! progress stream into a single awaitable outcome. Completion is an
//! explicit single-shot channel resolved directly by the orchestrator's own
//! event handling, so no state-change filtering or listener detach is
//! needed: the sender is consumed on first resolution and re-resolution is
//! impossible by construction.

use crate::error::{EngineError, EngineResult};
use crate::store::{StatePatch, StateStore};
use crate::traits::BackendRpc;
use chrono::Utc;
use shared::{AutotuneResult, Preset, SessionState, TuneMode, TuningProgress};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Terminal outcome of an awaited calibration run.
///
/// An unstable completion is a normal structured outcome, not a fault.
#[derive(Clone, Debug, PartialEq)]
pub enum TuneOutcome {
    Stable(AutotuneResult),
    Unstable(AutotuneResult),
    Cancelled,
}

/// Calibration phase as derivable from session state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TunePhase {
    Idle,
    Running,
    CompletedStable,
    CompletedUnstable,
}

impl TunePhase {
    pub fn of(state: &SessionState) -> Self {
        if state.is_autotuning {
            return TunePhase::Running;
        }
        match &state.autotune_result {
            Some(result) if result.stable => TunePhase::CompletedStable,
            Some(_) => TunePhase::CompletedUnstable,
            None => TunePhase::Idle,
        }
    }
}

pub struct AutotuneOrchestrator<B: BackendRpc> {
    store: Arc<StateStore>,
    backend: Arc<B>,
    /// Single-shot completion channel for an awaited run
    pending: Mutex<Option<oneshot::Sender<TuneOutcome>>>,
}

impl<B: BackendRpc> AutotuneOrchestrator<B> {
    pub fn new(store: Arc<StateStore>, backend: Arc<B>) -> Self {
        Self {
            store,
            backend,
            pending: Mutex::new(None),
        }
    }

    /// Begin a calibration run.
    ///
    /// Rejects with `AlreadyRunning` while a run is active. An RPC-level
    /// rejection is surfaced to the caller and leaves `is_autotuning`
    /// untouched.
    pub async fn start(&self, mode: TuneMode) -> EngineResult<()> {
        if self.store.get().is_autotuning {
            return Err(EngineError::AlreadyRunning);
        }

        info!("🔬 Starting autotune ({mode})");
        let ack = self.backend.start_autotune(mode).await?;
        if !ack.success {
            return Err(EngineError::rejected(
                "start_autotune",
                ack.error.unwrap_or_else(|| "unspecified".to_string()),
            ));
        }

        self.store.merge(StatePatch {
            is_autotuning: Some(true),
            autotune_result: Some(None),
            autotune_progress: Some(None),
            ..Default::default()
        });
        Ok(())
    }

    /// Run a calibration for the currently foregrounded game and persist the
    /// discovered vector as a tested preset on a stable outcome.
    ///
    /// Fails fast with `NoActiveGame` (and zero RPC calls) when no game is
    /// foregrounded.
    pub async fn tune_for_current_game(&self, mode: TuneMode) -> EngineResult<TuneOutcome> {
        let Some(app) = self.store.get().running_app else {
            return Err(EngineError::NoActiveGame);
        };

        let (tx, rx) = oneshot::channel();
        {
            // Registered before the start RPC so a fast completion cannot
            // slip past the await. An occupied slot means another call is
            // already awaiting; replacing its sender would resolve that
            // waiter as cancelled while calibration keeps running.
            let mut pending = self.pending.lock().expect("autotune pending lock poisoned");
            if pending.is_some() {
                return Err(EngineError::AlreadyRunning);
            }
            *pending = Some(tx);
        }

        if let Err(e) = self.start(mode).await {
            self.pending.lock().expect("autotune pending lock poisoned").take();
            return Err(e);
        }

        info!("🎮 Tuning for {} ({})", app.display_name, app.app_id);
        let outcome = rx.await.unwrap_or(TuneOutcome::Cancelled);

        if let TuneOutcome::Stable(result) = &outcome {
            let preset = Preset {
                app_id: app.app_id,
                label: app.display_name.clone(),
                value: result.cores,
                use_timeout: false,
                timeout: 0,
                created_at: Utc::now(),
                tested: true,
            };
            self.backend.save_preset(preset.clone()).await?;

            let mut presets = self.store.get().presets;
            presets.insert(preset.app_id, preset);
            self.store.merge(StatePatch {
                presets: Some(presets),
                ..Default::default()
            });
            info!("💾 Saved tested preset for {}", app.display_name);
        }

        Ok(outcome)
    }

    /// Record a progress push during a run
    pub fn record_progress(&self, progress: TuningProgress) {
        debug!(
            "🔬 Tuning progress: phase {} core {} value {} eta {}s",
            progress.phase, progress.core, progress.value, progress.eta
        );
        self.store.merge(StatePatch {
            autotune_progress: Some(Some(progress)),
            ..Default::default()
        });
    }

    /// Handle a completion push from the backend.
    ///
    /// Redelivery is harmless: the state merge is idempotent and the
    /// completion sender is gone after the first delivery.
    pub fn complete(&self, result: AutotuneResult) {
        info!(
            "🏁 Autotune complete: stable={} cores={:?} ({} tests)",
            result.stable, result.cores, result.tests_run
        );
        self.store.merge(StatePatch {
            autotune_result: Some(Some(result.clone())),
            autotune_progress: Some(None),
            is_autotuning: Some(false),
            ..Default::default()
        });

        if let Some(tx) = self.pending.lock().expect("autotune pending lock poisoned").take() {
            let outcome = if result.stable {
                TuneOutcome::Stable(result)
            } else {
                TuneOutcome::Unstable(result)
            };
            let _ = tx.send(outcome);
        }
    }

    /// Cancel a running calibration.
    ///
    /// On backend acknowledgement the running flags are cleared and any
    /// awaited `tune_for_current_game` resolves as cancelled. A rejection
    /// leaves `is_autotuning` untouched.
    pub async fn stop(&self) -> EngineResult<()> {
        info!("🛑 Stopping autotune");
        let ack = self.backend.stop_autotune().await?;
        if !ack.success {
            return Err(EngineError::rejected(
                "stop_autotune",
                ack.error.unwrap_or_else(|| "unspecified".to_string()),
            ));
        }

        self.store.merge(StatePatch {
            is_autotuning: Some(false),
            autotune_progress: Some(None),
            ..Default::default()
        });
        self.cancel_pending();
        Ok(())
    }

    /// Resolve any awaited run as cancelled without a backend round-trip.
    /// Used by the panic-disable path, which must succeed from any state.
    pub fn cancel_pending(&self) {
        if let Some(tx) = self.pending.lock().expect("autotune pending lock poisoned").take() {
            warn!("Autotune wait resolved as cancelled");
            let _ = tx.send(TuneOutcome::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_derivation() {
        let mut state = SessionState::default();
        assert_eq!(TunePhase::of(&state), TunePhase::Idle);

        state.is_autotuning = true;
        assert_eq!(TunePhase::of(&state), TunePhase::Running);

        state.is_autotuning = false;
        state.autotune_result = Some(AutotuneResult {
            cores: [-15, -15, -10, -10],
            duration: 120.0,
            tests_run: 8,
            stable: true,
        });
        assert_eq!(TunePhase::of(&state), TunePhase::CompletedStable);

        state.autotune_result.as_mut().unwrap().stable = false;
        assert_eq!(TunePhase::of(&state), TunePhase::CompletedUnstable);
    }
}
