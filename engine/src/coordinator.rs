//! Apply orchestration toward the voltage backend
//!
//! Turns a resolved target vector into backend RPC calls with optimistic
//! local state updates. Because RPC completions can arrive out of call
//! order, every outbound call takes an intent ticket; a completion whose
//! ticket has been superseded by a newer call discards its status merge
//! (last intent wins).

use crate::error::EngineResult;
use crate::resolver::ResolvedTarget;
use crate::store::{StatePatch, StateStore};
use crate::traits::BackendRpc;
use shared::{CoreOffsets, DynamicSettings, Status};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ApplyCoordinator<B: BackendRpc> {
    store: Arc<StateStore>,
    backend: Arc<B>,
    /// Monotonic ticket of the most recent outbound intent
    intent: AtomicU64,
}

impl<B: BackendRpc> ApplyCoordinator<B> {
    pub fn new(store: Arc<StateStore>, backend: Arc<B>) -> Self {
        Self {
            store,
            backend,
            intent: AtomicU64::new(0),
        }
    }

    fn next_intent(&self) -> u64 {
        self.intent.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn superseded(&self, ticket: u64) -> bool {
        self.intent.load(Ordering::SeqCst) != ticket
    }

    /// Apply an explicit vector, marking the status as manually enabled.
    ///
    /// The `cores` merge happens before the RPC settles so the interface
    /// reflects user intent immediately. A rejected RPC is surfaced but the
    /// optimistic value stays in place; the backend's own queue typically
    /// still attempts the write.
    pub async fn apply(&self, cores: CoreOffsets, timeout_secs: u32) -> EngineResult<()> {
        let ticket = self.next_intent();
        info!("⚡ Applying undervolt {:?} (timeout {}s)", cores, timeout_secs);

        self.store.merge(StatePatch {
            cores: Some(cores),
            ..Default::default()
        });
        self.backend.apply_undervolt(cores, timeout_secs).await?;

        if self.superseded(ticket) {
            debug!("Apply completed after a newer intent, discarding status update");
            return Ok(());
        }
        self.store.merge(StatePatch {
            status: Some(Status::Enabled),
            current_preset: Some(None),
            ..Default::default()
        });
        Ok(())
    }

    /// Drive a resolver decision to the backend.
    ///
    /// A `Disabled` target goes through the disable path so the stored
    /// vector survives for the next enable instead of being overwritten
    /// with zeros.
    pub async fn apply_target(&self, target: ResolvedTarget) -> EngineResult<()> {
        if target.status == Status::Disabled {
            return self.disable().await;
        }

        let ticket = self.next_intent();
        info!(
            "⚡ Applying {:?} for {} (timeout {}s)",
            target.cores, target.status, target.timeout_secs
        );

        self.store.merge(StatePatch {
            cores: Some(target.cores),
            current_preset: Some(target.preset_app_id),
            ..Default::default()
        });
        self.backend.apply_undervolt(target.cores, target.timeout_secs).await?;

        if self.superseded(ticket) {
            debug!("Apply for {} superseded, discarding status update", target.status);
            return Ok(());
        }
        self.store.merge(StatePatch {
            status: Some(target.status),
            ..Default::default()
        });
        Ok(())
    }

    /// Re-issue the currently stored vector without touching the status
    /// label. Used after resume from suspend, where the backend may have
    /// forgotten volatile register state.
    pub async fn reapply(&self, timeout_secs: u32) -> EngineResult<()> {
        let cores = self.store.get().cores;
        let _ticket = self.next_intent();
        info!("🔁 Re-applying {:?} (timeout {}s)", cores, timeout_secs);
        self.backend.apply_undervolt(cores, timeout_secs).await
    }

    /// Disable undervolting. The stored `cores` are preserved for the next
    /// enable; only the effective hardware state and the status change.
    pub async fn disable(&self) -> EngineResult<()> {
        let ticket = self.next_intent();
        info!("⏹️  Disabling undervolt");

        self.backend.disable_undervolt().await?;

        if self.superseded(ticket) {
            debug!("Disable superseded, discarding status update");
            return Ok(());
        }
        self.store.merge(StatePatch {
            status: Some(Status::Disabled),
            current_preset: Some(None),
            ..Default::default()
        });
        Ok(())
    }

    /// Emergency reset. Local flags are cleared before the RPC settles so
    /// no failure mode can leave a calibration marked as running.
    pub async fn panic_disable(&self) -> EngineResult<()> {
        let _ticket = self.next_intent();
        warn!("🚨 Panic disable requested");

        self.store.merge(StatePatch {
            status: Some(Status::Disabled),
            is_autotuning: Some(false),
            autotune_progress: Some(None),
            dynamic_running: Some(false),
            current_preset: Some(None),
            ..Default::default()
        });
        self.backend.panic_disable().await
    }

    /// Enable or disable the closed-loop voltage mode.
    ///
    /// Closed-loop mode and explicit-vector apply are mutually exclusive at
    /// the status level; callers must disable one before starting the other.
    pub async fn set_dynamic_mode(&self, on: bool, settings: DynamicSettings) -> EngineResult<()> {
        if on {
            info!("📈 Starting closed-loop voltage mode");
            self.backend.start_gymdeck(settings.clone()).await?;
            self.store.merge(StatePatch {
                dynamic_settings: Some(settings),
                dynamic_running: Some(true),
                status: Some(Status::DynamicRunning),
                ..Default::default()
            });
        } else {
            info!("📉 Stopping closed-loop voltage mode");
            self.backend.stop_gymdeck().await?;
            self.store.merge(StatePatch {
                dynamic_running: Some(false),
                status: Some(Status::Disabled),
                ..Default::default()
            });
        }
        Ok(())
    }
}
