//! Canonical session state store
//!
//! The store is the single owner of `SessionState`. All mutation goes
//! through `merge`, which applies a shallow patch under the lock and
//! broadcasts the post-merge snapshot before releasing it, so subscribers
//! observe merges atomically and strictly in merge order.

use shared::{
    AutotuneResult, CoreOffsets, DynamicSettings, EngineSettings, Preset, RunningApp, SessionState,
    Status, TestRecord, TuningProgress, TEST_HISTORY_LIMIT,
};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Shallow patch over `SessionState`.
///
/// `None` leaves a field unchanged. Nullable state fields use a second
/// `Option` level so a patch can distinguish "leave unchanged" from "clear".
#[derive(Debug, Default)]
pub struct StatePatch {
    pub cores: Option<CoreOffsets>,
    pub global_cores: Option<CoreOffsets>,
    pub presets: Option<HashMap<u32, Preset>>,
    pub settings: Option<EngineSettings>,
    pub dynamic_settings: Option<DynamicSettings>,
    pub running_app: Option<Option<RunningApp>>,
    pub current_preset: Option<Option<u32>>,
    pub status: Option<Status>,
    pub autotune_progress: Option<Option<TuningProgress>>,
    pub autotune_result: Option<Option<AutotuneResult>>,
    pub is_autotuning: Option<bool>,
    pub current_test: Option<Option<String>>,
    pub is_test_running: Option<bool>,
    pub test_history: Option<Vec<TestRecord>>,
    pub dynamic_running: Option<bool>,
}

/// Synchronized holder of the canonical `SessionState`
pub struct StateStore {
    state: Mutex<SessionState>,
    notifier: broadcast::Sender<SessionState>,
}

impl StateStore {
    pub fn new(initial: SessionState) -> Self {
        let (notifier, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(initial),
            notifier,
        }
    }

    /// Synchronous snapshot of the current state
    pub fn get(&self) -> SessionState {
        self.state.lock().expect("session state lock poisoned").clone()
    }

    /// Current status label
    pub fn status(&self) -> Status {
        self.state.lock().expect("session state lock poisoned").status.clone()
    }

    /// Subscribe to post-merge snapshots, delivered in merge order
    pub fn subscribe(&self) -> broadcast::Receiver<SessionState> {
        self.notifier.subscribe()
    }

    /// Shallow-merge a patch into the canonical state and notify subscribers.
    ///
    /// The snapshot is sent while the lock is held, which is what keeps
    /// notification order identical to merge order under concurrent callers.
    pub fn merge(&self, patch: StatePatch) {
        let mut state = self.state.lock().expect("session state lock poisoned");

        if let Some(cores) = patch.cores {
            state.cores = cores;
        }
        if let Some(global_cores) = patch.global_cores {
            state.global_cores = global_cores;
        }
        if let Some(presets) = patch.presets {
            state.presets = presets;
        }
        if let Some(settings) = patch.settings {
            state.settings = settings;
        }
        if let Some(dynamic_settings) = patch.dynamic_settings {
            state.dynamic_settings = dynamic_settings;
        }
        if let Some(running_app) = patch.running_app {
            state.running_app = running_app;
        }
        if let Some(current_preset) = patch.current_preset {
            state.current_preset = current_preset;
        }
        if let Some(status) = patch.status {
            state.status = status;
        }
        if let Some(progress) = patch.autotune_progress {
            state.autotune_progress = progress;
        }
        if let Some(result) = patch.autotune_result {
            state.autotune_result = result;
        }
        if let Some(is_autotuning) = patch.is_autotuning {
            state.is_autotuning = is_autotuning;
        }
        if let Some(current_test) = patch.current_test {
            state.current_test = current_test;
        }
        if let Some(is_test_running) = patch.is_test_running {
            state.is_test_running = is_test_running;
        }
        if let Some(mut history) = patch.test_history {
            history.truncate(TEST_HISTORY_LIMIT);
            state.test_history = history;
        }
        if let Some(dynamic_running) = patch.dynamic_running {
            state.dynamic_running = dynamic_running;
        }

        // No subscribers is fine; send only fails when there are none
        let _ = self.notifier.send(state.clone());
    }
}
