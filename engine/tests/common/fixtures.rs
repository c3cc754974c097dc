//! Test fixtures and data for engine tests
//!
//! Provides consistent presets, configurations and event payloads used
//! across the test suites.

use chrono::Utc;
use shared::{
    AutotuneResult, BackendConfig, CoreOffsets, EngineSettings, LifecycleEvent, Preset,
    SessionState, TestRecord,
};

/// Standard test data and fixtures
pub struct TestFixtures;

impl TestFixtures {
    /// App ids used throughout the suites
    pub const HL2_APP_ID: u32 = 220;
    pub const HL2_NAME: &'static str = "Half-Life 2";
    pub const UNKNOWN_APP_ID: u32 = 400;

    /// Vectors with recognizable shapes
    pub const HL2_OFFSETS: CoreOffsets = [-20, -20, -20, -20];
    pub const GLOBAL_OFFSETS: CoreOffsets = [-5, -5, -5, -5];
    pub const MANUAL_OFFSETS: CoreOffsets = [-12, -12, -8, -8];

    pub fn hl2_preset() -> Preset {
        Preset {
            app_id: Self::HL2_APP_ID,
            label: Self::HL2_NAME.to_string(),
            value: Self::HL2_OFFSETS,
            use_timeout: false,
            timeout: 0,
            created_at: Utc::now(),
            tested: false,
        }
    }

    /// Settings with auto-apply on and the global fallback enabled
    pub fn settings_with_global() -> EngineSettings {
        EngineSettings {
            is_global: true,
            ..EngineSettings::default()
        }
    }

    /// Backend configuration carrying the HL2 preset and a global vector
    pub fn config_with_preset() -> BackendConfig {
        BackendConfig {
            global_cores: Self::GLOBAL_OFFSETS,
            settings: Self::settings_with_global(),
            presets: vec![Self::hl2_preset()],
            ..Default::default()
        }
    }

    /// Session state equivalent of `config_with_preset`
    pub fn session_with_preset() -> SessionState {
        SessionState::from_config(Self::config_with_preset())
    }

    pub fn stable_result() -> AutotuneResult {
        AutotuneResult {
            cores: [-30, -28, -25, -25],
            duration: 540.0,
            tests_run: 24,
            stable: true,
        }
    }

    pub fn unstable_result() -> AutotuneResult {
        AutotuneResult {
            stable: false,
            ..Self::stable_result()
        }
    }

    pub fn test_record(name: &str, passed: bool) -> TestRecord {
        TestRecord {
            name: name.to_string(),
            passed,
            duration: 30.0,
            logs: String::new(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn game_started(app_id: u32, name: &str) -> LifecycleEvent {
        LifecycleEvent::AppForegroundChanged {
            app_id,
            display_name: name.to_string(),
            running: true,
        }
    }

    pub fn game_stopped(app_id: u32) -> LifecycleEvent {
        LifecycleEvent::AppForegroundChanged {
            app_id,
            display_name: String::new(),
            running: false,
        }
    }
}
