//! Core shared types for the undervolt control engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Number of independently addressable CPU cores on the device
pub const CORE_COUNT: usize = 4;

/// Maximum number of retained stress-test records, most recent first
pub const TEST_HISTORY_LIMIT: usize = 10;

/// Per-core undervolt offsets in signed millivolts
pub type CoreOffsets = [i32; CORE_COUNT];

/// The all-zero vector applied when undervolting is off
pub const DISABLED_OFFSETS: CoreOffsets = [0; CORE_COUNT];

/// Identity of the currently foregrounded game
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningApp {
    pub app_id: u32,
    pub display_name: String,
}

/// A saved per-application voltage configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub app_id: u32,
    pub label: String,
    pub value: CoreOffsets,
    pub use_timeout: bool,
    /// Apply timeout in seconds, only meaningful when `use_timeout` is set
    pub timeout: u32,
    pub created_at: DateTime<Utc>,
    /// True only when the values were produced or validated by calibration
    pub tested: bool,
}

impl Preset {
    /// Effective apply timeout for this preset
    pub fn effective_timeout(&self) -> u32 {
        if self.use_timeout { self.timeout } else { 0 }
    }
}

/// Engine feature flags, persisted by the backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    /// Fall back to the global vector when no preset matches
    pub is_global: bool,
    /// Apply automatically when a game comes to the foreground
    pub is_run_automatically: bool,
    /// Re-apply the stored vector when the engine starts
    pub run_at_startup: bool,
    /// Default apply timeout in seconds
    pub timeout_apply: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            is_global: false,
            is_run_automatically: true,
            run_at_startup: false,
            timeout_apply: 15,
        }
    }
}

/// One point on a manual load/voltage curve for the closed-loop mode
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub load: u32,
    pub value: i32,
}

/// Per-core configuration for the closed-loop controller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicCoreCurve {
    pub manual_points: Vec<CurvePoint>,
    pub minimum_value: u32,
    pub maximum_value: u32,
    pub threshold: u32,
}

impl Default for DynamicCoreCurve {
    fn default() -> Self {
        Self {
            manual_points: Vec::new(),
            minimum_value: 0,
            maximum_value: 100,
            threshold: 0,
        }
    }
}

/// Configuration blob for the closed-loop ("dynamic") voltage mode.
///
/// The engine treats this as opaque: it is handed to the backend verbatim
/// when the mode is started.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicSettings {
    pub cores: Vec<DynamicCoreCurve>,
    pub strategy: String,
    /// Load sampling interval in microseconds
    pub sample_interval: u64,
}

impl Default for DynamicSettings {
    fn default() -> Self {
        Self {
            cores: vec![DynamicCoreCurve::default(); CORE_COUNT],
            strategy: "DEFAULT".to_string(),
            sample_interval: 50_000,
        }
    }
}

/// The closed set of status labels summarizing the effective configuration
/// source.
///
/// Serialized to the exact wire labels consumed by the interface layer;
/// unrecognized labels deserialize to `Error`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Disabled,
    Enabled,
    Global,
    UsingPreset(String),
    DynamicRunning,
    Error,
}

const USING_PRESET_PREFIX: &str = "Using preset for ";

impl Status {
    /// Parse a wire label; anything outside the closed set maps to `Error`
    pub fn parse(label: &str) -> Self {
        match label {
            "disabled" => Status::Disabled,
            "enabled" => Status::Enabled,
            "Global" => Status::Global,
            "DYNAMIC RUNNING" => Status::DynamicRunning,
            "error" => Status::Error,
            other => match other.strip_prefix(USING_PRESET_PREFIX) {
                Some(name) if !name.is_empty() => Status::UsingPreset(name.to_string()),
                _ => Status::Error,
            },
        }
    }

    /// True when the label indicates an actively applied vector that has to
    /// survive a suspend/resume cycle
    pub fn is_active(&self) -> bool {
        matches!(self, Status::Enabled | Status::UsingPreset(_))
    }

    pub fn using_preset(label: &str) -> Self {
        Status::UsingPreset(label.to_string())
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Disabled
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Disabled => write!(f, "disabled"),
            Status::Enabled => write!(f, "enabled"),
            Status::Global => write!(f, "Global"),
            Status::UsingPreset(name) => write!(f, "{USING_PRESET_PREFIX}{name}"),
            Status::DynamicRunning => write!(f, "DYNAMIC RUNNING"),
            Status::Error => write!(f, "error"),
        }
    }
}

impl Serialize for Status {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(Status::parse(&label))
    }
}

/// Calibration search depth requested from the backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TuneMode {
    Quick,
    Thorough,
}

impl fmt::Display for TuneMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TuneMode::Quick => write!(f, "quick"),
            TuneMode::Thorough => write!(f, "thorough"),
        }
    }
}

/// Progress record pushed by the backend during a calibration run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningProgress {
    /// Calibration phase identifier ("A" or "B")
    pub phase: String,
    /// Core index currently being probed (0-3)
    pub core: u8,
    /// Offset value currently under test
    pub value: i32,
    /// Estimated seconds remaining
    pub eta: u32,
}

/// Final record of a calibration run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutotuneResult {
    pub cores: CoreOffsets,
    /// Wall-clock duration in seconds
    pub duration: f64,
    pub tests_run: u32,
    /// True only when every core passed validation
    pub stable: bool,
}

/// One stress-test outcome, as stored in backend-owned history
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestRecord {
    pub name: String,
    pub passed: bool,
    pub duration: f64,
    pub logs: String,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Hardware platform descriptor reported by the backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub model: String,
    pub variant: String,
    pub supported: bool,
}

/// System descriptor used for diagnostics exports
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub hardware: String,
    pub os: String,
    pub kernel: String,
}

/// Generic success/failure acknowledgement for backend operations
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcAck {
    pub success: bool,
    pub error: Option<String>,
}

impl RpcAck {
    pub fn ok() -> Self {
        Self { success: true, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()) }
    }
}

/// Result of a preset import
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub success: bool,
    pub imported_count: Option<u32>,
    pub error: Option<String>,
}

/// Result of a diagnostics export
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsExport {
    pub success: bool,
    pub path: Option<String>,
    pub error: Option<String>,
}

/// Configuration snapshot returned by the backend at engine start
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    pub cores: CoreOffsets,
    pub global_cores: CoreOffsets,
    pub settings: EngineSettings,
    pub dynamic_settings: DynamicSettings,
    pub presets: Vec<Preset>,
    pub status: Status,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            cores: DISABLED_OFFSETS,
            global_cores: DISABLED_OFFSETS,
            settings: EngineSettings::default(),
            dynamic_settings: DynamicSettings::default(),
            presets: Vec::new(),
            status: Status::Disabled,
        }
    }
}

/// Push events emitted by the backend over its event channel.
///
/// The wire shape is a tagged `{type, data}` envelope, which also serves the
/// alternate dispatch transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    TuningProgress(TuningProgress),
    TuningComplete(AutotuneResult),
    TestComplete(TestRecord),
    UpdateStatus(String),
}

/// OS process-lifecycle notifications consumed by the engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum LifecycleEvent {
    AppForegroundChanged {
        app_id: u32,
        display_name: String,
        running: bool,
    },
    ResumeFromSuspend,
}

/// Canonical in-memory representation of the whole session.
///
/// Owned exclusively by the engine's state store and mutated only through
/// its merge operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// Currently applied per-core offsets
    pub cores: CoreOffsets,
    /// Non-per-game fallback vector
    pub global_cores: CoreOffsets,
    /// One preset per app id, uniqueness enforced by the map
    pub presets: HashMap<u32, Preset>,
    pub settings: EngineSettings,
    pub dynamic_settings: DynamicSettings,
    pub running_app: Option<RunningApp>,
    /// Key of the preset currently considered active; never an owning copy
    pub current_preset: Option<u32>,
    pub status: Status,
    pub autotune_progress: Option<TuningProgress>,
    pub autotune_result: Option<AutotuneResult>,
    pub is_autotuning: bool,
    pub current_test: Option<String>,
    pub is_test_running: bool,
    /// Most recent first, bounded at `TEST_HISTORY_LIMIT`
    pub test_history: Vec<TestRecord>,
    /// Closed-loop mode flag
    pub dynamic_running: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            cores: DISABLED_OFFSETS,
            global_cores: DISABLED_OFFSETS,
            presets: HashMap::new(),
            settings: EngineSettings::default(),
            dynamic_settings: DynamicSettings::default(),
            running_app: None,
            current_preset: None,
            status: Status::Disabled,
            autotune_progress: None,
            autotune_result: None,
            is_autotuning: false,
            current_test: None,
            is_test_running: false,
            test_history: Vec::new(),
            dynamic_running: false,
        }
    }
}

impl SessionState {
    /// Build the initial session from the backend's configuration snapshot
    pub fn from_config(config: BackendConfig) -> Self {
        let presets = config.presets.into_iter().map(|p| (p.app_id, p)).collect();
        Self {
            cores: config.cores,
            global_cores: config.global_cores,
            presets,
            settings: config.settings,
            dynamic_settings: config.dynamic_settings,
            status: config.status,
            ..Self::default()
        }
    }
}
