//! Preset resolution
//!
//! Pure decision logic: given the foregrounded app and the current
//! presets/settings, compute which core-voltage vector and status label
//! should be active. No side effects; callers act on the result.

use shared::{CoreOffsets, Preset, Status, DISABLED_OFFSETS};
use std::collections::HashMap;

/// The configuration the engine should drive toward
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedTarget {
    pub cores: CoreOffsets,
    pub status: Status,
    pub timeout_secs: u32,
    /// Set only when an exact preset match won
    pub preset_app_id: Option<u32>,
}

/// Resolve the target configuration for the given foreground app.
///
/// An exact `app_id` match always wins over the global fallback, regardless
/// of settings. Without a match the global vector is used when the fallback
/// is enabled, otherwise the all-zero disabled vector.
pub fn resolve(
    running_app_id: Option<u32>,
    presets: &HashMap<u32, Preset>,
    global_fallback_enabled: bool,
    global_cores: CoreOffsets,
) -> ResolvedTarget {
    if let Some(preset) = running_app_id.and_then(|id| presets.get(&id)) {
        return ResolvedTarget {
            cores: preset.value,
            status: Status::using_preset(&preset.label),
            timeout_secs: preset.effective_timeout(),
            preset_app_id: Some(preset.app_id),
        };
    }

    if global_fallback_enabled {
        return ResolvedTarget {
            cores: global_cores,
            status: Status::Global,
            timeout_secs: 0,
            preset_app_id: None,
        };
    }

    ResolvedTarget {
        cores: DISABLED_OFFSETS,
        status: Status::Disabled,
        timeout_secs: 0,
        preset_app_id: None,
    }
}
