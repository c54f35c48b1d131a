//! Engine Settings
//!
//! Configuration consumed by [`Engine`](crate::engine::Engine) and
//! [`FrameScheduler`](crate::render::scheduler::FrameScheduler).
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use myth_frame::settings::{EngineSettings, LockstepSettings};
//!
//! // Free-running animation, default rendering options
//! let settings = EngineSettings::default();
//!
//! // Deterministic 60 Hz simulation, at most 5 catch-up steps per frame
//! let settings = EngineSettings {
//!     lockstep: LockstepSettings {
//!         enabled: true,
//!         max_sub_steps: 5,
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//!
//! // Or from JSON; missing fields keep their defaults
//! let settings = EngineSettings::from_json(r#"{ "lockstep": { "enabled": true } }"#)?;
//! ```
//!
//! # Lockstep
//!
//! | Field | Default | Meaning |
//! |-------|---------|---------|
//! | `enabled` | `false` | Fixed-step simulation instead of measured deltas |
//! | `time_step_ms` | `1000 / 60` | Size of one fixed substep |
//! | `max_sub_steps` | `4` | Upper bound of substeps per frame |
//! | `min_delta_ms` | `1` | Lower clamp of the measured frame delta |
//! | `max_delta_ms` | `1000` | Upper clamp of the measured frame delta |

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Default fixed substep: one 60 Hz frame, in milliseconds.
pub const DEFAULT_FRAME_TIME_MS: f32 = 1000.0 / 60.0;

// ---------------------------------------------------------------------------
// LockstepSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockstepSettings {
    pub enabled: bool,
    pub time_step_ms: f32,
    pub max_sub_steps: u32,
    pub min_delta_ms: f32,
    pub max_delta_ms: f32,
}

impl Default for LockstepSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            time_step_ms: DEFAULT_FRAME_TIME_MS,
            max_sub_steps: 4,
            min_delta_ms: 1.0,
            max_delta_ms: 1000.0,
        }
    }
}

impl LockstepSettings {
    /// Clamps a measured frame delta into `[min_delta_ms, max_delta_ms]`.
    #[inline]
    #[must_use]
    pub fn clamp_delta(&self, delta_ms: f32) -> f32 {
        delta_ms.clamp(self.min_delta_ms, self.max_delta_ms)
    }

    fn sanitize(&mut self) {
        let defaults = Self::default();
        if !(self.time_step_ms.is_finite() && self.time_step_ms > 0.0) {
            log::warn!("lockstep.time_step_ms must be positive, using {}", defaults.time_step_ms);
            self.time_step_ms = defaults.time_step_ms;
        }
        if self.max_sub_steps == 0 {
            log::warn!("lockstep.max_sub_steps must be at least 1");
            self.max_sub_steps = 1;
        }
        if !(self.min_delta_ms.is_finite() && self.min_delta_ms >= 0.0) {
            self.min_delta_ms = defaults.min_delta_ms;
        }
        if !(self.max_delta_ms.is_finite() && self.max_delta_ms >= self.min_delta_ms) {
            log::warn!("lockstep.max_delta_ms must not be below min_delta_ms");
            self.max_delta_ms = self.min_delta_ms.max(defaults.max_delta_ms);
        }
    }
}

// ---------------------------------------------------------------------------
// RenderingSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderingSettings {
    /// Run the animation phase inside `render()`.
    pub animations_enabled: bool,
    /// Render custom and gathered render targets.
    pub render_targets_enabled: bool,
    /// Keep program, viewport and VAO comparison state across frames.
    ///
    /// Leave disabled when other code may touch the context between frames.
    pub prevent_cache_wipe_between_frames: bool,
    /// Use fewer texture units than the hardware offers.
    pub texture_unit_limit: Option<u32>,
}

impl Default for RenderingSettings {
    fn default() -> Self {
        Self {
            animations_enabled: true,
            render_targets_enabled: true,
            prevent_cache_wipe_between_frames: false,
            texture_unit_limit: None,
        }
    }
}

// ---------------------------------------------------------------------------
// EngineSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub lockstep: LockstepSettings,
    pub rendering: RenderingSettings,
}

impl EngineSettings {
    /// Parses settings from JSON. Out-of-range values are replaced (with a
    /// warning) rather than rejected.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut settings: Self = serde_json::from_str(json)?;
        settings.sanitize();
        Ok(settings)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn sanitize(&mut self) {
        self.lockstep.sanitize();
        if self.rendering.texture_unit_limit == Some(0) {
            log::warn!("rendering.texture_unit_limit of 0 ignored");
            self.rendering.texture_unit_limit = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_keep_defaults() {
        let settings = EngineSettings::from_json(r#"{ "lockstep": { "enabled": true } }"#).unwrap();
        assert!(settings.lockstep.enabled);
        assert_eq!(settings.lockstep.max_sub_steps, 4);
        assert!((settings.lockstep.time_step_ms - DEFAULT_FRAME_TIME_MS).abs() < 1e-6);
        assert_eq!(settings.rendering, RenderingSettings::default());
    }

    #[test]
    fn invalid_values_are_replaced() {
        let json = r#"{ "lockstep": { "time_step_ms": -1.0, "max_sub_steps": 0 } }"#;
        let settings = EngineSettings::from_json(json).unwrap();
        assert!((settings.lockstep.time_step_ms - DEFAULT_FRAME_TIME_MS).abs() < 1e-6);
        assert_eq!(settings.lockstep.max_sub_steps, 1);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(EngineSettings::from_json("{ lockstep: ").is_err());
    }

    #[test]
    fn delta_is_clamped() {
        let lockstep = LockstepSettings::default();
        assert!((lockstep.clamp_delta(0.0) - 1.0).abs() < f32::EPSILON);
        assert!((lockstep.clamp_delta(5000.0) - 1000.0).abs() < f32::EPSILON);
    }
}
