//! The durable settings and runtime-state record.
//!
//! Configuration and runtime fields live in one document so a single write
//! updates both atomically. The background coordinator owns the record; UI
//! surfaces only ever see copies returned by `get_state` and change the
//! configuration half through [`SettingsPatch`].

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::*;

pub mod migration;
pub mod storage;
pub mod store;

/// Epoch milliseconds.
pub type Millis = i64;

/// Opaque handle of a browser page (tab).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(pub i64);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rotation phase.
///
/// The persisted record only ever holds `Idle`, `Left`, `Right` or `Reset`;
/// `Error` is a transient page-side state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Left,
    Right,
    Reset,
    Error,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Left => "left",
            Phase::Right => "right",
            Phase::Reset => "reset",
            Phase::Error => "error",
        };
        f.write_str(name)
    }
}

/// Settings plus runtime state, persisted under the `user_settings` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    // Configuration
    pub enabled: bool,
    pub cycle_duration_ms: u64,
    pub rotation_duration_ms: u64,
    pub rotation_angle_deg: u32,
    pub show_indicator: bool,

    // Runtime
    pub timer_active: bool,
    pub phase: Phase,
    pub next_fire_at: Option<Millis>,
    pub total_rotations: u64,
    pub session_started_at: Option<Millis>,
    pub active_target_id: Option<TargetId>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: DEFAULT_ENABLED,
            cycle_duration_ms: DEFAULT_CYCLE_DURATION_MS,
            rotation_duration_ms: DEFAULT_ROTATION_DURATION_MS,
            rotation_angle_deg: DEFAULT_ROTATION_ANGLE_DEG,
            show_indicator: DEFAULT_SHOW_INDICATOR,
            timer_active: false,
            phase: Phase::Idle,
            next_fire_at: None,
            total_rotations: 0,
            session_started_at: None,
            active_target_id: None,
        }
    }
}

impl Settings {
    /// Force the idle runtime fields (`timerActive=false`, `nextFireAt=null`).
    pub fn make_idle(&mut self) {
        self.timer_active = false;
        self.next_fire_at = None;
    }

    /// Pull the configuration fields back into their accepted ranges.
    /// Returns `true` when anything had to change.
    pub fn clamp_to_limits(&mut self) -> bool {
        let before = (
            self.cycle_duration_ms,
            self.rotation_duration_ms,
            self.rotation_angle_deg,
        );
        self.cycle_duration_ms = self
            .cycle_duration_ms
            .clamp(MINIMUM_CYCLE_DURATION_MS, MAXIMUM_CYCLE_DURATION_MS);
        self.rotation_duration_ms = self
            .rotation_duration_ms
            .clamp(MINIMUM_ROTATION_DURATION_MS, MAXIMUM_ROTATION_DURATION_MS);
        self.rotation_angle_deg = self
            .rotation_angle_deg
            .clamp(MINIMUM_ROTATION_ANGLE_DEG, MAXIMUM_ROTATION_ANGLE_DEG);
        before
            != (
                self.cycle_duration_ms,
                self.rotation_duration_ms,
                self.rotation_angle_deg,
            )
    }

    /// True when the record claims a running schedule.
    pub fn is_scheduled(&self) -> bool {
        self.enabled && self.timer_active
    }

    /// True when an idle record still carries runtime fields of a schedule.
    pub fn has_stale_runtime(&self) -> bool {
        !self.is_scheduled() && (self.timer_active || self.next_fire_at.is_some())
    }

    /// The flattened runtime view used by `get_state`.
    pub fn state_view(&self) -> StateView {
        StateView {
            timer_active: self.timer_active,
            phase: self.phase,
            next_fire_at: self.next_fire_at,
            total_rotations: self.total_rotations,
            session_started_at: self.session_started_at,
            active_target_id: self.active_target_id,
        }
    }
}

/// Runtime fields only, the legacy `state` half of a `get_state` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateView {
    pub timer_active: bool,
    pub phase: Phase,
    pub next_fire_at: Option<Millis>,
    pub total_rotations: u64,
    pub session_started_at: Option<Millis>,
    pub active_target_id: Option<TargetId>,
}

/// Partial configuration update sent by UI surfaces.
///
/// Runtime fields are deliberately absent: the schedule is only ever changed
/// through start/stop requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_angle_deg: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_indicator: Option<bool>,
}

impl SettingsPatch {
    /// Reject values outside the supported ranges.
    pub fn validate(&self) -> Result<()> {
        if let Some(cycle) = self.cycle_duration_ms
            && !(MINIMUM_CYCLE_DURATION_MS..=MAXIMUM_CYCLE_DURATION_MS).contains(&cycle)
        {
            bail!(
                "cycleDurationMs ({cycle}) must be between {MINIMUM_CYCLE_DURATION_MS} and {MAXIMUM_CYCLE_DURATION_MS}"
            );
        }
        if let Some(rotation) = self.rotation_duration_ms
            && !(MINIMUM_ROTATION_DURATION_MS..=MAXIMUM_ROTATION_DURATION_MS).contains(&rotation)
        {
            bail!(
                "rotationDurationMs ({rotation}) must be between {MINIMUM_ROTATION_DURATION_MS} and {MAXIMUM_ROTATION_DURATION_MS}"
            );
        }
        if let Some(angle) = self.rotation_angle_deg
            && !(MINIMUM_ROTATION_ANGLE_DEG..=MAXIMUM_ROTATION_ANGLE_DEG).contains(&angle)
        {
            bail!(
                "rotationAngleDeg ({angle}) must be between {MINIMUM_ROTATION_ANGLE_DEG} and {MAXIMUM_ROTATION_ANGLE_DEG}"
            );
        }
        Ok(())
    }

    /// Merge the present fields into `settings`.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(enabled) = self.enabled {
            settings.enabled = enabled;
        }
        if let Some(cycle) = self.cycle_duration_ms {
            settings.cycle_duration_ms = cycle;
        }
        if let Some(rotation) = self.rotation_duration_ms {
            settings.rotation_duration_ms = rotation;
        }
        if let Some(angle) = self.rotation_angle_deg {
            settings.rotation_angle_deg = angle;
        }
        if let Some(show) = self.show_indicator {
            settings.show_indicator = show;
        }
    }

    /// True when the patch explicitly turns rotation off.
    pub fn disables(&self) -> bool {
        self.enabled == Some(false)
    }

    pub fn is_empty(&self) -> bool {
        *self == SettingsPatch::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_extension_defaults() {
        let settings = Settings::default();
        assert!(!settings.enabled);
        assert_eq!(settings.cycle_duration_ms, 600_000);
        assert_eq!(settings.rotation_duration_ms, 30_000);
        assert_eq!(settings.rotation_angle_deg, 15);
        assert!(settings.show_indicator);
        assert!(!settings.timer_active);
        assert_eq!(settings.phase, Phase::Idle);
        assert_eq!(settings.next_fire_at, None);
    }

    #[test]
    fn test_partial_document_merges_with_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"enabled":true,"rotationAngleDeg":20,"somethingElse":1}"#)
                .unwrap();
        assert!(settings.enabled);
        assert_eq!(settings.rotation_angle_deg, 20);
        assert_eq!(settings.cycle_duration_ms, DEFAULT_CYCLE_DURATION_MS);
    }

    #[test]
    fn test_json_field_names() {
        let mut settings = Settings::default();
        settings.next_fire_at = Some(42);
        settings.active_target_id = Some(TargetId(7));
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["nextFireAt"], 42);
        assert_eq!(json["activeTargetId"], 7);
        assert_eq!(json["phase"], "idle");
        assert_eq!(json["cycleDurationMs"], 600_000);
    }

    #[test]
    fn test_patch_validation_ranges() {
        let ok = SettingsPatch {
            cycle_duration_ms: Some(MINIMUM_CYCLE_DURATION_MS),
            rotation_angle_deg: Some(MAXIMUM_ROTATION_ANGLE_DEG),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let short_cycle = SettingsPatch {
            cycle_duration_ms: Some(1000),
            ..Default::default()
        };
        assert!(
            short_cycle
                .validate()
                .unwrap_err()
                .to_string()
                .contains("cycleDurationMs")
        );

        let steep = SettingsPatch {
            rotation_angle_deg: Some(90),
            ..Default::default()
        };
        assert!(steep.validate().is_err());
    }

    #[test]
    fn test_patch_ignores_runtime_fields() {
        let patch: SettingsPatch =
            serde_json::from_str(r#"{"timerActive":true,"showIndicator":false}"#).unwrap();
        let mut settings = Settings::default();
        patch.apply(&mut settings);
        assert!(!settings.timer_active);
        assert!(!settings.show_indicator);
        assert!(!patch.disables());
    }

    #[test]
    fn test_stale_runtime_detection() {
        let mut settings = Settings::default();
        assert!(!settings.has_stale_runtime());
        settings.next_fire_at = Some(1);
        assert!(settings.has_stale_runtime());
        settings.enabled = true;
        settings.timer_active = true;
        assert!(!settings.has_stale_runtime());
    }
}
