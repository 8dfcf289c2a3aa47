//! Owner of the single recurring rotation alarm.
//!
//! Both operations clear the reserved alarm before touching anything else so
//! the host never holds two schedules. The alarm is mutated even when the
//! following save fails; callers receive the save outcome and report it as a
//! warning.

use anyhow::{Context, Result};
use std::sync::Arc;

use super::context::SharedState;
use crate::constants::ROTATION_ALARM;
use crate::host::AlarmFacility;
use crate::state::{Millis, Phase};
use crate::time_source::{TimeSource, format_millis};

/// Result of a successful start or stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleChange {
    pub next_fire_at: Option<Millis>,
    /// Whether the new state reached durable storage.
    pub saved: bool,
}

#[derive(Clone)]
pub struct Scheduler {
    state: SharedState,
    alarms: Arc<dyn AlarmFacility>,
    clock: Arc<dyn TimeSource>,
}

impl Scheduler {
    pub fn new(state: SharedState, alarms: Arc<dyn AlarmFacility>, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            state,
            alarms,
            clock,
        }
    }

    /// Start a fresh cycle of `cycleDurationMs` from now.
    pub fn start_cycle(&self) -> Result<ScheduleChange> {
        let cycle = self.state.snapshot().cycle_duration_ms;

        self.alarms
            .clear(ROTATION_ALARM)
            .context("Failed to clear the rotation alarm")?;
        self.alarms
            .create(ROTATION_ALARM, cycle, Some(cycle))
            .context("Failed to create the rotation alarm")?;

        let now = self.clock.now_millis();
        let next_fire_at = now + cycle as Millis;

        let saved = self.state.update(|s| {
            s.enabled = true;
            s.timer_active = true;
            s.phase = Phase::Idle;
            s.next_fire_at = Some(next_fire_at);
            s.session_started_at = Some(now);
        });

        log_block_start!("Rotation cycle started");
        log_indented!("Every {}s, next at {}", cycle / 1000, format_millis(next_fire_at));
        if !saved {
            log_warning!("Cycle started but the new state was not saved");
        }

        Ok(ScheduleChange {
            next_fire_at: Some(next_fire_at),
            saved,
        })
    }

    /// Cancel future fires and return to the idle state.
    ///
    /// A sequence already running in a page is not interrupted.
    pub fn stop_cycle(&self) -> Result<ScheduleChange> {
        let cleared = self
            .alarms
            .clear(ROTATION_ALARM)
            .context("Failed to clear the rotation alarm")?;

        let saved = self.state.update(|s| {
            s.enabled = false;
            s.phase = Phase::Idle;
            s.make_idle();
        });

        log_block_start!("Rotation cycle stopped");
        if !cleared {
            log_indented!("No alarm was scheduled");
        }
        if !saved {
            log_warning!("Cycle stopped but the new state was not saved");
        }

        Ok(ScheduleChange {
            next_fire_at: None,
            saved,
        })
    }
}
