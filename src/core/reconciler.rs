//! Startup reconciliation of the stored schedule against the native alarm.
//!
//! The host may tear the coordinator down at any moment, so neither the stored
//! `nextFireAt` nor the alarm registry can be trusted alone. Each start derives
//! one consistent state from both and persists it.

use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;

use super::context::{SharedState, Timings};
use crate::constants::ROTATION_ALARM;
use crate::host::AlarmFacility;
use crate::state::Millis;
use crate::time_source::{TimeSource, format_millis};

/// What reconciliation decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Alarm and stored schedule agree.
    Consistent,
    /// Alarm recreated for a stored fire time still in the future.
    Restored { next_fire_at: Millis },
    /// Stored fire time already passed; alarm recreated to fire right away.
    Rescheduled { next_fire_at: Millis },
    /// Alarm present while the schedule is off; cleared.
    ClearedOrphan,
    /// Idle record carried leftover runtime fields; cleaned.
    Normalized,
    /// Already idle.
    Idle,
    /// Something failed; forced back to idle.
    ResetToSafeIdle { error: String },
}

impl ReconcileAction {
    pub fn is_scheduled(&self) -> bool {
        matches!(
            self,
            ReconcileAction::Consistent
                | ReconcileAction::Restored { .. }
                | ReconcileAction::Rescheduled { .. }
        )
    }
}

impl fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileAction::Consistent => write!(f, "schedule consistent"),
            ReconcileAction::Restored { next_fire_at } => {
                write!(f, "alarm restored for {}", format_millis(*next_fire_at))
            }
            ReconcileAction::Rescheduled { next_fire_at } => {
                write!(f, "overdue schedule moved to {}", format_millis(*next_fire_at))
            }
            ReconcileAction::ClearedOrphan => write!(f, "orphan alarm cleared"),
            ReconcileAction::Normalized => write!(f, "idle state normalized"),
            ReconcileAction::Idle => write!(f, "idle"),
            ReconcileAction::ResetToSafeIdle { error } => write!(f, "reset to idle ({error})"),
        }
    }
}

pub struct Reconciler {
    state: SharedState,
    alarms: Arc<dyn AlarmFacility>,
    clock: Arc<dyn TimeSource>,
    timings: Timings,
}

impl Reconciler {
    pub fn new(
        state: SharedState,
        alarms: Arc<dyn AlarmFacility>,
        clock: Arc<dyn TimeSource>,
        timings: Timings,
    ) -> Self {
        Self {
            state,
            alarms,
            clock,
            timings,
        }
    }

    /// Run one reconciliation pass. Never fails: any error lands in the safe
    /// idle state.
    pub fn reconcile(&self) -> ReconcileAction {
        log_block_start!("Reconciling stored schedule with native alarms");

        let action = match self.try_reconcile() {
            Ok(action) => action,
            Err(e) => {
                log_error!("Reconciliation failed: {e:#}");
                if !self.state.update(|s| s.make_idle()) {
                    log_warning!("Safe idle state could not be saved");
                }
                ReconcileAction::ResetToSafeIdle {
                    error: format!("{e:#}"),
                }
            }
        };

        log_decorated!("Reconciliation result: {action}");
        action
    }

    fn try_reconcile(&self) -> Result<ReconcileAction> {
        self.state.reload();
        let settings = self.state.snapshot();
        let alarm = self
            .alarms
            .get(ROTATION_ALARM)
            .context("Failed to query native alarms")?;

        if settings.is_scheduled() {
            let tolerance = self.timings.alarm_tolerance.as_millis() as Millis;
            if let (Some(alarm), Some(next)) = (&alarm, settings.next_fire_at)
                && (alarm.scheduled_time - next).abs() < tolerance
            {
                return Ok(ReconcileAction::Consistent);
            }

            match (&alarm, settings.next_fire_at) {
                (None, _) => log_indented!("Schedule active but no alarm exists"),
                (Some(alarm), next) => log_indented!(
                    "Alarm at {} does not match stored {}",
                    format_millis(alarm.scheduled_time),
                    next.map(format_millis).unwrap_or_else(|| "nothing".into())
                ),
            }
            return self.recreate_alarm(settings.next_fire_at, settings.cycle_duration_ms);
        }

        if alarm.is_some() {
            self.alarms
                .clear(ROTATION_ALARM)
                .context("Failed to clear orphan alarm")?;
            self.save_idle();
            return Ok(ReconcileAction::ClearedOrphan);
        }

        if settings.has_stale_runtime() {
            self.save_idle();
            return Ok(ReconcileAction::Normalized);
        }

        Ok(ReconcileAction::Idle)
    }

    fn recreate_alarm(&self, stored_next: Option<Millis>, cycle_ms: u64) -> Result<ReconcileAction> {
        let now = self.clock.now_millis();
        let min_delay = self.timings.min_alarm_delay.as_millis() as Millis;

        self.alarms
            .clear(ROTATION_ALARM)
            .context("Failed to clear stale alarm")?;

        let (delay, overdue) = match stored_next {
            Some(next) if next > now => ((next - now).max(min_delay), false),
            _ => (min_delay, true),
        };
        let alarm = self
            .alarms
            .create(ROTATION_ALARM, delay as u64, Some(cycle_ms))
            .context("Failed to recreate the rotation alarm")?;

        let next_fire_at = alarm.scheduled_time;
        if !self.state.update(|s| s.next_fire_at = Some(next_fire_at)) {
            log_warning!("Reconciled schedule could not be saved");
        }

        Ok(if overdue {
            ReconcileAction::Rescheduled { next_fire_at }
        } else {
            ReconcileAction::Restored { next_fire_at }
        })
    }

    fn save_idle(&self) {
        if !self.state.update(|s| s.make_idle()) {
            log_warning!("Idle state could not be saved");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Alarm;
    use crate::host::memory::MemoryAlarms;
    use crate::state::Settings;
    use crate::state::storage::MemoryStorage;
    use crate::state::store::{SaveRetry, SettingsStore};
    use crate::time_source::SimulatedTimeSource;
    use chrono::{TimeZone, Utc};

    struct Fixture {
        clock: Arc<SimulatedTimeSource>,
        store: Arc<SettingsStore>,
        alarms: Arc<MemoryAlarms>,
        reconciler: Reconciler,
    }

    fn fixture(initial: Settings) -> Fixture {
        crate::logger::Log::set_enabled(false);
        let clock = Arc::new(SimulatedTimeSource::fast_forward(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        ));
        let storage = Arc::new(MemoryStorage::new());
        let store = Arc::new(SettingsStore::new(
            storage,
            clock.clone(),
            SaveRetry::default(),
        ));
        assert!(store.save(&initial));
        let state = SharedState::load(store.clone());
        let alarms = Arc::new(MemoryAlarms::new(clock.clone()));
        let reconciler = Reconciler::new(state, alarms.clone(), clock.clone(), Timings::default());
        Fixture {
            clock,
            store,
            alarms,
            reconciler,
        }
    }

    fn active(next_fire_at: Millis) -> Settings {
        Settings {
            enabled: true,
            timer_active: true,
            next_fire_at: Some(next_fire_at),
            ..Settings::default()
        }
    }

    fn rotation_alarm(scheduled_time: Millis) -> Alarm {
        Alarm {
            name: ROTATION_ALARM.to_string(),
            scheduled_time,
            period_ms: Some(600_000),
        }
    }

    #[test]
    fn test_matching_alarm_is_consistent() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap().timestamp_millis();
        let f = fixture(active(now + 300_000));
        f.alarms.insert(rotation_alarm(now + 300_000 + 59_000));
        assert_eq!(f.reconciler.reconcile(), ReconcileAction::Consistent);
        assert_eq!(f.alarms.get_all().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_alarm_restored_for_future_fire() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap().timestamp_millis();
        let target = now + 300_000;
        let f = fixture(active(target));

        let action = f.reconciler.reconcile();
        assert_eq!(action, ReconcileAction::Restored { next_fire_at: target });
        let alarm = f.alarms.get(ROTATION_ALARM).unwrap().unwrap();
        assert_eq!(alarm.scheduled_time, target);
        assert_eq!(alarm.period_ms, Some(600_000));
        assert_eq!(f.store.load().next_fire_at, Some(target));
    }

    #[test]
    fn test_mismatched_alarm_is_replaced() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap().timestamp_millis();
        let target = now + 300_000;
        let f = fixture(active(target));
        f.alarms.insert(rotation_alarm(target + 120_000));

        assert!(f.reconciler.reconcile().is_scheduled());
        let all = f.alarms.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].scheduled_time, target);
    }

    #[test]
    fn test_imminent_fire_is_floored() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap().timestamp_millis();
        let f = fixture(active(now + 1000));
        let action = f.reconciler.reconcile();
        assert_eq!(action, ReconcileAction::Restored { next_fire_at: now + 6000 });
    }

    #[test]
    fn test_overdue_schedule_fires_soon() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap().timestamp_millis();
        let f = fixture(active(now - 3_600_000));

        let action = f.reconciler.reconcile();
        assert_eq!(action, ReconcileAction::Rescheduled { next_fire_at: now + 6000 });
        let alarm = f.alarms.get(ROTATION_ALARM).unwrap().unwrap();
        assert_eq!(alarm.scheduled_time, now + 6000);
        assert_eq!(alarm.period_ms, Some(600_000));
        assert_eq!(f.store.load().next_fire_at, Some(now + 6000));
        assert_eq!(f.clock.now_millis(), now);
    }

    #[test]
    fn test_orphan_alarm_is_cleared() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap().timestamp_millis();
        let f = fixture(Settings::default());
        f.alarms.insert(rotation_alarm(now + 10_000));

        assert_eq!(f.reconciler.reconcile(), ReconcileAction::ClearedOrphan);
        assert!(f.alarms.get_all().unwrap().is_empty());
        let stored = f.store.load();
        assert!(!stored.timer_active);
        assert_eq!(stored.next_fire_at, None);
    }

    #[test]
    fn test_stale_idle_record_is_normalized() {
        let f = fixture(Settings {
            enabled: false,
            timer_active: true,
            next_fire_at: Some(1),
            ..Settings::default()
        });
        assert_eq!(f.reconciler.reconcile(), ReconcileAction::Normalized);
        let stored = f.store.load();
        assert!(!stored.timer_active);
        assert_eq!(stored.next_fire_at, None);
    }

    #[test]
    fn test_clean_idle_is_left_alone() {
        let f = fixture(Settings::default());
        assert_eq!(f.reconciler.reconcile(), ReconcileAction::Idle);
    }

    #[test]
    fn test_alarm_failure_resets_to_safe_idle() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap().timestamp_millis();
        let f = fixture(active(now + 300_000));
        f.alarms.fail_calls(true);

        let action = f.reconciler.reconcile();
        assert!(matches!(action, ReconcileAction::ResetToSafeIdle { .. }));
        let stored = f.store.load();
        assert!(!stored.timer_active);
        assert_eq!(stored.next_fire_at, None);
    }
}
