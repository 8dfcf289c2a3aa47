//! Handling of a rotation alarm fire.
//!
//! Each fire resolves the foreground page, checks it, makes sure an executor is
//! listening and delivers one sequence. Every fire of a live schedule moves
//! `nextFireAt` one cycle ahead, matching the periodic alarm. Only a completed
//! sequence counts as a rotation.

use std::fmt;
use std::sync::Arc;

use super::context::SharedState;
use crate::constants::ROTATION_ALARM;
use crate::host::{Alarm, TargetHost};
use crate::link::{Courier, ProbeFailure, Prober};
use crate::protocol::{PageRequest, SequenceParams};
use crate::state::{Millis, Settings, TargetId};
use crate::time_source::{TimeSource, format_millis};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnknownAlarm(String),
    /// The schedule was stopped after the alarm was queued.
    NotScheduled,
    /// Another fire is still being handled.
    CycleInProgress,
    NoActiveTarget,
    Unreachable(ProbeFailure),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnknownAlarm(name) => write!(f, "unknown alarm '{name}'"),
            SkipReason::NotScheduled => write!(f, "rotation is not scheduled"),
            SkipReason::CycleInProgress => write!(f, "previous cycle still running"),
            SkipReason::NoActiveTarget => write!(f, "no active target"),
            SkipReason::Unreachable(failure) => write!(f, "{failure}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed {
        target: TargetId,
        total_rotations: u64,
        next_fire_at: Option<Millis>,
    },
    Skipped(SkipReason),
    Abandoned {
        target: TargetId,
        reason: String,
    },
}

impl CycleOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, CycleOutcome::Completed { .. })
    }
}

#[derive(Clone)]
pub struct CycleRunner {
    state: SharedState,
    targets: Arc<dyn TargetHost>,
    prober: Arc<Prober>,
    courier: Arc<Courier>,
    clock: Arc<dyn TimeSource>,
}

impl CycleRunner {
    pub fn new(
        state: SharedState,
        targets: Arc<dyn TargetHost>,
        prober: Arc<Prober>,
        courier: Arc<Courier>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            state,
            targets,
            prober,
            courier,
            clock,
        }
    }

    pub fn on_alarm(&self, alarm: &Alarm) -> CycleOutcome {
        if alarm.name != ROTATION_ALARM {
            return CycleOutcome::Skipped(SkipReason::UnknownAlarm(alarm.name.clone()));
        }

        let fire_time = self.clock.now_millis();
        log_block_start!("Rotation alarm fired");

        let settings = self.state.snapshot();
        if !settings.is_scheduled() {
            log_info!("Rotation is not scheduled, ignoring alarm");
            return CycleOutcome::Skipped(SkipReason::NotScheduled);
        }

        let delivered = self.deliver(&settings);
        let (total_rotations, next_fire_at) =
            self.advance_schedule(settings.next_fire_at, fire_time, delivered.is_ok());

        let target = match delivered {
            Ok(target) => target,
            Err(outcome) => {
                if let Some(next) = next_fire_at {
                    log_indented!("Next rotation at {}", format_millis(next));
                }
                return outcome;
            }
        };

        log_decorated!("Rotation completed for target {target} (total {total_rotations})");
        if let Some(next) = next_fire_at {
            log_indented!("Next rotation at {}", format_millis(next));
        }

        CycleOutcome::Completed {
            target,
            total_rotations,
            next_fire_at,
        }
    }

    /// Resolve the foreground page and run one sequence in it.
    fn deliver(&self, settings: &Settings) -> Result<TargetId, CycleOutcome> {
        let active = match self.targets.active_target() {
            Ok(Some(info)) => info,
            Ok(None) => {
                log_info!("No active target, skipping rotation");
                return Err(CycleOutcome::Skipped(SkipReason::NoActiveTarget));
            }
            Err(e) => {
                log_warning!("Active target lookup failed: {e:#}");
                return Err(CycleOutcome::Skipped(SkipReason::NoActiveTarget));
            }
        };
        let target = active.id;

        if let Err(failure) = self.prober.check_target(target, true) {
            log_info!("Target not compatible, skipping rotation: {failure}");
            if let Some(title) = &active.title {
                log_indented!("Title: {title}");
            }
            return Err(CycleOutcome::Skipped(SkipReason::Unreachable(failure)));
        }

        self.state
            .update_quietly(|s| s.active_target_id = Some(target));

        if let Err(e) = self.prober.ensure_executor(target) {
            log_error!("{e:#}, skipping rotation");
            return Err(self.abandon(target, format!("{e:#}")));
        }

        let request = PageRequest::ExecuteSequence {
            payload: SequenceParams::from_settings(settings),
        };
        let reply = match self.courier.deliver(target, &request) {
            Ok(reply) => reply,
            Err(failure) => {
                log_error!("Rotation abandoned for target {target}: {failure}");
                return Err(self.abandon(target, failure.to_string()));
            }
        };

        if !reply.success {
            log_warning!("Sequence failed or was refused: {}", reply.reason());
            return Err(self.abandon(target, reply.reason().to_string()));
        }
        if let Some(message) = &reply.message {
            log_indented!("{message}");
        }
        Ok(target)
    }

    /// Move `nextFireAt` one cycle past this fire, in step with the periodic
    /// alarm, and count the rotation when it completed.
    fn advance_schedule(
        &self,
        scheduled_next: Option<Millis>,
        fire_time: Millis,
        completed: bool,
    ) -> (u64, Option<Millis>) {
        let mut outcome = (0, None);
        let saved = self.state.update(|s| {
            if completed {
                s.total_rotations += 1;
            }
            // A stop or restart during the sequence owns nextFireAt now
            if s.is_scheduled() && s.next_fire_at == scheduled_next {
                s.next_fire_at = Some(fire_time + s.cycle_duration_ms as Millis);
            }
            outcome = (s.total_rotations, s.next_fire_at);
        });
        if !saved {
            log_warning!("Rotation schedule could not be saved");
        }
        outcome
    }

    fn abandon(&self, target: TargetId, reason: String) -> CycleOutcome {
        CycleOutcome::Abandoned { target, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::{MemoryAlarms, MemoryTargets};
    use crate::host::{AlarmFacility, DeliveryError, MockPageTransport, ScriptInjector};
    use crate::link::DeliveryPolicy;
    use crate::protocol::PageReply;
    use crate::state::Phase;
    use crate::state::storage::MemoryStorage;
    use crate::state::store::{SaveRetry, SettingsStore};
    use crate::time_source::SimulatedTimeSource;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    struct NoInjection;

    impl ScriptInjector for NoInjection {
        fn inject(&self, _target: TargetId) -> anyhow::Result<()> {
            anyhow::bail!("injection disabled")
        }
    }

    struct Fixture {
        clock: Arc<SimulatedTimeSource>,
        targets: Arc<MemoryTargets>,
        state: SharedState,
        runner: CycleRunner,
        alarm: Alarm,
    }

    fn fixture(transport: MockPageTransport) -> Fixture {
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
        let state = SharedState::load(store);
        let now = clock.now_millis();
        assert!(state.update(|s| {
            s.enabled = true;
            s.timer_active = true;
            s.next_fire_at = Some(now);
        }));

        let targets = Arc::new(MemoryTargets::new());
        let transport: Arc<MockPageTransport> = Arc::new(transport);
        let injector = Arc::new(NoInjection);
        let prober = Arc::new(Prober::new(
            targets.clone(),
            transport.clone(),
            injector.clone(),
            clock.clone(),
            Duration::from_millis(2000),
            Duration::from_millis(1000),
        ));
        let courier = Arc::new(Courier::new(
            transport,
            injector,
            clock.clone(),
            DeliveryPolicy {
                attempts: 3,
                reinject_settle: Duration::from_millis(500),
                retry_delay: Duration::from_millis(1000),
            },
        ));
        let runner = CycleRunner::new(state.clone(), targets.clone(), prober, courier, clock.clone());
        let alarm = MemoryAlarms::new(clock.clone())
            .create(ROTATION_ALARM, 0, Some(600_000))
            .unwrap();

        Fixture {
            clock,
            targets,
            state,
            runner,
            alarm,
        }
    }

    fn responsive_page() -> MockPageTransport {
        let mut transport = MockPageTransport::new();
        transport.expect_send().returning(|_, request| match request {
            PageRequest::Ping { timestamp } => Ok(PageReply::pong(*timestamp)),
            PageRequest::ExecuteSequence { .. } => Ok(PageReply::completed(0.0, Phase::Idle)),
            _ => Ok(PageReply::ok()),
        });
        transport
    }

    #[test]
    fn test_completed_cycle_updates_counters() {
        let f = fixture(responsive_page());
        f.targets.open(TargetId(4), "https://example.com");
        let fire_time = f.clock.now_millis();

        let outcome = f.runner.on_alarm(&f.alarm);
        assert_eq!(
            outcome,
            CycleOutcome::Completed {
                target: TargetId(4),
                total_rotations: 1,
                next_fire_at: Some(fire_time + 600_000),
            }
        );
        let stored = f.state.store().load();
        assert_eq!(stored.total_rotations, 1);
        assert_eq!(stored.next_fire_at, Some(fire_time + 600_000));
        assert_eq!(stored.active_target_id, Some(TargetId(4)));
    }

    #[test]
    fn test_sequence_params_follow_settings() {
        let mut transport = MockPageTransport::new();
        transport.expect_send().returning(|_, request| match request {
            PageRequest::Ping { timestamp } => Ok(PageReply::pong(*timestamp)),
            PageRequest::ExecuteSequence { payload } => {
                assert_eq!(payload.angle, 30);
                assert_eq!(payload.duration_ms, 60_000);
                assert!(!payload.show_indicator);
                Ok(PageReply::completed(0.0, Phase::Idle))
            }
            _ => Ok(PageReply::ok()),
        });
        let f = fixture(transport);
        f.state.update_quietly(|s| {
            s.rotation_angle_deg = 30;
            s.rotation_duration_ms = 60_000;
            s.show_indicator = false;
        });
        f.targets.open(TargetId(1), "https://example.com");
        assert!(f.runner.on_alarm(&f.alarm).is_completed());
    }

    #[test]
    fn test_unscheduled_state_skips() {
        let f = fixture(MockPageTransport::new());
        f.state.update_quietly(|s| s.make_idle());
        assert_eq!(
            f.runner.on_alarm(&f.alarm),
            CycleOutcome::Skipped(SkipReason::NotScheduled)
        );
    }

    #[test]
    fn test_foreign_alarm_is_ignored() {
        let f = fixture(MockPageTransport::new());
        let alarm = Alarm {
            name: "somethingElse".into(),
            ..f.alarm.clone()
        };
        assert!(matches!(
            f.runner.on_alarm(&alarm),
            CycleOutcome::Skipped(SkipReason::UnknownAlarm(_))
        ));
    }

    #[test]
    fn test_no_active_target_skips() {
        let f = fixture(MockPageTransport::new());
        assert_eq!(
            f.runner.on_alarm(&f.alarm),
            CycleOutcome::Skipped(SkipReason::NoActiveTarget)
        );
    }

    #[test]
    fn test_special_page_skip_only_advances_schedule() {
        let f = fixture(MockPageTransport::new());
        f.targets.open(TargetId(2), "chrome://newtab/");
        let fire_time = f.clock.now_millis();
        let before = f.state.snapshot();

        let outcome = f.runner.on_alarm(&f.alarm);
        assert!(matches!(outcome, CycleOutcome::Skipped(SkipReason::Unreachable(_))));

        let expected = Settings {
            next_fire_at: Some(fire_time + 600_000),
            ..before
        };
        assert_eq!(f.state.snapshot(), expected);
        assert_eq!(f.state.store().load(), expected);
    }

    #[test]
    fn test_missing_target_still_advances_schedule() {
        let f = fixture(MockPageTransport::new());
        let fire_time = f.clock.now_millis();
        assert_eq!(
            f.runner.on_alarm(&f.alarm),
            CycleOutcome::Skipped(SkipReason::NoActiveTarget)
        );
        let stored = f.state.store().load();
        assert_eq!(stored.next_fire_at, Some(fire_time + 600_000));
        assert_eq!(stored.total_rotations, 0);
    }

    #[test]
    fn test_schedule_replaced_mid_fire_is_left_alone() {
        let f = fixture(MockPageTransport::new());
        let fire_time = f.clock.now_millis();
        f.state
            .update_quietly(|s| s.next_fire_at = Some(fire_time + 42));

        let (total, next) = f.runner.advance_schedule(Some(fire_time), fire_time, true);
        assert_eq!((total, next), (1, Some(fire_time + 42)));
        assert_eq!(f.state.store().load().next_fire_at, Some(fire_time + 42));
    }

    #[test]
    fn test_failed_injection_abandons() {
        let mut transport = MockPageTransport::new();
        transport
            .expect_send()
            .returning(|_, _| Err(DeliveryError::NoReceiver));
        let f = fixture(transport);
        f.targets.open(TargetId(3), "https://example.com");
        let fire_time = f.clock.now_millis();
        let outcome = f.runner.on_alarm(&f.alarm);
        assert!(matches!(outcome, CycleOutcome::Abandoned { .. }));
        let stored = f.state.store().load();
        assert_eq!(stored.total_rotations, 0);
        assert_eq!(stored.next_fire_at, Some(fire_time + 600_000));
    }

    #[test]
    fn test_refused_sequence_abandons() {
        let mut transport = MockPageTransport::new();
        transport.expect_send().returning(|_, request| match request {
            PageRequest::Ping { timestamp } => Ok(PageReply::pong(*timestamp)),
            _ => Ok(PageReply::note(false, "already active")),
        });
        let f = fixture(transport);
        f.targets.open(TargetId(3), "https://example.com");
        assert_eq!(
            f.runner.on_alarm(&f.alarm),
            CycleOutcome::Abandoned {
                target: TargetId(3),
                reason: "already active".into()
            }
        );
    }
}
