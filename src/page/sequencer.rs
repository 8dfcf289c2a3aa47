//! The three-phase neck-stretch sequence.
//!
//! A run walks `idle → left → right → reset → idle`. Each phase rotates the
//! page and then holds for a third of the configured duration while the
//! overlay counts down. Only one run can be in progress per page; a second
//! request is answered immediately without disturbing the live run.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::PageTimings;
use super::animator::Animator;
use super::i18n::{Language, MessageKey, format_countdown, translate};
use super::overlay::Indicator;
use crate::constants::COUNTDOWN_TICK_MS;
use crate::protocol::{PageReply, PageStatus, SequenceParams};
use crate::state::Phase;
use crate::time_source::TimeSource;

/// Clears the running flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Sequencer {
    animator: Animator,
    indicator: Arc<Indicator>,
    clock: Arc<dyn TimeSource>,
    language: Language,
    completion_linger: Duration,
    error_linger: Duration,
    running: AtomicBool,
    interrupted: AtomicBool,
    phase: Mutex<Phase>,
}

impl Sequencer {
    pub fn new(
        animator: Animator,
        indicator: Arc<Indicator>,
        clock: Arc<dyn TimeSource>,
        language: Language,
        timings: &PageTimings,
    ) -> Self {
        Self {
            animator,
            indicator,
            clock,
            language,
            completion_linger: timings.completion_linger,
            error_linger: timings.error_linger,
            running: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            phase: Mutex::new(Phase::Idle),
        }
    }

    /// Run one full sequence and report how it ended.
    pub fn run(&self, params: &SequenceParams) -> PageReply {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log_warning!("Sequence already active, ignoring request");
            return PageReply::note(false, "already active");
        }
        let _guard = RunGuard(&self.running);
        self.interrupted.store(false, Ordering::SeqCst);

        log_block_start!(
            "Starting rotation sequence: {}° over {}s",
            params.angle,
            params.duration_ms / 1000
        );

        match self.perform(params) {
            Ok(()) => {
                self.set_phase(Phase::Idle);
                if params.show_indicator {
                    self.indicator
                        .flash(&self.text(MessageKey::ExerciseComplete, &[]), self.completion_linger);
                }
                log_decorated!("Rotation sequence completed");
                PageReply::completed(self.animator.current_angle(), Phase::Idle)
            }
            Err(e) => {
                log_error!("Rotation sequence failed: {e:#}");
                self.set_phase(Phase::Error);
                if params.show_indicator {
                    self.indicator
                        .flash(&self.text(MessageKey::ExerciseError, &[]), self.error_linger);
                }
                if let Err(reset_error) = self.animator.snap_back() {
                    log_warning!("Could not restore page rotation: {reset_error:#}");
                }
                self.set_phase(Phase::Idle);
                PageReply::failure(format!("{e:#}"))
            }
        }
    }

    fn perform(&self, params: &SequenceParams) -> Result<()> {
        let angle = f64::from(params.angle);
        let hold = Duration::from_millis(params.duration_ms / 3);
        let angle_param = [("angle", params.angle.to_string())];

        if params.show_indicator {
            self.indicator
                .show(&self.text(MessageKey::ExerciseStarting, &[]));
        }

        let steps = [
            (Phase::Left, -angle, MessageKey::RotateLeft),
            (Phase::Right, angle, MessageKey::RotateRight),
            (Phase::Reset, 0.0, MessageKey::RestorePosition),
        ];

        for (phase, target, key) in steps {
            self.check_interrupted()?;
            self.set_phase(phase);
            log_indented!("Phase {phase}: rotating to {target}°");

            if params.show_indicator {
                self.indicator.show(&self.text(key, &angle_param));
            }
            self.animator
                .rotate_to(target)
                .with_context(|| format!("Rotation to {target}° failed"))?;
            self.hold(hold, params.show_indicator)?;
        }
        Ok(())
    }

    /// Wait out one phase in countdown ticks.
    fn hold(&self, duration: Duration, show_indicator: bool) -> Result<()> {
        let tick = Duration::from_millis(COUNTDOWN_TICK_MS);
        let mut remaining = duration;

        while !remaining.is_zero() {
            self.check_interrupted()?;
            let slice = remaining.min(tick);
            self.clock.sleep(slice);
            remaining -= slice;

            if show_indicator && !remaining.is_zero() {
                let seconds = remaining.as_millis().div_ceil(1000) as u64;
                self.indicator.show(&self.text(
                    MessageKey::ExerciseInProgress,
                    &[("time", format_countdown(seconds))],
                ));
            }
        }
        Ok(())
    }

    fn check_interrupted(&self) -> Result<()> {
        if self.interrupted.load(Ordering::SeqCst) {
            anyhow::bail!("Sequence interrupted");
        }
        Ok(())
    }

    /// Put the page back to 0° and clear the overlay.
    ///
    /// A run in progress is interrupted at its next tick.
    pub fn reset(&self) {
        if self.is_running() {
            self.interrupted.store(true, Ordering::SeqCst);
        }
        if let Err(e) = self.animator.snap_back() {
            log_warning!("Could not restore page rotation: {e:#}");
        }
        self.indicator.hide();
        if !self.is_running() {
            self.set_phase(Phase::Idle);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> PageStatus {
        PageStatus {
            is_active: self.is_running(),
            current_phase: self.phase(),
            current_angle: self.animator.current_angle(),
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    fn text(&self, key: MessageKey, params: &[(&str, String)]) -> String {
        translate(self.language, key, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::animator::{RotationSurface, TransitionEnd};
    use crate::page::overlay::RecordingOverlay;
    use crate::page::surface::RecordingSurface;
    use crate::time_source::SimulatedTimeSource;
    use chrono::{TimeZone, Utc};
    use std::sync::mpsc::Receiver;

    struct Fixture {
        clock: Arc<SimulatedTimeSource>,
        surface: Arc<RecordingSurface>,
        overlay: Arc<RecordingOverlay>,
        sequencer: Arc<Sequencer>,
    }

    fn timings() -> PageTimings {
        PageTimings {
            completion_linger: Duration::from_millis(10),
            error_linger: Duration::from_millis(10),
            ..PageTimings::default()
        }
    }

    fn fixture(language: Language) -> Fixture {
        crate::logger::Log::set_enabled(false);
        let clock = Arc::new(SimulatedTimeSource::fast_forward(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        ));
        let surface = Arc::new(RecordingSurface::new(clock.clone()));
        let overlay = Arc::new(RecordingOverlay::new());
        let timings = timings();
        let animator = Animator::new(surface.clone(), clock.clone(), timings.animation_timeout);
        let sequencer = Arc::new(Sequencer::new(
            animator,
            Arc::new(Indicator::new(overlay.clone())),
            clock.clone(),
            language,
            &timings,
        ));
        Fixture {
            clock,
            surface,
            overlay,
            sequencer,
        }
    }

    fn params(show_indicator: bool) -> SequenceParams {
        SequenceParams {
            angle: 15,
            duration_ms: 30_000,
            show_indicator,
        }
    }

    #[test]
    fn test_full_sequence() {
        let f = fixture(Language::En);
        let start = f.clock.now_millis();

        let reply = f.sequencer.run(&params(true));
        assert_eq!(reply, PageReply::completed(0.0, Phase::Idle));
        assert_eq!(f.surface.angles(), vec![-15.0, 15.0, 0.0]);

        let applied = f.surface.applied();
        assert_eq!(applied[0].at, start);
        assert_eq!(applied[1].at - applied[0].at, 10_000);
        assert_eq!(applied[2].at - applied[1].at, 10_000);
        assert_eq!(f.clock.now_millis() - start, 30_000);

        assert_eq!(f.sequencer.phase(), Phase::Idle);
        assert!(!f.sequencer.is_running());
    }

    #[test]
    fn test_overlay_messages_follow_phases() {
        let f = fixture(Language::En);
        f.sequencer.run(&params(true));

        let texts = f.overlay.shown_texts();
        assert_eq!(texts.first().unwrap(), "Cervical exercise starting...");
        assert!(texts.contains(&"Rotate left 15°".to_string()));
        assert!(texts.contains(&"Rotate right 15°".to_string()));
        assert!(texts.contains(&"Restore to normal position".to_string()));
        assert!(texts.contains(&"Cervical exercise in progress... 9s".to_string()));
        assert!(texts.contains(&"Cervical exercise in progress... 1s".to_string()));
        assert_eq!(texts.last().unwrap(), "Cervical exercise completed!");
    }

    #[test]
    fn test_long_phase_countdown_uses_minutes() {
        let f = fixture(Language::Zh);
        f.sequencer.run(&SequenceParams {
            angle: 20,
            duration_ms: 300_000,
            show_indicator: true,
        });
        let texts = f.overlay.shown_texts();
        assert!(texts.contains(&"向左旋转 20°".to_string()));
        assert!(texts.contains(&"颈椎锻炼进行中... 1:39".to_string()));
        assert!(texts.contains(&"颈椎锻炼进行中... 59s".to_string()));
    }

    #[test]
    fn test_hidden_indicator_shows_nothing() {
        let f = fixture(Language::En);
        let reply = f.sequencer.run(&params(false));
        assert!(reply.success);
        assert!(f.overlay.events().is_empty());
    }

    #[test]
    fn test_missing_transition_end_falls_back_to_timeout() {
        let f = fixture(Language::En);
        f.surface.mute(true);
        let start = f.clock.now_millis();
        let reply = f.sequencer.run(&params(false));
        assert!(reply.success);
        // Three 3 s animation timeouts on top of the three holds
        assert_eq!(f.clock.now_millis() - start, 39_000);
    }

    #[test]
    fn test_concurrent_run_is_rejected() {
        let f = fixture(Language::En);
        f.sequencer.running.store(true, Ordering::SeqCst);
        f.sequencer.set_phase(Phase::Right);

        let reply = f.sequencer.run(&params(true));
        assert_eq!(reply, PageReply::note(false, "already active"));
        assert!(f.surface.applied().is_empty());
        assert_eq!(f.sequencer.phase(), Phase::Right);
        assert!(f.sequencer.is_running());
    }

    struct BrokenSurface;

    impl RotationSurface for BrokenSurface {
        fn apply_rotation(&self, angle: f64) -> Result<Receiver<TransitionEnd>> {
            if angle > 0.0 {
                anyhow::bail!("element detached");
            }
            let (tx, rx) = std::sync::mpsc::channel();
            tx.send(TransitionEnd::transform())?;
            Ok(rx)
        }
    }

    #[test]
    fn test_failure_reports_error_and_returns_to_idle() {
        crate::logger::Log::set_enabled(false);
        let clock: Arc<dyn TimeSource> = Arc::new(SimulatedTimeSource::fast_forward(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        ));
        let overlay = Arc::new(RecordingOverlay::new());
        let timings = timings();
        let sequencer = Sequencer::new(
            Animator::new(Arc::new(BrokenSurface), clock.clone(), timings.animation_timeout),
            Arc::new(Indicator::new(overlay.clone())),
            clock,
            Language::En,
            &timings,
        );

        let reply = sequencer.run(&params(true));
        assert!(!reply.success);
        assert!(reply.reason().contains("Rotation to 15° failed"));
        assert_eq!(sequencer.phase(), Phase::Idle);
        assert!(!sequencer.is_running());
        assert_eq!(sequencer.status().current_angle, 0.0);
        assert_eq!(
            overlay.shown_texts().last().unwrap(),
            "Error occurred during exercise"
        );
    }

    #[test]
    fn test_reset_interrupts_a_run() {
        let f = fixture(Language::En);
        f.sequencer.running.store(true, Ordering::SeqCst);
        f.sequencer.reset();
        assert!(f.sequencer.interrupted.load(Ordering::SeqCst));
        assert!(f.sequencer.check_interrupted().is_err());
        assert_eq!(f.surface.angles(), vec![0.0]);
        assert!(!f.overlay.is_visible());
    }

    #[test]
    fn test_status_reports_angle_and_phase() {
        let f = fixture(Language::En);
        f.sequencer.run(&params(false));
        assert_eq!(
            f.sequencer.status(),
            PageStatus {
                is_active: false,
                current_phase: Phase::Idle,
                current_angle: 0.0,
            }
        );
    }
}
