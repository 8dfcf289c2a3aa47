//! Rotate-to-angle capability with a bounded wait.
//!
//! The page surface applies the transform and reports transition-end events.
//! A rotation resolves on the first `transform` transition-end or when the
//! timeout elapses, so a missed event can never stall a sequence.

use anyhow::Result;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::constants::TRANSITION_POLL_MS;
use crate::time_source::TimeSource;

/// A transition finished on the rotated element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionEnd {
    pub property: String,
}

impl TransitionEnd {
    pub fn transform() -> Self {
        Self {
            property: "transform".to_string(),
        }
    }
}

/// The page element being rotated.
pub trait RotationSurface: Send + Sync {
    /// Start a transition to `angle` degrees.
    ///
    /// Transition-end events for this transition arrive on the returned channel.
    fn apply_rotation(&self, angle: f64) -> Result<Receiver<TransitionEnd>>;
}

/// How a rotation resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationEnd {
    TransitionEnded,
    TimedOut,
}

pub struct Animator {
    surface: Arc<dyn RotationSurface>,
    clock: Arc<dyn TimeSource>,
    timeout: Duration,
    current_angle: Mutex<f64>,
}

impl Animator {
    pub fn new(surface: Arc<dyn RotationSurface>, clock: Arc<dyn TimeSource>, timeout: Duration) -> Self {
        Self {
            surface,
            clock,
            timeout,
            current_angle: Mutex::new(0.0),
        }
    }

    /// Rotate to `angle` and wait for the transition, at most the timeout.
    pub fn rotate_to(&self, angle: f64) -> Result<AnimationEnd> {
        let events = self.surface.apply_rotation(angle)?;
        *self
            .current_angle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = angle;

        let started = self.clock.now();
        let poll = Duration::from_millis(TRANSITION_POLL_MS);
        let mut listening = true;

        loop {
            if listening {
                match events.try_recv() {
                    Ok(event) if event.property == "transform" => {
                        return Ok(AnimationEnd::TransitionEnded);
                    }
                    Ok(_) => continue,
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => listening = false,
                }
            }

            let elapsed = (self.clock.now() - started).to_std().unwrap_or(Duration::ZERO);
            if elapsed >= self.timeout {
                log_debug!("No transition end for {angle}°, continuing after timeout");
                return Ok(AnimationEnd::TimedOut);
            }
            let remaining = self.timeout - elapsed;
            self.clock.sleep(if listening { poll.min(remaining) } else { remaining });
        }
    }

    /// Return to 0° without waiting for the transition.
    pub fn snap_back(&self) -> Result<()> {
        self.surface.apply_rotation(0.0)?;
        *self
            .current_angle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = 0.0;
        Ok(())
    }

    pub fn current_angle(&self) -> f64 {
        *self
            .current_angle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
