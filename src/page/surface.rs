//! In-process rotation surface.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex, PoisonError};

use super::animator::{RotationSurface, TransitionEnd};
use crate::state::Millis;
use crate::time_source::TimeSource;

/// One applied rotation and the clock time it was applied at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppliedRotation {
    pub angle: f64,
    pub at: Millis,
}

/// Surface that records every applied rotation.
///
/// Transitions complete immediately unless the surface is muted, in which case
/// no transition-end is ever delivered and the animator falls back on its
/// timeout.
pub struct RecordingSurface {
    clock: Arc<dyn TimeSource>,
    applied: Mutex<Vec<AppliedRotation>>,
    muted: AtomicBool,
    // Muted transitions keep their sender so the channel stays open
    held: Mutex<Vec<Sender<TransitionEnd>>>,
}

impl RecordingSurface {
    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            clock,
            applied: Mutex::new(Vec::new()),
            muted: AtomicBool::new(false),
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn mute(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    pub fn applied(&self) -> Vec<AppliedRotation> {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn angles(&self) -> Vec<f64> {
        self.applied().iter().map(|r| r.angle).collect()
    }

    /// Angle the element was last rotated to.
    pub fn current_angle(&self) -> f64 {
        self.applied().last().map(|r| r.angle).unwrap_or(0.0)
    }
}

impl RotationSurface for RecordingSurface {
    fn apply_rotation(&self, angle: f64) -> Result<Receiver<TransitionEnd>> {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(AppliedRotation {
                angle,
                at: self.clock.now_millis(),
            });

        let (tx, rx) = channel();
        if self.muted.load(Ordering::SeqCst) {
            self.held
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(tx);
        } else {
            tx.send(TransitionEnd::transform())?;
        }
        Ok(rx)
    }
}
