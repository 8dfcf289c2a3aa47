//! Status overlay shown over the page during a sequence.

use std::sync::mpsc::{RecvTimeoutError, Sender, channel};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Render or clear the transient overlay.
pub trait StatusOverlay: Send + Sync {
    fn show(&self, text: &str);
    fn hide(&self);
}

/// Overlay driver with timed dismissal.
///
/// `flash` shows a message and hides it after a linger period unless another
/// `show`, `flash` or `hide` comes first. Lingers run in real time on a
/// helper thread.
pub struct Indicator {
    overlay: Arc<dyn StatusOverlay>,
    pending_dismiss: Mutex<Option<Sender<()>>>,
}

impl Indicator {
    pub fn new(overlay: Arc<dyn StatusOverlay>) -> Self {
        Self {
            overlay,
            pending_dismiss: Mutex::new(None),
        }
    }

    pub fn show(&self, text: &str) {
        self.cancel_dismiss();
        self.overlay.show(text);
    }

    pub fn hide(&self) {
        self.cancel_dismiss();
        self.overlay.hide();
    }

    pub fn flash(&self, text: &str, linger: Duration) {
        let (cancel, cancelled) = channel::<()>();
        {
            let mut pending = self
                .pending_dismiss
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            // Dropping the previous sender cancels its dismissal
            *pending = Some(cancel);
        }
        self.overlay.show(text);

        let overlay = self.overlay.clone();
        let spawned = std::thread::Builder::new()
            .name("overlay-dismiss".to_string())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = cancelled.recv_timeout(linger) {
                    overlay.hide();
                }
            });
        if let Err(e) = spawned {
            log_warning!("Could not schedule overlay dismissal: {e}");
            self.overlay.hide();
        }
    }

    fn cancel_dismiss(&self) {
        self.pending_dismiss
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayEvent {
    Shown(String),
    Hidden,
}

/// Overlay that remembers everything it was asked to do.
#[derive(Default)]
pub struct RecordingOverlay {
    events: Mutex<Vec<OverlayEvent>>,
}

impl RecordingOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OverlayEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn shown_texts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                OverlayEvent::Shown(text) => Some(text),
                OverlayEvent::Hidden => None,
            })
            .collect()
    }

    /// Whether the last event left the overlay visible.
    pub fn is_visible(&self) -> bool {
        matches!(self.events().last(), Some(OverlayEvent::Shown(_)))
    }

    fn record(&self, event: OverlayEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl StatusOverlay for RecordingOverlay {
    fn show(&self, text: &str) {
        self.record(OverlayEvent::Shown(text.to_string()));
    }

    fn hide(&self) {
        self.record(OverlayEvent::Hidden);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_flash_hides_after_linger() {
        let overlay = Arc::new(RecordingOverlay::new());
        let indicator = Indicator::new(overlay.clone());
        indicator.flash("done", Duration::from_millis(10));
        assert!(wait_for(|| !overlay.is_visible()));
        assert_eq!(
            overlay.events(),
            vec![OverlayEvent::Shown("done".into()), OverlayEvent::Hidden]
        );
    }

    #[test]
    fn test_show_cancels_pending_dismissal() {
        let overlay = Arc::new(RecordingOverlay::new());
        let indicator = Indicator::new(overlay.clone());
        indicator.flash("done", Duration::from_millis(20));
        indicator.show("next run");
        std::thread::sleep(Duration::from_millis(80));
        assert!(overlay.is_visible());
        assert_eq!(overlay.shown_texts(), vec!["done", "next run"]);
    }

    #[test]
    fn test_hide_is_immediate() {
        let overlay = Arc::new(RecordingOverlay::new());
        let indicator = Indicator::new(overlay.clone());
        indicator.show("working");
        indicator.hide();
        assert!(!overlay.is_visible());
    }
}
