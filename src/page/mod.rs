//! Page-side executor.
//!
//! One [`PageExecutor`] lives in each target page. It answers coordinator
//! requests, runs rotation sequences through the [`Sequencer`] and drives the
//! status overlay. Rendering is behind [`RotationSurface`] and
//! [`StatusOverlay`]; the page itself is described by [`PageEnvironment`].

pub mod animator;
pub mod i18n;
pub mod overlay;
pub mod sequencer;
pub mod surface;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::constants::{
    DEFAULT_ANIMATION_TIMEOUT_MS, DEFAULT_COMPLETION_LINGER_MS, DEFAULT_ERROR_LINGER_MS,
    DEFAULT_INTERACTION_DEFERRAL_MS,
};
use crate::host::loopback::PageEndpoint;
use crate::protocol::{PageReply, PageRequest, SequenceParams};
use crate::state::storage::StorageArea;
use crate::time_source::TimeSource;

pub use animator::{AnimationEnd, Animator, RotationSurface, TransitionEnd};
pub use i18n::{Language, MessageKey};
pub use overlay::{Indicator, StatusOverlay};
pub use sequencer::Sequencer;

/// Schemes whose pages cannot host the executor.
const INCOMPATIBLE_SCHEMES: &[&str] = &["chrome:", "chrome-extension:", "moz-extension:"];

/// Page-side timing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTimings {
    pub animation_timeout: Duration,
    pub completion_linger: Duration,
    pub error_linger: Duration,
    pub interaction_deferral: Duration,
}

impl Default for PageTimings {
    fn default() -> Self {
        Self {
            animation_timeout: Duration::from_millis(DEFAULT_ANIMATION_TIMEOUT_MS),
            completion_linger: Duration::from_millis(DEFAULT_COMPLETION_LINGER_MS),
            error_linger: Duration::from_millis(DEFAULT_ERROR_LINGER_MS),
            interaction_deferral: Duration::from_millis(DEFAULT_INTERACTION_DEFERRAL_MS),
        }
    }
}

/// What the executor can observe about its page.
pub trait PageEnvironment: Send + Sync {
    fn supports_transform(&self) -> bool {
        true
    }

    fn url(&self) -> Option<String>;

    /// Focus is in a text input or editable element.
    fn user_is_typing(&self) -> bool;

    fn video_playing(&self) -> bool;
}

/// Environment with externally controlled answers.
pub struct StaticEnvironment {
    url: Option<String>,
    transform: bool,
    typing: AtomicBool,
    video: AtomicBool,
}

impl StaticEnvironment {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            transform: true,
            typing: AtomicBool::new(false),
            video: AtomicBool::new(false),
        }
    }

    pub fn without_transform(mut self) -> Self {
        self.transform = false;
        self
    }

    pub fn set_typing(&self, typing: bool) {
        self.typing.store(typing, Ordering::SeqCst);
    }

    pub fn set_video_playing(&self, playing: bool) {
        self.video.store(playing, Ordering::SeqCst);
    }
}

impl PageEnvironment for StaticEnvironment {
    fn supports_transform(&self) -> bool {
        self.transform
    }

    fn url(&self) -> Option<String> {
        self.url.clone()
    }

    fn user_is_typing(&self) -> bool {
        self.typing.load(Ordering::SeqCst)
    }

    fn video_playing(&self) -> bool {
        self.video.load(Ordering::SeqCst)
    }
}

/// Everything an executor needs, grouped for construction.
pub struct ExecutorParams {
    pub surface: Arc<dyn RotationSurface>,
    pub overlay: Arc<dyn StatusOverlay>,
    pub environment: Arc<dyn PageEnvironment>,
    pub clock: Arc<dyn TimeSource>,
    /// Source of the language preference.
    pub sync_storage: Arc<dyn StorageArea>,
    pub timings: PageTimings,
}

pub struct PageExecutor {
    sequencer: Arc<Sequencer>,
    indicator: Arc<Indicator>,
    environment: Arc<dyn PageEnvironment>,
    clock: Arc<dyn TimeSource>,
    interaction_deferral: Duration,
    deferred: Mutex<Option<JoinHandle<()>>>,
}

impl PageExecutor {
    pub fn new(params: ExecutorParams) -> Self {
        let language = Language::load(params.sync_storage.as_ref());
        let indicator = Arc::new(Indicator::new(params.overlay));
        let animator = Animator::new(
            params.surface,
            params.clock.clone(),
            params.timings.animation_timeout,
        );
        let sequencer = Arc::new(Sequencer::new(
            animator,
            indicator.clone(),
            params.clock.clone(),
            language,
            &params.timings,
        ));

        Self {
            sequencer,
            indicator,
            environment: params.environment,
            clock: params.clock,
            interaction_deferral: params.timings.interaction_deferral,
            deferred: Mutex::new(None),
        }
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    /// Whether rotation can work on this page at all.
    pub fn is_compatible(&self) -> bool {
        if !self.environment.supports_transform() {
            return false;
        }
        match self.environment.url() {
            Some(url) => !INCOMPATIBLE_SCHEMES
                .iter()
                .any(|scheme| url.starts_with(scheme)),
            None => true,
        }
    }

    fn user_is_busy(&self) -> bool {
        self.environment.user_is_typing() || self.environment.video_playing()
    }

    fn execute(&self, params: SequenceParams) -> PageReply {
        if !self.user_is_busy() {
            return self.sequencer.run(&params);
        }

        log_info!(
            "User is interacting, delaying rotation by {}s",
            self.interaction_deferral.as_secs()
        );
        let sequencer = self.sequencer.clone();
        let clock = self.clock.clone();
        let delay = self.interaction_deferral;
        let spawned = std::thread::Builder::new()
            .name("deferred-rotation".to_string())
            .spawn(move || {
                clock.sleep(delay);
                let reply = sequencer.run(&params);
                if reply.success {
                    log_decorated!("Delayed rotation completed");
                } else {
                    log_warning!("Delayed rotation did not complete: {}", reply.reason());
                }
            });

        match spawned {
            Ok(handle) => {
                *self.deferred.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                PageReply::note(
                    true,
                    i18n::translate(self.sequencer.language(), MessageKey::RotationDelayed, &[]),
                )
            }
            Err(e) => PageReply::failure(format!("Could not defer rotation: {e}")),
        }
    }

    fn stop(&self) -> PageReply {
        if self.sequencer.is_running() {
            log_warning!("Refusing to stop: a sequence is in progress");
            return PageReply::note(false, "Sequence in progress");
        }
        self.sequencer.reset();
        self.indicator.hide();
        log_decorated!("Rotation stopped and reset");
        PageReply::ok()
    }

    /// Block until a deferred run, if any, has finished.
    pub fn join_deferred(&self) {
        let handle = self
            .deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log_error!("Deferred rotation thread panicked");
            }
        }
    }
}

impl PageEndpoint for PageExecutor {
    fn handle(&self, request: &PageRequest) -> PageReply {
        if !self.is_compatible() {
            log_warning!(
                "Page not compatible with rotation: {}",
                self.environment.url().unwrap_or_else(|| "<unknown url>".into())
            );
            return PageReply::failure("Page not compatible");
        }

        log_debug!("Page received {}", request.type_name());
        match request {
            PageRequest::Ping { .. } => PageReply::pong(self.clock.now_millis()),
            PageRequest::ExecuteSequence { payload } => self.execute(*payload),
            PageRequest::StopRotation => self.stop(),
            PageRequest::UpdateStatus => PageReply::with_status(self.sequencer.status()),
        }
    }

    fn unload(&self) {
        self.sequencer.reset();
        self.indicator.hide();
    }
}
