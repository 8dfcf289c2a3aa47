//! Dispatch of UI requests.
//!
//! Stateless apart from the shared record: every request is decoded, handled
//! and answered with a [`BackgroundResponse`]. Errors never cross the message
//! boundary; they become `{success: false, error}`.

use anyhow::Result;
use serde_json::Value;

use super::context::SharedState;
use super::scheduler::{ScheduleChange, Scheduler};
use crate::protocol::{BackgroundRequest, BackgroundResponse};
use crate::state::SettingsPatch;

const SAVE_WARNING: &str = "Schedule changed but settings could not be saved";

#[derive(Clone)]
pub struct Router {
    state: SharedState,
    scheduler: Scheduler,
}

impl Router {
    pub fn new(state: SharedState, scheduler: Scheduler) -> Self {
        Self { state, scheduler }
    }

    /// Handle a raw JSON message.
    pub fn dispatch(&self, message: &Value) -> Value {
        let response = match BackgroundRequest::from_value(message) {
            Ok(request) => self.handle(request),
            Err(e) => {
                log_warning!("Rejected message: {e:#}");
                BackgroundResponse::failure(format!("{e:#}"))
            }
        };
        response.to_value()
    }

    pub fn handle(&self, request: BackgroundRequest) -> BackgroundResponse {
        log_debug!("Received {}", request.type_name());

        let result = match request {
            BackgroundRequest::StartRotation { settings } => self.start_rotation(settings),
            BackgroundRequest::StopRotation => self.scheduler.stop_cycle().map(respond),
            BackgroundRequest::GetState => Ok(BackgroundResponse::snapshot(self.state.snapshot())),
            BackgroundRequest::SettingsChanged(patch) => self.settings_changed(patch),
        };

        result.unwrap_or_else(|e| {
            log_error!("Request failed: {e:#}");
            BackgroundResponse::failure(format!("{e:#}"))
        })
    }

    fn start_rotation(&self, settings: Option<SettingsPatch>) -> Result<BackgroundResponse> {
        if let Some(patch) = settings {
            patch.validate()?;
            if !self.state.update(|s| patch.apply(s)) {
                log_warning!("Settings sent with start_rotation were not saved");
            }
        }
        self.scheduler.start_cycle().map(respond)
    }

    fn settings_changed(&self, patch: SettingsPatch) -> Result<BackgroundResponse> {
        patch.validate()?;

        let was_active = self.state.snapshot().timer_active;
        if !self.state.update(|s| patch.apply(s)) {
            anyhow::bail!("Failed to save settings to storage");
        }

        if was_active && !patch.disables() {
            log_decorated!("Restarting rotation cycle with new settings");
            return self.scheduler.start_cycle().map(respond);
        }
        if patch.disables() {
            return self.scheduler.stop_cycle().map(respond);
        }
        Ok(BackgroundResponse::ok())
    }
}

fn respond(change: ScheduleChange) -> BackgroundResponse {
    let response = match change.next_fire_at {
        Some(next) => BackgroundResponse::scheduled(next),
        None => BackgroundResponse::ok(),
    };
    if change.saved {
        response
    } else {
        response.with_warning(SAVE_WARNING)
    }
}
