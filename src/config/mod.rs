//! Timing configuration for dogtor.
//!
//! Settings the user edits in the extension UI live in the settings record;
//! this file holds the operational knobs behind them: retry policies,
//! tolerances, settle delays and page-side timeouts.
//!
//! ## Configuration Source
//!
//! `dogtor.toml` is read from `$XDG_CONFIG_HOME/dogtor/`, or from the directory
//! passed with `--config`. A commented default file is written on first load.
//!
//! ```toml
//! #[Storage]
//! save_retry_base_ms = 1000        # Backoff unit between save attempts (0-60000)
//! max_save_attempts = 3            # Save attempts before giving up (1-10)
//! persist_interval_ms = 30000      # Periodic save of the in-memory record (1000-3600000)
//!
//! #[Alarm]
//! alarm_tolerance_ms = 60000       # Accepted drift between alarm and nextFireAt
//! min_alarm_delay_ms = 6000        # Shortest delay the alarm facility accepts
//!
//! #[Delivery]
//! loading_retry_interval_ms = 2000 # Wait before re-checking a loading page
//! delivery_attempts = 3            # Attempts to deliver a sequence (1-10)
//! reinject_settle_ms = 500         # Settle after reinjecting between attempts
//! delivery_retry_delay_ms = 1000   # Wait after any other delivery failure
//! injection_settle_ms = 1000       # Settle after injecting a fresh executor
//! message_timeout_ms = 5000        # Per-message reply timeout
//!
//! #[Page]
//! animation_timeout_ms = 3000      # Give up waiting for a transition after this
//! completion_linger_ms = 2000      # How long the completion message stays up
//! error_linger_ms = 3000           # How long the error message stays up
//! interaction_deferral_ms = 5000   # Delay a run while the user is typing or watching
//! ```
//!
//! Every field is optional; missing values take the `DEFAULT_*` constants.

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::*;
use crate::core::Timings;
use crate::page::PageTimings;
use crate::state::store::SaveRetry;

mod builder;
mod loading;
mod validation;

pub use builder::create_default_config;
pub use loading::{get_config_path, load, load_from_path, set_config_dir};
pub use validation::validate_config;

#[derive(Debug, Default, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub save_retry_base_ms: Option<u64>,
    pub max_save_attempts: Option<u32>,
    pub persist_interval_ms: Option<u64>,

    /// Largest accepted gap between the native alarm and `nextFireAt`.
    pub alarm_tolerance_ms: Option<u64>,
    pub min_alarm_delay_ms: Option<u64>,

    pub loading_retry_interval_ms: Option<u64>,
    pub delivery_attempts: Option<u32>,
    pub reinject_settle_ms: Option<u64>,
    pub delivery_retry_delay_ms: Option<u64>,
    pub injection_settle_ms: Option<u64>,
    pub message_timeout_ms: Option<u64>,

    pub animation_timeout_ms: Option<u64>,
    pub completion_linger_ms: Option<u64>,
    pub error_linger_ms: Option<u64>,
    pub interaction_deferral_ms: Option<u64>,
}

fn millis(value: Option<u64>, default: u64) -> Duration {
    Duration::from_millis(value.unwrap_or(default))
}

impl Config {
    /// Load configuration using the module's load function
    pub fn load() -> Result<Self> {
        load()
    }

    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        load_from_path(path)
    }

    pub fn get_config_path() -> Result<PathBuf> {
        get_config_path()
    }

    pub fn save_retry(&self) -> SaveRetry {
        SaveRetry {
            base_delay: millis(self.save_retry_base_ms, DEFAULT_SAVE_RETRY_BASE_MS),
            max_attempts: self.max_save_attempts.unwrap_or(DEFAULT_MAX_SAVE_ATTEMPTS),
        }
    }

    /// Coordinator timings with defaults filled in.
    pub fn timings(&self) -> Timings {
        Timings {
            save_retry: self.save_retry(),
            alarm_tolerance: millis(self.alarm_tolerance_ms, DEFAULT_ALARM_TOLERANCE_MS),
            min_alarm_delay: millis(self.min_alarm_delay_ms, DEFAULT_MIN_ALARM_DELAY_MS),
            loading_retry_interval: millis(
                self.loading_retry_interval_ms,
                DEFAULT_LOADING_RETRY_INTERVAL_MS,
            ),
            delivery_attempts: self.delivery_attempts.unwrap_or(DEFAULT_DELIVERY_ATTEMPTS),
            reinject_settle: millis(self.reinject_settle_ms, DEFAULT_REINJECT_SETTLE_MS),
            delivery_retry_delay: millis(
                self.delivery_retry_delay_ms,
                DEFAULT_DELIVERY_RETRY_DELAY_MS,
            ),
            injection_settle: millis(self.injection_settle_ms, DEFAULT_INJECTION_SETTLE_MS),
            message_timeout: millis(self.message_timeout_ms, DEFAULT_MESSAGE_TIMEOUT_MS),
            persist_interval: millis(self.persist_interval_ms, DEFAULT_PERSIST_INTERVAL_MS),
        }
    }

    pub fn page_timings(&self) -> PageTimings {
        PageTimings {
            animation_timeout: millis(self.animation_timeout_ms, DEFAULT_ANIMATION_TIMEOUT_MS),
            completion_linger: millis(self.completion_linger_ms, DEFAULT_COMPLETION_LINGER_MS),
            error_linger: millis(self.error_linger_ms, DEFAULT_ERROR_LINGER_MS),
            interaction_deferral: millis(
                self.interaction_deferral_ms,
                DEFAULT_INTERACTION_DEFERRAL_MS,
            ),
        }
    }

    pub fn log_config(&self) {
        let timings = self.timings();
        let page = self.page_timings();

        log_block_start!("Loaded configuration");
        log_indented!(
            "Save retry: {} attempts, {}ms backoff",
            timings.save_retry.max_attempts,
            timings.save_retry.base_delay.as_millis()
        );
        log_indented!(
            "Alarm tolerance: {}s (minimum delay {}s)",
            timings.alarm_tolerance.as_secs(),
            timings.min_alarm_delay.as_secs()
        );
        log_indented!(
            "Delivery: {} attempts, {}ms timeout",
            timings.delivery_attempts,
            timings.message_timeout.as_millis()
        );
        log_indented!("Persist interval: {}s", timings.persist_interval.as_secs());
        log_indented!(
            "Animation timeout: {}ms, deferral {}s",
            page.animation_timeout.as_millis(),
            page.interaction_deferral.as_secs()
        );
    }
}

#[cfg(test)]
mod tests;
