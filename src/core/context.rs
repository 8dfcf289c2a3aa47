//! Shared coordinator state and timing parameters.
//!
//! `SharedState` is the coordinator's in-memory copy of the settings record.
//! It is created once at startup, handed to the scheduler, reconciler, router
//! and alarm handler, and is the only path through which they mutate the
//! record: `update` persists through the verified store, `update_quietly`
//! changes memory only and leaves the write to the periodic save.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::constants::*;
use crate::state::Settings;
use crate::state::store::{SaveRetry, SettingsStore};

/// Every delay and bound the coordinator uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub save_retry: SaveRetry,
    /// Largest accepted gap between an alarm's schedule and `nextFireAt`.
    pub alarm_tolerance: Duration,
    /// Floor applied to every alarm delay.
    pub min_alarm_delay: Duration,
    pub loading_retry_interval: Duration,
    pub delivery_attempts: u32,
    pub reinject_settle: Duration,
    pub delivery_retry_delay: Duration,
    pub injection_settle: Duration,
    pub message_timeout: Duration,
    pub persist_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            save_retry: SaveRetry::default(),
            alarm_tolerance: Duration::from_millis(DEFAULT_ALARM_TOLERANCE_MS),
            min_alarm_delay: Duration::from_millis(DEFAULT_MIN_ALARM_DELAY_MS),
            loading_retry_interval: Duration::from_millis(DEFAULT_LOADING_RETRY_INTERVAL_MS),
            delivery_attempts: DEFAULT_DELIVERY_ATTEMPTS,
            reinject_settle: Duration::from_millis(DEFAULT_REINJECT_SETTLE_MS),
            delivery_retry_delay: Duration::from_millis(DEFAULT_DELIVERY_RETRY_DELAY_MS),
            injection_settle: Duration::from_millis(DEFAULT_INJECTION_SETTLE_MS),
            message_timeout: Duration::from_millis(DEFAULT_MESSAGE_TIMEOUT_MS),
            persist_interval: Duration::from_millis(DEFAULT_PERSIST_INTERVAL_MS),
        }
    }
}

/// Owned, injectable settings cache backed by the durable store.
#[derive(Clone)]
pub struct SharedState {
    settings: Arc<Mutex<Settings>>,
    /// Held from mutation through the end of the save, so storage sees
    /// writes in the same order as memory.
    writer: Arc<Mutex<()>>,
    store: Arc<SettingsStore>,
}

impl SharedState {
    /// Wrap `store`, starting from whatever it currently holds.
    pub fn load(store: Arc<SettingsStore>) -> Self {
        let settings = store.load();
        Self {
            settings: Arc::new(Mutex::new(settings)),
            writer: Arc::new(Mutex::new(())),
            store,
        }
    }

    /// A copy of the current record.
    pub fn snapshot(&self) -> Settings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mutate the record and persist it. Returns the save outcome.
    ///
    /// Readers only wait for the mutation. Other writers wait for the save.
    pub fn update<F>(&self, mutate: F) -> bool
    where
        F: FnOnce(&mut Settings),
    {
        let _writing = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = {
            let mut settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
            mutate(&mut settings);
            settings.clone()
        };
        self.store.save(&snapshot)
    }

    /// Mutate the record in memory only.
    pub fn update_quietly<F>(&self, mutate: F)
    where
        F: FnOnce(&mut Settings),
    {
        let mut settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        mutate(&mut settings);
    }

    /// Write the in-memory record as it stands.
    pub fn persist(&self) -> bool {
        let _writing = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.save(&self.snapshot())
    }

    /// Replace the in-memory record with the stored one.
    pub fn reload(&self) {
        let _writing = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let stored = self.store.load();
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = stored;
    }

    pub fn store(&self) -> &SettingsStore {
        &self.store
    }
}
