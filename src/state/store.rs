//! Verified persistence of the settings document.
//!
//! Writes are stamped with `_lastSaved`, read back, and compared. A write that
//! the host silently dropped or corrupted is detected and retried with linear
//! backoff on the injected clock.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::storage::StorageArea;
use super::{Millis, Settings};
use crate::constants::*;
use crate::time_source::TimeSource;

/// The settings record as it sits in storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    #[serde(flatten)]
    pub settings: Settings,
    #[serde(rename = "_lastSaved", default)]
    pub last_saved: Option<Millis>,
    #[serde(rename = "schemaVersion", default)]
    pub schema_version: Option<u32>,
}

/// Retry policy for verified saves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveRetry {
    /// Delay before the second attempt; attempt `n` waits `n * base`.
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for SaveRetry {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_SAVE_RETRY_BASE_MS),
            max_attempts: DEFAULT_MAX_SAVE_ATTEMPTS,
        }
    }
}

/// Loads and saves [`Settings`] on the sync storage tier.
pub struct SettingsStore {
    storage: Arc<dyn StorageArea>,
    clock: Arc<dyn TimeSource>,
    retry: SaveRetry,
}

impl SettingsStore {
    pub fn new(storage: Arc<dyn StorageArea>, clock: Arc<dyn TimeSource>, retry: SaveRetry) -> Self {
        Self {
            storage,
            clock,
            retry,
        }
    }

    /// Load the settings, merged over defaults and clamped to the accepted
    /// ranges.
    ///
    /// Never fails: a missing, unreadable or malformed document yields the
    /// defaults and the problem is logged.
    pub fn load(&self) -> Settings {
        match self.read_document() {
            Ok(Some(document)) => {
                let mut settings = document.settings;
                if settings.clamp_to_limits() {
                    log_warning!("Stored settings were out of range and have been clamped");
                }
                settings
            }
            Ok(None) => Settings::default(),
            Err(e) => {
                log_warning!("Failed to load settings, using defaults: {e:#}");
                Settings::default()
            }
        }
    }

    /// The stored document with its metadata, if any.
    pub fn read_document(&self) -> Result<Option<StoredDocument>> {
        let Some(value) = self.raw_document()? else {
            return Ok(None);
        };
        let document = serde_json::from_value(value).context("Malformed settings document")?;
        Ok(Some(document))
    }

    /// The stored document as untyped JSON.
    pub fn raw_document(&self) -> Result<Option<Value>> {
        self.storage
            .get(USER_SETTINGS_KEY)
            .context("Failed to read settings from storage")
    }

    /// Save with read-back verification and retries.
    ///
    /// Returns `true` once a write is confirmed, `false` after every attempt
    /// failed.
    pub fn save(&self, settings: &Settings) -> bool {
        let attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=attempts {
            match self.try_save(settings) {
                Ok(()) => {
                    if attempt > 1 {
                        log_indented!("Settings saved on attempt {attempt}");
                    }
                    return true;
                }
                Err(e) => {
                    log_warning!("Save attempt {attempt}/{attempts} failed: {e:#}");
                    if attempt < attempts {
                        self.clock.sleep(self.retry.base_delay * attempt);
                    }
                }
            }
        }

        log_error!("Giving up on saving settings after {attempts} attempts");
        false
    }

    fn try_save(&self, settings: &Settings) -> Result<()> {
        let document = StoredDocument {
            settings: settings.clone(),
            last_saved: Some(self.clock.now_millis()),
            schema_version: Some(SCHEMA_VERSION),
        };
        let written = serde_json::to_value(&document)?;

        self.storage
            .set(USER_SETTINGS_KEY, written.clone())
            .context("Storage rejected the write")?;

        let read_back = self
            .raw_document()?
            .context("Settings document missing after write")?;
        if read_back != written {
            anyhow::bail!(
                "Verification mismatch (expected _lastSaved {:?}, found {})",
                document.last_saved,
                read_back.get("_lastSaved").unwrap_or(&Value::Null)
            );
        }
        Ok(())
    }
}
