//! Default configuration file generation.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::constants::*;

/// Write a commented configuration file with every default spelled out.
pub fn create_default_config(path: &PathBuf) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create config directory {}", parent.display())
        })?;
    }

    let content = ConfigBuilder::new()
        .add_section("Storage")
        .add_setting(
            "save_retry_base_ms",
            &DEFAULT_SAVE_RETRY_BASE_MS.to_string(),
            &format!(
                "Backoff unit between save attempts ({MINIMUM_RETRY_DELAY_MS}-{MAXIMUM_RETRY_DELAY_MS})"
            ),
        )
        .add_setting(
            "max_save_attempts",
            &DEFAULT_MAX_SAVE_ATTEMPTS.to_string(),
            &format!("Save attempts before giving up ({MINIMUM_ATTEMPTS}-{MAXIMUM_ATTEMPTS})"),
        )
        .add_setting(
            "persist_interval_ms",
            &DEFAULT_PERSIST_INTERVAL_MS.to_string(),
            &format!(
                "Periodic save of the in-memory record ({MINIMUM_PERSIST_INTERVAL_MS}-{MAXIMUM_PERSIST_INTERVAL_MS})"
            ),
        )
        .add_section("Alarm")
        .add_setting(
            "alarm_tolerance_ms",
            &DEFAULT_ALARM_TOLERANCE_MS.to_string(),
            "Accepted drift between alarm and nextFireAt",
        )
        .add_setting(
            "min_alarm_delay_ms",
            &DEFAULT_MIN_ALARM_DELAY_MS.to_string(),
            "Shortest delay the alarm facility accepts",
        )
        .add_section("Delivery")
        .add_setting(
            "loading_retry_interval_ms",
            &DEFAULT_LOADING_RETRY_INTERVAL_MS.to_string(),
            "Wait before re-checking a loading page",
        )
        .add_setting(
            "delivery_attempts",
            &DEFAULT_DELIVERY_ATTEMPTS.to_string(),
            &format!("Attempts to deliver a sequence ({MINIMUM_ATTEMPTS}-{MAXIMUM_ATTEMPTS})"),
        )
        .add_setting(
            "reinject_settle_ms",
            &DEFAULT_REINJECT_SETTLE_MS.to_string(),
            "Settle after reinjecting between attempts",
        )
        .add_setting(
            "delivery_retry_delay_ms",
            &DEFAULT_DELIVERY_RETRY_DELAY_MS.to_string(),
            "Wait after any other delivery failure",
        )
        .add_setting(
            "injection_settle_ms",
            &DEFAULT_INJECTION_SETTLE_MS.to_string(),
            "Settle after injecting a fresh executor",
        )
        .add_setting(
            "message_timeout_ms",
            &DEFAULT_MESSAGE_TIMEOUT_MS.to_string(),
            "Per-message reply timeout",
        )
        .add_section("Page")
        .add_setting(
            "animation_timeout_ms",
            &DEFAULT_ANIMATION_TIMEOUT_MS.to_string(),
            &format!(
                "Give up waiting for a transition after this ({MINIMUM_ANIMATION_TIMEOUT_MS}-{MAXIMUM_ANIMATION_TIMEOUT_MS})"
            ),
        )
        .add_setting(
            "completion_linger_ms",
            &DEFAULT_COMPLETION_LINGER_MS.to_string(),
            "How long the completion message stays up",
        )
        .add_setting(
            "error_linger_ms",
            &DEFAULT_ERROR_LINGER_MS.to_string(),
            "How long the error message stays up",
        )
        .add_setting(
            "interaction_deferral_ms",
            &DEFAULT_INTERACTION_DEFERRAL_MS.to_string(),
            "Delay a run while the user is typing or watching",
        )
        .build();

    fs::write(path, content + "\n")
        .with_context(|| format!("Failed to write default config to {}", path.display()))?;
    Ok(())
}

/// Builds TOML text with comments aligned in one column.
struct ConfigBuilder {
    entries: Vec<ConfigEntry>,
}

enum ConfigEntry {
    Section(String),
    Setting { line: String, comment: String },
}

impl ConfigBuilder {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn add_section(mut self, title: &str) -> Self {
        self.entries.push(ConfigEntry::Section(format!("#[{title}]")));
        self
    }

    fn add_setting(mut self, key: &str, value: &str, comment: &str) -> Self {
        self.entries.push(ConfigEntry::Setting {
            line: format!("{key} = {value}"),
            comment: format!("# {comment}"),
        });
        self
    }

    fn build(self) -> String {
        let width = self
            .entries
            .iter()
            .filter_map(|entry| match entry {
                ConfigEntry::Setting { line, .. } => Some(line.len()),
                ConfigEntry::Section(_) => None,
            })
            .max()
            .unwrap_or(0)
            + 1;

        let mut lines = Vec::new();
        for (index, entry) in self.entries.into_iter().enumerate() {
            match entry {
                ConfigEntry::Section(title) => {
                    if index > 0 {
                        lines.push(String::new());
                    }
                    lines.push(title);
                }
                ConfigEntry::Setting { line, comment } => {
                    let padding = " ".repeat(width - line.len());
                    lines.push(format!("{line}{padding}{comment}"));
                }
            }
        }
        lines.join("\n")
    }
}
