//! Status command - print the stored settings record.
//!
//! Reads the sync tier that `simulate --persist` writes to. Supports JSON and
//! human-readable output.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::constants::USER_SETTINGS_KEY;
use crate::state::Settings;
use crate::state::storage::{FileStorage, StorageArea};
use crate::state::store::{SaveRetry, SettingsStore};
use crate::time_source::{RealTimeSource, TimeSource, format_millis};

pub fn handle_status_command(json: bool) -> Result<()> {
    let storage = FileStorage::in_state_dir("sync")?;
    let root = storage.root().to_path_buf();

    if storage.get(USER_SETTINGS_KEY)?.is_none() {
        log_pipe!();
        log_warning!("No stored settings found in {}", root.display());
        log_indented!("Run 'dogtor simulate --persist' to create them");
        log_end!();
        return Ok(());
    }

    let clock: Arc<dyn TimeSource> = Arc::new(RealTimeSource);
    let store = SettingsStore::new(Arc::new(storage), clock.clone(), SaveRetry::default());

    if json {
        let document = store
            .raw_document()?
            .context("Settings disappeared while reading")?;
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    let document = store
        .read_document()?
        .context("Settings disappeared while reading")?;
    display_human_readable(&document.settings, clock.now_millis());
    if let Some(saved) = document.last_saved {
        println!("    Last saved: {}", format_millis(saved));
    }
    Ok(())
}

fn display_human_readable(settings: &Settings, now: i64) {
    println!("       Enabled: {}", settings.enabled);
    println!("         Cycle: {} min", settings.cycle_duration_ms / 60_000);
    println!("      Sequence: {} s", settings.rotation_duration_ms / 1000);
    println!("         Angle: {}°", settings.rotation_angle_deg);
    println!("     Indicator: {}", settings.show_indicator);
    println!("  Timer active: {}", settings.timer_active);
    match settings.next_fire_at {
        Some(next) if next >= now => println!(
            " Next rotation: {} (in {})",
            format_millis(next),
            format_remaining(next - now)
        ),
        Some(next) => println!(" Next rotation: {} (overdue)", format_millis(next)),
        None => println!(" Next rotation: none"),
    }
    println!("     Rotations: {}", settings.total_rotations);
}

/// `1h 05m`, `4m 10s` or `12s`.
fn format_remaining(millis: i64) -> String {
    let seconds = millis / 1000;
    let (hours, minutes, secs) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m {secs:02}s")
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(12_400), "12s");
        assert_eq!(format_remaining(250_000), "4m 10s");
        assert_eq!(format_remaining(3_900_000), "1h 05m");
    }
}
