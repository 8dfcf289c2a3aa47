//! One-shot upgrade of older storage layouts.
//!
//! Schema 0 documents carry the extension's original key names and keep the
//! runtime half in a separate local-tier `runtime_state` document. Migration
//! renames the keys, folds the runtime document into the settings document,
//! saves through the verified path and only then deletes the legacy document.
//! Running it again on an upgraded store does nothing.

use anyhow::Result;
use serde_json::{Map, Value};

use super::Settings;
use super::storage::StorageArea;
use super::store::SettingsStore;
use crate::constants::*;

/// Legacy key → current key, for the settings half.
const SETTINGS_RENAMES: &[(&str, &str)] = &[
    ("isEnabled", "enabled"),
    ("cycleDuration", "cycleDurationMs"),
    ("rotationDuration", "rotationDurationMs"),
    ("rotationAngle", "rotationAngleDeg"),
];

/// Legacy key → current key, for the runtime half.
const RUNTIME_RENAMES: &[(&str, &str)] = &[
    ("isActive", "timerActive"),
    ("currentPhase", "phase"),
    ("nextRotationTime", "nextFireAt"),
    ("sessionStartTime", "sessionStartedAt"),
    ("activeTabId", "activeTargetId"),
];

/// Runtime fields accepted from a legacy runtime document.
const RUNTIME_FIELDS: &[&str] = &[
    "timerActive",
    "phase",
    "nextFireAt",
    "totalRotations",
    "sessionStartedAt",
    "activeTargetId",
];

/// What a migration run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// No document existed and defaults were written.
    pub wrote_defaults: bool,
    /// Schema version found in storage.
    pub from_version: u32,
    pub renamed_keys: usize,
    pub merged_runtime_state: bool,
    pub removed_runtime_state: bool,
    /// The upgraded document was confirmed in storage.
    pub saved: bool,
}

impl MigrationReport {
    pub fn changed_anything(&self) -> bool {
        self.wrote_defaults || self.saved || self.removed_runtime_state
    }
}

/// Upgrade the stored settings to the current schema.
pub fn migrate(store: &SettingsStore, local: &dyn StorageArea) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();

    let document = store.raw_document()?;
    let legacy_runtime = match local.get(LEGACY_RUNTIME_STATE_KEY) {
        Ok(value) => value,
        Err(e) => {
            log_warning!("Could not read legacy runtime state: {e:#}");
            None
        }
    };

    let Some(document) = document else {
        if legacy_runtime.is_none() {
            log_decorated!("No stored settings found, writing defaults");
            report.wrote_defaults = store.save(&Settings::default());
            report.saved = report.wrote_defaults;
            return Ok(report);
        }
        return merge_and_save(store, local, Map::new(), legacy_runtime, report);
    };

    let fields = match document {
        Value::Object(map) => map,
        other => {
            log_warning!("Discarding settings document of unexpected shape: {other}");
            Map::new()
        }
    };

    report.from_version = fields
        .get("schemaVersion")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0);

    if report.from_version >= SCHEMA_VERSION && legacy_runtime.is_none() {
        return Ok(report);
    }

    merge_and_save(store, local, fields, legacy_runtime, report)
}

fn merge_and_save(
    store: &SettingsStore,
    local: &dyn StorageArea,
    mut fields: Map<String, Value>,
    legacy_runtime: Option<Value>,
    mut report: MigrationReport,
) -> Result<MigrationReport> {
    if report.from_version < SCHEMA_VERSION {
        report.renamed_keys += rename_keys(&mut fields, SETTINGS_RENAMES);
        report.renamed_keys += rename_keys(&mut fields, RUNTIME_RENAMES);
    }

    if let Some(Value::Object(mut runtime)) = legacy_runtime.clone() {
        report.renamed_keys += rename_keys(&mut runtime, RUNTIME_RENAMES);
        for field in RUNTIME_FIELDS {
            if let Some(value) = runtime.remove(*field) {
                fields.insert((*field).to_string(), value);
            }
        }
        report.merged_runtime_state = true;
    }

    let settings: Settings = match serde_json::from_value(Value::Object(fields)) {
        Ok(settings) => settings,
        Err(e) => {
            log_warning!("Legacy settings could not be read, starting from defaults: {e}");
            Settings::default()
        }
    };

    log_block_start!(
        "Migrating settings from schema {} to {}",
        report.from_version,
        SCHEMA_VERSION
    );
    if report.renamed_keys > 0 {
        log_indented!("Renamed {} legacy keys", report.renamed_keys);
    }

    report.saved = store.save(&settings);
    if !report.saved {
        log_error!("Migrated settings could not be saved, keeping legacy data");
        return Ok(report);
    }

    if legacy_runtime.is_some() {
        match local.remove(LEGACY_RUNTIME_STATE_KEY) {
            Ok(()) => {
                report.removed_runtime_state = true;
                log_indented!("Removed legacy runtime state");
            }
            Err(e) => log_warning!("Failed to remove legacy runtime state: {e:#}"),
        }
    }

    Ok(report)
}

fn rename_keys(fields: &mut Map<String, Value>, renames: &[(&str, &str)]) -> usize {
    let mut renamed = 0;
    for (old, new) in renames {
        if let Some(value) = fields.remove(*old) {
            if !fields.contains_key(*new) {
                fields.insert((*new).to_string(), value);
            }
            renamed += 1;
        }
    }
    renamed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Phase;
    use crate::state::TargetId;
    use crate::state::storage::MemoryStorage;
    use crate::state::store::SaveRetry;
    use crate::time_source::SimulatedTimeSource;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::Arc;

    struct Fixture {
        sync: Arc<MemoryStorage>,
        local: MemoryStorage,
        store: SettingsStore,
    }

    fn fixture() -> Fixture {
        crate::logger::Log::set_enabled(false);
        let sync = Arc::new(MemoryStorage::new());
        let clock = Arc::new(SimulatedTimeSource::fast_forward(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        ));
        let store = SettingsStore::new(sync.clone(), clock, SaveRetry::default());
        Fixture {
            sync,
            local: MemoryStorage::new(),
            store,
        }
    }

    #[test]
    fn test_first_run_writes_defaults() {
        let f = fixture();
        let report = migrate(&f.store, &f.local).unwrap();
        assert!(report.wrote_defaults);
        assert_eq!(f.store.load(), Settings::default());
        assert_eq!(
            f.sync.peek(USER_SETTINGS_KEY).unwrap()["schemaVersion"],
            json!(SCHEMA_VERSION)
        );
    }

    #[test]
    fn test_legacy_layout_is_upgraded() {
        let f = fixture();
        f.sync.insert(
            USER_SETTINGS_KEY,
            json!({
                "isEnabled": true,
                "cycleDuration": 900000,
                "rotationDuration": 45000,
                "rotationAngle": 20,
                "showIndicator": false,
            }),
        );
        f.local.insert(
            LEGACY_RUNTIME_STATE_KEY,
            json!({
                "isActive": true,
                "currentPhase": "idle",
                "nextRotationTime": 1_772_355_600_000_i64,
                "totalRotations": 7,
                "activeTabId": 12,
            }),
        );

        let report = migrate(&f.store, &f.local).unwrap();
        assert_eq!(report.from_version, 0);
        assert!(report.merged_runtime_state);
        assert!(report.removed_runtime_state);

        let settings = f.store.load();
        assert!(settings.enabled);
        assert_eq!(settings.cycle_duration_ms, 900_000);
        assert_eq!(settings.rotation_duration_ms, 45_000);
        assert_eq!(settings.rotation_angle_deg, 20);
        assert!(!settings.show_indicator);
        assert!(settings.timer_active);
        assert_eq!(settings.phase, Phase::Idle);
        assert_eq!(settings.next_fire_at, Some(1_772_355_600_000));
        assert_eq!(settings.total_rotations, 7);
        assert_eq!(settings.active_target_id, Some(TargetId(12)));
        assert_eq!(f.local.peek(LEGACY_RUNTIME_STATE_KEY), None);
    }

    #[test]
    fn test_migration_is_idempotent() {
        let f = fixture();
        f.sync
            .insert(USER_SETTINGS_KEY, json!({"isEnabled": true, "cycleDuration": 120000}));
        migrate(&f.store, &f.local).unwrap();
        let after_first = f.sync.peek(USER_SETTINGS_KEY);
        let writes = f.sync.write_count();

        let report = migrate(&f.store, &f.local).unwrap();
        assert!(!report.changed_anything());
        assert_eq!(f.sync.write_count(), writes);
        assert_eq!(f.sync.peek(USER_SETTINGS_KEY), after_first);
    }

    #[test]
    fn test_legacy_runtime_kept_when_save_fails() {
        let f = fixture();
        f.sync.insert(USER_SETTINGS_KEY, json!({"isEnabled": true}));
        f.local
            .insert(LEGACY_RUNTIME_STATE_KEY, json!({"isActive": true}));
        f.sync.fail_writes(true);

        let report = migrate(&f.store, &f.local).unwrap();
        assert!(!report.saved);
        assert!(!report.removed_runtime_state);
        assert!(f.local.peek(LEGACY_RUNTIME_STATE_KEY).is_some());
        // Untouched original document
        assert_eq!(
            f.sync.peek(USER_SETTINGS_KEY),
            Some(json!({"isEnabled": true}))
        );
    }

    #[test]
    fn test_current_names_win_over_legacy_names() {
        let f = fixture();
        f.sync.insert(
            USER_SETTINGS_KEY,
            json!({"isEnabled": false, "enabled": true}),
        );
        migrate(&f.store, &f.local).unwrap();
        assert!(f.store.load().enabled);
    }

    #[test]
    fn test_unreadable_store_is_an_error() {
        let f = fixture();
        f.sync.fail_reads(true);
        assert!(migrate(&f.store, &f.local).is_err());
    }
}
