//! Application constants and defaults.

// # Application identity
pub const APP_NAME: &str = "dogtor";
pub const CONFIG_FILE_NAME: &str = "dogtor.toml";

// # Storage keys
pub const USER_SETTINGS_KEY: &str = "user_settings";
pub const LEGACY_RUNTIME_STATE_KEY: &str = "runtime_state";
pub const LANGUAGE_KEY: &str = "language";

/// Current layout of the persisted settings document.
pub const SCHEMA_VERSION: u32 = 1;

// # Alarm
pub const ROTATION_ALARM: &str = "rotationCycle";

// # Settings defaults
pub const DEFAULT_ENABLED: bool = false;
pub const DEFAULT_CYCLE_DURATION_MS: u64 = 10 * 60 * 1000;
pub const DEFAULT_ROTATION_DURATION_MS: u64 = 30 * 1000;
pub const DEFAULT_ROTATION_ANGLE_DEG: u32 = 15;
pub const DEFAULT_SHOW_INDICATOR: bool = true;

// # Settings limits
pub const MINIMUM_CYCLE_DURATION_MS: u64 = 60 * 1000;
pub const MAXIMUM_CYCLE_DURATION_MS: u64 = 120 * 60 * 1000;
pub const MINIMUM_ROTATION_DURATION_MS: u64 = 15 * 1000;
pub const MAXIMUM_ROTATION_DURATION_MS: u64 = 300 * 1000;
pub const MINIMUM_ROTATION_ANGLE_DEG: u32 = 5;
pub const MAXIMUM_ROTATION_ANGLE_DEG: u32 = 45;

// # Background timing defaults (milliseconds)
pub const DEFAULT_SAVE_RETRY_BASE_MS: u64 = 1000;
pub const DEFAULT_MAX_SAVE_ATTEMPTS: u32 = 3;
pub const DEFAULT_ALARM_TOLERANCE_MS: u64 = 60 * 1000;
/// Shortest delay the native alarm facility accepts (0.1 minute).
pub const DEFAULT_MIN_ALARM_DELAY_MS: u64 = 6 * 1000;
pub const DEFAULT_LOADING_RETRY_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_DELIVERY_ATTEMPTS: u32 = 3;
pub const DEFAULT_REINJECT_SETTLE_MS: u64 = 500;
pub const DEFAULT_DELIVERY_RETRY_DELAY_MS: u64 = 1000;
pub const DEFAULT_INJECTION_SETTLE_MS: u64 = 1000;
pub const DEFAULT_MESSAGE_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_PERSIST_INTERVAL_MS: u64 = 30 * 1000;

// # Page timing defaults (milliseconds)
pub const DEFAULT_ANIMATION_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_COMPLETION_LINGER_MS: u64 = 2000;
pub const DEFAULT_ERROR_LINGER_MS: u64 = 3000;
pub const DEFAULT_INTERACTION_DEFERRAL_MS: u64 = 5000;
/// Granularity of the live countdown and of the transition-end poll.
pub const COUNTDOWN_TICK_MS: u64 = 1000;
pub const TRANSITION_POLL_MS: u64 = 50;

// # Timing limits for config validation
pub const MINIMUM_RETRY_DELAY_MS: u64 = 0;
pub const MAXIMUM_RETRY_DELAY_MS: u64 = 60 * 1000;
pub const MINIMUM_ATTEMPTS: u32 = 1;
pub const MAXIMUM_ATTEMPTS: u32 = 10;
pub const MINIMUM_ANIMATION_TIMEOUT_MS: u64 = 100;
pub const MAXIMUM_ANIMATION_TIMEOUT_MS: u64 = 60 * 1000;
pub const MINIMUM_PERSIST_INTERVAL_MS: u64 = 1000;
pub const MAXIMUM_PERSIST_INTERVAL_MS: u64 = 60 * 60 * 1000;

/// Pages the executor can never be injected into.
pub const RESTRICTED_URL_PREFIXES: &[&str] = &[
    "chrome:",
    "chrome-extension:",
    "moz-extension:",
    "edge:",
    "about:",
];
pub const RESTRICTED_PAGES: &[&str] = &[
    "chrome://newtab/",
    "chrome://extensions/",
    "chrome://settings/",
];
