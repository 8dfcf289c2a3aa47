use super::validation::validate_config;
use super::*;
use serial_test::serial;
use std::fs;
use tempfile::tempdir;

fn with_config_home<T>(dir: &std::path::Path, body: impl FnOnce() -> T) -> T {
    let original = std::env::var("XDG_CONFIG_HOME").ok();
    unsafe {
        std::env::set_var("XDG_CONFIG_HOME", dir);
    }
    let result = body();
    unsafe {
        match original {
            Some(value) => std::env::set_var("XDG_CONFIG_HOME", value),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }
    }
    result
}

#[test]
#[serial]
fn test_config_load_default_creation() {
    crate::logger::Log::set_enabled(false);
    let temp_dir = tempdir().unwrap();
    let expected = temp_dir.path().join("dogtor").join("dogtor.toml");

    let config = with_config_home(temp_dir.path(), || {
        assert_eq!(get_config_path().unwrap(), expected);
        load().unwrap()
    });

    assert!(expected.exists());
    assert_eq!(config.timings(), Timings::default());
    assert_eq!(config.page_timings(), PageTimings::default());
}

#[test]
#[serial]
fn test_existing_config_is_not_overwritten() {
    crate::logger::Log::set_enabled(false);
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("dogtor").join("dogtor.toml");
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "delivery_attempts = 5\n").unwrap();

    let config = with_config_home(temp_dir.path(), || load().unwrap());

    assert_eq!(config.delivery_attempts, Some(5));
    assert_eq!(fs::read_to_string(&path).unwrap(), "delivery_attempts = 5\n");
}

#[test]
fn test_default_config_file_parses_to_defaults() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("dogtor.toml");

    create_default_config(&path).unwrap();
    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("#[Delivery]"));
    assert!(content.contains("animation_timeout_ms"));

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.timings(), Timings::default());
    assert_eq!(config.page_timings(), PageTimings::default());
}

#[test]
fn test_config_toml_parsing() {
    let config: Config = toml::from_str(
        r#"
save_retry_base_ms = 250
max_save_attempts = 5
message_timeout_ms = 2000
animation_timeout_ms = 1500
"#,
    )
    .unwrap();

    let timings = config.timings();
    assert_eq!(timings.save_retry.base_delay, Duration::from_millis(250));
    assert_eq!(timings.save_retry.max_attempts, 5);
    assert_eq!(timings.message_timeout, Duration::from_secs(2));
    assert_eq!(
        timings.persist_interval,
        Duration::from_millis(DEFAULT_PERSIST_INTERVAL_MS)
    );
    assert_eq!(config.page_timings().animation_timeout, Duration::from_millis(1500));
}

#[test]
fn test_config_malformed_toml() {
    let result: Result<Config, _> = toml::from_str("delivery_attempts = \"three\"\n");
    assert!(result.is_err());

    let result: Result<Config, _> = toml::from_str("sunset = \"19:00:00\"\n");
    assert!(result.is_err(), "unknown keys are rejected");
}

#[test]
fn test_validation_ranges() {
    assert!(validate_config(&Config::default()).is_ok());

    let cases = [
        Config {
            delivery_attempts: Some(0),
            ..Config::default()
        },
        Config {
            max_save_attempts: Some(MAXIMUM_ATTEMPTS + 1),
            ..Config::default()
        },
        Config {
            animation_timeout_ms: Some(MINIMUM_ANIMATION_TIMEOUT_MS - 1),
            ..Config::default()
        },
        Config {
            persist_interval_ms: Some(10),
            ..Config::default()
        },
        Config {
            min_alarm_delay_ms: Some(1000),
            ..Config::default()
        },
        Config {
            reinject_settle_ms: Some(MAXIMUM_RETRY_DELAY_MS + 1),
            ..Config::default()
        },
    ];
    for config in cases {
        assert!(validate_config(&config).is_err(), "{config:?} should be rejected");
    }
}

#[test]
fn test_invalid_file_reports_path() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("dogtor.toml");
    fs::write(&path, "delivery_attempts = 50\n").unwrap();

    let error = format!("{:#}", load_from_path(&path).unwrap_err());
    assert!(error.contains("delivery_attempts"));
    assert!(error.contains("dogtor.toml"));
}

#[test]
fn test_missing_file_is_an_error() {
    let temp_dir = tempdir().unwrap();
    assert!(load_from_path(&temp_dir.path().join("absent.toml")).is_err());
}
