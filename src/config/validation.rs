//! Configuration validation functionality.
//!
//! Rejects values that would stall the coordinator or make retries pointless.

use anyhow::Result;

use super::Config;
use crate::constants::*;

fn check_range<T>(value: Option<T>, min: T, max: T, name: &str, unit: &str) -> Result<()>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if let Some(value) = value
        && !(min..=max).contains(&value)
    {
        anyhow::bail!("{name} ({value}{unit}) must be between {min} and {max}{unit}");
    }
    Ok(())
}

/// Range-check every configured value.
pub fn validate_config(config: &Config) -> Result<()> {
    check_range(
        config.max_save_attempts,
        MINIMUM_ATTEMPTS,
        MAXIMUM_ATTEMPTS,
        "max_save_attempts",
        "",
    )?;
    check_range(
        config.delivery_attempts,
        MINIMUM_ATTEMPTS,
        MAXIMUM_ATTEMPTS,
        "delivery_attempts",
        "",
    )?;

    for (name, value) in [
        ("save_retry_base_ms", config.save_retry_base_ms),
        ("loading_retry_interval_ms", config.loading_retry_interval_ms),
        ("reinject_settle_ms", config.reinject_settle_ms),
        ("delivery_retry_delay_ms", config.delivery_retry_delay_ms),
        ("injection_settle_ms", config.injection_settle_ms),
        ("completion_linger_ms", config.completion_linger_ms),
        ("error_linger_ms", config.error_linger_ms),
        ("interaction_deferral_ms", config.interaction_deferral_ms),
    ] {
        check_range(
            value,
            MINIMUM_RETRY_DELAY_MS,
            MAXIMUM_RETRY_DELAY_MS,
            name,
            "ms",
        )?;
    }

    check_range(
        config.animation_timeout_ms,
        MINIMUM_ANIMATION_TIMEOUT_MS,
        MAXIMUM_ANIMATION_TIMEOUT_MS,
        "animation_timeout_ms",
        "ms",
    )?;
    check_range(
        config.message_timeout_ms,
        MINIMUM_ANIMATION_TIMEOUT_MS,
        MAXIMUM_RETRY_DELAY_MS,
        "message_timeout_ms",
        "ms",
    )?;
    check_range(
        config.persist_interval_ms,
        MINIMUM_PERSIST_INTERVAL_MS,
        MAXIMUM_PERSIST_INTERVAL_MS,
        "persist_interval_ms",
        "ms",
    )?;

    // Never below the alarm facility's own floor
    check_range(
        config.min_alarm_delay_ms,
        DEFAULT_MIN_ALARM_DELAY_MS,
        MINIMUM_CYCLE_DURATION_MS,
        "min_alarm_delay_ms",
        "ms",
    )?;
    check_range(
        config.alarm_tolerance_ms,
        MINIMUM_PERSIST_INTERVAL_MS,
        MINIMUM_CYCLE_DURATION_MS,
        "alarm_tolerance_ms",
        "ms",
    )?;

    Ok(())
}
