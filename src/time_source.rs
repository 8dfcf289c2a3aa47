//! Time source abstraction for real and simulated time.
//!
//! Every component that reads the clock or waits takes an `Arc<dyn TimeSource>`.
//! Production code uses [`RealTimeSource`]; tests and the `simulate` command use
//! [`SimulatedTimeSource`] so a ten-minute cycle completes in milliseconds.

use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone, Utc};
use std::sync::Mutex;
use std::time::Duration as StdDuration;

/// Trait for abstracting time operations.
pub trait TimeSource: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;

    /// Current time as epoch milliseconds, the unit of every persisted timestamp.
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }

    /// Sleep for the specified duration (or simulate it).
    fn sleep(&self, duration: StdDuration);

    /// Check if this is a simulated time source.
    fn is_simulated(&self) -> bool;

    /// Check if simulation has ended (always false for real time).
    fn is_ended(&self) -> bool {
        false
    }
}

/// Real-time implementation backed by the system clock.
pub struct RealTimeSource;

impl TimeSource for RealTimeSource {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: StdDuration) {
        std::thread::sleep(duration);
    }

    fn is_simulated(&self) -> bool {
        false
    }
}

/// Simulated time source.
///
/// Two modes:
/// - Fast-forward (multiplier `0.0`): every sleep advances simulated time by
///   exactly the requested duration and returns almost immediately.
/// - Linear acceleration: sleeps take `duration / multiplier` of real time.
///
/// Time never advances past `end_time`.
pub struct SimulatedTimeSource {
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    time_multiplier: f64,
    /// Simulated time elapsed since `start_time`
    elapsed: Mutex<StdDuration>,
}

impl SimulatedTimeSource {
    /// Create a new simulated time source.
    ///
    /// A negative multiplier falls back to 3600x; `0.0` selects fast-forward.
    pub fn new(start_time: DateTime<Utc>, end_time: DateTime<Utc>, multiplier: f64) -> Self {
        let time_multiplier = if multiplier == 0.0 {
            0.0
        } else if multiplier < 0.0 {
            3600.0
        } else {
            multiplier
        };
        Self {
            start_time,
            end_time,
            time_multiplier,
            elapsed: Mutex::new(StdDuration::ZERO),
        }
    }

    /// Fast-forward source starting at `start` with effectively no end.
    pub fn fast_forward(start: DateTime<Utc>) -> Self {
        Self::new(start, start + ChronoDuration::days(3650), 0.0)
    }

    /// Whether this source jumps instantly through sleeps.
    pub fn is_fast_forward(&self) -> bool {
        self.time_multiplier == 0.0
    }

    fn elapsed(&self) -> StdDuration {
        *self
            .elapsed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn current_time(&self) -> DateTime<Utc> {
        let elapsed = ChronoDuration::from_std(self.elapsed())
            .unwrap_or_else(|_| ChronoDuration::days(36_500));
        let simulated = self
            .start_time
            .checked_add_signed(elapsed)
            .unwrap_or(self.end_time);
        simulated.min(self.end_time)
    }

    fn remaining(&self) -> StdDuration {
        (self.end_time - self.current_time())
            .to_std()
            .unwrap_or(StdDuration::ZERO)
    }
}

impl TimeSource for SimulatedTimeSource {
    fn now(&self) -> DateTime<Utc> {
        self.current_time()
    }

    fn sleep(&self, duration: StdDuration) {
        let step = duration.min(self.remaining());
        if step.is_zero() {
            return;
        }

        if self.time_multiplier == 0.0 {
            // Give other threads a chance to observe intermediate state
            std::thread::sleep(StdDuration::from_millis(1));
        } else {
            let real_secs = step.as_secs_f64() / self.time_multiplier;
            std::thread::sleep(StdDuration::from_secs_f64(real_secs));
        }

        let mut elapsed = self
            .elapsed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *elapsed += step;
    }

    fn is_simulated(&self) -> bool {
        true
    }

    fn is_ended(&self) -> bool {
        self.current_time() >= self.end_time
    }
}

/// Parse a local datetime string in the format "YYYY-MM-DD HH:MM:SS".
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, String> {
    use chrono::NaiveDateTime;

    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map_err(|e| format!("Invalid datetime format: {e}. Use YYYY-MM-DD HH:MM:SS"))?;
    Local
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| "Ambiguous or invalid local time".to_string())
}

/// Render an epoch-millisecond timestamp for log output.
pub fn format_millis(millis: i64) -> String {
    match Utc.timestamp_millis_opt(millis).single() {
        Some(time) => time
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => format!("{millis}ms"),
    }
}
