//! Overlay message catalogue.
//!
//! The language preference lives under its own sync-tier key and is read when
//! an executor is created; it is not part of the settings record.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::constants::LANGUAGE_KEY;
use crate::state::storage::StorageArea;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    En,
    Zh,
}

impl Language {
    /// Map a stored language code; anything unrecognised falls back to English.
    pub fn from_code(code: &str) -> Self {
        if code.to_ascii_lowercase().starts_with("zh") {
            Language::Zh
        } else {
            Language::En
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Zh => "zh",
        }
    }

    /// Read the preference from `storage`, defaulting to English.
    pub fn load(storage: &dyn StorageArea) -> Self {
        match storage.get(LANGUAGE_KEY) {
            Ok(Some(Value::String(code))) => Language::from_code(&code),
            Ok(_) => Language::En,
            Err(e) => {
                log_warning!("Failed to load language preference: {e:#}");
                Language::En
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKey {
    ExerciseStarting,
    RotateLeft,
    RotateRight,
    RestorePosition,
    ExerciseComplete,
    ExerciseInProgress,
    ExerciseError,
    RotationDelayed,
}

fn template(language: Language, key: MessageKey) -> &'static str {
    use MessageKey::*;
    match (language, key) {
        (Language::En, ExerciseStarting) => "Cervical exercise starting...",
        (Language::En, RotateLeft) => "Rotate left {angle}°",
        (Language::En, RotateRight) => "Rotate right {angle}°",
        (Language::En, RestorePosition) => "Restore to normal position",
        (Language::En, ExerciseComplete) => "Cervical exercise completed!",
        (Language::En, ExerciseInProgress) => "Cervical exercise in progress... {time}",
        (Language::En, ExerciseError) => "Error occurred during exercise",
        (Language::En, RotationDelayed) => "Rotation delayed due to user interaction",

        (Language::Zh, ExerciseStarting) => "颈椎锻炼开始...",
        (Language::Zh, RotateLeft) => "向左旋转 {angle}°",
        (Language::Zh, RotateRight) => "向右旋转 {angle}°",
        (Language::Zh, RestorePosition) => "恢复正常位置",
        (Language::Zh, ExerciseComplete) => "颈椎锻炼完成！",
        (Language::Zh, ExerciseInProgress) => "颈椎锻炼进行中... {time}",
        (Language::Zh, ExerciseError) => "锻炼过程出现错误",
        (Language::Zh, RotationDelayed) => "检测到用户操作，旋转已推迟",
    }
}

/// Render `key`, substituting `{name}` placeholders from `params`.
///
/// Placeholders without a matching parameter are left as written.
pub fn translate(language: Language, key: MessageKey, params: &[(&str, String)]) -> String {
    let text = template(language, key);
    if params.is_empty() {
        return text.to_string();
    }
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| {
            params
                .iter()
                .find(|(name, _)| *name == &caps[1])
                .map(|(_, value)| value.clone())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Countdown text: `m:ss` from one minute up, `Ns` below.
pub fn format_countdown(seconds: u64) -> String {
    let minutes = seconds / 60;
    let rest = seconds % 60;
    if minutes > 0 {
        format!("{minutes}:{rest:02}")
    } else {
        format!("{rest}s")
    }
}
