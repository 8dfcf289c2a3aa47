//! Message shapes exchanged between UI surfaces, the coordinator and pages.
//!
//! Every message is a JSON object with a `type` discriminator. UI requests
//! carry an optional `payload`; page requests follow the content-script
//! layout (`PING` with a timestamp, `execute_sequence` with a payload).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::{Millis, Phase, Settings, SettingsPatch, StateView};

/// Requests accepted by the coordinator's message router.
#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundRequest {
    /// Start the cycle, applying `settings` first when present.
    StartRotation { settings: Option<SettingsPatch> },
    StopRotation,
    GetState,
    SettingsChanged(SettingsPatch),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize, Default)]
struct StartPayload {
    #[serde(default)]
    settings: Option<SettingsPatch>,
}

impl BackgroundRequest {
    pub fn type_name(&self) -> &'static str {
        match self {
            BackgroundRequest::StartRotation { .. } => "start_rotation",
            BackgroundRequest::StopRotation => "stop_rotation",
            BackgroundRequest::GetState => "get_state",
            BackgroundRequest::SettingsChanged(_) => "settings_changed",
        }
    }

    /// Decode a raw message. Unknown types and malformed payloads are errors.
    pub fn from_value(message: &Value) -> Result<Self> {
        let envelope: Envelope =
            serde_json::from_value(message.clone()).context("Malformed message")?;

        let request = match envelope.kind.as_str() {
            "start_rotation" => {
                let payload: StartPayload = if envelope.payload.is_null() {
                    StartPayload::default()
                } else {
                    serde_json::from_value(envelope.payload)
                        .context("Invalid start_rotation payload")?
                };
                BackgroundRequest::StartRotation {
                    settings: payload.settings,
                }
            }
            "stop_rotation" => BackgroundRequest::StopRotation,
            "get_state" => BackgroundRequest::GetState,
            "settings_changed" => {
                let patch = if envelope.payload.is_null() {
                    SettingsPatch::default()
                } else {
                    serde_json::from_value(envelope.payload)
                        .context("Invalid settings_changed payload")?
                };
                BackgroundRequest::SettingsChanged(patch)
            }
            other => anyhow::bail!("Unknown message type: {other}"),
        };
        Ok(request)
    }

    /// Encode in the wire layout accepted by [`BackgroundRequest::from_value`].
    pub fn to_value(&self) -> Value {
        let payload = match self {
            BackgroundRequest::StartRotation {
                settings: Some(patch),
            } => serde_json::json!({ "settings": patch }),
            BackgroundRequest::SettingsChanged(patch) => {
                serde_json::to_value(patch).unwrap_or(Value::Null)
            }
            _ => Value::Null,
        };
        if payload.is_null() {
            serde_json::json!({ "type": self.type_name() })
        } else {
            serde_json::json!({ "type": self.type_name(), "payload": payload })
        }
    }
}

/// Response to every [`BackgroundRequest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_fire_at: Option<Millis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
}

impl BackgroundResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn scheduled(next_fire_at: Millis) -> Self {
        Self {
            success: true,
            next_fire_at: Some(next_fire_at),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn snapshot(settings: Settings) -> Self {
        Self {
            success: true,
            state: Some(settings.state_view()),
            settings: Some(settings),
            ..Default::default()
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({ "success": false, "error": format!("Unencodable response: {e}") })
        })
    }
}

/// Parameters of one rotation sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceParams {
    pub angle: u32,
    pub duration_ms: u64,
    pub show_indicator: bool,
}

impl SequenceParams {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            angle: settings.rotation_angle_deg,
            duration_ms: settings.rotation_duration_ms,
            show_indicator: settings.show_indicator,
        }
    }
}

/// Requests sent from the coordinator to a page executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PageRequest {
    #[serde(rename = "PING")]
    Ping { timestamp: Millis },
    #[serde(rename = "execute_sequence")]
    ExecuteSequence { payload: SequenceParams },
    #[serde(rename = "stop_rotation")]
    StopRotation,
    #[serde(rename = "update_status")]
    UpdateStatus,
}

impl PageRequest {
    pub fn type_name(&self) -> &'static str {
        match self {
            PageRequest::Ping { .. } => "PING",
            PageRequest::ExecuteSequence { .. } => "execute_sequence",
            PageRequest::StopRotation => "stop_rotation",
            PageRequest::UpdateStatus => "update_status",
        }
    }
}

/// Page executor status, as reported by `update_status`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageStatus {
    pub is_active: bool,
    pub current_phase: Phase,
    pub current_angle: f64,
}

/// Reply from a page executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Millis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_angle: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PageStatus>,
}

impl PageReply {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn pong(timestamp: Millis) -> Self {
        Self {
            success: true,
            timestamp: Some(timestamp),
            ..Default::default()
        }
    }

    pub fn completed(current_angle: f64, phase: Phase) -> Self {
        Self {
            success: true,
            current_angle: Some(current_angle),
            phase: Some(phase),
            ..Default::default()
        }
    }

    pub fn note(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_status(status: PageStatus) -> Self {
        Self {
            success: true,
            status: Some(status),
            ..Default::default()
        }
    }

    /// Best description of why the page refused or failed.
    pub fn reason(&self) -> &str {
        self.error
            .as_deref()
            .or(self.message.as_deref())
            .unwrap_or("no reason given")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_requests() {
        assert_eq!(
            BackgroundRequest::from_value(&json!({"type": "stop_rotation"})).unwrap(),
            BackgroundRequest::StopRotation
        );
        assert_eq!(
            BackgroundRequest::from_value(&json!({"type": "start_rotation"})).unwrap(),
            BackgroundRequest::StartRotation { settings: None }
        );
        let start = BackgroundRequest::from_value(&json!({
            "type": "start_rotation",
            "payload": {"settings": {"rotationAngleDeg": 20}}
        }))
        .unwrap();
        assert_eq!(
            start,
            BackgroundRequest::StartRotation {
                settings: Some(SettingsPatch {
                    rotation_angle_deg: Some(20),
                    ..Default::default()
                })
            }
        );
    }

    #[test]
    fn test_decode_rejects_unknown_and_malformed() {
        let unknown = BackgroundRequest::from_value(&json!({"type": "explode"})).unwrap_err();
        assert!(unknown.to_string().contains("Unknown message type"));
        assert!(BackgroundRequest::from_value(&json!({"payload": {}})).is_err());
        assert!(BackgroundRequest::from_value(&json!("start_rotation")).is_err());
        assert!(
            BackgroundRequest::from_value(&json!({
                "type": "settings_changed",
                "payload": {"cycleDurationMs": "ten minutes"}
            }))
            .is_err()
        );
    }

    #[test]
    fn test_request_wire_layout() {
        let request = BackgroundRequest::SettingsChanged(SettingsPatch {
            enabled: Some(false),
            ..Default::default()
        });
        let value = request.to_value();
        assert_eq!(value, json!({"type": "settings_changed", "payload": {"enabled": false}}));
        assert_eq!(BackgroundRequest::from_value(&value).unwrap(), request);
    }

    #[test]
    fn test_response_omits_absent_fields() {
        assert_eq!(BackgroundResponse::ok().to_value(), json!({"success": true}));
        assert_eq!(
            BackgroundResponse::failure("nope").to_value(),
            json!({"success": false, "error": "nope"})
        );
    }

    #[test]
    fn test_page_request_layout() {
        let ping = serde_json::to_value(PageRequest::Ping { timestamp: 5 }).unwrap();
        assert_eq!(ping, json!({"type": "PING", "timestamp": 5}));

        let execute = serde_json::to_value(PageRequest::ExecuteSequence {
            payload: SequenceParams {
                angle: 15,
                duration_ms: 30_000,
                show_indicator: true,
            },
        })
        .unwrap();
        assert_eq!(
            execute,
            json!({
                "type": "execute_sequence",
                "payload": {"angle": 15, "durationMs": 30000, "showIndicator": true}
            })
        );
    }
}
