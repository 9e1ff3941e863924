//! Control protocol
//!
//! Every WebSocket text message is an envelope `{"event": <name>, "data": <payload>}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event names
pub mod events {
    pub const START: &str = "START";
    pub const STOP: &str = "STOP";
    pub const ENABLE_STAGE: &str = "ENABLE_STAGE";
    pub const DISABLE_STAGE: &str = "DISABLE_STAGE";
    pub const SET_PARAMETER: &str = "SET_PARAMETER";
    pub const GET_CURRENT_INFO: &str = "GET_CURRENT_INFO";
    pub const TOGGLE_PREVIEW: &str = "TOGGLE_PREVIEW";

    pub const DATA: &str = "DATA";
    pub const ERROR: &str = "ERROR";

    pub const AUTHENTICATE: &str = "AUTHENTICATE";
    pub const AUTHENTICATED: &str = "authenticated";
    pub const UNAUTHORIZED: &str = "unauthorized";
}

/// One control message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Reference to a video source, by id, device or device index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceRef {
    Index(i64),
    Name(String),
}

impl SourceRef {
    /// True if this refers to the source with the given id or device
    pub fn matches(&self, id: &str, source: &str) -> bool {
        match self {
            SourceRef::Index(index) => {
                let index = index.to_string();
                index == id || index == source
            }
            SourceRef::Name(name) => name == id || name == source,
        }
    }
}

impl std::fmt::Display for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceRef::Index(index) => write!(f, "{}", index),
            SourceRef::Name(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartPayload {
    #[serde(default)]
    pub name: Option<String>,
}

/// Payload of ENABLE_STAGE / DISABLE_STAGE
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagePayload {
    pub stage_name: String,
    pub source: SourceRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetParameterPayload {
    pub stage_name: String,
    pub param_name: String,
    #[serde(default)]
    pub value: Value,
    pub source: SourceRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatePayload {
    pub token: String,
}

/// Enabled flag of a stage on one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageStatus {
    pub key: String,
    pub status: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub name: String,
    pub status: StageStatus,
    pub params: Map<String, Value>,
}

/// Status snapshot published as DATA
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentInfo {
    pub recording: bool,
    /// Elapsed seconds while recording, last session length when idle
    pub time: f64,
    pub stages: Vec<StageReport>,
    pub is_streaming: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPayload {
    pub current_info: CurrentInfo,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_without_data() {
        let envelope: Envelope = serde_json::from_str(r#"{"event":"START"}"#).unwrap();
        assert_eq!(envelope.event, events::START);
        assert_eq!(envelope.data, Value::Null);
    }

    #[test]
    fn test_source_ref_number_or_string() {
        let payload: StagePayload =
            serde_json::from_value(json!({"stage_name": "DeblurringStage", "source": 0})).unwrap();
        assert_eq!(payload.source, SourceRef::Index(0));
        assert!(payload.source.matches("board", "0"));
        assert!(!payload.source.matches("board", "/dev/video0"));

        let payload: StagePayload =
            serde_json::from_value(json!({"stage_name": "DeblurringStage", "source": "board"}))
                .unwrap();
        assert!(payload.source.matches("board", "/dev/video0"));
        assert!(!payload.source.matches("slides", "/dev/video1"));
    }

    #[test]
    fn test_data_payload_shape() {
        let payload = DataPayload {
            current_info: CurrentInfo {
                recording: true,
                time: 1.25,
                stages: vec![StageReport {
                    name: "DeblurringStage".to_string(),
                    status: StageStatus {
                        key: "board".to_string(),
                        status: false,
                    },
                    params: Map::new(),
                }],
                is_streaming: false,
            },
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["current_info"]["stages"][0]["status"]["key"], "board");
        assert_eq!(value["current_info"]["stages"][0]["status"]["status"], false);
        assert_eq!(value["current_info"]["time"], 1.25);
    }
}
