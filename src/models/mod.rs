//! Data models for sensibo-bridge

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Sensibo API Models
// ============================================================================

/// Reply envelope shared by every Sensibo endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status: String,
    pub result: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
}

/// A pod as returned by `/users/me/pods?fields=id,room`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub room: Room,
}

/// Dropdown entry: `value` is the pod id, `label` the room name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOption {
    pub value: String,
    pub label: String,
}

impl From<Device> for DeviceOption {
    fn from(device: Device) -> Self {
        Self {
            value: device.id,
            label: device.room.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementTime {
    pub time: String,
    #[serde(rename = "secondsAgo")]
    pub seconds_ago: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub time: MeasurementTime,
}

/// Measurement snapshot together with the envelope status it arrived with
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementReport {
    pub status: String,
    pub measurement: Measurement,
}

/// The vendor's full control state: attribute name → value
pub type AcState = Map<String, Value>;

/// Partial acState: only the attributes an operator wants changed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(Map<String, Value>);

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, attribute: &str, value: Value) {
        self.0.insert(attribute.to_string(), value);
    }

    #[cfg(test)]
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.0.get(attribute)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for Patch {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Body of `POST /pods/{id}/acStates`
#[derive(Debug, Serialize)]
pub struct AcStateWrite<'a> {
    #[serde(rename = "acState")]
    pub ac_state: &'a AcState,
}

/// `result` of `GET /pods/{id}?fields=acState`
#[derive(Debug, Deserialize)]
pub struct AcStateRecord {
    #[serde(rename = "acState")]
    pub ac_state: AcState,
}

// ============================================================================
// Node Models
// ============================================================================

/// Generic host message: a JSON object travelling between nodes
pub type Message = Map<String, Value>;

pub const MSGID_FIELD: &str = "_msgid";

/// Returns the message id, assigning a fresh one if missing
pub fn ensure_msgid(msg: &mut Message) -> String {
    if let Some(Value::String(id)) = msg.get(MSGID_FIELD) {
        return id.clone();
    }
    let id = uuid::Uuid::new_v4().to_string();
    msg.insert(MSGID_FIELD.to_string(), Value::String(id.clone()));
    id
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Idle,
    Polling,
    Waiting,
    Sending,
    Connected,
    Error,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStatus::Idle => "idle",
            NodeStatus::Polling => "polling",
            NodeStatus::Waiting => "waiting",
            NodeStatus::Sending => "sending",
            NodeStatus::Connected => "connected",
            NodeStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Outbound event emitted by a node
#[derive(Debug, Clone, Serialize)]
pub struct NodeEvent {
    pub node: String,
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub emitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub name: String,
    pub kind: String,
    pub device_id: String,
    pub status: NodeStatus,
    pub polling: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeDetail {
    #[serde(flatten)]
    pub summary: NodeSummary,
    pub last_event: Option<NodeEvent>,
}
