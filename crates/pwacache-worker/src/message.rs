//! Control messages a page may post to a worker.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

const SKIP_WAITING: &str = "SKIP_WAITING";

/// The only inbound control signal a worker accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate a waiting worker now.
    SkipWaiting,
}

impl ControlMessage {
    /// Interpret posted message data.
    ///
    /// Accepts both the bare string `"SKIP_WAITING"` and the tagged object
    /// `{"type": "SKIP_WAITING"}`.
    pub fn from_json(data: &JsonValue) -> Option<Self> {
        let tag = match data {
            JsonValue::String(s) => s.as_str(),
            JsonValue::Object(map) => map.get("type")?.as_str()?,
            _ => return None,
        };
        (tag == SKIP_WAITING).then_some(ControlMessage::SkipWaiting)
    }

    /// Tagged wire form.
    pub fn to_json(self) -> JsonValue {
        match self {
            ControlMessage::SkipWaiting => serde_json::json!({ "type": SKIP_WAITING }),
        }
    }
}
