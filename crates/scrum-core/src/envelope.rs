//! Uniform result shape returned by every service call and rendered by every
//! transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ErrorCode, ScrumError};

// ---------------------------------------------------------------------------
// Reply: what a service method hands back on success
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Reply<T> {
    pub message: String,
    pub data: T,
    pub metadata: Map<String, Value>,
}

impl<T> Reply<T> {
    pub fn new(message: impl Into<String>, data: T) -> Self {
        Self {
            message: message.into(),
            data,
            metadata: Map::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Envelope: the wire shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: ErrorCode,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn success(reply: Reply<Value>) -> Self {
        let mut metadata = reply.metadata;
        metadata.insert("timestamp".into(), Value::String(Utc::now().to_rfc3339()));
        Self {
            success: true,
            message: Some(reply.message),
            data: Some(reply.data),
            metadata: Some(metadata),
            error: None,
        }
    }

    pub fn failure(err: &ScrumError) -> Self {
        Self::error(err.code(), err.to_string(), err.details())
    }

    /// Failure raised outside the service layer (unknown method, panics,
    /// malformed bodies).
    pub fn error(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            success: false,
            message: None,
            data: None,
            metadata: None,
            error: Some(ErrorBody {
                message: message.into(),
                code,
                details,
                timestamp: Utc::now(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_envelope_has_timestamp_metadata() {
        let reply = Reply::new("Created epic 1", json!({"epic_num": 1})).with_meta("created", true);
        let env = Envelope::success(reply);
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["success"], true);
        assert_eq!(v["message"], "Created epic 1");
        assert_eq!(v["data"]["epic_num"], 1);
        assert_eq!(v["metadata"]["created"], true);
        assert!(v["metadata"]["timestamp"].is_string());
        assert!(v.get("error").is_none());
    }

    #[test]
    fn failure_envelope_carries_code_and_details() {
        let env = Envelope::failure(&ScrumError::not_found("epic", 9));
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"]["code"], "NOT_FOUND");
        assert_eq!(v["error"]["details"]["entity"], "epic");
        assert_eq!(v["error"]["message"], "epic not found: 9");
        assert!(v["error"]["timestamp"].is_string());
        assert!(v.get("data").is_none());
    }

    #[test]
    fn null_data_is_kept_on_success() {
        let env = Envelope::success(Reply::new("No active sprint", Value::Null));
        let v = serde_json::to_value(&env).unwrap();
        assert!(v.as_object().unwrap().contains_key("data"));
        assert!(v["data"].is_null());
    }
}
