//! Wire shapes, one JSON object per line.
//!
//! ```text
//! {"id": 7, "method": "get_epic", "params": {"epic_num": 1}}
//! {"id": 7, "result": {"success": true, "data": {...}, ...}}
//! {"id": 7, "error": "epic not found: 1", "code": "NOT_FOUND", "details": {...}}
//! ```

use scrum_core::{Envelope, ErrorCode, ScrumError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    /// Optional on decode so a request that names no method can still be
    /// answered by id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl Response {
    pub fn success(id: u64, envelope: &Envelope) -> Self {
        Self {
            id,
            result: serde_json::to_value(envelope).ok(),
            error: None,
            code: None,
            details: None,
        }
    }

    pub fn failure(id: u64, code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            id,
            result: None,
            error: Some(message.into()),
            code: Some(code.as_str().to_string()),
            details: Some(details),
        }
    }

    pub fn from_error(id: u64, err: &ScrumError) -> Self {
        Self::failure(id, err.code(), err.to_string(), err.details())
    }

    /// Serialize as one line, newline included.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"id":{},"error":"failed to encode response: {}","code":"INTERNAL_ERROR"}}"#,
                self.id,
                e.to_string().replace('"', "'")
            )
        });
        line.push('\n');
        line
    }
}
