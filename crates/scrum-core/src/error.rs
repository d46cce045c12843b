use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrumError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("{entity} already exists: {key}")]
    AlreadyExists { entity: &'static str, key: String },

    #[error("sprint '{name}' is already active (id {id})")]
    SprintAlreadyActive { id: i64, name: String },

    #[error("invalid {entity} transition from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("{message}")]
    Conflict {
        reason: &'static str,
        message: String,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ScrumError>;

impl From<rusqlite::Error> for ScrumError {
    fn from(e: rusqlite::Error) -> Self {
        ScrumError::Storage(e.to_string())
    }
}

impl ScrumError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ScrumError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, key: impl fmt::Display) -> Self {
        ScrumError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ScrumError::MissingField(_) | ScrumError::Invalid { .. } => ErrorCode::Validation,
            ScrumError::NotFound { .. } => ErrorCode::NotFound,
            ScrumError::AlreadyExists { .. }
            | ScrumError::SprintAlreadyActive { .. }
            | ScrumError::InvalidTransition { .. }
            | ScrumError::Conflict { .. } => ErrorCode::Conflict,
            ScrumError::Storage(_) => ErrorCode::Storage,
            ScrumError::Io(_) | ScrumError::Yaml(_) => ErrorCode::Internal,
        }
    }

    /// Structured detail an automated caller can branch on without parsing
    /// the message.
    pub fn details(&self) -> serde_json::Value {
        match self {
            ScrumError::MissingField(field) => json!({ "reason": "missing_field", "field": field }),
            ScrumError::Invalid { field, .. } => json!({ "reason": "invalid_value", "field": field }),
            ScrumError::NotFound { entity, key } => {
                json!({ "reason": "not_found", "entity": entity, "key": key })
            }
            ScrumError::AlreadyExists { entity, key } => {
                json!({ "reason": "already_exists", "entity": entity, "key": key })
            }
            ScrumError::SprintAlreadyActive { id, name } => json!({
                "reason": "active_sprint_exists",
                "entity": "sprint",
                "active_sprint_id": id,
                "active_sprint_name": name,
            }),
            ScrumError::InvalidTransition { entity, from, to } => json!({
                "reason": "invalid_transition",
                "entity": entity,
                "from": from,
                "to": to,
            }),
            ScrumError::Conflict { reason, .. } => json!({ "reason": reason }),
            ScrumError::Storage(_) => json!({ "reason": "storage_failure" }),
            ScrumError::Io(_) | ScrumError::Yaml(_) => json!({ "reason": "internal" }),
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Stable machine-readable error category shared by every transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    NotFound,
    Conflict,
    #[serde(rename = "STORAGE_ERROR")]
    Storage,
    MethodNotFound,
    #[serde(rename = "INTERNAL_ERROR")]
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Validation => "VALIDATION_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::Storage => "STORAGE_ERROR",
            ErrorCode::MethodNotFound => "METHOD_NOT_FOUND",
            ErrorCode::Internal => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_taxonomy() {
        assert_eq!(
            ScrumError::MissingField("title".into()).code(),
            ErrorCode::Validation
        );
        assert_eq!(ScrumError::not_found("epic", 3).code(), ErrorCode::NotFound);
        assert_eq!(
            ScrumError::SprintAlreadyActive {
                id: 1,
                name: "Sprint 1".into()
            }
            .code(),
            ErrorCode::Conflict
        );
        assert_eq!(
            ScrumError::Storage("disk full".into()).code(),
            ErrorCode::Storage
        );
    }

    #[test]
    fn epic_not_found_and_epic_exists_are_distinguishable() {
        let missing = ScrumError::not_found("epic", 4);
        let exists = ScrumError::AlreadyExists {
            entity: "epic",
            key: "4".into(),
        };
        assert_eq!(missing.details()["reason"], "not_found");
        assert_eq!(exists.details()["reason"], "already_exists");
        assert_eq!(missing.details()["entity"], "epic");
        assert_ne!(missing.code(), exists.code());
    }

    #[test]
    fn error_code_serializes_to_wire_name() {
        let v = serde_json::to_value(ErrorCode::Validation).unwrap();
        assert_eq!(v, "VALIDATION_ERROR");
        assert_eq!(ErrorCode::Validation.as_str(), "VALIDATION_ERROR");
        let v = serde_json::to_value(ErrorCode::NotFound).unwrap();
        assert_eq!(v, "NOT_FOUND");
    }
}
