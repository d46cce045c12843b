use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ScrumError;

/// Normalise user input such as `in-progress` or `In Progress` to the wire
/// form `IN_PROGRESS`.
fn normalize(s: &str) -> String {
    s.trim().to_ascii_uppercase().replace(['-', ' '], "_")
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    InReview,
    Done,
    Blocked,
}

impl TaskStatus {
    pub fn all() -> &'static [TaskStatus] {
        &[
            TaskStatus::Todo,
            TaskStatus::InProgress,
            TaskStatus::InReview,
            TaskStatus::Done,
            TaskStatus::Blocked,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "TODO",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::InReview => "IN_REVIEW",
            TaskStatus::Done => "DONE",
            TaskStatus::Blocked => "BLOCKED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ScrumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "TODO" => Ok(TaskStatus::Todo),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "IN_REVIEW" => Ok(TaskStatus::InReview),
            "DONE" => Ok(TaskStatus::Done),
            "BLOCKED" => Ok(TaskStatus::Blocked),
            _ => Err(ScrumError::invalid(
                "status",
                format!("'{s}' is not one of TODO, IN_PROGRESS, IN_REVIEW, DONE, BLOCKED"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// SprintStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SprintStatus {
    Planning,
    Active,
    Completed,
    Cancelled,
}

impl SprintStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SprintStatus::Planning => "PLANNING",
            SprintStatus::Active => "ACTIVE",
            SprintStatus::Completed => "COMPLETED",
            SprintStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SprintStatus::Completed | SprintStatus::Cancelled)
    }

    /// Whether a sprint may move from `self` to `to`.
    ///
    /// Re-asserting the current status is always allowed and treated as a
    /// no-op by callers.
    pub fn can_transition_to(self, to: SprintStatus) -> bool {
        if self == to {
            return true;
        }
        matches!(
            (self, to),
            (SprintStatus::Planning, SprintStatus::Active)
                | (SprintStatus::Planning, SprintStatus::Cancelled)
                | (SprintStatus::Active, SprintStatus::Completed)
                | (SprintStatus::Active, SprintStatus::Cancelled)
        )
    }
}

impl fmt::Display for SprintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SprintStatus {
    type Err = ScrumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "PLANNING" => Ok(SprintStatus::Planning),
            "ACTIVE" => Ok(SprintStatus::Active),
            "COMPLETED" => Ok(SprintStatus::Completed),
            "CANCELLED" | "CANCELED" => Ok(SprintStatus::Cancelled),
            _ => Err(ScrumError::invalid(
                "status",
                format!("'{s}' is not one of PLANNING, ACTIVE, COMPLETED, CANCELLED"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// DocumentStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    #[default]
    Draft,
    InReview,
    Approved,
    Rejected,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Draft => "DRAFT",
            DocumentStatus::InReview => "IN_REVIEW",
            DocumentStatus::Approved => "APPROVED",
            DocumentStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = ScrumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "DRAFT" => Ok(DocumentStatus::Draft),
            "IN_REVIEW" => Ok(DocumentStatus::InReview),
            "APPROVED" => Ok(DocumentStatus::Approved),
            "REJECTED" => Ok(DocumentStatus::Rejected),
            _ => Err(ScrumError::invalid(
                "status",
                format!("'{s}' is not one of DRAFT, IN_REVIEW, APPROVED, REJECTED"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
            Priority::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ScrumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "LOW" => Ok(Priority::Low),
            "MEDIUM" => Ok(Priority::Medium),
            "HIGH" => Ok(Priority::High),
            "CRITICAL" => Ok(Priority::Critical),
            _ => Err(ScrumError::invalid(
                "priority",
                format!("'{s}' is not one of LOW, MEDIUM, HIGH, CRITICAL"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// EntityType
// ---------------------------------------------------------------------------

/// Kind of entity a document can be linked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Task,
    Epic,
    Sprint,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Task => "task",
            EntityType::Epic => "epic",
            EntityType::Sprint => "sprint",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ScrumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "task" | "story" => Ok(EntityType::Task),
            "epic" => Ok(EntityType::Epic),
            "sprint" => Ok(EntityType::Sprint),
            _ => Err(ScrumError::invalid(
                "entity_type",
                format!("'{s}' is not one of task, epic, sprint"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Nullable update fields
// ---------------------------------------------------------------------------

/// Deserialize a field that distinguishes "absent" (`None`) from "explicitly
/// null" (`Some(None)`). Use with `#[serde(default, deserialize_with = ...)]`.
pub fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "nullable")]
        sprint_id: Option<Option<i64>>,
    }

    #[test]
    fn nullable_distinguishes_absent_from_null() {
        let absent: Patch = serde_json::from_str("{}").unwrap();
        let null: Patch = serde_json::from_str(r#"{"sprint_id": null}"#).unwrap();
        let set: Patch = serde_json::from_str(r#"{"sprint_id": 4}"#).unwrap();
        assert_eq!(absent.sprint_id, None);
        assert_eq!(null.sprint_id, Some(None));
        assert_eq!(set.sprint_id, Some(Some(4)));
    }

    #[test]
    fn task_status_parses_loose_spellings() {
        assert_eq!("in-progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert_eq!("In Review".parse::<TaskStatus>().unwrap(), TaskStatus::InReview);
        assert!("finished".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn task_status_serializes_screaming_snake() {
        let v = serde_json::to_value(TaskStatus::InProgress).unwrap();
        assert_eq!(v, "IN_PROGRESS");
    }

    #[test]
    fn sprint_transitions_are_one_directional() {
        use SprintStatus::*;
        assert!(Planning.can_transition_to(Active));
        assert!(Active.can_transition_to(Completed));
        assert!(Active.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Active));
        assert!(!Cancelled.can_transition_to(Active));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Active.can_transition_to(Planning));
        assert!(Completed.can_transition_to(Completed));
    }

    #[test]
    fn entity_type_accepts_story_alias() {
        assert_eq!("story".parse::<EntityType>().unwrap(), EntityType::Task);
        assert!("document".parse::<EntityType>().is_err());
    }

    #[test]
    fn priority_orders_by_urgency() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::Low < Priority::Medium);
        assert_eq!(Priority::default(), Priority::Medium);
    }
}
