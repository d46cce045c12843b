//! Typed commands shared by every transport.
//!
//! A transport turns its request into a [`Command`] (by method name plus a
//! JSON parameter object, or directly from typed extractors) and calls
//! [`Command::execute`]. Parameter decoding happens here, once, so both
//! transports reject the same inputs with the same errors.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::{
    CreateDocument, DocumentChanges, DocumentQuery, EntityRef, LinkDocument, UnlinkDocument,
};
use crate::envelope::Reply;
use crate::epic::{CreateEpic, EpicChanges, EpicQuery};
use crate::error::{Result, ScrumError};
use crate::project::UpdateProjectInfo;
use crate::prompts::{self, GetPrompt};
use crate::report;
use crate::resources;
use crate::services::Services;
use crate::sprint::{AssignTasks, CompleteSprint, CreateSprint, SprintChanges, SprintQuery};
use crate::task::{CreateTask, TaskChanges, TaskQuery};
use crate::types::TaskStatus;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EpicKey {
    pub epic_num: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TaskKey {
    #[serde(alias = "id")]
    pub task_id: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SprintKey {
    #[serde(alias = "id")]
    pub sprint_id: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DocumentKey {
    #[serde(alias = "id")]
    pub document_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUri {
    #[serde(default)]
    pub uri: String,
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Command {
    GetProjectInfo,
    UpdateProjectInfo(UpdateProjectInfo),

    CreateEpic(CreateEpic),
    GetEpic(EpicKey),
    ListEpics(EpicQuery),
    UpdateEpic(EpicKey, EpicChanges),

    CreateTask(CreateTask),
    GetTask(TaskKey),
    ListTasks(TaskQuery),
    UpdateTask(TaskKey, TaskChanges),
    UpdateTaskStatus(TaskKey, StatusChange),
    DeleteTask(TaskKey),
    CurrentSprintTasks,

    CreateSprint(CreateSprint),
    GetSprint(SprintKey),
    ListSprints(SprintQuery),
    CurrentSprint,
    UpdateSprint(SprintKey, SprintChanges),
    ActivateSprint(SprintKey),
    CompleteSprint(SprintKey, CompleteSprint),
    AssignTasksToSprint(SprintKey, AssignTasks),

    CreateDocument(CreateDocument),
    GetDocument(DocumentKey),
    ListDocuments(DocumentQuery),
    UpdateDocument(DocumentKey, DocumentChanges),
    LinkDocument(LinkDocument),
    UnlinkDocument(UnlinkDocument),
    EntityDocuments(EntityRef),
    DocumentEntities(DocumentKey),

    GetProgress,
    GetAnalytics,
    ListResources,
    ReadResource(ResourceUri),
    ListPrompts,
    GetPrompt(GetPrompt),
}

/// Every method name [`Command::parse`] accepts.
pub const METHODS: &[&str] = &[
    "get_project_info",
    "update_project_info",
    "create_epic",
    "get_epic",
    "list_epics",
    "update_epic",
    "create_task",
    "get_task",
    "list_tasks",
    "update_task",
    "update_task_status",
    "delete_task",
    "current_sprint_tasks",
    "create_sprint",
    "get_sprint",
    "list_sprints",
    "current_sprint",
    "update_sprint",
    "activate_sprint",
    "complete_sprint",
    "assign_tasks_to_sprint",
    "create_document",
    "get_document",
    "list_documents",
    "update_document",
    "link_document",
    "unlink_document",
    "entity_documents",
    "document_entities",
    "get_progress",
    "get_analytics",
    "list_resources",
    "read_resource",
    "list_prompts",
    "get_prompt",
];

/// Raised when a method name matches no command. Kept apart from
/// [`ScrumError`] because it is a protocol failure, not a domain one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMethod(pub String);

impl std::fmt::Display for UnknownMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown method: {}", self.0)
    }
}

impl std::error::Error for UnknownMethod {}

#[derive(Debug)]
pub enum ParseError {
    UnknownMethod(UnknownMethod),
    Params(ScrumError),
}

impl From<ScrumError> for ParseError {
    fn from(e: ScrumError) -> Self {
        ParseError::Params(e)
    }
}

/// Decode a parameter object, mapping serde's messages onto the domain
/// error taxonomy.
pub fn decode_params<T: DeserializeOwned>(params: &Value) -> Result<T> {
    serde_json::from_value(params.clone()).map_err(|e| {
        let msg = e.to_string();
        if let Some(rest) = msg.strip_prefix("missing field `") {
            let field = rest.split('`').next().unwrap_or_default();
            return ScrumError::MissingField(field.to_string());
        }
        ScrumError::invalid("params", msg)
    })
}

fn reply_json<T: Serialize>(reply: Reply<T>) -> Result<Reply<Value>> {
    let Reply {
        message,
        data,
        metadata,
    } = reply;
    let data = serde_json::to_value(data)
        .map_err(|e| ScrumError::Storage(format!("encode response: {e}")))?;
    Ok(Reply {
        message,
        data,
        metadata,
    })
}

impl Command {
    /// Build a command from a method name and its parameters. `null` or
    /// absent parameters are treated as an empty object.
    pub fn parse(method: &str, params: Value) -> std::result::Result<Self, ParseError> {
        let p = match params {
            Value::Null => Value::Object(Map::new()),
            Value::Object(_) => params,
            _ => {
                return Err(ParseError::Params(ScrumError::invalid(
                    "params",
                    "must be a JSON object",
                )))
            }
        };
        let cmd = match method {
            "get_project_info" => Command::GetProjectInfo,
            "update_project_info" => Command::UpdateProjectInfo(decode_params(&p)?),

            "create_epic" => Command::CreateEpic(decode_params(&p)?),
            "get_epic" => Command::GetEpic(decode_params(&p)?),
            "list_epics" => Command::ListEpics(decode_params(&p)?),
            "update_epic" => Command::UpdateEpic(decode_params(&p)?, decode_params(&p)?),

            "create_task" => Command::CreateTask(decode_params(&p)?),
            "get_task" => Command::GetTask(decode_params(&p)?),
            "list_tasks" => Command::ListTasks(decode_params(&p)?),
            "update_task" => Command::UpdateTask(decode_params(&p)?, decode_params(&p)?),
            "update_task_status" => {
                Command::UpdateTaskStatus(decode_params(&p)?, decode_params(&p)?)
            }
            "delete_task" => Command::DeleteTask(decode_params(&p)?),
            "current_sprint_tasks" => Command::CurrentSprintTasks,

            "create_sprint" => Command::CreateSprint(decode_params(&p)?),
            "get_sprint" => Command::GetSprint(decode_params(&p)?),
            "list_sprints" => Command::ListSprints(decode_params(&p)?),
            "current_sprint" => Command::CurrentSprint,
            "update_sprint" => Command::UpdateSprint(decode_params(&p)?, decode_params(&p)?),
            "activate_sprint" => Command::ActivateSprint(decode_params(&p)?),
            "complete_sprint" => Command::CompleteSprint(decode_params(&p)?, decode_params(&p)?),
            "assign_tasks_to_sprint" => {
                Command::AssignTasksToSprint(decode_params(&p)?, decode_params(&p)?)
            }

            "create_document" => Command::CreateDocument(decode_params(&p)?),
            "get_document" => Command::GetDocument(decode_params(&p)?),
            "list_documents" => Command::ListDocuments(decode_params(&p)?),
            "update_document" => Command::UpdateDocument(decode_params(&p)?, decode_params(&p)?),
            "link_document" => Command::LinkDocument(decode_params(&p)?),
            "unlink_document" => Command::UnlinkDocument(decode_params(&p)?),
            "entity_documents" => Command::EntityDocuments(decode_params(&p)?),
            "document_entities" => Command::DocumentEntities(decode_params(&p)?),

            "get_progress" => Command::GetProgress,
            "get_analytics" => Command::GetAnalytics,
            "list_resources" => Command::ListResources,
            "read_resource" => Command::ReadResource(decode_params(&p)?),
            "list_prompts" => Command::ListPrompts,
            "get_prompt" => Command::GetPrompt(decode_params(&p)?),

            other => return Err(ParseError::UnknownMethod(UnknownMethod(other.to_string()))),
        };
        Ok(cmd)
    }

    pub fn method(&self) -> &'static str {
        match self {
            Command::GetProjectInfo => "get_project_info",
            Command::UpdateProjectInfo(_) => "update_project_info",
            Command::CreateEpic(_) => "create_epic",
            Command::GetEpic(_) => "get_epic",
            Command::ListEpics(_) => "list_epics",
            Command::UpdateEpic(..) => "update_epic",
            Command::CreateTask(_) => "create_task",
            Command::GetTask(_) => "get_task",
            Command::ListTasks(_) => "list_tasks",
            Command::UpdateTask(..) => "update_task",
            Command::UpdateTaskStatus(..) => "update_task_status",
            Command::DeleteTask(_) => "delete_task",
            Command::CurrentSprintTasks => "current_sprint_tasks",
            Command::CreateSprint(_) => "create_sprint",
            Command::GetSprint(_) => "get_sprint",
            Command::ListSprints(_) => "list_sprints",
            Command::CurrentSprint => "current_sprint",
            Command::UpdateSprint(..) => "update_sprint",
            Command::ActivateSprint(_) => "activate_sprint",
            Command::CompleteSprint(..) => "complete_sprint",
            Command::AssignTasksToSprint(..) => "assign_tasks_to_sprint",
            Command::CreateDocument(_) => "create_document",
            Command::GetDocument(_) => "get_document",
            Command::ListDocuments(_) => "list_documents",
            Command::UpdateDocument(..) => "update_document",
            Command::LinkDocument(_) => "link_document",
            Command::UnlinkDocument(_) => "unlink_document",
            Command::EntityDocuments(_) => "entity_documents",
            Command::DocumentEntities(_) => "document_entities",
            Command::GetProgress => "get_progress",
            Command::GetAnalytics => "get_analytics",
            Command::ListResources => "list_resources",
            Command::ReadResource(_) => "read_resource",
            Command::ListPrompts => "list_prompts",
            Command::GetPrompt(_) => "get_prompt",
        }
    }

    /// Whether the command creates a new record (HTTP answers 201).
    pub fn creates(&self) -> bool {
        matches!(
            self,
            Command::CreateEpic(_)
                | Command::CreateTask(_)
                | Command::CreateSprint(_)
                | Command::CreateDocument(_)
        )
    }

    pub fn execute(self, svc: &Services) -> Result<Reply<Value>> {
        tracing::debug!(method = self.method(), "executing command");
        match self {
            Command::GetProjectInfo => reply_json(svc.project().info()?),
            Command::UpdateProjectInfo(p) => reply_json(svc.project().update_info(p)?),

            Command::CreateEpic(p) => reply_json(svc.epics().create(p)?),
            Command::GetEpic(k) => reply_json(svc.epics().get(k.epic_num)?),
            Command::ListEpics(q) => reply_json(svc.epics().list(q)?),
            Command::UpdateEpic(k, c) => reply_json(svc.epics().update(k.epic_num, c)?),

            Command::CreateTask(p) => reply_json(svc.tasks().create(p)?),
            Command::GetTask(k) => reply_json(svc.tasks().get(k.task_id)?),
            Command::ListTasks(q) => reply_json(svc.tasks().list(q)?),
            Command::UpdateTask(k, c) => reply_json(svc.tasks().update(k.task_id, c)?),
            Command::UpdateTaskStatus(k, s) => {
                reply_json(svc.tasks().update_status(k.task_id, s.status)?)
            }
            Command::DeleteTask(k) => reply_json(svc.tasks().delete(k.task_id)?),
            Command::CurrentSprintTasks => reply_json(svc.tasks().current_sprint_tasks()?),

            Command::CreateSprint(p) => reply_json(svc.sprints().create(p)?),
            Command::GetSprint(k) => reply_json(svc.sprints().get(k.sprint_id)?),
            Command::ListSprints(q) => reply_json(svc.sprints().list(q)?),
            Command::CurrentSprint => reply_json(svc.sprints().current()?),
            Command::UpdateSprint(k, c) => reply_json(svc.sprints().update(k.sprint_id, c)?),
            Command::ActivateSprint(k) => reply_json(svc.sprints().activate(k.sprint_id)?),
            Command::CompleteSprint(k, p) => reply_json(svc.sprints().complete(k.sprint_id, p)?),
            Command::AssignTasksToSprint(k, p) => {
                reply_json(svc.sprints().assign_tasks(k.sprint_id, p)?)
            }

            Command::CreateDocument(p) => reply_json(svc.documents().create(p)?),
            Command::GetDocument(k) => reply_json(svc.documents().get(k.document_id)?),
            Command::ListDocuments(q) => reply_json(svc.documents().list(q)?),
            Command::UpdateDocument(k, c) => {
                reply_json(svc.documents().update(k.document_id, c)?)
            }
            Command::LinkDocument(p) => reply_json(svc.documents().link(p)?),
            Command::UnlinkDocument(p) => reply_json(svc.documents().unlink(p)?),
            Command::EntityDocuments(e) => reply_json(svc.documents().entity_documents(e)?),
            Command::DocumentEntities(k) => {
                reply_json(svc.documents().document_entities(k.document_id)?)
            }

            Command::GetProgress => reply_json(report::progress(svc)?),
            Command::GetAnalytics => reply_json(report::analytics(svc)?),
            Command::ListResources => reply_json(resources::list_resources(svc)?),
            Command::ReadResource(r) => {
                if r.uri.trim().is_empty() {
                    return Err(ScrumError::MissingField("uri".into()));
                }
                resources::read_resource(svc, &r.uri)
            }
            Command::ListPrompts => reply_json(prompts::list_prompts()),
            Command::GetPrompt(p) => reply_json(prompts::get_prompt(svc, p)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use serde_json::json;
    use std::sync::Arc;

    fn services() -> Services {
        Services::new(Arc::new(SqliteStore::open_in_memory().unwrap()))
    }

    fn run(svc: &Services, method: &str, params: Value) -> Result<Reply<Value>> {
        match Command::parse(method, params) {
            Ok(cmd) => cmd.execute(svc),
            Err(ParseError::Params(e)) => Err(e),
            Err(ParseError::UnknownMethod(m)) => panic!("{m}"),
        }
    }

    #[test]
    fn every_listed_method_parses_or_fails_on_params_only() {
        for method in METHODS {
            match Command::parse(method, Value::Null) {
                Ok(cmd) => assert_eq!(cmd.method(), *method),
                Err(ParseError::Params(_)) => {}
                Err(ParseError::UnknownMethod(m)) => panic!("listed method rejected: {m}"),
            }
        }
    }

    #[test]
    fn unknown_method_is_distinguished() {
        assert!(matches!(
            Command::parse("drop_tables", json!({})),
            Err(ParseError::UnknownMethod(UnknownMethod(ref m))) if m == "drop_tables"
        ));
    }

    #[test]
    fn missing_required_param_maps_to_missing_field() {
        let err = match Command::parse("get_epic", json!({})) {
            Err(ParseError::Params(e)) => e,
            other => panic!("unexpected: {other:?}"),
        };
        assert!(matches!(err, ScrumError::MissingField(ref f) if f == "epic_num"));
    }

    #[test]
    fn bad_enum_value_is_validation_error() {
        let err = match Command::parse("list_tasks", json!({"status": "FINISHED"})) {
            Err(ParseError::Params(e)) => e,
            other => panic!("unexpected: {other:?}"),
        };
        assert_eq!(err.code(), crate::error::ErrorCode::Validation);
    }

    #[test]
    fn scenario_epic_and_two_tasks() {
        let svc = services();
        run(&svc, "create_epic", json!({"epic_num": 1, "title": "Auth"})).unwrap();
        let a = run(&svc, "create_task", json!({"epic_num": 1, "title": "Login"})).unwrap();
        let b = run(&svc, "create_task", json!({"epic_num": 1, "title": "Logout"})).unwrap();
        assert_eq!(a.data["story_num"], 1);
        assert_eq!(b.data["story_num"], 2);
    }

    #[test]
    fn scenario_wildcard_unlink() {
        let svc = services();
        let task = run(&svc, "create_task", json!({"epic_num": 1, "title": "Login"})).unwrap();
        let doc = run(
            &svc,
            "create_document",
            json!({"type": "prd", "title": "Auth PRD", "content": "..."}),
        )
        .unwrap();
        let (tid, did) = (task.data["id"].clone(), doc.data["id"].clone());
        run(
            &svc,
            "link_document",
            json!({"entity_type": "task", "entity_id": tid, "document_id": did, "section": "auth"}),
        )
        .unwrap();
        let removed = run(
            &svc,
            "unlink_document",
            json!({"entity_type": "task", "entity_id": tid, "document_id": did}),
        )
        .unwrap();
        assert_eq!(removed.data[0]["section"], "auth");
        let left = run(&svc, "document_entities", json!({"document_id": did})).unwrap();
        assert_eq!(left.data, json!([]));
    }

    #[test]
    fn update_task_accepts_id_alias_and_null_sprint() {
        let svc = services();
        let task = run(&svc, "create_task", json!({"epic_num": 1, "title": "t"})).unwrap();
        let updated = run(
            &svc,
            "update_task",
            json!({"id": task.data["id"], "sprint_id": null, "status": "IN_PROGRESS"}),
        )
        .unwrap();
        assert_eq!(updated.data["status"], "IN_PROGRESS");
        assert!(updated.data["sprint_id"].is_null());
    }

    #[test]
    fn non_object_params_rejected() {
        assert!(matches!(
            Command::parse("list_epics", json!([1, 2])),
            Err(ParseError::Params(ScrumError::Invalid { .. }))
        ));
    }
}
