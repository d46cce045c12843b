use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use scrum_core::command::TaskKey;
use scrum_core::task::TaskQuery;
use scrum_core::Command;

use super::{call, decode, json_body, path_id, query, run};
use crate::error::AppError;
use crate::state::AppState;

fn key(raw: &str) -> Result<TaskKey, AppError> {
    Ok(TaskKey {
        task_id: path_id("task_id", raw)?,
    })
}

/// POST /tasks
pub async fn create_task(State(app): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    call(&app, "create_task", json_body(&body)?).await
}

/// GET /tasks?epic_num=&status=&sprint_id=&assignee=
pub async fn list_tasks(
    State(app): State<AppState>,
    q: Result<Query<TaskQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    run(&app, Command::ListTasks(query(q)?)).await
}

/// GET /tasks/current-sprint
pub async fn current_sprint_tasks(State(app): State<AppState>) -> Result<Response, AppError> {
    run(&app, Command::CurrentSprintTasks).await
}

/// GET /tasks/{id}
pub async fn get_task(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    run(&app, Command::GetTask(key(&id)?)).await
}

/// PUT /tasks/{id}
pub async fn update_task(
    State(app): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    run(&app, Command::UpdateTask(key(&id)?, decode(&body)?)).await
}

/// POST /tasks/{id}/status: body `{"status": "..."}`.
pub async fn update_task_status(
    State(app): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    run(&app, Command::UpdateTaskStatus(key(&id)?, decode(&body)?)).await
}

/// DELETE /tasks/{id}
pub async fn delete_task(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    run(&app, Command::DeleteTask(key(&id)?)).await
}
