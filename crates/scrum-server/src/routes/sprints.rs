use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use scrum_core::command::SprintKey;
use scrum_core::sprint::SprintQuery;
use scrum_core::Command;

use super::{call, decode, json_body, path_id, query, run};
use crate::error::AppError;
use crate::state::AppState;

fn key(raw: &str) -> Result<SprintKey, AppError> {
    Ok(SprintKey {
        sprint_id: path_id("sprint_id", raw)?,
    })
}

/// POST /sprints
pub async fn create_sprint(State(app): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    call(&app, "create_sprint", json_body(&body)?).await
}

/// GET /sprints?status=
pub async fn list_sprints(
    State(app): State<AppState>,
    q: Result<Query<SprintQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    run(&app, Command::ListSprints(query(q)?)).await
}

/// GET /sprints/current
pub async fn current_sprint(State(app): State<AppState>) -> Result<Response, AppError> {
    run(&app, Command::CurrentSprint).await
}

/// GET /sprints/{id}
pub async fn get_sprint(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    run(&app, Command::GetSprint(key(&id)?)).await
}

/// PUT /sprints/{id}
pub async fn update_sprint(
    State(app): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    run(&app, Command::UpdateSprint(key(&id)?, decode(&body)?)).await
}

/// POST /sprints/{id}/activate
pub async fn activate_sprint(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    run(&app, Command::ActivateSprint(key(&id)?)).await
}

/// POST /sprints/{id}/complete: body is optional; omitted stats are computed.
pub async fn complete_sprint(
    State(app): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    run(&app, Command::CompleteSprint(key(&id)?, decode(&body)?)).await
}

/// POST /sprints/{id}/tasks: body `{"task_ids": [...]}`.
pub async fn assign_tasks(
    State(app): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    run(&app, Command::AssignTasksToSprint(key(&id)?, decode(&body)?)).await
}
