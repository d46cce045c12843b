use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use scrum_core::command::EpicKey;
use scrum_core::epic::EpicQuery;
use scrum_core::Command;

use super::{call, decode, json_body, path_id, query, run};
use crate::error::AppError;
use crate::state::AppState;

/// POST /epics
pub async fn create_epic(State(app): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    call(&app, "create_epic", json_body(&body)?).await
}

/// GET /epics?status=
pub async fn list_epics(
    State(app): State<AppState>,
    q: Result<Query<EpicQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    run(&app, Command::ListEpics(query(q)?)).await
}

/// GET /epics/{num}
pub async fn get_epic(
    State(app): State<AppState>,
    Path(num): Path<String>,
) -> Result<Response, AppError> {
    let epic_num = path_id("epic_num", &num)?;
    run(&app, Command::GetEpic(EpicKey { epic_num })).await
}

/// PUT /epics/{num}: an `epic_num` in the body that differs from the path
/// is rejected as a renumbering attempt.
pub async fn update_epic(
    State(app): State<AppState>,
    Path(num): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    let epic_num = path_id("epic_num", &num)?;
    run(&app, Command::UpdateEpic(EpicKey { epic_num }, decode(&body)?)).await
}
