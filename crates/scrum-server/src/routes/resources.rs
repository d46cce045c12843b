use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use scrum_core::command::ResourceUri;
use scrum_core::prompts::GetPrompt;
use scrum_core::Command;
use serde_json::Value;

use super::{json_body, query, run};
use crate::error::AppError;
use crate::state::AppState;

/// GET /resources
pub async fn list_resources(State(app): State<AppState>) -> Result<Response, AppError> {
    run(&app, Command::ListResources).await
}

/// GET /resources/read?uri=
pub async fn read_resource(
    State(app): State<AppState>,
    q: Result<Query<ResourceUri>, QueryRejection>,
) -> Result<Response, AppError> {
    run(&app, Command::ReadResource(query(q)?)).await
}

/// GET /prompts
pub async fn list_prompts(State(app): State<AppState>) -> Result<Response, AppError> {
    run(&app, Command::ListPrompts).await
}

/// POST /prompts/{name}: the body holds the prompt arguments.
pub async fn get_prompt(
    State(app): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    let arguments = match json_body(&body)? {
        Value::Object(map) => map,
        _ => Default::default(),
    };
    run(&app, Command::GetPrompt(GetPrompt { name, arguments })).await
}
