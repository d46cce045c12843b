use axum::body::Bytes;
use axum::extract::State;
use axum::response::Response;
use scrum_core::Command;

use super::{call, json_body, run};
use crate::error::AppError;
use crate::state::AppState;

/// GET /project/info
pub async fn get_info(State(app): State<AppState>) -> Result<Response, AppError> {
    run(&app, Command::GetProjectInfo).await
}

/// PUT /project/info
pub async fn update_info(State(app): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    call(&app, "update_project_info", json_body(&body)?).await
}

/// GET /project/analytics
pub async fn analytics(State(app): State<AppState>) -> Result<Response, AppError> {
    run(&app, Command::GetAnalytics).await
}

/// GET /progress
pub async fn progress(State(app): State<AppState>) -> Result<Response, AppError> {
    run(&app, Command::GetProgress).await
}
