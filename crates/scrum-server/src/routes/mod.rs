pub mod documents;
pub mod epics;
pub mod health;
pub mod project;
pub mod resources;
pub mod sprints;
pub mod tasks;

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use scrum_core::command::decode_params;
use scrum_core::{Command, Envelope};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::AppError;
use crate::state::AppState;

/// Execute `command` on the blocking pool and render the envelope.
pub(crate) async fn run(app: &AppState, command: Command) -> Result<Response, AppError> {
    let status = if command.creates() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let svc = app.services.clone();
    let reply = tokio::task::spawn_blocking(move || command.execute(&svc))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok((status, Json(Envelope::success(reply))).into_response())
}

/// Parse `params` as `method` and run it.
pub(crate) async fn call(app: &AppState, method: &str, params: Value) -> Result<Response, AppError> {
    let command = Command::parse(method, params).map_err(AppError::from_parse)?;
    run(app, command).await
}

/// Decode a request body. An empty body is an empty object.
pub(crate) fn json_body(body: &Bytes) -> Result<Value, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::bad_request("body", format!("malformed JSON: {e}")))?;
    if !value.is_object() {
        return Err(AppError::bad_request("body", "must be a JSON object"));
    }
    Ok(value)
}

/// Decode a request body into a command's parameter struct.
pub(crate) fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    Ok(decode_params(&json_body(body)?)?)
}

pub(crate) fn path_id(field: &str, raw: &str) -> Result<i64, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::bad_request(field, format!("'{raw}' is not a number")))
}

pub(crate) fn query<T>(q: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    q.map(|Query(v)| v)
        .map_err(|e| AppError::bad_request("query", e.body_text()))
}
