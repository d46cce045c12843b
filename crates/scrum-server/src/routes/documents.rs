use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use scrum_core::command::DocumentKey;
use scrum_core::document::{DocumentQuery, EntityRef, UnlinkDocument};
use scrum_core::Command;

use super::{call, decode, json_body, path_id, query, run};
use crate::error::AppError;
use crate::state::AppState;

fn key(raw: &str) -> Result<DocumentKey, AppError> {
    Ok(DocumentKey {
        document_id: path_id("document_id", raw)?,
    })
}

/// POST /documents
pub async fn create_document(
    State(app): State<AppState>,
    body: Bytes,
) -> Result<Response, AppError> {
    call(&app, "create_document", json_body(&body)?).await
}

/// GET /documents?doc_type=&status=
pub async fn list_documents(
    State(app): State<AppState>,
    q: Result<Query<DocumentQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    run(&app, Command::ListDocuments(query(q)?)).await
}

/// GET /documents/{id}
pub async fn get_document(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    run(&app, Command::GetDocument(key(&id)?)).await
}

/// PUT /documents/{id}
pub async fn update_document(
    State(app): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    run(&app, Command::UpdateDocument(key(&id)?, decode(&body)?)).await
}

/// GET /documents/{id}/entities
pub async fn document_entities(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    run(&app, Command::DocumentEntities(key(&id)?)).await
}

/// POST /links
pub async fn link_document(State(app): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    call(&app, "link_document", json_body(&body)?).await
}

/// DELETE /links: parameters from the JSON body, or from the query string
/// when the body is empty.
pub async fn unlink_document(
    State(app): State<AppState>,
    q: Result<Query<UnlinkDocument>, QueryRejection>,
    body: Bytes,
) -> Result<Response, AppError> {
    let params = if body.iter().all(u8::is_ascii_whitespace) {
        query(q)?
    } else {
        decode(&body)?
    };
    run(&app, Command::UnlinkDocument(params)).await
}

/// GET /links?entity_type=&entity_id=
pub async fn entity_documents(
    State(app): State<AppState>,
    q: Result<Query<EntityRef>, QueryRejection>,
) -> Result<Response, AppError> {
    run(&app, Command::EntityDocuments(query(q)?)).await
}
