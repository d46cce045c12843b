pub mod error;
pub mod routes;
pub mod state;

use std::any::Any;

use axum::http::Uri;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use scrum_core::{ErrorCode, Services};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::envelope_error;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(services: Services) -> Router {
    let app_state = state::AppState::new(services);

    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin);

    Router::new()
        .route("/health", get(routes::health::health))
        // Project
        .route(
            "/project/info",
            get(routes::project::get_info).put(routes::project::update_info),
        )
        .route("/project/analytics", get(routes::project::analytics))
        .route("/progress", get(routes::project::progress))
        // Epics
        .route(
            "/epics",
            get(routes::epics::list_epics).post(routes::epics::create_epic),
        )
        .route(
            "/epics/{num}",
            get(routes::epics::get_epic).put(routes::epics::update_epic),
        )
        // Tasks
        .route(
            "/tasks",
            get(routes::tasks::list_tasks).post(routes::tasks::create_task),
        )
        .route(
            "/tasks/current-sprint",
            get(routes::tasks::current_sprint_tasks),
        )
        .route(
            "/tasks/{id}",
            get(routes::tasks::get_task)
                .put(routes::tasks::update_task)
                .delete(routes::tasks::delete_task),
        )
        .route("/tasks/{id}/status", post(routes::tasks::update_task_status))
        // Sprints
        .route(
            "/sprints",
            get(routes::sprints::list_sprints).post(routes::sprints::create_sprint),
        )
        .route("/sprints/current", get(routes::sprints::current_sprint))
        .route(
            "/sprints/{id}",
            get(routes::sprints::get_sprint).put(routes::sprints::update_sprint),
        )
        .route(
            "/sprints/{id}/activate",
            post(routes::sprints::activate_sprint),
        )
        .route(
            "/sprints/{id}/complete",
            post(routes::sprints::complete_sprint),
        )
        .route("/sprints/{id}/tasks", post(routes::sprints::assign_tasks))
        // Documents
        .route(
            "/documents",
            get(routes::documents::list_documents).post(routes::documents::create_document),
        )
        .route(
            "/documents/{id}",
            get(routes::documents::get_document).put(routes::documents::update_document),
        )
        .route(
            "/documents/{id}/entities",
            get(routes::documents::document_entities),
        )
        .route(
            "/links",
            get(routes::documents::entity_documents)
                .post(routes::documents::link_document)
                .delete(routes::documents::unlink_document),
        )
        // Resources and prompts
        .route("/resources", get(routes::resources::list_resources))
        .route("/resources/read", get(routes::resources::read_resource))
        .route("/prompts", get(routes::resources::list_prompts))
        .route("/prompts/{name}", post(routes::resources::get_prompt))
        .fallback(unknown_route)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

async fn unknown_route(uri: Uri) -> Response {
    envelope_error(
        ErrorCode::MethodNotFound,
        format!("no route for {}", uri.path()),
        json!({ "reason": "unknown_route", "path": uri.path() }),
    )
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| err.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(panic = %detail, "handler panicked");
    envelope_error(
        ErrorCode::Internal,
        "internal error",
        json!({ "reason": "internal" }),
    )
}

/// Start the HTTP API on `port` on all interfaces.
pub async fn serve(services: Services, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(services, listener).await
}

/// Start the HTTP API on a pre-bound listener.
///
/// Lets the caller read the actual port before starting (useful when
/// `port = 0` and the OS picks a free one).
pub async fn serve_on(services: Services, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    let app = build_router(services);

    tracing::info!("scrum API listening on http://localhost:{actual_port}");

    axum::serve(listener, app).await?;
    Ok(())
}
