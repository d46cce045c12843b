use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use scrum_core::{Envelope, ErrorCode, Reply};
use serde_json::json;

use crate::error::AppError;
use crate::state::AppState;

/// GET /health: component liveness, not business data.
pub async fn health(State(app): State<AppState>) -> Result<Response, AppError> {
    let svc = app.services.clone();
    let store = tokio::task::spawn_blocking(move || svc.ping_store())
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))?;
    let (status, envelope) = report(&store, app.started.elapsed());
    Ok((status, Json(envelope)).into_response())
}

/// A healthy store answers 200 with a success envelope. A failed ping
/// answers 503 with a `STORAGE_ERROR` failure whose details carry the same
/// component breakdown.
fn report(store: &scrum_core::Result<()>, uptime: Duration) -> (StatusCode, Envelope) {
    let version = env!("CARGO_PKG_VERSION");
    match store {
        Ok(()) => {
            let data = json!({
                "status": "ok",
                "version": version,
                "uptime_secs": uptime.as_secs(),
                "components": { "store": { "status": "ok" } },
            });
            (StatusCode::OK, Envelope::success(Reply::new("healthy", data)))
        }
        Err(e) => {
            tracing::warn!(error = %e, "store ping failed");
            let details = json!({
                "reason": "storage_failure",
                "status": "degraded",
                "version": version,
                "uptime_secs": uptime.as_secs(),
                "components": {
                    "store": { "status": "unavailable", "error": e.to_string() },
                },
            });
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Envelope::error(ErrorCode::Storage, "store unavailable", details),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrum_core::ScrumError;

    #[test]
    fn healthy_store_is_a_success() {
        let (status, env) = report(&Ok(()), Duration::from_secs(3));
        assert_eq!(status, StatusCode::OK);
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["success"], true);
        assert_eq!(v["data"]["uptime_secs"], 3);
    }

    #[test]
    fn failed_ping_is_a_storage_failure() {
        let down = Err(ScrumError::Storage("disk I/O error".into()));
        let (status, env) = report(&down, Duration::ZERO);
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["success"], false);
        assert!(v.get("data").is_none());
        assert_eq!(v["error"]["code"], "STORAGE_ERROR");
        assert_eq!(v["error"]["details"]["status"], "degraded");
        assert_eq!(
            v["error"]["details"]["components"]["store"]["status"],
            "unavailable"
        );
    }
}
