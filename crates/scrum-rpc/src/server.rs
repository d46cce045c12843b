//! The answering side: read requests from a byte stream, execute them against
//! [`Services`], and write one response line per request.
//!
//! Requests run concurrently on the blocking pool; responses are written by a
//! single task in completion order, so a slow call never holds up a fast one.

use scrum_core::{Command, Envelope, ErrorCode, ParseError, Services};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::framing::LineBuffer;
use crate::protocol::{Request, Response};

/// Serve until `reader` reaches EOF, then finish in-flight requests and
/// flush their responses before returning.
pub async fn serve<R, W>(services: Services, mut reader: R, writer: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(write_loop(writer, rx));

    let mut framer = LineBuffer::new();
    let mut chunk = vec![0u8; 8 * 1024];
    let mut tasks = JoinSet::new();
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        for line in framer.push(&chunk[..n]) {
            let svc = services.clone();
            let tx = tx.clone();
            tasks.spawn(async move {
                let id = peek_id(&line);
                let handled = tokio::task::spawn_blocking(move || handle_line(&svc, &line)).await;
                let response = match handled {
                    Ok(Some(resp)) => resp,
                    Ok(None) => return,
                    Err(e) => {
                        tracing::error!(error = %e, "request handler panicked");
                        let Some(id) = id else { return };
                        Response::failure(
                            id,
                            ErrorCode::Internal,
                            "internal error",
                            json!({ "reason": "internal" }),
                        )
                    }
                };
                let _ = tx.send(response.to_line());
            });
        }
        // Reap finished tasks so the set does not grow without bound.
        while tasks.try_join_next().is_some() {}
    }
    if framer.pending() > 0 {
        tracing::warn!(bytes = framer.pending(), "input ended inside an unterminated line");
    }

    while tasks.join_next().await.is_some() {}
    drop(tx);
    match writer_task.await {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::other(e)),
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

fn peek_id(line: &str) -> Option<u64> {
    serde_json::from_str::<Value>(line)
        .ok()?
        .get("id")
        .and_then(Value::as_u64)
}

/// Answer one request line. Returns `None` for input that cannot be answered
/// because it carries no usable id.
pub fn handle_line(services: &Services, line: &str) -> Option<Response> {
    let request: Request = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            let Some(id) = peek_id(line) else {
                tracing::warn!(error = %e, "ignoring request line without a numeric id");
                return None;
            };
            return Some(Response::failure(
                id,
                ErrorCode::Validation,
                format!("malformed request: {e}"),
                json!({ "reason": "invalid_value", "field": "request" }),
            ));
        }
    };
    let Request { id, method, params } = request;
    let Some(method) = method else {
        return Some(Response::failure(
            id,
            ErrorCode::Validation,
            "missing required field: method",
            json!({ "reason": "missing_field", "field": "method" }),
        ));
    };
    let method = method.as_str();

    let command = match Command::parse(method, params) {
        Ok(c) => c,
        Err(ParseError::UnknownMethod(u)) => {
            tracing::debug!(id, method, "unknown method");
            return Some(Response::failure(
                id,
                ErrorCode::MethodNotFound,
                u.to_string(),
                json!({ "reason": "unknown_method", "method": method }),
            ));
        }
        Err(ParseError::Params(e)) => return Some(Response::from_error(id, &e)),
    };

    match command.execute(services) {
        Ok(reply) => Some(Response::success(id, &Envelope::success(reply))),
        Err(e) => {
            tracing::debug!(id, method, error = %e, "request failed");
            Some(Response::from_error(id, &e))
        }
    }
}
