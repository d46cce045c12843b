//! Request/response correlation over a line-delimited JSON pipe.
//!
//! Ids are assigned from a process-wide counter and never reused. Every
//! in-flight request lives in the pending table with its own deadline timer;
//! whichever of "response arrives", "timer fires" or "connection drops"
//! happens first removes the entry and settles the request, and the other two
//! find nothing to do.
//!
//! Each child gets a connection generation. The reader task of a dead child
//! only fails requests sent on its own generation, so a late EOF can never
//! reject requests already written to a replacement child.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::framing::LineBuffer;
use crate::protocol::Request;
use crate::supervisor::Supervisor;
use crate::{Result, RpcError};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

type Settle = oneshot::Sender<Result<Value>>;

struct Pending {
    generation: u64,
    tx: Settle,
    timer: JoinHandle<()>,
}

struct Connection {
    generation: u64,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    reader: JoinHandle<()>,
}

struct State {
    supervisor: Box<dyn Supervisor>,
    conn: Option<Connection>,
}

struct Inner {
    /// Held across each write, which keeps writes in call order.
    state: tokio::sync::Mutex<State>,
    pending: Mutex<HashMap<u64, Pending>>,
    next_id: AtomicU64,
    generations: AtomicU64,
    /// Generation of the connection currently believed healthy; 0 when none.
    live: AtomicU64,
    timeout: Duration,
}

#[derive(Clone)]
pub struct Correlator {
    inner: Arc<Inner>,
}

impl Correlator {
    pub fn new(supervisor: impl Supervisor + 'static) -> Self {
        Self::with_timeout(supervisor, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(supervisor: impl Supervisor + 'static, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: tokio::sync::Mutex::new(State {
                    supervisor: Box::new(supervisor),
                    conn: None,
                }),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                generations: AtomicU64::new(0),
                live: AtomicU64::new(0),
                timeout,
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst) != 0
    }

    /// Number of requests still waiting for an answer.
    pub fn in_flight(&self) -> usize {
        self.inner.pending().len()
    }

    /// Write one request and return a handle that settles with its result.
    ///
    /// Starts the child first if there is no healthy connection.
    pub async fn send(&self, method: &str, params: Value) -> Result<PendingRequest> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let params = match params {
            Value::Null => json!({}),
            other => other,
        };
        let mut line = serde_json::to_vec(&Request {
            id,
            method: Some(method.to_string()),
            params,
        })?;
        line.push(b'\n');

        let mut state = self.inner.state.lock().await;
        let generation = self.inner.ensure_connected(&mut state).await?;

        let (tx, rx) = oneshot::channel();
        {
            // The timer takes this lock before it looks for the entry, so
            // arming it here means it cannot fire ahead of the insert.
            let mut pending = self.inner.pending();
            let timer = self.inner.arm_timer(id, method);
            pending.insert(id, Pending { generation, tx, timer });
        }

        let Some(conn) = state.conn.as_mut() else {
            self.inner.forget(id);
            return Err(RpcError::Transport("no connection".into()));
        };
        let written = async {
            conn.writer.write_all(&line).await?;
            conn.writer.flush().await
        }
        .await;
        if let Err(e) = written {
            tracing::warn!(id, method, error = %e, "write to child failed");
            let reason = format!("write failed: {e}");
            if let Some(conn) = state.conn.take() {
                conn.reader.abort();
            }
            self.inner.disconnect(generation, &reason);
            return Err(RpcError::Transport(reason));
        }
        drop(state);

        // The child may have gone away between connecting and registering.
        if self.inner.live.load(Ordering::SeqCst) != generation {
            self.inner.disconnect(generation, "child exited");
        }
        tracing::debug!(id, method, generation, "request sent");
        Ok(PendingRequest {
            id,
            method: method.to_string(),
            rx,
        })
    }

    /// Send and wait for the result.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.send(method, params).await?.await
    }

    /// Stop the child and fail everything still in flight.
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        let generation = match state.conn.take() {
            Some(conn) => {
                conn.reader.abort();
                conn.generation
            }
            None => 0,
        };
        state.supervisor.stop().await;
        self.inner.live.store(0, Ordering::SeqCst);
        let drained: Vec<(u64, Pending)> = self.inner.pending().drain().collect();
        for (_, p) in drained {
            p.timer.abort();
            let _ = p.tx.send(Err(RpcError::Transport("correlator shut down".into())));
        }
        tracing::info!(generation, "correlator shut down");
    }
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, HashMap<u64, Pending>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the live generation, starting a new child when needed. Caller
    /// holds the state lock.
    async fn ensure_connected(self: &Arc<Self>, state: &mut State) -> Result<u64> {
        if let Some(conn) = &state.conn {
            if self.live.load(Ordering::SeqCst) == conn.generation && state.supervisor.is_alive() {
                return Ok(conn.generation);
            }
        }
        if let Some(old) = state.conn.take() {
            old.reader.abort();
            self.disconnect(old.generation, "child exited");
        }

        let pipes = state.supervisor.start().await.map_err(|e| {
            tracing::warn!(error = %e, "failed to start child");
            RpcError::Transport(format!("failed to start child: {e}"))
        })?;
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let reader = tokio::spawn(read_loop(Arc::clone(self), generation, pipes.stdout));
        state.conn = Some(Connection {
            generation,
            writer: pipes.stdin,
            reader,
        });
        self.live.store(generation, Ordering::SeqCst);
        tracing::info!(generation, "connected to child");
        Ok(generation)
    }

    fn arm_timer(self: &Arc<Self>, id: u64, method: &str) -> JoinHandle<()> {
        let inner = Arc::downgrade(self);
        let timeout = self.timeout;
        let method = method.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let entry = inner.pending().remove(&id);
            if let Some(p) = entry {
                tracing::warn!(id, method = %method, "request timed out");
                let _ = p.tx.send(Err(RpcError::Timeout {
                    id,
                    method,
                    timeout,
                }));
            }
        })
    }

    fn forget(&self, id: u64) {
        if let Some(p) = self.pending().remove(&id) {
            p.timer.abort();
        }
    }

    /// Mark `generation` dead and fail the requests sent on it.
    fn disconnect(&self, generation: u64, reason: &str) {
        let _ = self
            .live
            .compare_exchange(generation, 0, Ordering::SeqCst, Ordering::SeqCst);
        let failed: Vec<Pending> = {
            let mut pending = self.pending();
            let ids: Vec<u64> = pending
                .iter()
                .filter(|(_, p)| p.generation == generation)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };
        if !failed.is_empty() {
            tracing::warn!(generation, count = failed.len(), reason, "failing in-flight requests");
        }
        for p in failed {
            p.timer.abort();
            let _ = p.tx.send(Err(RpcError::Transport(reason.to_string())));
        }
    }

    /// Settle the pending request a response line refers to.
    fn dispatch(&self, line: &str) {
        let msg: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "discarding unparseable line from child");
                return;
            }
        };
        let Some(id) = msg.get("id").and_then(Value::as_u64) else {
            tracing::warn!("discarding message without a numeric id");
            return;
        };
        let Some(p) = self.pending().remove(&id) else {
            tracing::debug!(id, "response for unknown or settled request ignored");
            return;
        };
        p.timer.abort();
        let _ = p.tx.send(settlement(msg));
    }
}

fn settlement(mut msg: Value) -> Result<Value> {
    let error = msg
        .get_mut("error")
        .map(Value::take)
        .filter(|e| !e.is_null());
    let Some(error) = error else {
        return Ok(msg.get_mut("result").map(Value::take).unwrap_or(Value::Null));
    };
    // Either the flat `{error, code, details}` form or a nested
    // `{error: {message, code, details}}` object.
    let (message, code, details) = match &error {
        Value::String(s) => (
            s.clone(),
            msg.get("code").and_then(Value::as_str).map(String::from),
            msg.get("details").cloned(),
        ),
        other => (
            other
                .get("message")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| other.to_string()),
            other.get("code").and_then(Value::as_str).map(String::from),
            other.get("details").cloned(),
        ),
    };
    Err(RpcError::Remote {
        code: code.unwrap_or_else(|| "INTERNAL_ERROR".to_string()),
        message,
        details: details.unwrap_or(Value::Null),
    })
}

async fn read_loop(inner: Arc<Inner>, generation: u64, mut stdout: Box<dyn AsyncRead + Send + Unpin>) {
    let mut framer = LineBuffer::new();
    let mut chunk = vec![0u8; 8 * 1024];
    let reason = loop {
        match stdout.read(&mut chunk).await {
            Ok(0) => break "child closed its output".to_string(),
            Ok(n) => {
                for line in framer.push(&chunk[..n]) {
                    inner.dispatch(&line);
                }
            }
            Err(e) => break format!("read from child failed: {e}"),
        }
    };
    tracing::info!(generation, reason = %reason, "child connection ended");
    inner.disconnect(generation, &reason);
}

// ─── PendingRequest ───────────────────────────────────────────────────────

/// Handle to one in-flight request. Dropping it does not cancel the request;
/// its entry still expires on its own deadline.
pub struct PendingRequest {
    id: u64,
    method: String,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingRequest {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingRequest {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RpcError::Transport(format!(
                "correlator dropped before {} (id {}) settled",
                self.method, self.id
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::Pipes;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};
    use tokio::sync::mpsc;

    /// The far end of one fake connection: read requests, write responses.
    struct Peer {
        requests: tokio::io::Lines<BufReader<DuplexStream>>,
        out: DuplexStream,
    }

    impl Peer {
        async fn next_request(&mut self) -> Value {
            let line = self.requests.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn write(&mut self, bytes: &[u8]) {
            self.out.write_all(bytes).await.unwrap();
            self.out.flush().await.unwrap();
        }

        async fn reply(&mut self, id: u64, result: Value) {
            let line = format!("{}\n", json!({"id": id, "result": result}));
            self.write(line.as_bytes()).await;
        }
    }

    struct FakeSupervisor {
        peers: mpsc::UnboundedSender<Peer>,
        starts: Arc<AtomicUsize>,
        alive: Arc<std::sync::atomic::AtomicBool>,
    }

    impl Supervisor for FakeSupervisor {
        fn start(&mut self) -> BoxFuture<'_, std::io::Result<Pipes>> {
            async move {
                let (client_in, peer_in) = tokio::io::duplex(64 * 1024);
                let (peer_out, client_out) = tokio::io::duplex(64 * 1024);
                self.starts.fetch_add(1, Ordering::SeqCst);
                self.alive.store(true, Ordering::SeqCst);
                let _ = self.peers.send(Peer {
                    requests: BufReader::new(peer_in).lines(),
                    out: peer_out,
                });
                Ok(Pipes {
                    stdin: Box::new(client_in),
                    stdout: Box::new(client_out),
                })
            }
            .boxed()
        }

        fn stop(&mut self) -> BoxFuture<'_, ()> {
            self.alive.store(false, Ordering::SeqCst);
            async {}.boxed()
        }

        fn is_alive(&mut self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    fn fake(timeout: Duration) -> (Correlator, mpsc::UnboundedReceiver<Peer>, Arc<AtomicUsize>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let starts = Arc::new(AtomicUsize::new(0));
        let sup = FakeSupervisor {
            peers: tx,
            starts: Arc::clone(&starts),
            alive: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        };
        (Correlator::with_timeout(sup, timeout), rx, starts)
    }

    #[tokio::test]
    async fn out_of_order_responses_match_by_id() {
        let (c, mut peers, _) = fake(Duration::from_secs(5));
        let a = c.send("get_epic", json!({"epic_num": 1})).await.unwrap();
        let b = c.send("get_epic", json!({"epic_num": 2})).await.unwrap();
        let mut peer = peers.recv().await.unwrap();

        let ra = peer.next_request().await;
        let rb = peer.next_request().await;
        assert_eq!(ra["method"], "get_epic");
        assert_eq!(ra["params"]["epic_num"], 1);
        assert!(rb["id"].as_u64().unwrap() > ra["id"].as_u64().unwrap());

        peer.reply(b.id(), json!("second")).await;
        peer.reply(a.id(), json!("first")).await;
        assert_eq!(a.await.unwrap(), json!("first"));
        assert_eq!(b.await.unwrap(), json!("second"));
        assert_eq!(c.in_flight(), 0);
    }

    #[tokio::test]
    async fn response_split_across_chunks_resolves_once() {
        let (c, mut peers, _) = fake(Duration::from_secs(5));
        let mut handles = Vec::new();
        for _ in 0..7 {
            handles.push(c.send("list_epics", Value::Null).await.unwrap());
        }
        let seventh = handles.pop().unwrap();
        assert_eq!(seventh.id(), 7);
        let mut peer = peers.recv().await.unwrap();

        peer.write(br#"{"id":7,"res"#).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        peer.write(br#"ult":{"success":true,"#).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        peer.write(b"\"data\":[]}}\n").await;

        let v = seventh.await.unwrap();
        assert_eq!(v["success"], true);
        // A duplicate answer for a settled id is ignored.
        peer.reply(7, json!("again")).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(c.in_flight(), 6);
    }

    #[tokio::test]
    async fn timeout_rejects_only_the_unanswered_request() {
        let (c, mut peers, _) = fake(Duration::from_millis(100));
        let slow = c.send("get_task", json!({"task_id": 1})).await.unwrap();
        let fast = c.send("get_task", json!({"task_id": 2})).await.unwrap();
        let mut peer = peers.recv().await.unwrap();
        peer.reply(fast.id(), json!({"ok": true})).await;

        assert_eq!(fast.await.unwrap()["ok"], true);
        let slow_id = slow.id();
        let err = slow.await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout { id, .. } if id == slow_id));
        assert!(err.is_retryable());

        // The late answer finds nothing to settle and the connection survives.
        peer.reply(slow_id, json!("late")).await;
        let next = c.send("list_epics", Value::Null).await.unwrap();
        peer.next_request().await;
        peer.next_request().await;
        peer.next_request().await;
        peer.reply(next.id(), json!([])).await;
        assert_eq!(next.await.unwrap(), json!([]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn zero_timeout_always_settles() {
        let (c, _peers, _) = fake(Duration::ZERO);
        for _ in 0..50 {
            let pending = c.send("list_epics", Value::Null).await.unwrap();
            let settled = tokio::time::timeout(Duration::from_secs(2), pending)
                .await
                .expect("request never settled");
            assert!(matches!(settled, Err(RpcError::Timeout { .. })));
        }
        assert_eq!(c.in_flight(), 0);
    }

    #[tokio::test]
    async fn child_exit_fails_in_flight_then_reconnects() {
        let (c, mut peers, starts) = fake(Duration::from_secs(5));
        let pending = c.send("list_tasks", Value::Null).await.unwrap();
        assert!(c.is_connected());
        let peer = peers.recv().await.unwrap();
        drop(peer);

        let err = pending.await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));
        assert!(!c.is_connected());

        let again = c.send("list_tasks", Value::Null).await.unwrap();
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 2);
        peer.next_request().await;
        peer.reply(again.id(), json!([])).await;
        assert_eq!(again.await.unwrap(), json!([]));
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let (c, mut peers, _) = fake(Duration::from_secs(5));
        let req = c.send("get_progress", Value::Null).await.unwrap();
        let mut peer = peers.recv().await.unwrap();
        peer.write(b"not json at all\n{\"no_id\":true}\n").await;
        peer.reply(req.id(), json!({"done": 0})).await;
        assert_eq!(req.await.unwrap()["done"], 0);
    }

    #[tokio::test]
    async fn error_response_becomes_remote_error() {
        let (c, mut peers, _) = fake(Duration::from_secs(5));
        let req = c.send("get_epic", json!({"epic_num": 9})).await.unwrap();
        let mut peer = peers.recv().await.unwrap();
        let line = format!(
            "{}\n",
            json!({
                "id": req.id(),
                "error": "epic not found: 9",
                "code": "NOT_FOUND",
                "details": {"reason": "not_found", "entity": "epic"}
            })
        );
        peer.write(line.as_bytes()).await;
        match req.await.unwrap_err() {
            RpcError::Remote { code, details, .. } => {
                assert_eq!(code, "NOT_FOUND");
                assert_eq!(details["entity"], "epic");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn shutdown_fails_pending() {
        let (c, mut peers, _) = fake(Duration::from_secs(5));
        let req = c.send("list_epics", Value::Null).await.unwrap();
        let _peer = peers.recv().await.unwrap();
        c.shutdown().await;
        assert!(matches!(req.await.unwrap_err(), RpcError::Transport(_)));
        assert!(!c.is_connected());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawn_failure_is_a_transport_error() {
        let sup = crate::ChildSupervisor::new("/nonexistent/scrum-child", Vec::new());
        let c = Correlator::with_timeout(sup, Duration::from_secs(1));
        let err = c.call("list_epics", Value::Null).await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));
        assert_eq!(c.in_flight(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exiting_child_rejects_request() {
        let sup = crate::ChildSupervisor::new("true", Vec::new());
        let c = Correlator::with_timeout(sup, Duration::from_secs(5));
        let err = c.call("list_epics", Value::Null).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
