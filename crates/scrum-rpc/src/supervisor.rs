use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};

use crate::{Result, RpcError};

/// Byte streams connected to a running peer.
pub struct Pipes {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
}

/// Lifecycle of the process on the far side of a [`Correlator`](crate::Correlator).
pub trait Supervisor: Send {
    /// Start (or restart) the peer and hand back its pipes.
    fn start(&mut self) -> BoxFuture<'_, std::io::Result<Pipes>>;

    /// Stop the peer. Idempotent.
    fn stop(&mut self) -> BoxFuture<'_, ()>;

    fn is_alive(&mut self) -> bool;
}

// ─── ChildSupervisor ──────────────────────────────────────────────────────

/// Runs the peer as a child process with piped stdio.
///
/// Stderr is drained by a background task into a bounded tail and logged, so
/// a chatty child can never block on a full stderr pipe.
pub struct ChildSupervisor {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    cwd: Option<PathBuf>,
    child: Option<Child>,
    stderr_tail: Arc<Mutex<String>>,
}

const STDERR_TAIL_BYTES: usize = 8 * 1024;

impl ChildSupervisor {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            envs: Vec::new(),
            cwd: None,
            child: None,
            stderr_tail: Arc::new(Mutex::new(String::new())),
        }
    }

    /// Build from an argv such as `["scrum", "rpc"]`. A bare program name is
    /// resolved on `PATH` up front so a typo fails here, not on first send.
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| RpcError::NotFound("empty command".into()))?;
        let path = Path::new(program);
        let resolved = if path.components().count() > 1 {
            path.to_path_buf()
        } else {
            which::which(program).map_err(|_| RpcError::NotFound(program.clone()))?
        };
        Ok(Self::new(resolved, args.to_vec()))
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Most recent stderr output of the child, for error reports.
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default()
    }

    async fn spawn(&mut self) -> std::io::Result<Pipes> {
        self.shutdown_child().await;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in &self.envs {
            cmd.env(k, v);
        }
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("stdout not captured"))?;

        if let Some(stderr) = child.stderr.take() {
            let tail = Arc::clone(&self.stderr_tail);
            if let Ok(mut t) = tail.lock() {
                t.clear();
            }
            let pid = child.id();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    tracing::debug!(?pid, "child stderr: {line}");
                    if let Ok(mut t) = tail.lock() {
                        if !t.is_empty() {
                            t.push('\n');
                        }
                        t.push_str(&line);
                        if t.len() > STDERR_TAIL_BYTES {
                            let mut cut = t.len() - STDERR_TAIL_BYTES;
                            while !t.is_char_boundary(cut) {
                                cut += 1;
                            }
                            t.drain(..cut);
                        }
                    }
                }
            });
        }

        tracing::info!(program = %self.program.display(), pid = ?child.id(), "child started");
        self.child = Some(child);
        Ok(Pipes {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
        })
    }

    async fn shutdown_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
            tracing::debug!(pid = ?child.id(), "child stopped");
        }
    }
}

impl Supervisor for ChildSupervisor {
    fn start(&mut self) -> BoxFuture<'_, std::io::Result<Pipes>> {
        self.spawn().boxed()
    }

    fn stop(&mut self) -> BoxFuture<'_, ()> {
        self.shutdown_child().boxed()
    }

    fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}
