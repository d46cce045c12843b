//! `scrum-rpc`: line-delimited JSON messaging with a child process.
//!
//! ```text
//! caller ──send()──▶ Correlator ──{id,method,params}\n──▶ child stdin
//!                        ▲
//!   PendingRequest ◀─────┤ pending table (id → oneshot + deadline)
//!                        │
//!              reader task ◀──{id,result|error}\n── child stdout
//! ```
//!
//! The [`Correlator`] owns the child through a [`Supervisor`], frames its
//! output with [`LineBuffer`], and resolves each [`PendingRequest`] by id.
//! [`server::serve`] is the other end: it reads requests from any byte
//! stream and answers them from a shared [`scrum_core::Services`].

pub mod correlator;
pub mod error;
pub mod framing;
pub mod protocol;
pub mod server;
pub mod supervisor;

pub use correlator::{Correlator, PendingRequest};
pub use error::{Result, RpcError};
pub use framing::LineBuffer;
pub use protocol::{Request, Response};
pub use supervisor::{ChildSupervisor, Pipes, Supervisor};
