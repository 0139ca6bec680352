//! Acceptor / dispatcher.
//!
//! # Data Flow
//! ```text
//! accept loop (one task, re-armed before processing)
//!     → socket options, connection registry
//!     → dispatch: worker factory
//!         suspending worker → spawned task
//!         pooled worker     → blocking pool
//!     → worker: broker registration → tenant context → close or reuse
//! ```
//!
//! # Design Decisions
//! - The accepted connection is handed off before the next accept, so
//!   accept latency is independent of request-processing time
//! - Stop is cooperative (cancellation token at the accept point) and
//!   bounded, not graceful: in-flight tenant work may be abandoned
//! - Teardown runs on its own task so the stopping caller never blocks

pub mod acceptor;
pub mod worker;

pub use acceptor::{Server, ServerHandle, ServerState};
pub use worker::{Worker, WorkerFactory};
