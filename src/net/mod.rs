//! Connection state and lifecycle tracking.
//!
//! # Responsibilities
//! - Wrap accepted streams with identity and reuse bookkeeping
//! - Track every open connection for coordinated shutdown
//!
//! # Design Decisions
//! - Connections are stream-agnostic so tests run over in-memory pipes
//! - The registry is an explicit object owned by the server, not a global
//! - Teardown is best-effort: half-close, then close, errors swallowed

pub mod connection;
pub mod registry;

pub use connection::{Connection, ConnectionId};
pub use registry::ConnectionRegistry;
