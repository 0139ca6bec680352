//! Multi-tenant application server front end.
//!
//! A long-running listener that accepts inbound connections, resolves
//! which registered tenant (virtual host + port + path prefix bound to a
//! physical root) each request belongs to, and dispatches the request into
//! that tenant's isolated execution context.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client ──▶ server (accept loop) ──▶ worker ──▶ routing (longest prefix)
//!                    │                     │              │ lazy, once
//!                    ▼                     │              ▼
//!              net (registry)              │        host (tenant context)
//!                                          │              │
//!                                          ▼              ▼
//!                                   broker: RequestId ◀──── forwarded ops
//! ```
//!
//! A worker registers its connection with the matched tenant's request
//! broker and crosses into the context carrying only the opaque request
//! id; every read, write, or address lookup the context performs comes
//! back through the broker. End-of-request closes the connection or hands
//! it back for keep-alive reuse.

// Core subsystems
pub mod broker;
pub mod config;
pub mod host;
pub mod http;
pub mod net;
pub mod routing;
pub mod server;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;

pub use config::ServerConfig;
pub use routing::RouteTable;
pub use server::Server;
