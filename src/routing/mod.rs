//! Tenant route table.
//!
//! # Responsibilities
//! - Hold the registered (host, port, path prefix) → tenant entries
//! - Resolve requests by longest matching path prefix
//! - Create each tenant's execution context lazily, at most once
//!
//! # Design Decisions
//! - Equal-length prefix ties go to the most recently registered entry,
//!   made deterministic by a strictly-greater-length reverse scan
//! - Context creation is double-checked under a per-entry lock so
//!   unrelated tenants' first requests never serialize on each other
//! - Entries are never removed; unregistering clears the created context
//!   and the next matching request recreates it

pub mod table;

pub use table::{ResolvedTenant, RouteEntry, RouteTable};
