//! Tenant and listener configuration.
//!
//! # Data Flow
//! ```text
//! config file (TOML)               --applications string
//!     → loader.rs                      → apps.rs
//!     → ServerConfig                   → Vec<TenantConfig>
//!     → RouteTable::register for every enabled tenant
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; tenants register at startup only
//! - All fields have defaults to allow minimal configs
//! - Malformed tenant entries fail fast, naming the offending field

pub mod apps;
pub mod loader;
pub mod schema;

pub use schema::ListenerConfig;
pub use schema::ServerConfig;
pub use schema::TenantConfig;
