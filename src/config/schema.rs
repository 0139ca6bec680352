//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the application server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Tenant definitions routed by this server.
    pub tenants: Vec<TenantConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// One tenant: a virtual host + port + path prefix bound to a physical root.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TenantConfig {
    /// Virtual host to match. `None` matches any host.
    pub host: Option<String>,

    /// Virtual port to match. `None` matches any port.
    pub port: Option<u16>,

    /// Path prefix the tenant is mounted at.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// Physical application root on disk.
    pub physical_root: String,

    /// Disabled tenants are skipped at registration time.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_path_prefix() -> String {
    "/".to_string()
}

fn default_enabled() -> bool {
    true
}
