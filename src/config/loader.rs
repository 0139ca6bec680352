//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::ServerConfig;
use crate::error::ConfigError;

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ServerConfig = toml::from_str(&content)?;

    validate_config(&config)?;

    Ok(config)
}

/// Semantic checks serde cannot express.
fn validate_config(config: &ServerConfig) -> Result<(), ConfigError> {
    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::invalid(
            "listener.bind_address",
            format!("not a socket address: {:?}", config.listener.bind_address),
        ));
    }

    for tenant in &config.tenants {
        if tenant.path_prefix.is_empty() || !tenant.path_prefix.starts_with('/') {
            return Err(ConfigError::invalid(
                "tenants.path_prefix",
                format!("must begin with '/': {:?}", tenant.path_prefix),
            ));
        }
        if tenant.physical_root.is_empty() {
            return Err(ConfigError::invalid("tenants.physical_root", "must not be empty"));
        }
        if let Some(host) = &tenant.host {
            if host.is_empty() {
                return Err(ConfigError::invalid("tenants.host", "must not be empty when present"));
            }
        }
    }

    Ok(())
}
