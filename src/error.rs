//! Error types shared across the server.
//!
//! Propagation policy: failures while tearing down a socket are always
//! swallowed at the call site (cleanup must never abort the sweep), and
//! failures while sending a synthesized error response are logged, not
//! retried. Everything else surfaces through these enums.

use thiserror::Error;

/// Errors from starting, running, or stopping the [`Server`](crate::server::Server).
#[derive(Debug, Error)]
pub enum ServerError {
    /// `start` was called on a server that is already running.
    #[error("the server is already started")]
    AlreadyStarted,

    /// `stop` was called on a server that was never started.
    #[error("the server is not started")]
    NotStarted,

    /// Failed to bind or listen on the configured address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    /// Re-arming the accept loop failed while the server was still running.
    #[error("accept failed: {0}")]
    Accept(std::io::Error),
}

/// Worker construction or submission failed for one accepted connection.
///
/// The connection is forcibly closed and the fault is not retried.
#[derive(Debug, Error)]
#[error("dispatch failed: {0}")]
pub struct DispatchError(pub String);

/// Errors crossing the broker boundary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// The request id is not (or no longer) registered.
    ///
    /// Legitimately occurs when the connection was already torn down;
    /// hosts must treat it as end-of-request, not as a fault.
    #[error("unknown request id")]
    UnknownRequestId,
}

/// Errors loading tenant configuration from files or the command line.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A tenant entry is malformed; names the offending field.
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
