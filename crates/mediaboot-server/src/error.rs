//! Error types for the media server

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;
use tokio::task::JoinError;

/// Error type for starting the server
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the listen address
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Certificate or key could not be read
    #[error("failed to read TLS material from {path}: {reason}")]
    TlsMaterial { path: PathBuf, reason: String },

    /// Certificate and key were read but rejected
    #[error("invalid TLS configuration: {0}")]
    Tls(String),
}

/// Error type for the forced close at the end of a shutdown
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// The accept loop did not exit cleanly
    #[error("accept loop terminated abnormally: {0}")]
    AcceptLoop(#[source] JoinError),

    /// A connection task panicked while draining or being aborted
    #[error("connection task panicked: {0}")]
    ConnectionPanicked(#[source] JoinError),
}

/// Result type for server operations
pub type Result<T> = std::result::Result<T, ServerError>;
