//! Error types for BMC operations

use thiserror::Error;

use crate::orchestrator::BootStage;

/// Error type for a single management call
#[derive(Debug, Error)]
pub enum BmcError {
    /// Connection failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The BMC rejected a request or action
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// Operation timed out
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Resource does not exist
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Response body could not be understood
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for BMC operations
pub type Result<T> = std::result::Result<T, BmcError>;

/// Error type for a boot orchestration run
///
/// Each variant names the step that failed and the resource it was acting on.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("failed to connect to management endpoint {endpoint}: {source}")]
    ConnectFailed {
        endpoint: String,
        #[source]
        source: BmcError,
    },

    #[error("managed system {system} not found: {source}")]
    SystemNotFound {
        system: String,
        #[source]
        source: BmcError,
    },

    #[error("failed to enumerate virtual media of manager {manager}: {source}")]
    DiscoveryFailed {
        manager: String,
        #[source]
        source: BmcError,
    },

    #[error("no CD virtual media on system {system} ({examined} media across {managers} managers)")]
    NoCompatibleMedia {
        system: String,
        managers: usize,
        examined: usize,
    },

    #[error("failed to eject virtual media {media}: {source}")]
    EjectFailed {
        media: String,
        #[source]
        source: BmcError,
    },

    #[error("failed to insert {image_url} into virtual media {media}: {source}")]
    InsertFailed {
        media: String,
        image_url: String,
        #[source]
        source: BmcError,
    },

    #[error("failed to reset system {system}: {source}")]
    ResetFailed {
        system: String,
        #[source]
        source: BmcError,
    },

    #[error("failed to eject virtual media {media} after dwell: {source}")]
    PostDwellEjectFailed {
        media: String,
        #[source]
        source: BmcError,
    },
}

impl OrchestrationError {
    /// The stage the run was trying to reach when it failed
    pub fn stage(&self) -> BootStage {
        match self {
            OrchestrationError::ConnectFailed { .. } => BootStage::Connect,
            OrchestrationError::SystemNotFound { .. } => BootStage::SystemResolved,
            OrchestrationError::DiscoveryFailed { .. }
            | OrchestrationError::NoCompatibleMedia { .. } => BootStage::MediaDiscovered,
            OrchestrationError::EjectFailed { .. } => BootStage::MediaEjected,
            OrchestrationError::InsertFailed { .. } => BootStage::MediaInserted,
            OrchestrationError::ResetFailed { .. } => BootStage::BootIssued,
            OrchestrationError::PostDwellEjectFailed { .. } => BootStage::Done,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BmcError::ConnectionFailed("host unreachable".to_string());
        assert_eq!(err.to_string(), "connection failed: host unreachable");

        let err = BmcError::AuthenticationFailed("bad credentials".to_string());
        assert_eq!(err.to_string(), "authentication failed: bad credentials");

        let err = BmcError::Timeout("GET /redfish/v1/".to_string());
        assert_eq!(err.to_string(), "operation timed out: GET /redfish/v1/");
    }

    #[test]
    fn test_orchestration_error_context() {
        let err = OrchestrationError::InsertFailed {
            media: "Cd1".to_string(),
            image_url: "http://10.0.0.5:8080/images/test-config.iso".to_string(),
            source: BmcError::CommandFailed("HTTP 400".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "failed to insert http://10.0.0.5:8080/images/test-config.iso into virtual media Cd1: command failed: HTTP 400"
        );
        assert_eq!(err.stage(), BootStage::MediaInserted);

        let err = OrchestrationError::NoCompatibleMedia {
            system: "1".to_string(),
            managers: 1,
            examined: 2,
        };
        assert_eq!(
            err.to_string(),
            "no CD virtual media on system 1 (2 media across 1 managers)"
        );
    }
}
