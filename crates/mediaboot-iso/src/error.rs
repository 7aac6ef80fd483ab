//! Error types for image construction
//!
//! Each build phase has its own variant so callers can tell an unwritable
//! output path from a bad work directory from a failed finalization.

use std::path::PathBuf;
use thiserror::Error;

/// Error type for image builds
#[derive(Debug, Error)]
pub enum BuildError {
    /// The image container could not be created at the output path
    #[error("failed to allocate image at {path}: {source}")]
    AllocationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// ISO9660 filesystem negotiation failed
    #[error("failed to format ISO9660 filesystem: {0}")]
    FormatFailed(String),

    /// Descriptors, directories or Rock Ridge metadata could not be written
    #[error("failed to finalize image: {reason}")]
    FinalizeFailed {
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Input files could not be written into the work directory
    #[error("failed to stage {path}: {source}")]
    StagingFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    pub(crate) fn finalize(reason: impl Into<String>) -> Self {
        BuildError::FinalizeFailed {
            reason: reason.into(),
            source: None,
        }
    }

    pub(crate) fn finalize_io(reason: impl Into<String>, source: std::io::Error) -> Self {
        BuildError::FinalizeFailed {
            reason: reason.into(),
            source: Some(source),
        }
    }
}

/// Error type for volume label validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    #[error("volume label is empty")]
    Empty,

    #[error("volume label is {len} characters (max: {max})")]
    TooLong { len: usize, max: usize },

    #[error("volume label contains invalid character {0:?}")]
    InvalidChar(char),
}

/// Error type for reading finished images back
#[derive(Debug, Error)]
pub enum InspectError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file has no ISO9660 primary volume descriptor
    #[error("not an ISO9660 image: {0}")]
    NotIso9660(String),

    /// A descriptor or directory record points outside the image
    #[error("malformed image: {0}")]
    Malformed(String),
}

/// Result type for image builds
pub type Result<T> = std::result::Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BuildError::FormatFailed("work dir missing".to_string());
        assert_eq!(
            err.to_string(),
            "failed to format ISO9660 filesystem: work dir missing"
        );

        let err = BuildError::AllocationFailed {
            path: PathBuf::from("/nope/test.iso"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such directory"),
        };
        assert!(err.to_string().contains("/nope/test.iso"));

        let err = BuildError::finalize("name too long for Rock Ridge");
        assert_eq!(
            err.to_string(),
            "failed to finalize image: name too long for Rock Ridge"
        );
    }

    #[test]
    fn test_label_error_display() {
        assert_eq!(LabelError::Empty.to_string(), "volume label is empty");
        assert_eq!(
            LabelError::TooLong { len: 40, max: 32 }.to_string(),
            "volume label is 40 characters (max: 32)"
        );
        assert_eq!(
            LabelError::InvalidChar('/').to_string(),
            "volume label contains invalid character '/'"
        );
    }
}
