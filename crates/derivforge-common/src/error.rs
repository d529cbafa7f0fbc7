//! Error taxonomy shared by every derivforge component.
//!
//! Generation failures are typed so the layer above can map them to
//! server-error or timeout responses. Offload failures are never returned
//! from a read or generation path; they exist so replication workers can
//! report what went wrong.

use crate::types::DerivativeClass;
use std::path::PathBuf;
use std::time::Duration;

/// Common error type for derivforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The origin asset could not be located or fetched.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// Every applicable strategy exited unsuccessfully.
    #[error("{class} generation failed after {attempts} attempt(s): {detail}")]
    EncodeFailed {
        class: DerivativeClass,
        attempts: usize,
        detail: String,
    },

    /// The final strategy attempt was killed at the class timeout.
    #[error("{class} generation timed out after {timeout:?}")]
    EncodeTimeout {
        class: DerivativeClass,
        timeout: Duration,
    },

    /// Remote replication failed. Logged, never fatal.
    #[error("offload failed: {0}")]
    OffloadFailed(String),

    /// An artifact looked ready but was missing or empty on disk.
    #[error("cache corruption at {}", path.display())]
    CacheCorruption { path: PathBuf },

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input was provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new SourceUnavailable error.
    pub fn source_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::SourceUnavailable(msg.into())
    }

    /// Create a new EncodeFailed error.
    pub fn encode_failed<S: Into<String>>(
        class: DerivativeClass,
        attempts: usize,
        detail: S,
    ) -> Self {
        Self::EncodeFailed {
            class,
            attempts,
            detail: detail.into(),
        }
    }

    /// Create a new OffloadFailed error.
    pub fn offload_failed<S: Into<String>>(msg: S) -> Self {
        Self::OffloadFailed(msg.into())
    }

    /// Create a new CacheCorruption error.
    pub fn cache_corruption(path: impl Into<PathBuf>) -> Self {
        Self::CacheCorruption { path: path.into() }
    }

    /// Create a new InvalidInput error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error came from generation (and should surface as a 5xx/504).
    pub fn is_generation_failure(&self) -> bool {
        matches!(self, Self::EncodeFailed { .. } | Self::EncodeTimeout { .. })
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_error_display() {
        let err = Error::encode_failed(DerivativeClass::HdProxy, 3, "exit status 1");
        assert_eq!(
            err.to_string(),
            "hd-proxy generation failed after 3 attempt(s): exit status 1"
        );

        let err = Error::EncodeTimeout {
            class: DerivativeClass::Thumbnail,
            timeout: Duration::from_secs(25),
        };
        assert_eq!(err.to_string(), "thumbnail generation timed out after 25s");
    }

    #[test]
    fn test_generation_failure_classification() {
        assert!(Error::encode_failed(DerivativeClass::Hls, 1, "x").is_generation_failure());
        assert!(!Error::offload_failed("bucket gone").is_generation_failure());
        assert!(!Error::source_unavailable("404").is_generation_failure());
    }

    #[test]
    fn test_io_conversion() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_matches!(err, Error::Io(_));
    }
}
