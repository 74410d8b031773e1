//! Error types for radiohue-engine
//!
//! Every variant is recovered at station or artifact granularity: the
//! pipeline logs it, skips the affected station (or file) and carries on.
//! None of them may stop the scheduler.

use radiohue_common::{DescriptorKind, StationId};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the capture engine
#[derive(Error, Debug)]
pub enum Error {
    /// Stream unreachable, refused, timed out or interrupted mid-capture
    #[error("Network error for station {station}: {reason}")]
    Network { station: StationId, reason: String },

    /// Captured container is corrupt or unsupported
    #[error("Decode error for {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    /// One of the descriptor computations failed; no partial set is produced
    #[error("Extraction error ({descriptor}): {reason}")]
    Extraction {
        descriptor: DescriptorKind,
        reason: String,
    },

    /// Downstream endpoint unreachable after the retry
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Artifact write or delete failure
    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Fewer stations captured than the configured minimum
    #[error("Capture produced {captured} artifacts, {required} required")]
    InsufficientCaptures { captured: usize, required: usize },

    /// radiohue-common error
    #[error("Common error: {0}")]
    Common(#[from] radiohue_common::Error),
}

/// Convenience Result type using the engine Error
pub type Result<T> = std::result::Result<T, Error>;

/// Taxonomy class of an engine error, used in logs and events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NetworkError,
    DecodeError,
    ExtractionError,
    DispatchError,
    FilesystemError,
    CaptureError,
    ConfigError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Network { .. } => ErrorKind::NetworkError,
            Error::Decode { .. } => ErrorKind::DecodeError,
            Error::Extraction { .. } => ErrorKind::ExtractionError,
            Error::Dispatch(_) => ErrorKind::DispatchError,
            Error::Filesystem { .. } => ErrorKind::FilesystemError,
            Error::InsufficientCaptures { .. } => ErrorKind::CaptureError,
            Error::Common(_) => ErrorKind::ConfigError,
        }
    }

    pub(crate) fn network(station: &StationId, reason: impl Into<String>) -> Self {
        Error::Network {
            station: station.clone(),
            reason: reason.into(),
        }
    }

    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }
}
