//! Error types for segment operations.
//!
//! Every OS-facing failure carries the `std::io::Error` reported by the
//! kernel unmodified, so callers can inspect `raw_os_error()` directly.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::key::Key;

/// Result type for segment operations.
pub type Result<T> = std::result::Result<T, ShmError>;

/// Errors that can occur while deriving keys or managing segments.
#[derive(Debug, Error)]
pub enum ShmError {
    /// The path used for key derivation could not be stat'ed.
    #[error("Path unavailable for key derivation {path}: {source}")]
    PathUnavailable {
        /// Path that was passed to key derivation
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// `shmget` rejected the request, or the requested size was zero.
    #[error("Segment unavailable for key {key} ({size} bytes): {source}")]
    SegmentUnavailable {
        /// Key that was requested
        key: Key,
        /// Requested size in bytes
        size: usize,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// `shmat` rejected the mapping.
    #[error("Attach failed for segment {id}: {source}")]
    AttachFailed {
        /// Segment identifier
        id: i32,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// `shmdt` rejected the unmap of a still-mapped address.
    #[error("Detach failed for segment {id}: {source}")]
    DetachFailed {
        /// Segment identifier
        id: i32,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// `shmctl(IPC_RMID)` rejected the removal request.
    #[error("Remove failed for segment {id}: {source}")]
    RemoveFailed {
        /// Segment identifier
        id: i32,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// `shmctl(IPC_STAT)` failed.
    #[error("Stat failed for segment {id}: {source}")]
    StatFailed {
        /// Segment identifier
        id: i32,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// Bytes were accessed on a handle without a live mapping.
    #[error("Segment {id} is not attached")]
    NotAttached {
        /// Segment identifier
        id: i32,
    },

    /// Configuration rejected before reaching the OS.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The `ipcs` status utility could not be run.
    #[error("Segment status unavailable: {0}")]
    StatusUnavailable(#[source] io::Error),

    /// The `ipcs` status output could not be parsed.
    #[error("Invalid segment status output: {0}")]
    StatusParse(String),
}

impl ShmError {
    /// The underlying OS error, if this failure came from a syscall.
    fn os_source(&self) -> Option<&io::Error> {
        match self {
            Self::PathUnavailable { source, .. }
            | Self::SegmentUnavailable { source, .. }
            | Self::AttachFailed { source, .. }
            | Self::DetachFailed { source, .. }
            | Self::RemoveFailed { source, .. }
            | Self::StatFailed { source, .. }
            | Self::StatusUnavailable(source) => Some(source),
            Self::NotAttached { .. } | Self::InvalidConfig(_) | Self::StatusParse(_) => None,
        }
    }

    /// Raw errno reported by the OS, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        self.os_source().and_then(io::Error::raw_os_error)
    }

    /// True when a lookup failed because no segment exists for the key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SegmentUnavailable { .. })
            && self.raw_os_error() == Some(libc::ENOENT)
    }

    /// True when the segment identifier no longer names a live segment.
    pub fn is_gone(&self) -> bool {
        match self {
            Self::AttachFailed { .. }
            | Self::RemoveFailed { .. }
            | Self::StatFailed { .. } => {
                matches!(self.raw_os_error(), Some(libc::EINVAL | libc::EIDRM))
            }
            _ => false,
        }
    }

    /// True when the OS refused the operation for permission reasons.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self.raw_os_error(), Some(libc::EACCES | libc::EPERM))
    }
}
