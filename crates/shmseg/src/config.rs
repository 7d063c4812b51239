//! Configuration for opening segments

use serde::{Deserialize, Serialize};

use crate::{Result, ShmError};

/// Default access mode for new segments: owner read/write.
pub const DEFAULT_MODE: u32 = 0o600;

/// Permission bits accepted in [`SegmentConfig::mode`].
const MODE_MASK: u32 = 0o777;

/// How a segment is opened and what happens around attach
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Permission bits passed to `shmget` when creating
    pub mode: u32,

    /// Create the segment when no segment exists for the key
    pub create_if_missing: bool,

    /// Request removal immediately after a successful attach, so the
    /// segment is destroyed on the last detach
    pub remove_after_attach: bool,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            mode: DEFAULT_MODE,
            create_if_missing: true,
            remove_after_attach: false,
        }
    }
}

impl SegmentConfig {
    /// Configuration that only looks up existing segments
    pub fn lookup() -> Self {
        Self {
            create_if_missing: false,
            ..Default::default()
        }
    }

    /// Set the permission bits
    #[must_use]
    pub const fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Enable or disable creation of missing segments
    #[must_use]
    pub const fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// Enable or disable removal right after attach
    #[must_use]
    pub const fn with_remove_after_attach(mut self, remove: bool) -> Self {
        self.remove_after_attach = remove;
        self
    }

    /// Reject mode bits outside the permission range.
    ///
    /// Higher bits would collide with `IPC_CREAT`/`IPC_EXCL` and the
    /// `SHM_*` flags.
    pub fn validate(&self) -> Result<()> {
        if self.mode & !MODE_MASK != 0 {
            return Err(ShmError::InvalidConfig(format!(
                "mode {:#o} has bits outside {MODE_MASK:#o}",
                self.mode
            )));
        }
        Ok(())
    }

    /// `shmget` flags for this configuration.
    #[allow(clippy::cast_possible_wrap)]
    pub(crate) fn shmget_flags(&self) -> libc::c_int {
        let mode = (self.mode & MODE_MASK) as libc::c_int;
        if self.create_if_missing {
            libc::IPC_CREAT | mode
        } else {
            mode
        }
    }
}
