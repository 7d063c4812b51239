//! ftok-style key derivation.
//!
//! A key packs three narrow fields into one 32-bit value:
//!
//! | Bits  | Source |
//! |-------|--------|
//! | 0-15  | low 16 bits of the inode number |
//! | 16-23 | low 8 bits of the device id |
//! | 24-31 | low 8 bits of the discriminator |
//!
//! This is the glibc `ftok(3)` layout, so keys agree with any other process
//! that calls `ftok` on the same path. Distinct inputs can collide.

use std::fmt;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Result, ShmError};

const INODE_MASK: u64 = 0xffff;
const DEVICE_MASK: u64 = 0xff;
const DISCRIMINATOR_MASK: u32 = 0xff;

/// Process-agnostic identifier used to locate a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(u32);

impl Key {
    /// `IPC_PRIVATE`: always creates a new segment that cannot be looked up by key.
    pub const PRIVATE: Self = Self(0);

    /// Derive a key from a path's device and inode numbers and a discriminator.
    ///
    /// The path must exist. Vary `discriminator` to namespace several
    /// segments that share one backing path such as `/dev/null`; only its
    /// low 8 bits are used.
    pub fn derive<P: AsRef<Path>>(path: P, discriminator: u32) -> Result<Self> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path).map_err(|source| ShmError::PathUnavailable {
            path: path.to_path_buf(),
            source,
        })?;

        let key = Self::from_parts(metadata.ino(), metadata.dev(), discriminator);
        tracing::trace!(
            path = %path.display(),
            inode = metadata.ino(),
            device = metadata.dev(),
            discriminator,
            %key,
            "derived key"
        );
        Ok(key)
    }

    /// Pack already-known inode, device and discriminator values.
    pub const fn from_parts(inode: u64, device: u64, discriminator: u32) -> Self {
        let packed = (inode & INODE_MASK) | ((device & DEVICE_MASK) << 16);
        Self(packed as u32 | ((discriminator & DISCRIMINATOR_MASK) << 24))
    }

    /// The key as an unsigned integer.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// The key reinterpreted as the platform `key_t`.
    #[allow(clippy::cast_possible_wrap)]
    pub(crate) const fn as_raw(self) -> libc::key_t {
        self.0 as libc::key_t
    }
}

impl From<u32> for Key {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Key> for u32 {
    fn from(key: Key) -> Self {
        key.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}
