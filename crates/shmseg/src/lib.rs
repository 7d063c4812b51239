//! System V shared memory segments for multi-process data sharing.
//!
//! Unrelated processes agree on a segment through a [`Key`] derived from a
//! filesystem path and a discriminator, then each holds its own
//! [`SegmentHandle`]:
//!
//! - **Open**: get-or-create by key ([`SegmentHandle::create_or_get`]), or
//!   [`SegmentHandle::join_or_create`] to learn whether this process created it
//! - **Attach**: map the segment at an address chosen by the OS
//! - **Detach**: unmap it; idempotent, and implied by process exit
//! - **Remove**: request destruction once the last attacher is gone
//!
//! The kernel is the only source of truth for existence and attach counts.
//! Nothing here synchronizes access to the shared bytes; callers that need
//! ordering across processes must bring their own lock.
//!
//! # Example
//!
//! ```rust,no_run
//! use shmseg::{Key, SegmentHandle};
//!
//! # fn example() -> shmseg::Result<()> {
//! let key = Key::derive("/dev/null", 1)?;
//! let mut segment = SegmentHandle::create_or_get(key, 8192)?;
//! segment.attach()?;
//!
//! segment.as_mut_slice()?[..5].copy_from_slice(b"hello");
//!
//! segment.remove()?;
//! segment.detach()?;
//! # Ok(())
//! # }
//! ```

#![cfg(unix)]
#![warn(missing_docs)]

// Error taxonomy
mod error;

// Key derivation
pub mod key;

// Open/attach configuration
pub mod config;

// libc wrappers
mod sys;

// Mapped byte window
pub mod view;

// Segment handle lifecycle
pub mod segment;

// ipcs accounting
pub mod status;

pub use config::SegmentConfig;
pub use error::{Result, ShmError};
pub use key::Key;
pub use segment::{Origin, Removal, SegmentHandle, SegmentStatus};
pub use status::IpcsSummary;
pub use view::MappedView;

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// System page size in bytes.
pub fn page_size() -> usize {
    sys::page_size()
}
