//! Byte window over an attached segment.

use std::fmt;
use std::io;
use std::ptr::NonNull;
use std::slice;

use crate::sys;

/// A mapping produced by a successful `shmat`.
///
/// Only [`SegmentHandle::attach`](crate::SegmentHandle::attach) can create
/// one, and the owning handle consumes it on detach, so a view never
/// outlives its mapping. The bytes are shared with every other attacher
/// and carry no synchronization: concurrent writers from other processes
/// race with this one.
pub struct MappedView {
    /// Address chosen by the kernel; process-local.
    addr: NonNull<u8>,
    /// Length of the segment in bytes.
    len: usize,
}

impl MappedView {
    /// Map segment `id` covering `len` bytes.
    pub(crate) fn attach(id: i32, len: usize) -> io::Result<Self> {
        let addr = sys::shmat(id)?;
        Ok(Self { addr, len })
    }

    /// Unmap the view.
    ///
    /// `EINVAL` means nothing is mapped at the address any more, which is
    /// the state detach asks for, so it counts as success. On any other
    /// failure the view is handed back so the caller keeps a valid mapping.
    #[allow(unsafe_code)]
    pub(crate) fn detach(self) -> Result<(), (Self, io::Error)> {
        // SAFETY: addr came from shmat, and consuming self ends every
        // borrow of the mapping.
        let result = unsafe { sys::shmdt(self.addr) };
        match result {
            Ok(()) => {
                std::mem::forget(self);
                Ok(())
            }
            Err(e) if e.raw_os_error() == Some(libc::EINVAL) => {
                tracing::warn!(addr = ?self.addr, "segment already unmapped: {e}");
                std::mem::forget(self);
                Ok(())
            }
            Err(e) => Err((self, e)),
        }
    }

    /// Base address of the mapping.
    pub const fn base_address(&self) -> NonNull<u8> {
        self.addr
    }

    /// Length in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True when the segment has no bytes. Never the case for a view
    /// produced by attach.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Shared view of the bytes.
    #[allow(unsafe_code)]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: addr points to a live mapping of exactly len bytes for as
        // long as self exists.
        unsafe { slice::from_raw_parts(self.addr.as_ptr(), self.len) }
    }

    /// Mutable view of the bytes.
    #[allow(unsafe_code)]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self excludes other borrows within this
        // process.
        unsafe { slice::from_raw_parts_mut(self.addr.as_ptr(), self.len) }
    }
}

impl fmt::Debug for MappedView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedView")
            .field("addr", &self.addr)
            .field("len", &self.len)
            .finish()
    }
}

impl Drop for MappedView {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        // SAFETY: addr came from shmat and this is the last use of it.
        if let Err(e) = unsafe { sys::shmdt(self.addr) } {
            tracing::warn!(addr = ?self.addr, "implicit detach failed: {e}");
        }
    }
}

// SAFETY: the mapping belongs to the process, not to a thread, so a view can
// move between threads. Shared access across threads only yields &[u8].
#[allow(unsafe_code)]
unsafe impl Send for MappedView {}

#[allow(unsafe_code)]
unsafe impl Sync for MappedView {}
