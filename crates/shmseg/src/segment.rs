//! Segment handles: create/get, attach, detach, remove.
//!
//! A [`SegmentHandle`] is a process-local view of one kernel segment. It
//! keeps no registry and caches no attach counts: whether a segment
//! exists, how many processes have it attached, and when it is destroyed
//! are all answered by the kernel.
//!
//! Destruction needs two things: some process has requested removal, and
//! the last attachment is gone (explicit detach, or the attacher exiting
//! for any reason, including `SIGKILL`). Whichever happens second destroys
//! the segment.

use std::io;
use std::ptr::NonNull;

use tracing::{debug, warn};

use crate::config::SegmentConfig;
use crate::key::Key;
use crate::sys;
use crate::view::MappedView;
use crate::{Result, ShmError};

/// How many times [`SegmentHandle::join_or_create`] retries after losing a
/// creation race.
const JOIN_ATTEMPTS: usize = 3;

/// Whether [`SegmentHandle::join_or_create`] created the segment or found
/// an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// This call created the segment.
    Created,
    /// The segment already existed.
    Joined,
}

/// Outcome of a removal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The kernel accepted the request; the segment is destroyed once the
    /// last attachment is gone.
    Marked,
    /// The segment no longer exists, or this handle already removed it.
    AlreadyGone,
}

/// Kernel bookkeeping for a segment, read with `IPC_STAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentStatus {
    /// Segment size in bytes.
    pub size: usize,
    /// Number of live attachments across all processes.
    pub attach_count: u64,
    /// Process that created the segment.
    pub creator_pid: i32,
    /// Process that last attached or detached.
    pub last_pid: i32,
    /// Permission and state bits from `shm_perm.mode`.
    pub mode: u32,
    /// Removal has been requested but attachments remain.
    pub marked_for_removal: bool,
}

impl SegmentStatus {
    fn from_raw(ds: &libc::shmid_ds) -> Self {
        let mode = u32::from(ds.shm_perm.mode);

        #[cfg(target_os = "linux")]
        let marked_for_removal = mode & sys::SHM_DEST != 0;
        #[cfg(not(target_os = "linux"))]
        let marked_for_removal = false;

        Self {
            size: usize::try_from(ds.shm_segsz).unwrap_or(usize::MAX),
            attach_count: u64::from(ds.shm_nattch),
            creator_pid: ds.shm_cpid,
            last_pid: ds.shm_lpid,
            mode,
            marked_for_removal,
        }
    }
}

/// In-process handle to one shared memory segment.
///
/// The handle owns the mapping once attached. Byte access borrows the
/// handle, so no slice can survive a [`detach`](Self::detach). Dropping an
/// attached handle detaches it; dropping never removes the segment.
#[derive(Debug)]
pub struct SegmentHandle {
    /// Key used to create or locate the segment.
    key: Key,
    /// Kernel segment identifier.
    id: i32,
    /// Requested size in bytes.
    size: usize,
    /// Live mapping, present only while attached.
    view: Option<MappedView>,
    /// This handle saw a successful removal or the segment's disappearance.
    removed: bool,
}

impl SegmentHandle {
    /// Open the segment for `key` according to `config`.
    ///
    /// With `create_if_missing` this is get-or-create in one call;
    /// otherwise it fails when no segment exists for `key`. Nothing is
    /// mapped.
    pub fn open(key: Key, size: usize, config: &SegmentConfig) -> Result<Self> {
        config.validate()?;
        check_size(key, size)?;

        let id = sys::shmget(key.as_raw(), size, config.shmget_flags())
            .map_err(|source| ShmError::SegmentUnavailable { key, size, source })?;

        debug!(%key, size, id, create = config.create_if_missing, "opened segment");
        Ok(Self::new(key, id, size))
    }

    /// Get or create the segment for `key` with the default owner-only mode.
    pub fn create_or_get(key: Key, size: usize) -> Result<Self> {
        Self::open(key, size, &SegmentConfig::default())
    }

    /// Look up an existing segment; never creates one.
    ///
    /// `size` must not exceed the size the segment was created with.
    pub fn get(key: Key, size: usize) -> Result<Self> {
        Self::open(key, size, &SegmentConfig::lookup())
    }

    /// Look up the segment, creating it exclusively if absent, and report
    /// which of the two happened.
    ///
    /// Useful when the creator is responsible for removal. If another
    /// process creates the segment between the lookup and the exclusive
    /// create, the lookup is retried.
    pub fn join_or_create(
        key: Key,
        size: usize,
        config: &SegmentConfig,
    ) -> Result<(Self, Origin)> {
        config.validate()?;
        check_size(key, size)?;

        let lookup = config.clone().with_create_if_missing(false).shmget_flags();
        let exclusive = lookup | libc::IPC_CREAT | libc::IPC_EXCL;

        // IPC_PRIVATE never matches an existing segment.
        if key == Key::PRIVATE {
            let id = sys::shmget(key.as_raw(), size, exclusive)
                .map_err(|source| ShmError::SegmentUnavailable { key, size, source })?;
            debug!(%key, size, id, "created private segment");
            return Ok((Self::new(key, id, size), Origin::Created));
        }

        let mut last_error = None;
        for _ in 0..JOIN_ATTEMPTS {
            match sys::shmget(key.as_raw(), size, lookup) {
                Ok(id) => {
                    debug!(%key, size, id, "joined existing segment");
                    return Ok((Self::new(key, id, size), Origin::Joined));
                }
                Err(e)
                    if e.raw_os_error() == Some(libc::ENOENT) && config.create_if_missing => {}
                Err(source) => return Err(ShmError::SegmentUnavailable { key, size, source }),
            }

            match sys::shmget(key.as_raw(), size, exclusive) {
                Ok(id) => {
                    debug!(%key, size, id, "created segment");
                    return Ok((Self::new(key, id, size), Origin::Created));
                }
                Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
                    debug!(%key, "lost creation race, retrying lookup");
                    last_error = Some(e);
                }
                Err(source) => return Err(ShmError::SegmentUnavailable { key, size, source }),
            }
        }

        Err(ShmError::SegmentUnavailable {
            key,
            size,
            source: last_error.unwrap_or_else(|| io::Error::from_raw_os_error(libc::EEXIST)),
        })
    }

    /// Open and attach in one step, requesting removal right away when
    /// `config.remove_after_attach` is set.
    pub fn open_attached(key: Key, size: usize, config: &SegmentConfig) -> Result<Self> {
        let mut handle = Self::open(key, size, config)?;
        if config.remove_after_attach {
            handle.attach_and_remove()?;
        } else {
            handle.attach()?;
        }
        Ok(handle)
    }

    const fn new(key: Key, id: i32, size: usize) -> Self {
        Self {
            key,
            id,
            size,
            view: None,
            removed: false,
        }
    }

    /// Map the segment into this process at an address chosen by the OS.
    ///
    /// Attaching an attached handle keeps the existing mapping. On failure
    /// the handle stays unattached.
    pub fn attach(&mut self) -> Result<()> {
        if let Some(view) = &self.view {
            debug!(id = self.id, addr = ?view.base_address(), "segment already attached");
            return Ok(());
        }

        let view = MappedView::attach(self.id, self.size).map_err(|source| {
            ShmError::AttachFailed {
                id: self.id,
                source,
            }
        })?;

        debug!(id = self.id, addr = ?view.base_address(), len = view.len(), "attached segment");
        self.view = Some(view);
        Ok(())
    }

    /// Attach, then immediately request removal so the segment is
    /// destroyed when the last attacher detaches.
    ///
    /// If the removal is rejected the handle stays attached.
    pub fn attach_and_remove(&mut self) -> Result<Removal> {
        self.attach()?;
        self.remove()
    }

    /// Unmap the segment from this process.
    ///
    /// A handle that is not attached detaches as a no-op. On failure the
    /// mapping stays valid.
    pub fn detach(&mut self) -> Result<()> {
        let Some(view) = self.view.take() else {
            return Ok(());
        };

        match view.detach() {
            Ok(()) => {
                debug!(id = self.id, "detached segment");
                Ok(())
            }
            Err((view, source)) => {
                self.view = Some(view);
                Err(ShmError::DetachFailed {
                    id: self.id,
                    source,
                })
            }
        }
    }

    /// Request destruction of the segment once every attachment is gone.
    ///
    /// This never destroys memory that is still attached anywhere and
    /// never zeroes it; scrub sensitive bytes before calling. A segment
    /// that no longer exists, or a repeated call on this handle, yields
    /// [`Removal::AlreadyGone`].
    pub fn remove(&mut self) -> Result<Removal> {
        // The kernel may hand this id to a new segment after destruction.
        if self.removed {
            return Ok(Removal::AlreadyGone);
        }

        match sys::shm_remove(self.id) {
            Ok(()) => {
                self.removed = true;
                debug!(id = self.id, key = %self.key, "segment marked for removal");
                Ok(Removal::Marked)
            }
            Err(e) if matches!(e.raw_os_error(), Some(libc::EINVAL | libc::EIDRM)) => {
                self.removed = true;
                debug!(id = self.id, "segment already removed: {e}");
                Ok(Removal::AlreadyGone)
            }
            Err(source) => {
                warn!(id = self.id, "remove rejected: {source}");
                Err(ShmError::RemoveFailed {
                    id: self.id,
                    source,
                })
            }
        }
    }

    /// Read the kernel's bookkeeping for this segment.
    pub fn stat(&self) -> Result<SegmentStatus> {
        let ds = sys::shm_stat(self.id).map_err(|source| ShmError::StatFailed {
            id: self.id,
            source,
        })?;
        Ok(SegmentStatus::from_raw(&ds))
    }

    /// Key used to create or locate the segment.
    pub const fn key(&self) -> Key {
        self.key
    }

    /// Kernel segment identifier, shared by every handle on the segment.
    pub const fn id(&self) -> i32 {
        self.id
    }

    /// Requested size in bytes.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// True while a mapping is held.
    pub const fn is_attached(&self) -> bool {
        self.view.is_some()
    }

    /// Process-local base address of the mapping, if attached.
    pub fn base_address(&self) -> Option<NonNull<u8>> {
        self.view.as_ref().map(MappedView::base_address)
    }

    /// The mapping, if attached.
    pub const fn view(&self) -> Option<&MappedView> {
        self.view.as_ref()
    }

    /// Shared bytes of the segment.
    pub fn as_slice(&self) -> Result<&[u8]> {
        self.view
            .as_ref()
            .map(MappedView::as_slice)
            .ok_or(ShmError::NotAttached { id: self.id })
    }

    /// Mutable bytes of the segment.
    ///
    /// Other processes may write the same bytes concurrently; arbitrate
    /// with an external lock if that matters.
    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        let id = self.id;
        self.view
            .as_mut()
            .map(MappedView::as_mut_slice)
            .ok_or(ShmError::NotAttached { id })
    }
}

fn check_size(key: Key, size: usize) -> Result<()> {
    if size == 0 {
        return Err(ShmError::SegmentUnavailable {
            key,
            size,
            source: io::Error::new(io::ErrorKind::InvalidInput, "segment size must be non-zero"),
        });
    }
    Ok(())
}
