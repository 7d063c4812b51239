//! Thin wrappers over the System V shared memory calls.
//!
//! Each wrapper performs exactly one syscall and converts the `-1`
//! sentinel into `std::io::Error::last_os_error()`. Nothing here keeps
//! state or retries.

use std::io;
use std::ptr::{self, NonNull};

use libc::{IPC_RMID, IPC_STAT, c_int, c_void, key_t, shmid_ds};

/// Linux marks a segment for destruction by setting this bit in
/// `shm_perm.mode` once `IPC_RMID` has been accepted.
#[cfg(target_os = "linux")]
pub const SHM_DEST: u32 = 0o1000;

/// `shmget(key, size, flags)`.
#[allow(unsafe_code)]
pub fn shmget(key: key_t, size: usize, flags: c_int) -> io::Result<c_int> {
    tracing::trace!(key, size, flags, "shmget");
    // SAFETY: shmget takes no pointers.
    let id = unsafe { libc::shmget(key, size, flags) };
    if id == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(id)
}

/// `shmat(id, NULL, 0)`: map the segment at an address chosen by the OS.
#[allow(unsafe_code)]
pub fn shmat(id: c_int) -> io::Result<NonNull<u8>> {
    tracing::trace!(id, "shmat");
    // SAFETY: a null address asks the kernel to pick a free range, so no
    // existing mapping of this process can be replaced.
    let addr = unsafe { libc::shmat(id, ptr::null(), 0) };
    if addr as isize == -1 {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(addr.cast::<u8>()).ok_or_else(|| io::Error::from_raw_os_error(libc::EFAULT))
}

/// `shmdt(addr)`.
///
/// # Safety
///
/// `addr` must be an address returned by [`shmat`] in this process, and no
/// reference into the mapping may be used after a successful return.
#[allow(unsafe_code)]
pub unsafe fn shmdt(addr: NonNull<u8>) -> io::Result<()> {
    tracing::trace!(addr = ?addr, "shmdt");
    // SAFETY: upheld by the caller.
    if unsafe { libc::shmdt(addr.as_ptr().cast::<c_void>().cast_const()) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// `shmctl(id, IPC_RMID, NULL)`.
#[allow(unsafe_code)]
pub fn shm_remove(id: c_int) -> io::Result<()> {
    tracing::trace!(id, "shmctl(IPC_RMID)");
    // SAFETY: IPC_RMID ignores the buffer argument.
    if unsafe { libc::shmctl(id, IPC_RMID, ptr::null_mut()) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// `shmctl(id, IPC_STAT, &mut ds)`.
#[allow(unsafe_code)]
pub fn shm_stat(id: c_int) -> io::Result<shmid_ds> {
    // SAFETY: shmid_ds is a plain C struct; all-zero is a valid value.
    let mut ds: shmid_ds = unsafe { std::mem::zeroed() };
    // SAFETY: ds is a valid, writable shmid_ds for the duration of the call.
    if unsafe { libc::shmctl(id, IPC_STAT, &raw mut ds) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(ds)
}

/// System page size, used to convert page counts into bytes.
#[allow(unsafe_code)]
pub fn page_size() -> usize {
    // SAFETY: sysconf has no memory safety requirements.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).unwrap_or(4096)
}
