// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Anonymous shared memory mapped into the controller and one worker.

use std::ffi::CString;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr::NonNull;

use crate::core::{Result, WorkerError};

/// A mapped memfd (Linux) or unlinked POSIX shm object (elsewhere).
///
/// The descriptor is close-on-exec; [`inherit_into_child`](Self::inherit_into_child)
/// clears that flag in a forked child so the worker can map the same pages.
pub struct SharedSegment {
    fd: OwnedFd,
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is plain shared memory. All access to its bytes goes
// through `SharedFrameBuffer`, which serializes it with a lock.
unsafe impl Send for SharedSegment {}
unsafe impl Sync for SharedSegment {}

impl SharedSegment {
    pub fn create(name: &str, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(WorkerError::Configuration(
                "frame buffer size must be greater than 0".into(),
            ));
        }
        let cname = CString::new(name)
            .map_err(|e| WorkerError::Configuration(format!("invalid segment name: {}", e)))?;

        let fd = create_fd(&cname)?;
        // SAFETY: `fd` is a valid descriptor we own.
        if unsafe { libc::ftruncate(fd.as_raw_fd(), len as libc::off_t) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        // SAFETY: freshly created descriptor sized to `len`.
        unsafe { Self::map(fd, len) }
    }

    /// Map a segment created by another process.
    ///
    /// # Safety
    ///
    /// `fd` must be an open shared memory descriptor at least `len` bytes
    /// long that no one else will close.
    pub unsafe fn from_raw_fd(fd: RawFd, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(WorkerError::Configuration(
                "frame buffer size must be greater than 0".into(),
            ));
        }
        // SAFETY: guaranteed by the caller.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        // SAFETY: guaranteed by the caller.
        unsafe { Self::map(fd, len) }
    }

    unsafe fn map(fd: OwnedFd, len: usize) -> Result<Self> {
        // SAFETY: mapping a shared, readable and writable region of a valid fd.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error().into());
        }
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| WorkerError::Configuration("mmap returned null".into()))?;

        Ok(Self { fd, ptr, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Clear close-on-exec on `fd`. Meant for `CommandExt::pre_exec`, where
    /// only async-signal-safe calls are allowed.
    pub fn inherit_into_child(fd: RawFd) -> std::io::Result<()> {
        // SAFETY: fcntl on a descriptor number is async-signal-safe.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }
        // SAFETY: as above.
        if unsafe { libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    pub(super) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` describe the mapping created in `map`.
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

#[cfg(target_os = "linux")]
fn create_fd(name: &CString) -> Result<OwnedFd> {
    // SAFETY: valid NUL-terminated name; flags are a constant.
    let fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    // SAFETY: `fd` was just returned by memfd_create.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

#[cfg(not(target_os = "linux"))]
fn create_fd(name: &CString) -> Result<OwnedFd> {
    let path = CString::new(format!("/{}", name.to_string_lossy()))
        .map_err(|e| WorkerError::Configuration(format!("invalid segment name: {}", e)))?;
    // SAFETY: valid NUL-terminated path.
    let fd = unsafe {
        libc::shm_open(
            path.as_ptr(),
            libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
            0o600 as libc::c_uint,
        )
    };
    if fd < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    // The descriptor keeps the object alive; the name is not needed.
    // SAFETY: same path as above.
    unsafe {
        libc::shm_unlink(path.as_ptr());
    }
    // SAFETY: `fd` was just returned by shm_open.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}
