// src/core/continuation/readiness.rs

//! A per-request readiness descriptor.
//!
//! The completion writes to it after the latch is signaled, so a dispatcher
//! watching the descriptor re-invokes the handler only once the outcome is
//! already in place. On Linux this is an eventfd; elsewhere a non-blocking pipe.

use crate::core::BridgeError;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

#[derive(Debug)]
pub struct ReadinessFd {
    read: OwnedFd,
    #[cfg(not(target_os = "linux"))]
    write: OwnedFd,
}

impl ReadinessFd {
    /// Creates a fresh, unsignaled descriptor.
    #[cfg(target_os = "linux")]
    pub fn new() -> Result<Self, BridgeError> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(BridgeError::AllocationFailure(format!(
                "eventfd: {}",
                io::Error::last_os_error()
            )));
        }
        // SAFETY: `fd` was just returned by eventfd and is owned by nobody else.
        let read = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { read })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn new() -> Result<Self, BridgeError> {
        let mut fds = [0 as libc::c_int; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(BridgeError::AllocationFailure(format!(
                "pipe: {}",
                io::Error::last_os_error()
            )));
        }
        // SAFETY: both descriptors were just returned by pipe.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        for fd in [read.as_raw_fd(), write.as_raw_fd()] {
            unsafe {
                libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK);
                libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
            }
        }
        Ok(Self { read, write })
    }

    /// The descriptor a dispatcher should watch for readability.
    pub fn raw_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    /// Makes the descriptor readable. Repeated signals coalesce.
    pub fn signal(&self) -> io::Result<()> {
        #[cfg(target_os = "linux")]
        let ret = {
            let val: u64 = 1;
            unsafe {
                libc::write(
                    self.read.as_raw_fd(),
                    &val as *const u64 as *const libc::c_void,
                    std::mem::size_of::<u64>(),
                )
            }
        };
        #[cfg(not(target_os = "linux"))]
        let ret = {
            let byte: u8 = 1;
            unsafe { libc::write(self.write.as_raw_fd(), &byte as *const u8 as *const libc::c_void, 1) }
        };

        if ret < 0 {
            let err = io::Error::last_os_error();
            // EAGAIN means a signal is already pending.
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }
}

/// Waits until `fd` is readable or `timeout` elapses (`None` waits forever).
/// Returns whether the descriptor became readable.
pub fn poll_readable(fd: RawFd, timeout: Option<Duration>) -> io::Result<bool> {
    let timeout_ms = match timeout {
        None => -1,
        Some(t) => {
            // Round up so sub-millisecond timeouts still wait.
            let ms = t.as_millis() + u128::from(t.subsec_nanos() % 1_000_000 != 0);
            libc::c_int::try_from(ms).unwrap_or(libc::c_int::MAX)
        }
    };
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    loop {
        let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(ret > 0 && (pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR)) != 0);
    }
}
