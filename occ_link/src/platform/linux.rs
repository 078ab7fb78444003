//! Linux-specific device operations

use crate::error::{LinkError, LinkResult};
use memmap2::{Mmap, MmapMut, MmapOptions};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::stat::{Mode, SFlag, stat};
use nix::unistd::mkfifo;
use std::fs::File;
use std::os::fd::AsFd;
use std::path::Path;
use std::time::Duration;

/// System page size in bytes
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { 4096 }
}

fn poll_timeout(timeout: Option<Duration>) -> PollTimeout {
    match timeout {
        None => PollTimeout::NONE,
        Some(t) => {
            let ms = t.as_millis().min(i32::MAX as u128) as i32;
            PollTimeout::try_from(ms).unwrap_or(PollTimeout::MAX)
        }
    }
}

/// Block until `fd` is readable.
///
/// `None` waits forever. Fails with `Timeout` when nothing arrived in
/// time and `ConnectionReset` when the descriptor reports an error.
pub fn poll_readable<F: AsFd>(fd: &F, timeout: Option<Duration>) -> LinkResult<()> {
    let mut fds = [PollFd::new(fd.as_fd(), PollFlags::POLLIN)];
    let ready = loop {
        match poll(&mut fds, poll_timeout(timeout)) {
            Err(nix::Error::EINTR) => continue,
            other => break other?,
        }
    };
    if ready == 0 {
        return Err(LinkError::Timeout);
    }
    let revents = fds[0].revents().unwrap_or(PollFlags::empty());
    if revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
        return Err(LinkError::ConnectionReset);
    }
    Ok(())
}

/// Make sure `path` is a FIFO, creating it with `mode` when missing
pub fn ensure_fifo(path: &Path, mode: u32) -> LinkResult<()> {
    match stat(path) {
        Ok(st) => {
            if SFlag::from_bits_truncate(st.st_mode & SFlag::S_IFMT.bits()) != SFlag::S_IFIFO {
                return Err(LinkError::InvalidArgument {
                    reason: format!("{} exists and is not a FIFO", path.display()),
                });
            }
            Ok(())
        }
        Err(nix::Error::ENOENT) => {
            mkfifo(path, Mode::from_bits_truncate(mode)).map_err(|e| {
                LinkError::from_errno(e, &format!("mkfifo {}", path.display()))
            })?;
            tracing::debug!("Created FIFO {}", path.display());
            Ok(())
        }
        Err(e) => Err(LinkError::from_errno(e, &path.display().to_string())),
    }
}

/// Map a read-only device region
pub fn map_readonly(file: &File, offset: u64, len: usize) -> LinkResult<Mmap> {
    // SAFETY: the region is owned by the driver for the lifetime of the
    // file; it is only read through the returned mapping.
    let map = unsafe { MmapOptions::new().offset(offset).len(len).map(file) };
    map.map_err(|e| LinkError::OutOfMemory {
        what: format!("mapping {len} bytes at offset {offset:#x}: {e}"),
    })
}

/// Map a read-write device region
pub fn map_readwrite(file: &File, offset: u64, len: usize) -> LinkResult<MmapMut> {
    // SAFETY: register windows are plain device memory without Rust
    // aliasing; all access goes through volatile word reads and writes.
    let map = unsafe { MmapOptions::new().offset(offset).len(len).map_mut(file) };
    map.map_err(|e| LinkError::OutOfMemory {
        what: format!("mapping {len} bytes at offset {offset:#x}: {e}"),
    })
}
