//! Hardware backend talking to the link adapter driver.
//!
//! The driver multiplexes its commands over `pread`/`pwrite` offsets and
//! exposes the receive DMA region and register windows through `mmap`.

use super::status::{OccStatus, RawBoardStatus, StatusFlags};
use super::{Interface, LinkControl, Transport};
use crate::error::{LinkError, LinkResult};
use crate::platform::{map_readonly, map_readwrite, page_size, poll_readable};
use crate::ring::{RingIndex, Window};
use memmap2::{Mmap, MmapMut};
use occ::consts::{PACKET_MAX_LENGTH, align_down};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Number of register windows the board exposes.
pub const BAR_COUNT: usize = 3;

/// Driver protocol version this library speaks.
pub const DRIVER_VERSION: (u32, u32) = (1, 8);

/// Driver command offsets for `pread`/`pwrite`.
mod command {
    pub const RX: u64 = 1;
    pub const VERSION: u64 = 2;
    pub const GET_STATUS: u64 = 3;
    pub const OLD_PKTS_EN: u64 = 5;
    pub const TX: u64 = 9;
    pub const ADVANCE_DQ: u64 = 10;
    pub const RESET: u64 = 11;
    pub const RX_ENABLE: u64 = 12;
    pub const ERR_PKTS_EN: u64 = 13;
}

/// Page index of the receive DMA region in the mmap space.
const DMA_PAGE: u64 = 6;

/// State shared between the receive half and all control clones.
pub struct HardwareShared {
    file: File,
    path: String,
    bars: Mutex<[Option<MmapMut>; BAR_COUNT]>,
}

/// Receive half of a hardware handle.
pub struct HardwareRx {
    shared: Arc<HardwareShared>,
    interface: Interface,
    dma: Mmap,
    consumer: usize,
    window: usize,
    rollover: Box<[u8]>,
}

pub(crate) fn open(
    path: &str,
    interface: Interface,
    debug: bool,
) -> LinkResult<(HardwareRx, Arc<HardwareShared>)> {
    if interface == Interface::Socket {
        return Err(LinkError::InvalidArgument {
            reason: "socket interface requires the socket backend".to_string(),
        });
    }

    let mut options = OpenOptions::new();
    options.read(true).write(true);
    if !debug {
        options.custom_flags(libc::O_EXCL);
    }
    let file = options.open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => LinkError::NotFound {
            path: path.to_string(),
        },
        _ => LinkError::from(e),
    })?;

    let shared = Arc::new(HardwareShared {
        file,
        path: path.to_string(),
        bars: Mutex::new([None, None, None]),
    });
    shared.check_version()?;

    let raw = shared.read_status()?;
    let dma = map_readonly(
        &shared.file,
        DMA_PAGE * page_size() as u64,
        raw.dq_size as usize,
    )?;
    debug!("Mapped {} byte DMA region of {}", dma.len(), path);

    let mut rx = HardwareRx {
        shared: Arc::clone(&shared),
        interface,
        dma,
        consumer: 0,
        window: 0,
        rollover: vec![0u8; PACKET_MAX_LENGTH].into_boxed_slice(),
    };
    if !debug {
        rx.reset()?;
    }
    Ok((rx, shared))
}

impl HardwareShared {
    fn check_version(&self) -> LinkResult<()> {
        let mut buf = [0u8; 8];
        let read = self.file.read_at(&mut buf, command::VERSION).unwrap_or(0);
        let major = u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let minor = u32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if read != buf.len() || (major, minor) != DRIVER_VERSION {
            return Err(LinkError::VersionMismatch {
                expected: format!("{}.{}", DRIVER_VERSION.0, DRIVER_VERSION.1),
                found: if read == buf.len() {
                    format!("{major}.{minor}")
                } else {
                    "unknown".to_string()
                },
            });
        }
        Ok(())
    }

    fn read_status(&self) -> LinkResult<RawBoardStatus> {
        let mut buf = [0u8; RawBoardStatus::SIZE];
        let read = self.file.read_at(&mut buf, command::GET_STATUS)?;
        if read != buf.len() {
            return Err(LinkError::NoData);
        }
        let raw = RawBoardStatus::from_bytes(&buf).ok_or(LinkError::NoData)?;
        if raw.ocb_ver != RawBoardStatus::VERSION {
            return Err(LinkError::VersionMismatch {
                expected: RawBoardStatus::VERSION.to_string(),
                found: raw.ocb_ver.to_string(),
            });
        }
        Ok(raw)
    }

    fn write_command(&self, cmd: u64, value: u32) -> LinkResult<()> {
        self.file.write_at(&value.to_ne_bytes(), cmd)?;
        Ok(())
    }

    fn with_bar<T>(
        &self,
        bar: usize,
        offset: usize,
        count: usize,
        f: impl FnOnce(*mut u8) -> T,
    ) -> LinkResult<T> {
        let mut bars = self.bars.lock();
        let slot = bars.get_mut(bar).ok_or_else(|| LinkError::Unsupported {
            what: format!("BAR{bar}"),
        })?;
        if slot.is_none() {
            let size = self.read_status()?.bars[bar] as usize;
            if size == 0 {
                return Err(LinkError::Unsupported {
                    what: format!("BAR{bar} not present"),
                });
            }
            let map = map_readwrite(&self.file, (bar * page_size()) as u64, size)?;
            debug!("Mapped BAR{} of {} ({} bytes)", bar, self.path, size);
            *slot = Some(map);
        }
        let Some(map) = slot.as_mut() else {
            return Err(LinkError::Unsupported {
                what: format!("BAR{bar}"),
            });
        };
        register_span(offset, count, map.len())?;
        // SAFETY: offset + count words lies inside the mapping, checked above.
        let base = unsafe { map.as_mut_ptr().add(offset) };
        Ok(f(base))
    }
}

impl LinkControl for HardwareShared {
    fn send(&self, data: &[u8]) -> LinkResult<usize> {
        if data.len() % 4 != 0 {
            return Err(LinkError::InvalidArgument {
                reason: format!("send length {} is not 4-byte aligned", data.len()),
            });
        }
        let sent = self.file.write_at(data, command::TX)?;
        trace!("Sent {} bytes", sent);
        Ok(sent)
    }

    fn status(&self) -> LinkResult<OccStatus> {
        Ok(OccStatus::from(&self.read_status()?))
    }

    fn register_read(&self, bar: usize, offset: usize, out: &mut [u32]) -> LinkResult<()> {
        self.with_bar(bar, offset, out.len(), |base| {
            for (i, word) in out.iter_mut().enumerate() {
                // SAFETY: base is 4-byte aligned (page aligned mapping and
                // aligned offset) and in bounds for out.len() words.
                *word = unsafe { std::ptr::read_volatile(base.cast::<u32>().add(i)) };
            }
        })
    }

    fn register_write(&self, bar: usize, offset: usize, data: &[u32]) -> LinkResult<()> {
        self.with_bar(bar, offset, data.len(), |base| {
            for (i, word) in data.iter().enumerate() {
                // SAFETY: see register_read.
                unsafe { std::ptr::write_volatile(base.cast::<u32>().add(i), *word) };
            }
        })
    }
}

impl HardwareRx {
    /// Contiguous window starting at the consumer offset, as
    /// `(rolled over, length)`.
    fn assemble(&mut self, producer: usize) -> (bool, usize) {
        let index = RingIndex {
            size: self.dma.len(),
            producer,
            consumer: self.consumer,
        };
        match index.window(self.rollover.len()) {
            Window::Direct { len, .. } => (false, len),
            Window::Rollover { head, tail } => {
                self.rollover[..head].copy_from_slice(&self.dma[self.consumer..]);
                self.rollover[head..head + tail].copy_from_slice(&self.dma[..tail]);
                (true, head + tail)
            }
        }
    }
}

impl Transport for HardwareRx {
    fn reset(&mut self) -> LinkResult<()> {
        let code = match self.interface {
            Interface::Lvds => 0,
            Interface::Optical | Interface::Socket => 1,
        };
        self.shared.write_command(command::RESET, code)?;
        // Clears the reset-occurred flag.
        self.shared.read_status()?;
        self.consumer = 0;
        self.window = 0;
        debug!("Reset {} ({:?})", self.shared.path, self.interface);
        Ok(())
    }

    fn enable_receive(&mut self, enable: bool) -> LinkResult<()> {
        self.shared.write_command(command::RX_ENABLE, u32::from(enable))
    }

    fn wait_for_data(&mut self, timeout: Option<Duration>) -> LinkResult<&[u8]> {
        if self.dma.is_empty() {
            return Err(LinkError::Unsupported {
                what: "receive DMA region".to_string(),
            });
        }
        loop {
            poll_readable(&self.shared.file, timeout)?;

            let mut info = [0u8; 8];
            let read = self.shared.file.read_at(&mut info, command::RX)?;
            if read != info.len() {
                return Err(LinkError::NoData);
            }
            let producer = u32::from_ne_bytes([info[0], info[1], info[2], info[3]]) as usize;
            let flags =
                StatusFlags::from_bits_retain(u32::from_ne_bytes([info[4], info[5], info[6], info[7]]));

            if !flags.contains(StatusFlags::RX_MSG) {
                if flags.contains(StatusFlags::RESET_OCCURRED) {
                    return Err(LinkError::ConnectionReset);
                }
                if flags.contains(StatusFlags::DMA_STALLED) {
                    return Err(LinkError::Stall);
                }
                if flags.contains(StatusFlags::FIFO_OVERFLOW) {
                    return Err(LinkError::Overflow);
                }
                continue;
            }

            let (rolled, len) = self.assemble(producer % self.dma.len());
            let len = align_down(len);
            if len == 0 {
                continue;
            }
            self.window = len;
            return Ok(if rolled {
                &self.rollover[..len]
            } else {
                &self.dma[self.consumer..self.consumer + len]
            });
        }
    }

    fn acknowledge(&mut self, len: usize) -> LinkResult<()> {
        if len % 4 != 0 {
            return Err(LinkError::InvalidArgument {
                reason: format!("acknowledge length {len} is not 4-byte aligned"),
            });
        }
        let len = if len > self.window {
            warn!("Acknowledging {} bytes of a {} byte window", len, self.window);
            self.window
        } else {
            len
        };
        if len == 0 {
            return Ok(());
        }
        self.shared.write_command(command::ADVANCE_DQ, len as u32)?;
        self.consumer = (self.consumer + len) % self.dma.len();
        self.window -= len;
        Ok(())
    }

    fn enable_error_packets(&mut self, enable: bool) -> LinkResult<()> {
        self.shared.write_command(command::ERR_PKTS_EN, u32::from(enable))
    }

    fn enable_old_packets(&mut self, enable: bool) -> LinkResult<()> {
        self.shared.write_command(command::OLD_PKTS_EN, u32::from(enable))
    }
}

/// End of a `count` word access at byte `offset`, if it fits in `len`
/// bytes.
fn register_span(offset: usize, count: usize, len: usize) -> LinkResult<usize> {
    count
        .checked_mul(4)
        .and_then(|bytes| offset.checked_add(bytes))
        .filter(|end| *end <= len)
        .ok_or(LinkError::Overflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_span_bounds() {
        assert_eq!(register_span(0, 4, 16).ok(), Some(16));
        assert_eq!(register_span(12, 1, 16).ok(), Some(16));
        assert!(matches!(register_span(12, 2, 16), Err(LinkError::Overflow)));
        assert!(matches!(
            register_span(usize::MAX - 3, 1, 4096),
            Err(LinkError::Overflow)
        ));
        assert!(matches!(
            register_span(0, usize::MAX / 2, 4096),
            Err(LinkError::Overflow)
        ));
    }

    #[test]
    fn socket_interface_is_rejected() {
        assert!(matches!(
            open("/dev/null", Interface::Socket, false),
            Err(LinkError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn plain_file_fails_version_check() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        assert!(matches!(
            open(&path, Interface::Optical, true),
            Err(LinkError::VersionMismatch { .. })
        ));
    }
}
