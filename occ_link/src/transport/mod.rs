//! Transport handle over the link adapter and its simulators.
//!
//! A handle is split in two halves:
//!
//! - the receive half ([`OccHandle`], [`Transport`]) is owned by exactly
//!   one reader, typically a ring buffer or a copier thread;
//! - the control half ([`OccControl`], [`LinkControl`]) is cheap to clone
//!   and may be used from any thread to send commands, query status and
//!   access registers.
//!
//! The backend is picked at open time from [`LinkKind`]:
//!
//! | kind       | device string            | byte source            |
//! |------------|--------------------------|------------------------|
//! | `hardware` | `/dev/snsocb0`           | driver DMA region      |
//! | `pipe`     | `"<rx-fifo>,<tx-fifo>"`  | named pipes            |
//! | `socket`   | `"<host>:<port>"`        | single TCP client      |

pub mod hardware;
pub mod pipe;
pub mod socket;
pub mod status;

use crate::error::{LinkError, LinkResult};
use occ::consts::align_down;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info};

pub use occ::config::{Interface, LinkKind};
pub use status::{BoardType, OccStatus, StatusFlags};

/// Receive side operations shared by all backends.
pub trait Transport: Send {
    /// Reset the link, dropping any partially received data. Receive is
    /// disabled afterwards.
    fn reset(&mut self) -> LinkResult<()>;

    /// Turn packet reception on or off.
    fn enable_receive(&mut self, enable: bool) -> LinkResult<()>;

    /// Block until data is available and return the contiguous window of
    /// unacknowledged bytes. `None` waits forever.
    fn wait_for_data(&mut self, timeout: Option<Duration>) -> LinkResult<&[u8]>;

    /// Release `len` bytes from the start of the last returned window.
    fn acknowledge(&mut self, len: usize) -> LinkResult<()>;

    /// Copy up to `buf.len()` bytes into `buf`, acknowledging what was
    /// copied.
    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> LinkResult<usize> {
        let data = self.wait_for_data(timeout)?;
        let count = align_down(data.len().min(buf.len()));
        buf[..count].copy_from_slice(&data[..count]);
        self.acknowledge(count)?;
        Ok(count)
    }

    /// Pass packets with link errors to the receive queue.
    fn enable_error_packets(&mut self, _enable: bool) -> LinkResult<()> {
        Err(LinkError::Unsupported {
            what: "error packet reception".to_string(),
        })
    }

    /// Keep packets received before the last reset.
    fn enable_old_packets(&mut self, _enable: bool) -> LinkResult<()> {
        Err(LinkError::Unsupported {
            what: "old packet reception".to_string(),
        })
    }
}

/// Thread-safe control operations shared by all backends.
pub trait LinkControl: Send + Sync {
    /// Transmit raw packet bytes, returning how many were sent.
    fn send(&self, data: &[u8]) -> LinkResult<usize>;

    /// Query board status.
    fn status(&self) -> LinkResult<OccStatus>;

    /// Read `out.len()` words from register window `bar` at byte `offset`.
    fn register_read(&self, bar: usize, offset: usize, out: &mut [u32]) -> LinkResult<()>;

    /// Write `data` to register window `bar` at byte `offset`.
    fn register_write(&self, bar: usize, offset: usize, data: &[u32]) -> LinkResult<()>;
}

pub(crate) fn check_register_args(bar: usize, offset: usize) -> LinkResult<()> {
    if offset % 4 != 0 {
        return Err(LinkError::InvalidArgument {
            reason: format!("register offset {offset:#x} is not 4-byte aligned"),
        });
    }
    if bar >= hardware::BAR_COUNT {
        return Err(LinkError::Unsupported {
            what: format!("BAR{bar}"),
        });
    }
    Ok(())
}

enum Backend {
    Hardware(hardware::HardwareRx),
    Pipe(pipe::PipeRx),
    Socket(socket::SocketRx),
}

#[derive(Clone)]
enum ControlBackend {
    Hardware(std::sync::Arc<hardware::HardwareShared>),
    Pipe(std::sync::Arc<pipe::PipeShared>),
    Socket(std::sync::Arc<socket::SocketShared>),
}

/// Cloneable control half of a transport handle.
#[derive(Clone)]
pub struct OccControl {
    backend: ControlBackend,
    debug: bool,
}

impl OccControl {
    fn inner(&self) -> &dyn LinkControl {
        match &self.backend {
            ControlBackend::Hardware(hw) => hw.as_ref(),
            ControlBackend::Pipe(pipe) => pipe.as_ref(),
            ControlBackend::Socket(sock) => sock.as_ref(),
        }
    }
}

impl LinkControl for OccControl {
    fn send(&self, data: &[u8]) -> LinkResult<usize> {
        if self.debug {
            return Err(LinkError::Restricted { operation: "send" });
        }
        self.inner().send(data)
    }

    fn status(&self) -> LinkResult<OccStatus> {
        self.inner().status()
    }

    fn register_read(&self, bar: usize, offset: usize, out: &mut [u32]) -> LinkResult<()> {
        check_register_args(bar, offset)?;
        self.inner().register_read(bar, offset, out)
    }

    fn register_write(&self, bar: usize, offset: usize, data: &[u32]) -> LinkResult<()> {
        check_register_args(bar, offset)?;
        self.inner().register_write(bar, offset, data)
    }
}

/// Transport handle. Owns the receive half of one backend.
pub struct OccHandle {
    backend: Backend,
    control: OccControl,
    kind: LinkKind,
    debug: bool,
    rx_enabled: bool,
}

impl OccHandle {
    /// Open the device exclusively and reset it.
    ///
    /// Only one regular handle may be open per device.
    pub fn open(device: &str, kind: LinkKind, interface: Interface) -> LinkResult<Self> {
        let handle = match kind {
            LinkKind::Hardware => {
                let (rx, shared) = hardware::open(device, interface, false)?;
                Self::assemble(Backend::Hardware(rx), ControlBackend::Hardware(shared), kind, false)
            }
            LinkKind::Pipe => {
                let (rx, shared) = pipe::open(device)?;
                Self::assemble(Backend::Pipe(rx), ControlBackend::Pipe(shared), kind, false)
            }
            LinkKind::Socket => {
                let (rx, shared) = socket::open(device)?;
                Self::assemble(Backend::Socket(rx), ControlBackend::Socket(shared), kind, false)
            }
        };
        info!("Opened {:?} link {}", kind, device);
        Ok(handle)
    }

    /// Open a restricted handle next to a regular one, without resetting
    /// the device.
    ///
    /// Only status, reset, register access, waiting for and reading data
    /// are permitted. Simulators do not support debug handles.
    pub fn open_debug(device: &str, kind: LinkKind) -> LinkResult<Self> {
        match kind {
            LinkKind::Hardware => {
                let (rx, shared) = hardware::open(device, Interface::Optical, true)?;
                debug!("Opened debug handle on {}", device);
                Ok(Self::assemble(
                    Backend::Hardware(rx),
                    ControlBackend::Hardware(shared),
                    kind,
                    true,
                ))
            }
            LinkKind::Pipe | LinkKind::Socket => Err(LinkError::Unsupported {
                what: format!("debug handle on {kind:?} simulator"),
            }),
        }
    }

    fn assemble(backend: Backend, control: ControlBackend, kind: LinkKind, debug: bool) -> Self {
        Self {
            backend,
            control: OccControl {
                backend: control,
                debug,
            },
            kind,
            debug,
            rx_enabled: false,
        }
    }

    /// Close the handle, releasing the device.
    pub fn close(self) -> LinkResult<()> {
        debug!("Closing {:?} link", self.kind);
        Ok(())
    }

    /// Control half, usable from other threads.
    pub fn control(&self) -> OccControl {
        self.control.clone()
    }

    /// Backend kind.
    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    /// True for a restricted debug handle.
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Whether receive is currently enabled through this handle.
    pub fn rx_enabled(&self) -> bool {
        self.rx_enabled
    }

    /// Listening address of a socket simulator.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.backend {
            Backend::Socket(rx) => rx.local_addr(),
            _ => None,
        }
    }

    /// Transmit raw packet bytes.
    pub fn send(&self, data: &[u8]) -> LinkResult<usize> {
        self.control.send(data)
    }

    /// Query board status.
    pub fn status(&self) -> LinkResult<OccStatus> {
        self.control.status()
    }

    fn rx(&mut self) -> &mut dyn Transport {
        match &mut self.backend {
            Backend::Hardware(rx) => rx,
            Backend::Pipe(rx) => rx,
            Backend::Socket(rx) => rx,
        }
    }

    fn restrict(&self, operation: &'static str) -> LinkResult<()> {
        if self.debug {
            Err(LinkError::Restricted { operation })
        } else {
            Ok(())
        }
    }
}

impl Transport for OccHandle {
    fn reset(&mut self) -> LinkResult<()> {
        self.rx().reset()?;
        self.rx_enabled = false;
        Ok(())
    }

    fn enable_receive(&mut self, enable: bool) -> LinkResult<()> {
        self.restrict("enable_receive")?;
        if enable && !self.rx_enabled {
            // Resuming must not start in the middle of a packet.
            self.reset()?;
        }
        self.rx().enable_receive(enable)?;
        self.rx_enabled = enable;
        Ok(())
    }

    fn wait_for_data(&mut self, timeout: Option<Duration>) -> LinkResult<&[u8]> {
        self.rx().wait_for_data(timeout)
    }

    fn acknowledge(&mut self, len: usize) -> LinkResult<()> {
        self.restrict("acknowledge")?;
        self.rx().acknowledge(len)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> LinkResult<usize> {
        if !self.debug {
            return self.rx().read(buf, timeout);
        }
        // Debug readers peek without consuming.
        let data = self.rx().wait_for_data(timeout)?;
        let count = align_down(data.len().min(buf.len()));
        buf[..count].copy_from_slice(&data[..count]);
        Ok(count)
    }

    fn enable_error_packets(&mut self, enable: bool) -> LinkResult<()> {
        self.restrict("enable_error_packets")?;
        self.rx().enable_error_packets(enable)
    }

    fn enable_old_packets(&mut self, enable: bool) -> LinkResult<()> {
        self.restrict("enable_old_packets")?;
        self.rx().enable_old_packets(enable)
    }
}

impl LinkControl for OccHandle {
    fn send(&self, data: &[u8]) -> LinkResult<usize> {
        self.control.send(data)
    }

    fn status(&self) -> LinkResult<OccStatus> {
        self.control.status()
    }

    fn register_read(&self, bar: usize, offset: usize, out: &mut [u32]) -> LinkResult<()> {
        self.control.register_read(bar, offset, out)
    }

    fn register_write(&self, bar: usize, offset: usize, data: &[u32]) -> LinkResult<()> {
        self.control.register_write(bar, offset, data)
    }
}
