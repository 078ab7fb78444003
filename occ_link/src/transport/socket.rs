//! TCP simulator backend.
//!
//! Listens on `"<host>:<port>"` and serves a single client at a time. The
//! client is accepted lazily by the first operation that needs it; when
//! it disconnects the next operation waits for a new one.

use super::pipe::remaining;
use super::status::OccStatus;
use super::{Interface, LinkControl, Transport};
use crate::error::{LinkError, LinkResult};
use crate::platform::poll_readable;
use occ::consts::{ALIGNMENT, PACKET_MAX_LENGTH};
use parking_lot::Mutex;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Receive buffer size of the socket simulator.
pub const SOCKET_BUFFER_SIZE: usize = 1000 * PACKET_MAX_LENGTH;

/// State shared between the receive half and all control clones.
pub struct SocketShared {
    listener: TcpListener,
    client: Mutex<Option<Arc<TcpStream>>>,
    rx_enabled: AtomicBool,
    buffered: AtomicUsize,
}

/// Receive half of a socket handle.
pub struct SocketRx {
    shared: Arc<SocketShared>,
    buf: Vec<u8>,
    len: usize,
}

pub(crate) fn open(device: &str) -> LinkResult<(SocketRx, Arc<SocketShared>)> {
    let listener = TcpListener::bind(device)?;
    listener.set_nonblocking(true)?;
    debug!("Socket simulator listening on {:?}", listener.local_addr().ok());

    let shared = Arc::new(SocketShared {
        listener,
        client: Mutex::new(None),
        rx_enabled: AtomicBool::new(false),
        buffered: AtomicUsize::new(0),
    });
    let rx = SocketRx {
        shared: Arc::clone(&shared),
        buf: Vec::new(),
        len: 0,
    };
    Ok((rx, shared))
}

impl SocketShared {
    /// Connected client, accepting a pending one if needed.
    fn client(&self) -> LinkResult<Arc<TcpStream>> {
        let mut client = self.client.lock();
        if let Some(stream) = client.as_ref() {
            return Ok(Arc::clone(stream));
        }
        match self.listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                stream.set_nodelay(true)?;
                info!("Simulator client connected from {}", peer);
                let stream = Arc::new(stream);
                *client = Some(Arc::clone(&stream));
                Ok(stream)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(LinkError::NotConnected),
            Err(e) => Err(e.into()),
        }
    }

    fn drop_client(&self) {
        if self.client.lock().take().is_some() {
            info!("Simulator client disconnected");
        }
    }
}

impl LinkControl for SocketShared {
    fn send(&self, data: &[u8]) -> LinkResult<usize> {
        let stream = self.client()?;
        if let Err(e) = (&*stream).write_all(data) {
            warn!("Send to simulator client failed: {}", e);
            self.drop_client();
            return Err(LinkError::ConnectionReset);
        }
        trace!("Sent {} bytes to socket", data.len());
        Ok(data.len())
    }

    fn status(&self) -> LinkResult<OccStatus> {
        Ok(OccStatus::simulator(
            Interface::Socket,
            self.rx_enabled.load(Ordering::Acquire),
            SOCKET_BUFFER_SIZE,
            self.buffered.load(Ordering::Relaxed),
        ))
    }

    fn register_read(&self, _bar: usize, _offset: usize, _out: &mut [u32]) -> LinkResult<()> {
        Err(LinkError::Unsupported {
            what: "register access on socket simulator".to_string(),
        })
    }

    fn register_write(&self, _bar: usize, _offset: usize, _data: &[u32]) -> LinkResult<()> {
        Err(LinkError::Unsupported {
            what: "register access on socket simulator".to_string(),
        })
    }
}

impl SocketRx {
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.listener.local_addr().ok()
    }

    fn connected(&self, deadline: Option<Instant>) -> LinkResult<Arc<TcpStream>> {
        if !self.shared.rx_enabled.load(Ordering::Acquire) {
            return Err(LinkError::NotConnected);
        }
        loop {
            match self.shared.client() {
                Ok(stream) => return Ok(stream),
                Err(LinkError::NotConnected) => {}
                Err(e) => return Err(e),
            }
            // A pending connection makes the listener readable.
            poll_readable(&self.shared.listener, remaining(deadline)?)?;
        }
    }
}

impl Transport for SocketRx {
    fn reset(&mut self) -> LinkResult<()> {
        self.shared.rx_enabled.store(false, Ordering::Release);
        self.len = 0;
        self.shared.buffered.store(0, Ordering::Relaxed);
        self.shared.drop_client();
        Ok(())
    }

    fn enable_receive(&mut self, enable: bool) -> LinkResult<()> {
        self.shared.rx_enabled.store(enable, Ordering::Release);
        Ok(())
    }

    fn wait_for_data(&mut self, timeout: Option<Duration>) -> LinkResult<&[u8]> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let stream = self.connected(deadline)?;
        if self.buf.is_empty() {
            self.buf.resize(SOCKET_BUFFER_SIZE, 0);
        }

        let mut polled = false;
        while self.len < self.buf.len() && !(polled && self.len >= ALIGNMENT) {
            let wait = if self.len >= ALIGNMENT {
                Some(Duration::ZERO)
            } else {
                remaining(deadline).unwrap_or(Some(Duration::ZERO))
            };
            match poll_readable(&*stream, wait) {
                Ok(()) => match (&*stream).read(&mut self.buf[self.len..]) {
                    Ok(0) | Err(_) => {
                        self.shared.drop_client();
                        return Err(LinkError::ConnectionReset);
                    }
                    Ok(read) => {
                        self.len += read;
                        self.shared.buffered.store(self.len, Ordering::Relaxed);
                    }
                },
                Err(LinkError::Timeout) if self.len >= ALIGNMENT => {}
                Err(LinkError::ConnectionReset) => {
                    self.shared.drop_client();
                    return Err(LinkError::ConnectionReset);
                }
                Err(e) => return Err(e),
            }
            polled = true;
        }
        Ok(&self.buf[..self.len])
    }

    fn acknowledge(&mut self, len: usize) -> LinkResult<()> {
        let len = len.min(self.len);
        self.buf.copy_within(len..self.len, 0);
        self.len -= len;
        self.shared.buffered.store(self.len, Ordering::Relaxed);
        Ok(())
    }
}
