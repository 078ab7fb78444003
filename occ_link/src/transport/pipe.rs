//! Named-pipe simulator backend.
//!
//! The device string is `"<rx-fifo>,<tx-fifo>"`. Both FIFOs are created
//! when missing and opened read-write so that neither side blocks waiting
//! for a peer.

use super::status::OccStatus;
use super::{Interface, LinkControl, Transport};
use crate::error::{LinkError, LinkResult};
use crate::platform::{ensure_fifo, poll_readable};
use occ::consts::{ALIGNMENT, PACKET_MAX_LENGTH};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Receive buffer size of the pipe simulator.
pub const PIPE_BUFFER_SIZE: usize = 16 * PACKET_MAX_LENGTH;

const RX_FIFO_MODE: u32 = 0o666;
const TX_FIFO_MODE: u32 = 0o644;

/// State shared between the receive half and all control clones.
pub struct PipeShared {
    tx: File,
    rx_enabled: AtomicBool,
    buffered: AtomicUsize,
}

/// Receive half of a pipe handle.
pub struct PipeRx {
    shared: Arc<PipeShared>,
    rx: File,
    buf: Box<[u8]>,
    len: usize,
}

fn split_device(device: &str) -> LinkResult<(&str, &str)> {
    match device.split_once(',') {
        Some((rx, tx)) if !rx.is_empty() && !tx.is_empty() => Ok((rx.trim(), tx.trim())),
        _ => Err(LinkError::InvalidArgument {
            reason: format!("pipe device must be \"<rx>,<tx>\", got \"{device}\""),
        }),
    }
}

fn open_fifo(path: &str, mode: u32) -> LinkResult<File> {
    ensure_fifo(Path::new(path), mode)?;
    Ok(OpenOptions::new().read(true).write(true).open(path)?)
}

pub(crate) fn open(device: &str) -> LinkResult<(PipeRx, Arc<PipeShared>)> {
    let (rx_path, tx_path) = split_device(device)?;
    let rx = open_fifo(rx_path, RX_FIFO_MODE)?;
    let tx = open_fifo(tx_path, TX_FIFO_MODE)?;
    debug!("Pipe simulator rx={} tx={}", rx_path, tx_path);

    let shared = Arc::new(PipeShared {
        tx,
        rx_enabled: AtomicBool::new(false),
        buffered: AtomicUsize::new(0),
    });
    let rx = PipeRx {
        shared: Arc::clone(&shared),
        rx,
        buf: vec![0u8; PIPE_BUFFER_SIZE].into_boxed_slice(),
        len: 0,
    };
    Ok((rx, shared))
}

/// Time left until `deadline`, failing once it passed.
pub(crate) fn remaining(deadline: Option<Instant>) -> LinkResult<Option<Duration>> {
    match deadline {
        None => Ok(None),
        Some(deadline) => {
            let now = Instant::now();
            if now >= deadline {
                Err(LinkError::Timeout)
            } else {
                Ok(Some(deadline - now))
            }
        }
    }
}

impl LinkControl for PipeShared {
    fn send(&self, data: &[u8]) -> LinkResult<usize> {
        (&self.tx).write_all(data)?;
        trace!("Sent {} bytes to pipe", data.len());
        Ok(data.len())
    }

    fn status(&self) -> LinkResult<OccStatus> {
        Ok(OccStatus::simulator(
            Interface::Optical,
            self.rx_enabled.load(Ordering::Acquire),
            PIPE_BUFFER_SIZE,
            self.buffered.load(Ordering::Relaxed),
        ))
    }

    fn register_read(&self, _bar: usize, _offset: usize, _out: &mut [u32]) -> LinkResult<()> {
        Err(LinkError::Unsupported {
            what: "register access on pipe simulator".to_string(),
        })
    }

    fn register_write(&self, _bar: usize, _offset: usize, _data: &[u32]) -> LinkResult<()> {
        Err(LinkError::Unsupported {
            what: "register access on pipe simulator".to_string(),
        })
    }
}

impl Transport for PipeRx {
    fn reset(&mut self) -> LinkResult<()> {
        self.shared.rx_enabled.store(false, Ordering::Release);
        self.len = 0;
        self.shared.buffered.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn enable_receive(&mut self, enable: bool) -> LinkResult<()> {
        self.shared.rx_enabled.store(enable, Ordering::Release);
        Ok(())
    }

    fn wait_for_data(&mut self, timeout: Option<Duration>) -> LinkResult<&[u8]> {
        // Only this half can enable receive, so waiting would never end.
        if !self.shared.rx_enabled.load(Ordering::Acquire) {
            return Err(LinkError::NotConnected);
        }
        let deadline = timeout.map(|t| Instant::now() + t);

        // Return at least one aligned word, topping up once without
        // blocking when enough is already buffered.
        let mut polled = false;
        while self.len < self.buf.len() && !(polled && self.len >= ALIGNMENT) {
            let wait = if self.len >= ALIGNMENT {
                Some(Duration::ZERO)
            } else {
                remaining(deadline).unwrap_or(Some(Duration::ZERO))
            };
            match poll_readable(&self.rx, wait) {
                Ok(()) => {
                    let read = self.rx.read(&mut self.buf[self.len..])?;
                    if read == 0 {
                        return Err(LinkError::ConnectionReset);
                    }
                    self.len += read;
                    self.shared.buffered.store(self.len, Ordering::Relaxed);
                }
                Err(LinkError::Timeout) if self.len >= ALIGNMENT => {}
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_string_is_split() {
        assert_eq!(split_device("/tmp/a,/tmp/b").unwrap(), ("/tmp/a", "/tmp/b"));
        assert!(split_device("/tmp/a").is_err());
        assert!(split_device(",/tmp/b").is_err());
    }

    #[test]
    fn deadline_expiry() {
        assert_eq!(remaining(None).unwrap(), None);
        let past = Instant::now() - Duration::from_millis(5);
        assert_eq!(remaining(Some(past)), Err(LinkError::Timeout));
    }

    #[test]
    fn disabled_receive_fails_without_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let device = format!(
            "{},{}",
            dir.path().join("rx").display(),
            dir.path().join("tx").display()
        );
        let (mut rx, _shared) = open(&device).unwrap();
        let start = Instant::now();
        assert_eq!(rx.wait_for_data(None).err(), Some(LinkError::NotConnected));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
