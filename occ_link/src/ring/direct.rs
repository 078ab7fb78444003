//! Ring buffer over the transport's own receive region.

use super::CircularBuffer;
use crate::error::{LinkError, LinkResult};
use crate::transport::{OccHandle, Transport};
use occ::consts::align_down;
use std::time::Duration;
use tracing::warn;

/// Zero-copy ring delegating to `wait_for_data`/`acknowledge`.
///
/// Errors other than timeouts are sticky: the handle has to be reset
/// through [`into_inner`](Self::into_inner) and a new ring built.
pub struct DirectRing {
    handle: OccHandle,
    size: usize,
    window: usize,
    error: Option<LinkError>,
}

impl DirectRing {
    /// Wrap `handle`. Receive must already be enabled.
    pub fn new(handle: OccHandle) -> LinkResult<Self> {
        let size = handle.status()?.dma_size as usize;
        Ok(Self {
            handle,
            size,
            window: 0,
            error: None,
        })
    }

    /// Transport handle, for sending commands.
    pub fn handle(&self) -> &OccHandle {
        &self.handle
    }

    /// Give the transport handle back.
    pub fn into_inner(self) -> OccHandle {
        self.handle
    }
}

impl CircularBuffer for DirectRing {
    fn wait_timeout(&mut self, timeout: Option<Duration>) -> LinkResult<&[u8]> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        match self.handle.wait_for_data(timeout) {
            Ok(data) => {
                let len = align_down(data.len());
                self.window = len;
                Ok(&data[..len])
            }
            Err(LinkError::Timeout) => Err(LinkError::Timeout),
            Err(e) => {
                warn!("Direct ring error: {}", e);
                self.error = Some(e.clone());
                Err(e)
            }
        }
    }

    fn consume(&mut self, len: usize) -> LinkResult<()> {
        let mut len = align_down(len);
        if len > self.window {
            warn!("Consuming {} bytes but only {} are available", len, self.window);
            len = self.window;
        }
        self.handle.acknowledge(len)?;
        self.window -= len;
        Ok(())
    }

    fn used(&self) -> usize {
        self.window
    }

    fn size(&self) -> usize {
        self.size
    }
}
