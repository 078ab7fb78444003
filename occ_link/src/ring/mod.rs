//! Bounded byte rings between the link producer and packet consumers.
//!
//! Three flavors share the [`CircularBuffer`] consumer contract:
//!
//! - [`local`]: a ring owning its memory, fed by a [`RingProducer`]
//! - [`copier`]: a background thread draining a transport into a local ring
//! - [`direct`]: the transport's own receive region, no extra copy
//!
//! Offsets are kept as an index pair over the buffer and every wrap
//! computation goes through [`RingIndex`].

pub mod copier;
pub mod direct;
pub mod local;

use crate::error::LinkResult;
use occ::consts::ALIGNMENT;
use std::time::Duration;

pub use copier::DmaCopier;
pub use direct::DirectRing;
pub use local::{RingConsumer, RingProducer, local_ring};

/// Consumer side of a ring buffer.
pub trait CircularBuffer: Send {
    /// Block until data is available or `timeout` passes, returning a
    /// contiguous 4-byte aligned window.
    ///
    /// A window that wraps the end of the ring with less than one maximum
    /// packet left before the end is returned as a merged copy. Once an
    /// error is recorded, every call returns it.
    fn wait_timeout(&mut self, timeout: Option<Duration>) -> LinkResult<&[u8]>;

    /// Block until data is available.
    fn wait(&mut self) -> LinkResult<&[u8]> {
        self.wait_timeout(None)
    }

    /// Release `len` bytes from the start of the last window. Lengths
    /// beyond what is available are clamped.
    fn consume(&mut self, len: usize) -> LinkResult<()>;

    /// Bytes waiting to be consumed.
    fn used(&self) -> usize;

    /// Capacity in bytes.
    fn size(&self) -> usize;

    /// True if nothing is waiting.
    fn is_empty(&self) -> bool {
        self.used() == 0
    }

    /// True if the producer cannot add anything.
    fn is_full(&self) -> bool {
        self.used() + ALIGNMENT >= self.size()
    }
}

/// Where the next consumer window lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// Contiguous bytes at `offset`.
    Direct {
        /// Start offset in the ring.
        offset: usize,
        /// Window length.
        len: usize,
    },
    /// `head` bytes from the end of the ring followed by `tail` bytes from
    /// its start, to be merged into a rollover buffer.
    Rollover {
        /// Bytes from the consumer offset to the end of the ring.
        head: usize,
        /// Bytes from the start of the ring.
        tail: usize,
    },
}

impl Window {
    /// Window length in bytes.
    pub fn len(&self) -> usize {
        match *self {
            Self::Direct { len, .. } => len,
            Self::Rollover { head, tail } => head + tail,
        }
    }

    /// True for a zero length window.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Producer and consumer offsets of a ring of `size` bytes.
///
/// One alignment unit always stays free so that `producer == consumer`
/// unambiguously means empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingIndex {
    /// Ring capacity.
    pub size: usize,
    /// Next byte the producer writes.
    pub producer: usize,
    /// Next byte the consumer reads.
    pub consumer: usize,
}

impl RingIndex {
    /// Empty ring of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            producer: 0,
            consumer: 0,
        }
    }

    /// Bytes written and not yet consumed.
    pub fn used(&self) -> usize {
        (self.size + self.producer - self.consumer) % self.size
    }

    /// Bytes the producer may still write.
    pub fn free(&self) -> usize {
        (self.size + self.consumer - self.producer - ALIGNMENT) % self.size
    }

    /// True if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.producer == self.consumer
    }

    /// True if the producer cannot add anything.
    pub fn is_full(&self) -> bool {
        self.used() == self.size - ALIGNMENT
    }

    /// Advance the producer offset by `len` bytes.
    pub fn produce(&mut self, len: usize) {
        self.producer = (self.producer + len) % self.size;
    }

    /// Advance the consumer offset by `len` bytes.
    pub fn consume(&mut self, len: usize) {
        self.consumer = (self.consumer + len) % self.size;
    }

    /// Next consumer window, merging across the wrap point when fewer
    /// than `rollover` bytes are left before the end of the ring.
    pub fn window(&self, rollover: usize) -> Window {
        if self.producer >= self.consumer {
            return Window::Direct {
                offset: self.consumer,
                len: self.producer - self.consumer,
            };
        }
        let head = self.size - self.consumer;
        if head >= rollover {
            return Window::Direct {
                offset: self.consumer,
                len: head,
            };
        }
        Window::Rollover {
            head,
            tail: (rollover - head).min(self.producer),
        }
    }
}
