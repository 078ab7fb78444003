//! Ring buffer owning its memory.
//!
//! The ring is split into a single [`RingProducer`] and a single
//! [`RingConsumer`]. Offsets and the sticky error live under one mutex;
//! payload bytes are copied outside the lock into regions the other side
//! cannot observe:
//!
//! ```text
//!   0                consumer            producer           size
//!   |....free.....|####### used #######|....... free ........|
//!                  ^ consumer reads      ^ producer writes
//! ```
//!
//! One alignment unit always stays free so the two regions never touch.

use super::{CircularBuffer, RingIndex, Window};
use crate::error::{LinkError, LinkResult};
use occ::consts::{ALIGNMENT, PACKET_MAX_LENGTH, align_down};
use parking_lot::{Condvar, Mutex};
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct State {
    index: RingIndex,
    error: Option<LinkError>,
}

struct Shared {
    storage: NonNull<u8>,
    size: usize,
    state: Mutex<State>,
    ready: Condvar,
}

// SAFETY: the storage is only written by the single producer into the free
// region and only read by the single consumer from the used region; the
// regions are published through the mutex-protected index.
unsafe impl Send for Shared {}
// SAFETY: see above.
unsafe impl Sync for Shared {}

impl Drop for Shared {
    fn drop(&mut self) {
        let slice = std::ptr::slice_from_raw_parts_mut(self.storage.as_ptr(), self.size);
        // SAFETY: storage came from Box::into_raw with the same length and
        // both halves are gone.
        drop(unsafe { Box::from_raw(slice) });
    }
}

impl Shared {
    fn set_error(&self, error: LinkError) {
        let mut state = self.state.lock();
        if state.error.is_none() {
            debug!("Ring buffer error: {}", error);
            state.error = Some(error);
        }
        self.ready.notify_all();
    }
}

/// Create a local ring of `size` bytes.
///
/// `size` must be a multiple of 4 and larger than one alignment unit.
pub fn local_ring(size: usize) -> LinkResult<(RingProducer, RingConsumer)> {
    if size <= ALIGNMENT || size % ALIGNMENT != 0 {
        return Err(LinkError::InvalidArgument {
            reason: format!("ring size {size} must be a multiple of {ALIGNMENT} above {ALIGNMENT}"),
        });
    }
    let storage = Box::into_raw(vec![0u8; size].into_boxed_slice());
    // SAFETY: Box::into_raw never returns null.
    let storage = unsafe { NonNull::new_unchecked(storage.cast::<u8>()) };
    let shared = Arc::new(Shared {
        storage,
        size,
        state: Mutex::new(State {
            index: RingIndex::new(size),
            error: None,
        }),
        ready: Condvar::new(),
    });
    debug!("Allocated {} byte ring buffer", size);
    Ok((
        RingProducer {
            shared: Arc::clone(&shared),
        },
        RingConsumer {
            shared,
            rollover: vec![0u8; PACKET_MAX_LENGTH].into_boxed_slice(),
        },
    ))
}

/// Writing half of a local ring.
pub struct RingProducer {
    shared: Arc<Shared>,
}

impl RingProducer {
    /// Copy as much of `data` as fits, returning the accepted length.
    ///
    /// Only whole alignment units are accepted. When the ring has no room
    /// at all the ring enters the sticky `Overflow` state and 0 is
    /// returned.
    pub fn push(&mut self, data: &[u8]) -> usize {
        let wanted = align_down(data.len());
        if wanted == 0 {
            return 0;
        }

        let (producer, accepted) = {
            let mut state = self.shared.state.lock();
            let accepted = wanted.min(state.index.free());
            if accepted == 0 {
                if state.error.is_none() {
                    warn!("Ring buffer overflow, dropping {} bytes", wanted);
                    state.error = Some(LinkError::Overflow);
                }
                self.shared.ready.notify_all();
                return 0;
            }
            (state.index.producer, accepted)
        };

        let head = accepted.min(self.shared.size - producer);
        let base = self.shared.storage.as_ptr();
        // SAFETY: [producer, producer + head) and [0, accepted - head) are
        // inside the free region, which the consumer never reads.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), base.add(producer), head);
            std::ptr::copy_nonoverlapping(data.as_ptr().add(head), base, accepted - head);
        }

        let mut state = self.shared.state.lock();
        state.index.produce(accepted);
        self.shared.ready.notify_all();
        accepted
    }

    /// Record an error for the consumer. The first error wins.
    pub fn set_error(&self, error: LinkError) {
        self.shared.set_error(error);
    }

    /// Wake the consumer without changing state.
    pub fn notify(&self) {
        self.shared.ready.notify_all();
    }

    /// Bytes waiting to be consumed.
    pub fn used(&self) -> usize {
        self.shared.state.lock().index.used()
    }

    /// Capacity in bytes.
    pub fn size(&self) -> usize {
        self.shared.size
    }

    /// True if no more data fits.
    pub fn is_full(&self) -> bool {
        self.shared.state.lock().index.is_full()
    }
}

/// Reading half of a local ring.
pub struct RingConsumer {
    shared: Arc<Shared>,
    rollover: Box<[u8]>,
}

impl RingConsumer {
    /// Error recorded by the producer, if any.
    pub fn error(&self) -> Option<LinkError> {
        self.shared.state.lock().error.clone()
    }

    fn next_window(&self, deadline: Option<Instant>) -> LinkResult<RingIndex> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(error) = &state.error {
                return Err(error.clone());
            }
            if !state.index.is_empty() {
                return Ok(state.index);
            }
            match deadline {
                None => self.shared.ready.wait(&mut state),
                Some(deadline) => {
                    if self.shared.ready.wait_until(&mut state, deadline).timed_out()
                        && state.error.is_none()
                        && state.index.is_empty()
                    {
                        return Err(LinkError::Timeout);
                    }
                }
            }
        }
    }
}

impl CircularBuffer for RingConsumer {
    fn wait_timeout(&mut self, timeout: Option<Duration>) -> LinkResult<&[u8]> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let index = self.next_window(deadline)?;
            let base = self.shared.storage.as_ptr();
            match index.window(self.rollover.len()) {
                Window::Direct { offset, len } => {
                    let len = align_down(len);
                    if len == 0 {
                        continue;
                    }
                    // SAFETY: [offset, offset + len) is inside the used
                    // region, which the producer does not write until it
                    // is consumed through &mut self.
                    return Ok(unsafe { std::slice::from_raw_parts(base.add(offset), len) });
                }
                Window::Rollover { head, tail } => {
                    // SAFETY: both segments are inside the used region.
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            base.add(index.consumer),
                            self.rollover.as_mut_ptr(),
                            head,
                        );
                        std::ptr::copy_nonoverlapping(
                            base,
                            self.rollover.as_mut_ptr().add(head),
                            tail,
                        );
                    }
                    let len = align_down(head + tail);
                    if len == 0 {
                        continue;
                    }
                    return Ok(&self.rollover[..len]);
                }
            }
        }
    }

    fn consume(&mut self, len: usize) -> LinkResult<()> {
        let mut len = align_down(len);
        let mut state = self.shared.state.lock();
        let used = state.index.used();
        if len > used {
            warn!("Consuming {} bytes but only {} are available", len, used);
            len = used;
        }
        state.index.consume(len);
        Ok(())
    }

    fn used(&self) -> usize {
        self.shared.state.lock().index.used()
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn is_empty(&self) -> bool {
        self.shared.state.lock().index.is_empty()
    }

    fn is_full(&self) -> bool {
        self.shared.state.lock().index.is_full()
    }
}
