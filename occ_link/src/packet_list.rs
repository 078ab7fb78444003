//! Reference-counted, zero-copy packet view over a received window.
//!
//! A [`PacketList`] holds one window of bytes, typically borrowed from a
//! ring buffer. [`reset`](PacketList::reset) installs a window together
//! with one implicit holder. Any number of consumers may
//! [`reserve`](PacketList::reserve) the window while it is held and walk
//! its packets; the producer drops the implicit holder with
//! [`release`](PacketList::release) and blocks in
//! [`wait_all_released`](PacketList::wait_all_released) until every
//! reservation is gone, after which the window may be consumed.
//!
//! ```text
//!   producer                  consumers
//!   reset(window)  rc=1
//!                             reserve()   rc=2
//!                             reserve()   rc=3
//!   release()      rc=2
//!   wait_all_released ...     drop        rc=1
//!                             drop        rc=0
//!   ... returns consumed
//! ```

use occ::consts::{ALIGNMENT, PACKET_MAX_LENGTH, PACKET_MIN_LENGTH};
use occ::packet::PacketRef;
use parking_lot::{Condvar, Mutex};
use std::ops::Deref;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Length of the packet at the start of `bytes` if it is complete, a
/// multiple of the ring alignment and within the packet size limits.
pub fn valid_length(bytes: &[u8]) -> Option<usize> {
    let packet = PacketRef::parse(bytes).ok()?;
    let len = packet.length();
    if !(PACKET_MIN_LENGTH..=PACKET_MAX_LENGTH).contains(&len) || len % ALIGNMENT != 0 {
        debug!(
            "Rejecting packet of declared length {}",
            packet.raw_payload_length()
        );
        return None;
    }
    if len > bytes.len() {
        trace!("Packet of {} bytes truncated at window end ({})", len, bytes.len());
        return None;
    }
    Some(len)
}

/// Total length of the complete, valid packets at the start of `bytes`.
pub fn valid_prefix(bytes: &[u8]) -> (usize, usize) {
    let mut offset = 0;
    let mut count = 0;
    while let Some(len) = bytes.get(offset..).and_then(valid_length) {
        offset += len;
        count += 1;
    }
    (offset, count)
}

struct ListState<W> {
    window: Option<W>,
    holder: bool,
    reservations: usize,
    consumed: usize,
}

impl<W> ListState<W> {
    fn refcount(&self) -> usize {
        self.reservations + usize::from(self.holder)
    }
}

/// Packet view over one window of bytes, shared by several consumers.
pub struct PacketList<W> {
    state: Mutex<ListState<W>>,
    released: Condvar,
}

impl<W: Deref<Target = [u8]>> Default for PacketList<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Deref<Target = [u8]>> PacketList<W> {
    /// Empty list with no window and a zero reference count.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ListState {
                window: None,
                holder: false,
                reservations: 0,
                consumed: 0,
            }),
            released: Condvar::new(),
        }
    }

    /// Install a new window with one implicit holder.
    ///
    /// Rejected, handing the window back, while the previous window is
    /// still referenced.
    pub fn reset(&self, window: W) -> Result<(), W> {
        let mut state = self.state.lock();
        if state.refcount() > 0 {
            debug!("Refusing to reset a packet list with {} holders", state.refcount());
            return Err(window);
        }
        state.window = Some(window);
        state.holder = true;
        state.consumed = 0;
        Ok(())
    }

    /// Take a reference on the current window.
    ///
    /// Returns `None` when the window is no longer held.
    pub fn reserve(&self) -> Option<Reservation<'_, W>> {
        let mut state = self.state.lock();
        if state.refcount() == 0 {
            return None;
        }
        let window = state.window.as_deref()?;
        let (ptr, len) = (window.as_ptr(), window.len());
        state.reservations += 1;
        // SAFETY: the window cannot be replaced or taken while the
        // reference count is non-zero, and the list itself is borrowed for
        // the lifetime of the reservation.
        let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };
        Some(Reservation { list: self, bytes })
    }

    /// Drop the implicit holder installed by [`reset`](Self::reset).
    /// Releasing an already released list does nothing.
    pub fn release(&self) {
        let mut state = self.state.lock();
        if state.holder {
            state.holder = false;
            if state.refcount() == 0 {
                self.released.notify_all();
            }
        }
    }

    fn release_reservation(&self) {
        let mut state = self.state.lock();
        state.reservations = state.reservations.saturating_sub(1);
        if state.refcount() == 0 {
            self.released.notify_all();
        }
    }

    /// Current number of holders.
    pub fn refcount(&self) -> usize {
        self.state.lock().refcount()
    }

    /// Bytes consumers reported as processed.
    pub fn consumed(&self) -> usize {
        self.state.lock().consumed
    }

    /// Block until every holder released, returning the processed byte
    /// count.
    pub fn wait_all_released(&self) -> usize {
        let mut state = self.state.lock();
        while state.refcount() > 0 {
            self.released.wait(&mut state);
        }
        state.consumed
    }

    /// Like [`wait_all_released`](Self::wait_all_released) with an upper
    /// bound, returning `None` on timeout.
    pub fn wait_all_released_timeout(&self, timeout: Duration) -> Option<usize> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.refcount() > 0 {
            if self.released.wait_until(&mut state, deadline).timed_out() && state.refcount() > 0 {
                return None;
            }
        }
        Some(state.consumed)
    }

    /// Remove the window once nobody references it.
    pub fn take_window(&self) -> Option<W> {
        let mut state = self.state.lock();
        if state.refcount() > 0 {
            return None;
        }
        state.window.take()
    }
}

/// One consumer's reference on a [`PacketList`] window.
///
/// Packets handed out borrow the reservation, so they cannot outlive it.
pub struct Reservation<'l, W: Deref<Target = [u8]>> {
    list: &'l PacketList<W>,
    bytes: &'l [u8],
}

impl<W: Deref<Target = [u8]>> Reservation<'_, W> {
    /// Whole window.
    pub fn window(&self) -> &[u8] {
        self.bytes
    }

    /// First packet in the window.
    pub fn first(&self) -> Option<PacketRef<'_>> {
        self.packet_at(0)
    }

    /// Packet following `current`, which must come from this window.
    pub fn next(&self, current: &PacketRef<'_>) -> Option<PacketRef<'_>> {
        let start = self.offset_of(current)?;
        self.packet_at(start + current.length())
    }

    /// Iterate over the valid packets of the window.
    pub fn packets(&self) -> Packets<'_> {
        Packets {
            bytes: self.bytes,
            offset: 0,
        }
    }

    /// Report everything up to and including `last` as processed.
    pub fn mark_processed(&self, last: &PacketRef<'_>) {
        if let Some(start) = self.offset_of(last) {
            let end = start + last.length();
            let mut state = self.list.state.lock();
            state.consumed = state.consumed.max(end);
        }
    }

    /// Give the reference back.
    pub fn release(self) {}

    fn offset_of(&self, packet: &PacketRef<'_>) -> Option<usize> {
        let base = self.bytes.as_ptr() as usize;
        let at = packet.as_bytes().as_ptr() as usize;
        let offset = at.checked_sub(base)?;
        (offset < self.bytes.len()).then_some(offset)
    }

    fn packet_at(&self, offset: usize) -> Option<PacketRef<'_>> {
        let rest = self.bytes.get(offset..)?;
        let len = valid_length(rest)?;
        PacketRef::parse(&rest[..len]).ok()
    }
}

impl<W: Deref<Target = [u8]>> Drop for Reservation<'_, W> {
    fn drop(&mut self) {
        self.list.release_reservation();
    }
}

/// Iterator over the valid packets of a reserved window. Stops at the
/// first packet that is out of bounds or truncated.
pub struct Packets<'r> {
    bytes: &'r [u8],
    offset: usize,
}

impl<'r> Iterator for Packets<'r> {
    type Item = PacketRef<'r>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.bytes.get(self.offset..)?;
        let len = valid_length(rest)?;
        self.offset += len;
        PacketRef::parse(&rest[..len]).ok()
    }
}
