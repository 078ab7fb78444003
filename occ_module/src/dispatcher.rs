//! Fan-out of received windows to packet handlers.
//!
//! Each window taken from the ring is installed in a [`PacketList`] and
//! every registered handler gets its own reservation. Handlers run
//! concurrently when there is more than one. The window is consumed once
//! all of them released it: up to what they marked as processed, or every
//! complete packet if nobody marked anything.

use occ::consts::{ALIGNMENT, PACKET_MAX_LENGTH, PACKET_MIN_LENGTH, align_down};
use occ::packet::PacketRef;
use occ_link::packet_list::valid_prefix;
use occ_link::{CircularBuffer, LinkError, LinkResult, PacketList, Reservation};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Default wait period between stop flag checks.
pub const DEFAULT_POLL: Duration = Duration::from_millis(100);

/// Pause after a window that only held a partial packet.
const PARTIAL_BACKOFF: Duration = Duration::from_millis(1);

/// Consumer of received packets.
pub trait PacketHandler: Send + Sync {
    /// Walk the reserved window. Call
    /// [`Reservation::mark_processed`] to limit how much of it is consumed.
    fn process(&self, packets: &Reservation<'_, &[u8]>);
}

/// Dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Windows taken from the ring.
    pub windows: u64,
    /// Valid packets seen.
    pub packets: u64,
    /// Bytes consumed.
    pub bytes: u64,
    /// Times a corrupt header was skipped.
    pub resyncs: u64,
}

/// Reads windows from a ring and hands them to packet handlers.
pub struct Dispatcher<B> {
    ring: B,
    handlers: Vec<Arc<dyn PacketHandler>>,
    stats: DispatchStats,
    poll: Duration,
}

impl<B: CircularBuffer> Dispatcher<B> {
    /// Dispatcher over `ring` with no handlers.
    pub fn new(ring: B) -> Self {
        Self {
            ring,
            handlers: Vec::new(),
            stats: DispatchStats::default(),
            poll: DEFAULT_POLL,
        }
    }

    /// Change how often [`run`](Self::run) checks its stop flag.
    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Register a handler.
    pub fn add_handler(&mut self, handler: Arc<dyn PacketHandler>) {
        self.handlers.push(handler);
    }

    /// Counters so far.
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Underlying ring.
    pub fn ring(&self) -> &B {
        &self.ring
    }

    /// Give the ring back.
    pub fn into_ring(self) -> B {
        self.ring
    }

    /// Wait for one window, dispatch it and consume what was processed.
    /// Returns the number of bytes consumed.
    pub fn dispatch_once(&mut self, timeout: Option<Duration>) -> LinkResult<usize> {
        let window = self.ring.wait_timeout(timeout)?;
        let (valid, count) = valid_prefix(window);

        let list = PacketList::new();
        if list.reset(window).is_err() {
            // A fresh list holds no window yet.
            return Ok(0);
        }
        match self.handlers.as_slice() {
            [] => {}
            [only] => {
                if let Some(reservation) = list.reserve() {
                    only.process(&reservation);
                }
            }
            many => std::thread::scope(|s| {
                for handler in many {
                    if let Some(reservation) = list.reserve() {
                        s.spawn(move || handler.process(&reservation));
                    }
                }
            }),
        }
        list.release();
        let processed = list.wait_all_released();
        drop(list);

        let consumed = if processed > 0 {
            processed
        } else if valid > 0 {
            valid
        } else if corrupt_head(window) {
            warn!("Skipping corrupt packet header");
            self.stats.resyncs += 1;
            ALIGNMENT
        } else {
            0
        };
        let consumed = align_down(consumed);

        self.stats.windows += 1;
        self.stats.packets += count as u64;
        self.stats.bytes += consumed as u64;
        if consumed > 0 {
            self.ring.consume(consumed)?;
        }
        Ok(consumed)
    }

    /// Dispatch until `stop` is set or the ring reports an error other
    /// than a timeout.
    pub fn run(&mut self, stop: &AtomicBool) -> LinkResult<()> {
        while !stop.load(Ordering::Relaxed) {
            match self.dispatch_once(Some(self.poll)) {
                Ok(0) => std::thread::sleep(PARTIAL_BACKOFF),
                Ok(_) | Err(LinkError::Timeout) => {}
                Err(e) => {
                    debug!("Dispatcher stopping: {}", e);
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

/// True if the window starts with a header no valid packet can have.
fn corrupt_head(window: &[u8]) -> bool {
    PacketRef::parse(window)
        .map(|p| {
            let len = p.length();
            !(PACKET_MIN_LENGTH..=PACKET_MAX_LENGTH).contains(&len) || len % ALIGNMENT != 0
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use occ::packet::Packet;
    use occ::packet::command::Command;
    use occ::packet::info::{CommandFlags, CommandInfo};
    use occ_link::local_ring;
    use std::sync::atomic::AtomicUsize;

    struct Counter(AtomicUsize);

    impl PacketHandler for Counter {
        fn process(&self, packets: &Reservation<'_, &[u8]>) {
            self.0.fetch_add(packets.packets().count(), Ordering::SeqCst);
        }
    }

    struct FirstOnly;

    impl PacketHandler for FirstOnly {
        fn process(&self, packets: &Reservation<'_, &[u8]>) {
            if let Some(first) = packets.first() {
                packets.mark_processed(&first);
            }
        }
    }

    fn packet(words: usize) -> Packet {
        Packet::create_occ(0x0A00_0001, Command::ReadStatus, 0, &vec![7; words]).unwrap()
    }

    #[test]
    fn every_handler_sees_every_packet() {
        let (mut tx, rx) = local_ring(4096).unwrap();
        for words in [0, 3, 9] {
            tx.push(packet(words).as_bytes());
        }
        let a = Arc::new(Counter(AtomicUsize::new(0)));
        let b = Arc::new(Counter(AtomicUsize::new(0)));
        let mut dispatcher = Dispatcher::new(rx);
        dispatcher.add_handler(a.clone());
        dispatcher.add_handler(b.clone());

        let consumed = dispatcher.dispatch_once(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(consumed, 24 * 3 + 12 * 4);
        assert_eq!(a.0.load(Ordering::SeqCst), 3);
        assert_eq!(b.0.load(Ordering::SeqCst), 3);
        assert_eq!(dispatcher.stats().packets, 3);
        assert!(dispatcher.ring().is_empty());
    }

    #[test]
    fn marked_progress_limits_consumption() {
        let (mut tx, rx) = local_ring(4096).unwrap();
        tx.push(packet(1).as_bytes());
        tx.push(packet(2).as_bytes());
        let mut dispatcher = Dispatcher::new(rx);
        dispatcher.add_handler(Arc::new(FirstOnly));

        assert_eq!(dispatcher.dispatch_once(None).unwrap(), 28);
        assert_eq!(dispatcher.ring().used(), 32);
    }

    #[test]
    fn corrupt_header_is_skipped() {
        let (mut tx, rx) = local_ring(4096).unwrap();
        let mut junk = vec![0u8; 24];
        junk[12..16].copy_from_slice(&0xFFFF_0000u32.to_le_bytes());
        tx.push(&junk);
        let mut dispatcher = Dispatcher::new(rx);
        assert_eq!(dispatcher.dispatch_once(None).unwrap(), ALIGNMENT);
        assert_eq!(dispatcher.stats().resyncs, 1);
    }

    #[test]
    fn half_word_passthru_length_resyncs_on_word_boundary() {
        let mut info = CommandInfo::new(Command::ReadStatus);
        info.flags |= CommandFlags::IS_PASSTHRU;
        let mut odd = Packet::new(0, 0x0A00_0001, info.to_raw(), &[0, 0])
            .unwrap()
            .as_bytes()
            .to_vec();
        odd[12..16].copy_from_slice(&6u32.to_le_bytes());

        let (mut tx, rx) = local_ring(4096).unwrap();
        tx.push(&odd);
        tx.push(packet(0).as_bytes());
        let mut dispatcher = Dispatcher::new(rx);

        assert_eq!(dispatcher.dispatch_once(None).unwrap(), ALIGNMENT);
        let stats = dispatcher.stats();
        assert_eq!(stats.packets, 0);
        assert_eq!(stats.resyncs, 1);
        assert_eq!(stats.bytes, ALIGNMENT as u64);
        assert_eq!(dispatcher.ring().used(), 32 + 24 - ALIGNMENT);
        assert_eq!(dispatcher.ring().used() % ALIGNMENT, 0);
    }

    #[test]
    fn partial_packet_waits() {
        let (mut tx, rx) = local_ring(4096).unwrap();
        let pkt = packet(8);
        tx.push(&pkt.as_bytes()[..32]);
        let mut dispatcher = Dispatcher::new(rx);
        assert_eq!(dispatcher.dispatch_once(None).unwrap(), 0);
        assert_eq!(dispatcher.ring().used(), 32);
    }
}
