//! # OCC Link Data Path
//!
//! Host side of the optical/LVDS link adapter: a transport handle over the
//! real board or one of its simulators, DMA ring buffers that decouple the
//! link from packet processing, and a reference-counted packet view that
//! lets several consumers inspect the same received window without
//! copying.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │   OccHandle     │    │  Ring buffer    │    │   PacketList    │
//! │                 │    │                 │    │                 │
//! │ hardware / pipe ├───►│ DmaCopier+local ├───►│ reserve/release │
//! │ / socket        │    │ or DirectRing   │    │ first/next      │
//! └────────┬────────┘    └─────────────────┘    └────────┬────────┘
//!          │                                             │
//!   ┌──────┴──────┐                               ┌──────┴──────┐
//!   │ OccControl  │◄──── commands ────────────────┤  consumers  │
//!   │ send/status │                               │             │
//!   └─────────────┘                               └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use occ_link::ring::{CircularBuffer, local_ring};
//! use occ_link::PacketList;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (mut producer, mut consumer) = local_ring(64 * 1024)?;
//! let packet = occ::packet::Packet::create_occ(
//!     0x0A00_0001,
//!     occ::packet::command::Command::ReadVersion,
//!     0,
//!     &[],
//! )?;
//! producer.push(packet.as_bytes());
//!
//! let window = consumer.wait()?;
//! let list = PacketList::new();
//! let _ = list.reset(window);
//! if let Some(reservation) = list.reserve() {
//!     for pkt in reservation.packets() {
//!         assert!(pkt.is_command());
//!     }
//! }
//! list.release();
//! let processed = list.wait_all_released();
//! # let _ = processed;
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! - **OccHandle**: single owner, moved into the copier thread if used
//! - **OccControl**: cloneable and thread-safe
//! - **RingProducer / RingConsumer**: one of each per ring
//! - **PacketList**: shared by reference, internally synchronized

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod packet_list;
pub mod platform;
pub mod ring;
pub mod transport;

pub use error::{LinkError, LinkResult};
pub use packet_list::{PacketList, Packets, Reservation};
pub use ring::{CircularBuffer, DirectRing, DmaCopier, RingConsumer, RingProducer, local_ring};
pub use transport::{
    BoardType, Interface, LinkControl, LinkKind, OccControl, OccHandle, OccStatus, StatusFlags,
    Transport,
};

/// Initialize tracing with the `RUST_LOG` filter
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
