//! Protocol-wide constants for the OCC workspace.
//!
//! Single source of truth for packet size limits, reserved addresses and
//! buffer dimensions. Imported by all crates, no duplication permitted.

use static_assertions::const_assert_eq;

/// Size of the fixed packet header in bytes (six 32-bit words).
pub const HEADER_LEN: usize = 24;

/// Smallest packet that can appear on the wire: a bare header.
pub const PACKET_MIN_LENGTH: usize = HEADER_LEN;

/// Largest packet accepted from the link: 1800 event pairs plus header.
pub const PACKET_MAX_LENGTH: usize = 1800 * 8 + HEADER_LEN;

/// Alignment unit of every length handled by the data path.
pub const ALIGNMENT: usize = 4;

/// Destination address that reaches every module on a link.
pub const HWID_BROADCAST: u32 = 0;

/// Source address used by packets originating from this host.
pub const HWID_SELF: u32 = 0x000F_10CC;

/// Size of the RTDL header that may prefix data payloads.
pub const RTDL_HEADER_LEN: usize = 24;

/// Raw data-info word identifying an RTDL packet carried as data.
pub const RTDL_DATA_INFO: u32 = 0x2000_00FF;

/// Default config file location used by the command-line tool.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/occ/occ.toml";

const_assert_eq!(HEADER_LEN, 6 * size_of::<u32>());
const_assert_eq!(PACKET_MAX_LENGTH % ALIGNMENT, 0);
const_assert_eq!(ALIGNMENT & (ALIGNMENT - 1), 0);

/// Round `len` down to the data path alignment unit.
#[inline]
pub const fn align_down(len: usize) -> usize {
    len & !(ALIGNMENT - 1)
}

/// Round `len` up to the data path alignment unit.
#[inline]
pub const fn align_up(len: usize) -> usize {
    (len + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}
