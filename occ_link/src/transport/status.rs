//! Board status as reported by the link adapter driver.

use bitflags::bitflags;
use occ::config::Interface;
use serde::Serialize;
use static_assertions::const_assert_eq;
use std::mem::{offset_of, size_of};

bitflags! {
    /// Status register bits of the driver status block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatusFlags: u32 {
        /// No signal on the optical link.
        const OPTICAL_NOSIGNAL     = 1 << 0;
        /// Optical transceiver present.
        const OPTICAL_PRESENT      = 1 << 1;
        /// Board runs in optical mode.
        const MODE_OPTICAL         = 1 << 2;
        /// Reset happened since last status read.
        const RESET_OCCURRED       = 1 << 3;
        /// DMA stalled, receive buffer full.
        const DMA_STALLED          = 1 << 4;
        /// Message pending in the receive queue.
        const RX_MSG               = 1 << 5;
        /// Receive enabled.
        const RX_ENABLED           = 1 << 6;
        /// Error packets are passed to the receive queue.
        const RX_ERR_PKTS_ENABLED  = 1 << 7;
        /// Incoming FIFO overflowed.
        const FIFO_OVERFLOW        = 1 << 8;
        /// Optical transceiver fault.
        const OPTICAL_FAULT        = 1 << 9;
    }
}

/// Link adapter board model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardType {
    /// PCI-X board.
    SnsPcix,
    /// PCI Express board.
    SnsPcie,
    /// PCI Express board, GE variant.
    GePcie,
    /// Pipe or socket simulator.
    Simulator,
    /// Unrecognized board id.
    Unknown(u32),
}

impl From<u32> for BoardType {
    fn from(raw: u32) -> Self {
        match raw {
            1 => Self::SnsPcix,
            2 => Self::SnsPcie,
            3 => Self::GePcie,
            other => Self::Unknown(other),
        }
    }
}

/// Status block returned by the driver's GET_STATUS command.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RawBoardStatus {
    pub ocb_ver: u32,
    pub board_type: u32,
    pub hardware_ver: u32,
    pub firmware_ver: u32,
    pub firmware_date: u32,
    pub fpga_serial: u64,
    pub status: u32,
    pub dq_size: u32,
    pub dq_used: u32,
    pub rx_rate: u32,
    pub bars: [u32; 3],
    pub err_crc: u32,
    pub err_length: u32,
    pub err_frame: u32,
    pub fpga_temp: u32,
    pub fpga_core_volt: u32,
    pub fpga_aux_volt: u32,
}

const_assert_eq!(size_of::<RawBoardStatus>(), 88);

impl RawBoardStatus {
    /// Status block layout version this library understands.
    pub const VERSION: u32 = 1;
    /// Size of the block on the wire.
    pub const SIZE: usize = size_of::<Self>();

    fn field(bytes: &[u8], offset: usize) -> u32 {
        bytes
            .get(offset..offset + 4)
            .and_then(|b| <[u8; 4]>::try_from(b).ok())
            .map(u32::from_ne_bytes)
            .unwrap_or_default()
    }

    /// Decode the driver's native-endian block.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let word = |offset| Self::field(bytes, offset);
        let serial_at = offset_of!(Self, fpga_serial);
        let serial = bytes
            .get(serial_at..serial_at + 8)
            .and_then(|b| <[u8; 8]>::try_from(b).ok())
            .map(u64::from_ne_bytes)
            .unwrap_or_default();
        let bars_at = offset_of!(Self, bars);
        Some(Self {
            ocb_ver: word(offset_of!(Self, ocb_ver)),
            board_type: word(offset_of!(Self, board_type)),
            hardware_ver: word(offset_of!(Self, hardware_ver)),
            firmware_ver: word(offset_of!(Self, firmware_ver)),
            firmware_date: word(offset_of!(Self, firmware_date)),
            fpga_serial: serial,
            status: word(offset_of!(Self, status)),
            dq_size: word(offset_of!(Self, dq_size)),
            dq_used: word(offset_of!(Self, dq_used)),
            rx_rate: word(offset_of!(Self, rx_rate)),
            bars: [word(bars_at), word(bars_at + 4), word(bars_at + 8)],
            err_crc: word(offset_of!(Self, err_crc)),
            err_length: word(offset_of!(Self, err_length)),
            err_frame: word(offset_of!(Self, err_frame)),
            fpga_temp: word(offset_of!(Self, fpga_temp)),
            fpga_core_volt: word(offset_of!(Self, fpga_core_volt)),
            fpga_aux_volt: word(offset_of!(Self, fpga_aux_volt)),
        })
    }
}

/// Board status in engineering units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccStatus {
    /// Board model.
    pub board: BoardType,
    /// Active physical interface.
    pub interface: Interface,
    /// Hardware revision.
    pub hardware_ver: u32,
    /// Firmware revision.
    pub firmware_ver: u32,
    /// Firmware build date, BCD `0xYYYYMMDD`.
    pub firmware_date: u32,
    /// FPGA serial number.
    pub fpga_serial: u64,
    /// Receive enabled.
    pub rx_enabled: bool,
    /// Error packets are passed to the receive queue.
    pub err_packets_enabled: bool,
    /// DMA stalled.
    pub stalled: bool,
    /// FIFO overflowed.
    pub overflowed: bool,
    /// Optical signal detected.
    pub optical_signal: bool,
    /// Optical transceiver present.
    pub optical_present: bool,
    /// Optical transceiver fault.
    pub optical_fault: bool,
    /// Receive DMA region size in bytes.
    pub dma_size: u32,
    /// Bytes waiting in the receive DMA region.
    pub dma_used: u32,
    /// Receive rate in bytes per second.
    pub rx_rate: u32,
    /// Sizes of the register windows.
    pub bars: [u32; 3],
    /// CRC error counter.
    pub err_crc: u32,
    /// Length error counter.
    pub err_length: u32,
    /// Frame error counter.
    pub err_frame: u32,
    /// FPGA die temperature in degrees Celsius.
    pub fpga_temp: f64,
    /// FPGA core voltage.
    pub fpga_core_volt: f64,
    /// FPGA auxiliary voltage.
    pub fpga_aux_volt: f64,
}

/// Convert a raw sysmon temperature reading to degrees Celsius.
pub fn fpga_temperature(raw: u32) -> f64 {
    (503.975 / 65536.0) * f64::from(raw) - 273.15
}

/// Convert a raw sysmon voltage reading to volts.
pub fn fpga_voltage(raw: u32) -> f64 {
    (3.0 / 65536.0) * f64::from(raw)
}

impl From<&RawBoardStatus> for OccStatus {
    fn from(raw: &RawBoardStatus) -> Self {
        let flags = StatusFlags::from_bits_retain(raw.status);
        Self {
            board: BoardType::from(raw.board_type),
            interface: if flags.contains(StatusFlags::MODE_OPTICAL) {
                Interface::Optical
            } else {
                Interface::Lvds
            },
            hardware_ver: raw.hardware_ver,
            firmware_ver: raw.firmware_ver,
            firmware_date: raw.firmware_date,
            fpga_serial: raw.fpga_serial,
            rx_enabled: flags.contains(StatusFlags::RX_ENABLED),
            err_packets_enabled: flags.contains(StatusFlags::RX_ERR_PKTS_ENABLED),
            stalled: flags.contains(StatusFlags::DMA_STALLED),
            overflowed: flags.contains(StatusFlags::FIFO_OVERFLOW),
            optical_signal: !flags.contains(StatusFlags::OPTICAL_NOSIGNAL),
            optical_present: flags.contains(StatusFlags::OPTICAL_PRESENT),
            optical_fault: flags.contains(StatusFlags::OPTICAL_FAULT),
            dma_size: raw.dq_size,
            dma_used: raw.dq_used,
            rx_rate: raw.rx_rate,
            bars: raw.bars,
            err_crc: raw.err_crc,
            err_length: raw.err_length,
            err_frame: raw.err_frame,
            fpga_temp: fpga_temperature(raw.fpga_temp),
            fpga_core_volt: fpga_voltage(raw.fpga_core_volt),
            fpga_aux_volt: fpga_voltage(raw.fpga_aux_volt),
        }
    }
}

impl OccStatus {
    /// Status reported by the pipe and socket simulators.
    pub fn simulator(interface: Interface, rx_enabled: bool, dma_size: usize, dma_used: usize) -> Self {
        Self {
            board: BoardType::Simulator,
            interface,
            hardware_ver: 0,
            firmware_ver: 0x000F_0001,
            firmware_date: 0,
            fpga_serial: 0,
            rx_enabled,
            err_packets_enabled: false,
            stalled: false,
            overflowed: false,
            optical_signal: true,
            optical_present: true,
            optical_fault: false,
            dma_size: dma_size as u32,
            dma_used: dma_used as u32,
            rx_rate: 0,
            bars: [0; 3],
            err_crc: 0,
            err_length: 0,
            err_frame: 0,
            fpga_temp: 0.0,
            fpga_core_volt: 0.0,
            fpga_aux_volt: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_layout_offsets() {
        assert_eq!(offset_of!(RawBoardStatus, fpga_serial), 24);
        assert_eq!(offset_of!(RawBoardStatus, status), 32);
        assert_eq!(offset_of!(RawBoardStatus, bars), 48);
        assert_eq!(offset_of!(RawBoardStatus, fpga_aux_volt), 80);
    }

    #[test]
    fn decode_block() {
        let mut bytes = vec![0u8; RawBoardStatus::SIZE];
        bytes[0..4].copy_from_slice(&1u32.to_ne_bytes());
        bytes[4..8].copy_from_slice(&2u32.to_ne_bytes());
        bytes[24..32].copy_from_slice(&0x1122_3344_5566_7788u64.to_ne_bytes());
        let flags = StatusFlags::RX_ENABLED | StatusFlags::MODE_OPTICAL | StatusFlags::DMA_STALLED;
        bytes[32..36].copy_from_slice(&flags.bits().to_ne_bytes());
        bytes[36..40].copy_from_slice(&(4u32 << 20).to_ne_bytes());
        bytes[52..56].copy_from_slice(&4096u32.to_ne_bytes());

        let raw = RawBoardStatus::from_bytes(&bytes).unwrap();
        assert_eq!(raw.ocb_ver, RawBoardStatus::VERSION);
        assert_eq!(raw.fpga_serial, 0x1122_3344_5566_7788);
        assert_eq!(raw.bars, [0, 4096, 0]);

        let status = OccStatus::from(&raw);
        assert_eq!(status.board, BoardType::SnsPcie);
        assert_eq!(status.interface, Interface::Optical);
        assert!(status.rx_enabled);
        assert!(status.stalled);
        assert!(!status.overflowed);
        assert_eq!(status.dma_size, 4 << 20);
    }

    #[test]
    fn short_block_is_rejected() {
        assert!(RawBoardStatus::from_bytes(&[0u8; 40]).is_none());
    }

    #[test]
    fn sysmon_conversions() {
        assert!((fpga_temperature(0) + 273.15).abs() < 1e-9);
        assert!((fpga_temperature(40_000) - 34.4519).abs() < 1e-3);
        assert!((fpga_voltage(65536) - 3.0).abs() < 1e-9);
    }
}
