//! RTDL header: accelerator pulse timing attached to data packets.

use bitflags::bitflags;
use serde::Serialize;

/// Pulse flavor of the next accelerator cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseFlavor {
    /// No beam.
    NoBeam,
    /// Normal beam to target 1.
    Target1,
    /// Normal beam to target 2.
    Target2,
    /// 10 us diagnostic pulse.
    Diag10us,
    /// 50 us diagnostic pulse.
    Diag50us,
    /// 100 us diagnostic pulse.
    Diag100us,
    /// Special physics pulse 1.
    Physics1,
    /// Special physics pulse 2.
    Physics2,
    /// Flavor code outside the documented range.
    Unknown(u8),
}

impl From<u8> for PulseFlavor {
    fn from(raw: u8) -> Self {
        match raw {
            0 => Self::NoBeam,
            1 => Self::Target1,
            2 => Self::Target2,
            3 => Self::Diag10us,
            4 => Self::Diag50us,
            5 => Self::Diag100us,
            6 => Self::Physics1,
            7 => Self::Physics2,
            other => Self::Unknown(other),
        }
    }
}

bitflags! {
    /// Veto status of the previous cycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CycleVeto: u16 {
        /// No beam was delivered.
        const NO_BEAM          = 1 << 0;
        /// Beam went to target 2.
        const NOT_TARGET_1     = 1 << 1;
        /// Beam went to target 1.
        const NOT_TARGET_2     = 1 << 2;
        /// Reduced intensity diagnostic pulse.
        const DIAGNOSTIC_PULSE = 1 << 3;
        /// Special physics pulse 1.
        const PHYSICS_PULSE_1  = 1 << 4;
        /// Special physics pulse 2.
        const PHYSICS_PULSE_2  = 1 << 5;
        /// Interrupted by an auto reset MPS trip.
        const MPS_AUTO_RESET   = 1 << 6;
        /// Interrupted by a latched MPS trip.
        const MPS_FAULT        = 1 << 7;
        /// Event link corruption detected.
        const EVENT_LINK_ERROR = 1 << 8;
        /// Lost synch with ring RF.
        const RING_RF_SYNCH    = 1 << 9;
        /// Ring RF frequency out of range.
        const RING_RF_FREQ     = 1 << 10;
        /// 60 Hz line phase error.
        const LINE_60HZ_ERROR  = 1 << 11;
    }
}

/// Decoded 6-word RTDL header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RtdlHeader {
    /// Pulse time, seconds part.
    pub timestamp_sec: u32,
    /// Pulse time, nanoseconds part.
    pub timestamp_nsec: u32,
    /// Pulse charge in 10 pC units.
    pub charge: u32,
    /// Flavor of the next pulse.
    pub flavor: PulseFlavor,
    /// Flavor frame was flagged bad.
    pub bad_flavor_frame: bool,
    /// Cycle number.
    pub cycle: u16,
    /// Veto status of the previous cycle.
    pub last_cycle_veto: CycleVeto,
    /// TSTAT field.
    pub tstat: u8,
    /// Cycle frame was flagged bad.
    pub bad_cycle_frame: bool,
    /// Veto frame was flagged bad.
    pub bad_veto_frame: bool,
    /// TSYNC period.
    pub tsync_period: u32,
    /// Fixed TOF offset.
    pub tof_fixed_offset: u32,
    /// RTDL frame offset.
    pub frame_offset: u8,
    /// Full TOF offset enabled.
    pub tof_full_offset: bool,
}

impl RtdlHeader {
    /// Decode from the six header words.
    pub fn from_words(words: [u32; 6]) -> Self {
        let [sec, nsec, pulse, general, period, delay] = words;
        Self {
            timestamp_sec: sec,
            timestamp_nsec: nsec,
            charge: pulse & 0x00FF_FFFF,
            flavor: PulseFlavor::from(((pulse >> 24) & 0x3F) as u8),
            bad_flavor_frame: pulse & (1 << 30) != 0,
            cycle: (general & 0x3FF) as u16,
            last_cycle_veto: CycleVeto::from_bits_retain(((general >> 10) & 0xFFF) as u16),
            tstat: ((general >> 22) & 0xFF) as u8,
            bad_cycle_frame: general & (1 << 30) != 0,
            bad_veto_frame: general & (1 << 31) != 0,
            tsync_period: period,
            tof_fixed_offset: delay & 0x00FF_FFFF,
            frame_offset: ((delay >> 24) & 0xF) as u8,
            tof_full_offset: delay & (1 << 31) != 0,
        }
    }

    /// Pulse time in nanoseconds since the epoch.
    pub fn timestamp_ns(&self) -> u64 {
        u64::from(self.timestamp_sec) * 1_000_000_000 + u64::from(self.timestamp_nsec)
    }
}

/// One neutron event: time of flight and pixel id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NeutronEvent {
    /// Time of flight.
    pub tof: u32,
    /// Pixel identifier.
    pub pixel_id: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_fields() {
        let pulse = 1234 | (2 << 24) | (1 << 30);
        let general = 513 | (0b101 << 10) | (0x7F << 22) | (1 << 31);
        let delay = 0x00AB_CDEF | (3 << 24) | (1 << 31);
        let hdr = RtdlHeader::from_words([10, 20, pulse, general, 16_666, delay]);

        assert_eq!(hdr.charge, 1234);
        assert_eq!(hdr.flavor, PulseFlavor::Target2);
        assert!(hdr.bad_flavor_frame);
        assert_eq!(hdr.cycle, 513);
        assert_eq!(
            hdr.last_cycle_veto,
            CycleVeto::NO_BEAM | CycleVeto::NOT_TARGET_2
        );
        assert_eq!(hdr.tstat, 0x7F);
        assert!(!hdr.bad_cycle_frame);
        assert!(hdr.bad_veto_frame);
        assert_eq!(hdr.tsync_period, 16_666);
        assert_eq!(hdr.tof_fixed_offset, 0xAB_CDEF);
        assert_eq!(hdr.frame_offset, 3);
        assert!(hdr.tof_full_offset);
        assert_eq!(hdr.timestamp_ns(), 10_000_000_020);
    }

    #[test]
    fn unknown_flavor_is_preserved() {
        assert_eq!(PulseFlavor::from(9), PulseFlavor::Unknown(9));
    }
}
