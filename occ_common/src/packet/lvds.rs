//! Pass-through framing for the LVDS fan-out link.
//!
//! An aggregator relays a pass-through command to its submodules as a
//! stream of 16-bit frames. On the host side every frame occupies one
//! payload dword:
//!
//! ```text
//!  31        19  18    17    16    15                 0
//! ┌───────────┬─────┬─────┬──────┬────────────────────┐
//! │  unused   │start│stop │parity│      16 data bits  │
//! └───────────┴─────┴─────┴──────┴────────────────────┘
//! ```
//!
//! The outer command info word is the first frame. It carries the start
//! and command flags and even parity over its low 24 bits. Data frames
//! carry even parity over their low 18 bits (data, parity, stop). A
//! unicast command is prefixed with two frames holding the destination
//! hardware id, low half first. Every 32-bit payload word becomes two
//! frames, low half first. The last frame carries the stop flag.

use super::CodecError;
use super::info::{CommandFlags, CommandInfo};
use crate::consts::HWID_BROADCAST;
use tracing::trace;

const DATA_MASK: u32 = 0xFFFF;
const PARITY_BIT: u32 = 1 << 16;
const STOP_BIT: u32 = 1 << 17;
const HEADER_PARITY_BITS: u32 = 0x00FF_FFFF;
const FRAME_PARITY_BITS: u32 = 0x0003_FFFF;

/// Parity bit that makes the population count of `value` even.
#[inline]
pub fn lvds_parity(value: u32) -> u32 {
    value.count_ones() & 1
}

/// True if `frame` is a well formed data frame.
#[inline]
pub fn frame_parity_ok(frame: u32) -> bool {
    frame & !FRAME_PARITY_BITS == 0 && lvds_parity(frame & FRAME_PARITY_BITS) == 0
}

/// True if the outer command info has even parity over its low 24 bits.
#[inline]
pub fn header_parity_ok(info: u32) -> bool {
    lvds_parity(info & HEADER_PARITY_BITS) == 0
}

#[inline]
fn data_frame(half: u32) -> u32 {
    let half = half & DATA_MASK;
    half | (lvds_parity(half) << 16)
}

/// Direction of an LVDS command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Every submodule on the link.
    Broadcast,
    /// A single submodule, its id framed ahead of the payload.
    Unicast,
}

impl Addressing {
    /// Addressing implied by a destination id.
    pub fn for_destination(destination: u32) -> Self {
        if destination == HWID_BROADCAST {
            Self::Broadcast
        } else {
            Self::Unicast
        }
    }
}

/// Frame `words` for `destination`, returning the framed header info and
/// the framed payload.
pub fn encode(info: CommandInfo, destination: u32, words: &[u32]) -> (u32, Vec<u32>) {
    let mut header = CommandInfo {
        flags: info.flags
            | CommandFlags::IS_COMMAND
            | CommandFlags::IS_PASSTHRU
            | CommandFlags::LVDS_CMD
            | CommandFlags::LVDS_START,
        ..info
    };
    header.flags.remove(CommandFlags::LVDS_PARITY | CommandFlags::LVDS_STOP);
    let mut raw = header.to_raw();
    raw |= lvds_parity(raw & HEADER_PARITY_BITS) << 16;

    let unicast = Addressing::for_destination(destination) == Addressing::Unicast;
    let mut frames = Vec::with_capacity(words.len() * 2 + if unicast { 2 } else { 0 });
    if unicast {
        frames.push(data_frame(destination));
        frames.push(data_frame(destination >> 16));
    }
    for word in words {
        frames.push(data_frame(*word));
        frames.push(data_frame(*word >> 16));
    }

    match frames.last_mut() {
        Some(last) => *last = (*last | STOP_BIT) ^ PARITY_BIT,
        None => raw = (raw | CommandFlags::LVDS_STOP.bits()) ^ PARITY_BIT,
    }
    (raw, frames)
}

/// A pass-through command recovered from its framed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LvdsCommand {
    /// Command info with the framing flags stripped.
    pub info: CommandInfo,
    /// Destination id, [`HWID_BROADCAST`] when broadcast.
    pub destination: u32,
    /// Payload words.
    pub words: Vec<u32>,
}

/// Inverse of [`encode`]. Rejects frames with bad parity or misplaced
/// start/stop flags.
pub fn decode(raw_info: u32, frames: &[u32], addressing: Addressing) -> Result<LvdsCommand, CodecError> {
    let info = CommandInfo::from_raw_command(raw_info).ok_or(CodecError::NotLvds)?;
    let required = CommandFlags::IS_COMMAND
        | CommandFlags::IS_PASSTHRU
        | CommandFlags::LVDS_CMD
        | CommandFlags::LVDS_START;
    if !info.flags.contains(required) {
        return Err(CodecError::NotLvds);
    }
    if !header_parity_ok(raw_info) {
        trace!("LVDS header parity mismatch in {:#010x}", raw_info);
        return Err(CodecError::Parity { index: 0 });
    }
    if info.flags.contains(CommandFlags::LVDS_STOP) != frames.is_empty() {
        return Err(CodecError::Framing { index: 0 });
    }

    let last = frames.len().saturating_sub(1);
    let mut halves = Vec::with_capacity(frames.len());
    for (i, frame) in frames.iter().enumerate() {
        if !frame_parity_ok(*frame) {
            trace!("LVDS frame {} parity mismatch in {:#010x}", i + 1, frame);
            return Err(CodecError::Parity { index: i + 1 });
        }
        if (frame & STOP_BIT != 0) != (i == last) {
            return Err(CodecError::Framing { index: i + 1 });
        }
        halves.push(frame & DATA_MASK);
    }

    let (destination, data) = match addressing {
        Addressing::Broadcast => (HWID_BROADCAST, &halves[..]),
        Addressing::Unicast => {
            if halves.len() < 2 {
                return Err(CodecError::Truncated {
                    needed: 2,
                    available: halves.len(),
                });
            }
            (halves[0] | (halves[1] << 16), &halves[2..])
        }
    };
    if data.len() % 2 != 0 {
        return Err(CodecError::Misaligned { length: data.len() * 2 });
    }
    let words = data
        .chunks_exact(2)
        .map(|pair| pair[0] | (pair[1] << 16))
        .collect();

    let mut info = info;
    info.flags.remove(
        CommandFlags::LVDS_PARITY
            | CommandFlags::LVDS_STOP
            | CommandFlags::LVDS_START
            | CommandFlags::LVDS_CMD,
    );
    Ok(LvdsCommand {
        info,
        destination,
        words,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::command::Command;

    #[test]
    fn parity_is_even() {
        assert_eq!(lvds_parity(0), 0);
        assert_eq!(lvds_parity(1), 1);
        assert_eq!(lvds_parity(0b11), 0);
        assert!(frame_parity_ok(data_frame(0x8001)));
        assert!(frame_parity_ok(data_frame(0x8000)));
    }

    #[test]
    fn broadcast_without_payload_stops_on_header() {
        let (raw, frames) = encode(CommandInfo::new(Command::Reset), HWID_BROADCAST, &[]);
        assert!(frames.is_empty());
        assert!(raw & CommandFlags::LVDS_STOP.bits() != 0);
        assert!(header_parity_ok(raw));
    }

    #[test]
    fn unicast_frames_address_first() {
        let (_, frames) = encode(CommandInfo::new(Command::ReadStatus), 0x1234_5678, &[0xAAAA_5555]);
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0] & DATA_MASK, 0x5678);
        assert_eq!(frames[1] & DATA_MASK, 0x1234);
        assert_eq!(frames[2] & DATA_MASK, 0x5555);
        assert_eq!(frames[3] & DATA_MASK, 0xAAAA);
        assert!(frames[3] & STOP_BIT != 0);
        assert!(frames[..3].iter().all(|f| f & STOP_BIT == 0));
        assert!(frames.iter().all(|f| frame_parity_ok(*f)));
    }

    #[test]
    fn decode_rejects_flipped_bit() {
        let (raw, mut frames) = encode(CommandInfo::new(Command::WriteConfig), 7, &[1, 2, 3]);
        frames[3] ^= 1;
        assert_eq!(
            decode(raw, &frames, Addressing::Unicast),
            Err(CodecError::Parity { index: 4 })
        );
    }

    #[test]
    fn decode_rejects_header_parity() {
        let (raw, frames) = encode(CommandInfo::new(Command::Start), HWID_BROADCAST, &[9]);
        let bad = raw ^ (1 << 8);
        assert_eq!(
            decode(bad, &frames, Addressing::Broadcast),
            Err(CodecError::Parity { index: 0 })
        );
    }

    #[test]
    fn decode_roundtrip_keeps_channel() {
        let info = CommandInfo::new(Command::ReadConfig).with_channel(4);
        let (raw, frames) = encode(info, 0x0A0B_0C0D, &[0xDEAD_BEEF]);
        let cmd = decode(raw, &frames, Addressing::Unicast).expect("valid frames");
        assert_eq!(cmd.destination, 0x0A0B_0C0D);
        assert_eq!(cmd.words, vec![0xDEAD_BEEF]);
        assert_eq!(cmd.info.command, Command::ReadConfig);
        assert_eq!(cmd.info.channel(), Some(3));
    }
}
