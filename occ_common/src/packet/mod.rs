//! Wire packet format.
//!
//! Every packet starts with a fixed 24-byte header of little endian
//! words followed by a 4-byte aligned payload:
//!
//! ```text
//! ┌─────────────┬────────┬──────┬────────────────┬──────────┬──────────┐
//! │ destination │ source │ info │ payload_length │ reserved │ reserved │
//! └─────────────┴────────┴──────┴────────────────┴──────────┴──────────┘
//!   payload_length bytes of payload follow
//! ```
//!
//! [`PacketRef`] is a zero-copy view used on the receive path; [`Packet`]
//! owns its bytes and is used to build outgoing commands.

pub mod command;
pub mod info;
pub mod lvds;
pub mod rtdl;

use crate::consts::{
    HEADER_LEN, HWID_BROADCAST, HWID_SELF, PACKET_MAX_LENGTH, RTDL_DATA_INFO, RTDL_HEADER_LEN,
};
use command::{Command, ModuleType};
use info::{CommandFlags, CommandInfo, DataFlags, Info};
use lvds::{Addressing, LvdsCommand};
use rtdl::{NeutronEvent, RtdlHeader};
use thiserror::Error;

/// Errors produced while building or decoding packets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Fewer bytes than the structure requires.
    #[error("Truncated packet: need {needed} units, have {available}")]
    Truncated {
        /// Required size.
        needed: usize,
        /// Available size.
        available: usize,
    },

    /// Encoded packet would exceed the maximum packet size.
    #[error("Payload too long: {length} bytes exceeds {max}")]
    PayloadTooLong {
        /// Resulting packet length.
        length: usize,
        /// Maximum allowed packet length.
        max: usize,
    },

    /// Length violates the alignment rules.
    #[error("Misaligned length: {length}")]
    Misaligned {
        /// Offending length.
        length: usize,
    },

    /// LVDS frame with odd parity. Index 0 is the header frame.
    #[error("LVDS parity error in frame {index}")]
    Parity {
        /// Frame index.
        index: usize,
    },

    /// LVDS start/stop flags out of place.
    #[error("LVDS framing error in frame {index}")]
    Framing {
        /// Frame index.
        index: usize,
    },

    /// Packet is not an LVDS pass-through command.
    #[error("Packet is not an LVDS command")]
    NotLvds,
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

#[inline]
fn read_word(bytes: &[u8], index: usize) -> Option<u32> {
    let start = index.checked_mul(4)?;
    let chunk = bytes.get(start..start + 4)?;
    <[u8; 4]>::try_from(chunk).ok().map(u32::from_le_bytes)
}

/// Little endian 32-bit word view over a byte slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Words<'a> {
    bytes: &'a [u8],
}

impl<'a> Words<'a> {
    /// Wrap raw bytes. A trailing partial word is ignored by word access.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Number of complete words.
    pub fn len(&self) -> usize {
        self.bytes.len() / 4
    }

    /// True if there is no complete word.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Word at `index`.
    pub fn get(&self, index: usize) -> Option<u32> {
        read_word(self.bytes, index)
    }

    /// Iterate over complete words.
    pub fn iter(&self) -> impl Iterator<Item = u32> + use<'a> {
        self.bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
    }

    /// Underlying bytes.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Copy into a vector.
    pub fn to_vec(&self) -> Vec<u32> {
        self.iter().collect()
    }
}

/// Zero-copy view of a packet inside a receive window.
///
/// Only the header is guaranteed to be present; payload accessors clamp
/// to the bytes actually available.
#[derive(Debug, Clone, Copy)]
pub struct PacketRef<'a> {
    bytes: &'a [u8],
    info: Info,
}

impl<'a> PacketRef<'a> {
    /// View the packet starting at `bytes`.
    pub fn parse(bytes: &'a [u8]) -> CodecResult<Self> {
        match read_word(bytes, 2) {
            Some(raw_info) if bytes.len() >= HEADER_LEN => Ok(Self {
                bytes,
                info: Info::from_raw(raw_info),
            }),
            _ => Err(CodecError::Truncated {
                needed: HEADER_LEN,
                available: bytes.len(),
            }),
        }
    }

    #[inline]
    fn header_word(&self, index: usize) -> u32 {
        read_word(self.bytes, index).unwrap_or_default()
    }

    /// Destination hardware id.
    pub fn destination(&self) -> u32 {
        self.header_word(0)
    }

    /// Source hardware id as written in the header.
    pub fn source(&self) -> u32 {
        self.header_word(1)
    }

    /// Raw info word.
    pub fn raw_info(&self) -> u32 {
        self.header_word(2)
    }

    /// Decoded info word.
    pub fn info(&self) -> Info {
        self.info
    }

    /// Payload length as declared in the header.
    pub fn raw_payload_length(&self) -> u32 {
        self.header_word(3)
    }

    /// The two reserved header words.
    pub fn reserved(&self) -> [u32; 2] {
        [self.header_word(4), self.header_word(5)]
    }

    fn command_info(&self) -> Option<&CommandInfo> {
        self.info.as_command()
    }

    fn has_flag(&self, flag: CommandFlags) -> bool {
        self.command_info().is_some_and(|c| c.flags.contains(flag))
    }

    /// Total packet length in bytes, 0 if the declared length breaks the
    /// alignment rules.
    ///
    /// Incoming packets are 4-byte aligned. Outgoing non-response
    /// pass-through commands only need 2-byte alignment.
    pub fn length(&self) -> usize {
        let len = HEADER_LEN + self.raw_payload_length() as usize;
        let relaxed = self.is_command() && self.is_passthru() && !self.is_response();
        let align = if relaxed { 2 } else { 4 };
        if len % align != 0 { 0 } else { len }
    }

    /// True if [`length`](Self::length) is non-zero.
    pub fn is_valid(&self) -> bool {
        self.length() > 0
    }

    /// Bytes of this packet, clamped to what is available.
    pub fn as_bytes(&self) -> &'a [u8] {
        let len = self.length().max(HEADER_LEN).min(self.bytes.len());
        &self.bytes[..len]
    }

    /// Command, response or pass-through packet.
    pub fn is_command(&self) -> bool {
        self.command_info().is_some()
    }

    /// Data packet.
    pub fn is_data(&self) -> bool {
        !self.is_command()
    }

    /// Response to a previous command.
    pub fn is_response(&self) -> bool {
        self.has_flag(CommandFlags::IS_RESPONSE)
    }

    /// Relayed by an aggregator for a submodule.
    pub fn is_passthru(&self) -> bool {
        self.has_flag(CommandFlags::IS_PASSTHRU)
    }

    /// Marked corrupt by the link adapter.
    pub fn is_bad(&self) -> bool {
        self.command() == Some(Command::BadPacket)
    }

    fn data_flags(&self) -> Option<(DataFlags, u8)> {
        self.info.as_data().map(|d| (d.flags(), d.format_code()))
    }

    /// Data packet holding neutron events only.
    pub fn is_neutron_data(&self) -> bool {
        self.data_flags()
            .is_some_and(|(f, fmt)| f.contains(DataFlags::ONLY_NEUTRON_DATA) && fmt == 0)
    }

    /// Data packet holding metadata events.
    pub fn is_meta_data(&self) -> bool {
        self.data_flags()
            .is_some_and(|(f, fmt)| !f.contains(DataFlags::ONLY_NEUTRON_DATA) && fmt == 0)
    }

    /// RTDL command packet, or RTDL information carried as data.
    pub fn is_rtdl(&self) -> bool {
        match self.info {
            Info::Command(cmd) => cmd.command == Command::Rtdl,
            Info::Data(data) => data.to_raw() == RTDL_DATA_INFO,
        }
    }

    /// Command code of a command packet.
    pub fn command(&self) -> Option<Command> {
        self.command_info().map(|c| c.command)
    }

    /// Module type reported by a response.
    pub fn module_type(&self) -> Option<ModuleType> {
        self.command_info()
            .filter(|c| c.flags.contains(CommandFlags::IS_RESPONSE))
            .map(|c| c.module_type())
    }

    fn raw_payload(&self) -> &'a [u8] {
        let end = (HEADER_LEN + self.raw_payload_length() as usize).min(self.bytes.len());
        &self.bytes[HEADER_LEN.min(end)..end]
    }

    /// Command being answered by a response.
    ///
    /// ACK and NACK echo the acknowledged command in the first payload
    /// word, or the second one for pass-through responses where the first
    /// word holds the originating module id.
    pub fn response_type(&self) -> Option<Command> {
        let cmd = self.command_info()?;
        if !cmd.flags.contains(CommandFlags::IS_RESPONSE) {
            return None;
        }
        match cmd.command {
            Command::Ack | Command::Nack => {
                let index = if self.is_passthru() { 1 } else { 0 };
                read_word(self.raw_payload(), index).map(|w| Command::from((w & 0xFF) as u8))
            }
            other => Some(other),
        }
    }

    /// Id of the module the packet originates from.
    pub fn source_address(&self) -> u32 {
        if self.is_passthru() {
            read_word(self.raw_payload(), 0).unwrap_or_default()
        } else {
            self.source()
        }
    }

    /// Id of the aggregator that relayed the packet, 0 for direct packets.
    pub fn router_address(&self) -> u32 {
        if self.is_passthru() { self.source() } else { 0 }
    }

    fn payload_skip(&self) -> usize {
        match self.command_info() {
            Some(cmd) if cmd.flags.contains(CommandFlags::IS_PASSTHRU) => match cmd.command {
                Command::Ack | Command::Nack => 8,
                _ => 4,
            },
            _ => 0,
        }
    }

    /// Module payload with pass-through addressing words removed.
    pub fn payload(&self) -> Words<'a> {
        let raw = self.raw_payload();
        Words::new(&raw[self.payload_skip().min(raw.len())..])
    }

    /// Length in bytes of [`payload`](Self::payload).
    pub fn payload_length(&self) -> usize {
        self.payload().as_bytes().len()
    }

    /// RTDL header of an RTDL command or of a data packet carrying one.
    pub fn rtdl_header(&self) -> Option<RtdlHeader> {
        let present = match self.info {
            Info::Command(cmd) => cmd.command == Command::Rtdl,
            Info::Data(data) => data.flags().contains(DataFlags::RTDL_PRESENT),
        };
        let raw = self.raw_payload();
        if !present || raw.len() < RTDL_HEADER_LEN {
            return None;
        }
        let words = Words::new(&raw[..RTDL_HEADER_LEN]);
        let mut out = [0u32; 6];
        for (slot, word) in out.iter_mut().zip(words.iter()) {
            *slot = word;
        }
        Some(RtdlHeader::from_words(out))
    }

    /// Event data following the optional RTDL header.
    pub fn data(&self) -> Words<'a> {
        let Some(data) = self.info.as_data() else {
            return Words::new(&[]);
        };
        let raw = self.raw_payload();
        let skip = if data.flags().contains(DataFlags::RTDL_PRESENT) {
            RTDL_HEADER_LEN.min(raw.len())
        } else {
            0
        };
        Words::new(&raw[skip..])
    }

    /// Length in bytes of [`data`](Self::data).
    pub fn data_length(&self) -> usize {
        self.data().as_bytes().len()
    }

    /// Neutron events as `(tof, pixel id)` pairs.
    pub fn events(&self) -> impl Iterator<Item = NeutronEvent> + use<'a> {
        self.data()
            .as_bytes()
            .chunks_exact(8)
            .map(|c| NeutronEvent {
                tof: u32::from_le_bytes([c[0], c[1], c[2], c[3]]),
                pixel_id: u32::from_le_bytes([c[4], c[5], c[6], c[7]]),
            })
    }

    /// Recover an LVDS command from a pass-through packet built by
    /// [`Packet::create_lvds`].
    pub fn decode_lvds(&self, addressing: Addressing) -> CodecResult<LvdsCommand> {
        let frames = Words::new(self.raw_payload()).to_vec();
        lvds::decode(self.raw_info(), &frames, addressing)
    }
}

/// Owned packet, typically an outgoing command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    bytes: Vec<u8>,
}

impl Packet {
    /// Assemble a packet from header fields and payload words.
    pub fn new(destination: u32, source: u32, info: u32, payload: &[u32]) -> CodecResult<Self> {
        let length = HEADER_LEN + payload.len() * 4;
        if length > PACKET_MAX_LENGTH {
            return Err(CodecError::PayloadTooLong {
                length,
                max: PACKET_MAX_LENGTH,
            });
        }
        let mut bytes = Vec::with_capacity(length);
        let payload_length = (payload.len() * 4) as u32;
        for word in [destination, source, info, payload_length, 0, 0]
            .iter()
            .chain(payload)
        {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        Ok(Self { bytes })
    }

    /// Copy a complete, valid packet out of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        let view = PacketRef::parse(bytes)?;
        let length = view.length();
        if length == 0 {
            return Err(CodecError::Misaligned {
                length: HEADER_LEN + view.raw_payload_length() as usize,
            });
        }
        if length > bytes.len() {
            return Err(CodecError::Truncated {
                needed: length,
                available: bytes.len(),
            });
        }
        Ok(Self {
            bytes: bytes[..length].to_vec(),
        })
    }

    /// Command addressed directly to a module reachable without
    /// pass-through, such as the DSP. `channel` is one based, 0 for none.
    pub fn create_occ(
        destination: u32,
        command: Command,
        channel: u8,
        payload: &[u32],
    ) -> CodecResult<Self> {
        let info = CommandInfo::new(command).with_channel(channel);
        Self::new(destination, HWID_SELF, info.to_raw(), payload)
    }

    /// Pass-through command for a submodule behind an aggregator.
    ///
    /// A trailing partial word in `payload` is zero padded. The outer
    /// header destination is always broadcast, the aggregator forwards
    /// the framed destination.
    pub fn create_lvds(
        destination: u32,
        command: Command,
        channel: u8,
        payload: &[u8],
    ) -> CodecResult<Self> {
        let framed_len = 2 * crate::consts::align_up(payload.len())
            + if destination != HWID_BROADCAST { 8 } else { 0 };
        let length = HEADER_LEN + framed_len;
        if length > PACKET_MAX_LENGTH {
            return Err(CodecError::PayloadTooLong {
                length,
                max: PACKET_MAX_LENGTH,
            });
        }
        let words: Vec<u32> = payload
            .chunks(4)
            .map(|c| {
                let mut word = [0u8; 4];
                word[..c.len()].copy_from_slice(c);
                u32::from_le_bytes(word)
            })
            .collect();
        let info = CommandInfo::new(command).with_channel(channel);
        let (raw_info, frames) = lvds::encode(info, destination, &words);
        Self::new(HWID_BROADCAST, HWID_SELF, raw_info, &frames)
    }

    /// Borrowed view.
    pub fn view(&self) -> PacketRef<'_> {
        PacketRef {
            bytes: &self.bytes,
            info: Info::from_raw(read_word(&self.bytes, 2).unwrap_or_default()),
        }
    }

    /// Encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume into the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(source: u32, raw_info: u32, payload: &[u32]) -> Packet {
        Packet::new(HWID_SELF, source, raw_info, payload).expect("packet")
    }

    #[test]
    fn parse_requires_header() {
        assert!(matches!(
            PacketRef::parse(&[0u8; 23]),
            Err(CodecError::Truncated { needed: 24, .. })
        ));
    }

    #[test]
    fn length_alignment_rules() {
        let mut bytes = Packet::new(1, 2, 0, &[0; 2]).expect("packet").into_bytes();
        assert_eq!(PacketRef::parse(&bytes).expect("view").length(), 32);

        bytes[12] = 6;
        assert_eq!(PacketRef::parse(&bytes).expect("view").length(), 0);

        let passthru_cmd = (CommandFlags::IS_COMMAND | CommandFlags::IS_PASSTHRU).bits();
        bytes[8..12].copy_from_slice(&passthru_cmd.to_le_bytes());
        let view = PacketRef::parse(&bytes).expect("view");
        assert_eq!(view.length(), 30);
        assert!(view.is_valid());
    }

    #[test]
    fn direct_ack_response_type() {
        let info = (CommandFlags::IS_COMMAND | CommandFlags::IS_RESPONSE).bits() | 0x3041;
        let pkt = response(0x1500_0001, info, &[0x22]);
        let view = pkt.view();
        assert_eq!(view.response_type(), Some(Command::ReadStatus));
        assert_eq!(view.source_address(), 0x1500_0001);
        assert_eq!(view.router_address(), 0);
        assert_eq!(view.payload_length(), 4);
        assert_eq!(view.module_type(), Some(ModuleType::Dsp));
    }

    #[test]
    fn passthru_ack_skips_addressing() {
        let info = (CommandFlags::IS_COMMAND
            | CommandFlags::IS_RESPONSE
            | CommandFlags::IS_PASSTHRU)
            .bits()
            | 0x41;
        let pkt = response(0x1500_0001, info, &[0x0A00_0001, 0x30, 0xCAFE]);
        let view = pkt.view();
        assert_eq!(view.response_type(), Some(Command::WriteConfig));
        assert_eq!(view.source_address(), 0x0A00_0001);
        assert_eq!(view.router_address(), 0x1500_0001);
        assert_eq!(view.payload().to_vec(), vec![0xCAFE]);
        assert_eq!(view.payload_length(), 4);
    }

    #[test]
    fn passthru_response_skips_one_word() {
        let info = (CommandFlags::IS_COMMAND
            | CommandFlags::IS_RESPONSE
            | CommandFlags::IS_PASSTHRU)
            .bits()
            | 0x20;
        let pkt = response(9, info, &[0x0A00_0001, 1, 2]);
        let view = pkt.view();
        assert_eq!(view.response_type(), Some(Command::ReadVersion));
        assert_eq!(view.payload().to_vec(), vec![1, 2]);
    }

    #[test]
    fn non_response_has_no_response_type() {
        let pkt = Packet::create_occ(5, Command::ReadStatus, 0, &[]).expect("packet");
        assert_eq!(pkt.view().response_type(), None);
        assert_eq!(pkt.view().source(), HWID_SELF);
    }

    #[test]
    fn rtdl_detection() {
        let cmd = Packet::create_occ(0, Command::Rtdl, 0, &[0; 6]).expect("packet");
        assert!(cmd.view().is_rtdl());
        assert!(cmd.view().rtdl_header().is_some());

        let data = Packet::new(0, 1, RTDL_DATA_INFO, &[]).expect("packet");
        assert!(data.view().is_rtdl());
        assert!(data.view().is_data());
    }

    #[test]
    fn neutron_events_follow_rtdl() {
        let info = (DataFlags::ONLY_NEUTRON_DATA | DataFlags::RTDL_PRESENT).bits();
        let mut payload = vec![100, 200, 0, 0, 0, 0];
        payload.extend_from_slice(&[11, 1001, 12, 1002]);
        let pkt = Packet::new(0, 1, info, &payload).expect("packet");
        let view = pkt.view();
        assert!(view.is_neutron_data());
        assert!(!view.is_meta_data());
        assert_eq!(view.rtdl_header().map(|h| h.timestamp_sec), Some(100));
        assert_eq!(view.data_length(), 16);
        let events: Vec<_> = view.events().collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], NeutronEvent { tof: 12, pixel_id: 1002 });
    }

    #[test]
    fn bad_packet_requires_command() {
        let bad = Packet::create_occ(0, Command::BadPacket, 0, &[]).expect("packet");
        assert!(bad.view().is_bad());
        let data = Packet::new(0, 0, 0xFF, &[]).expect("packet");
        assert!(!data.view().is_bad());
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let words = vec![0u32; PACKET_MAX_LENGTH / 4];
        assert!(matches!(
            Packet::create_occ(0, Command::WriteConfig, 0, &words),
            Err(CodecError::PayloadTooLong { .. })
        ));
        let bytes = vec![0u8; PACKET_MAX_LENGTH / 2];
        assert!(matches!(
            Packet::create_lvds(7, Command::WriteConfig, 0, &bytes),
            Err(CodecError::PayloadTooLong { .. })
        ));
    }

    #[test]
    fn lvds_partial_word_is_padded() {
        let pkt = Packet::create_lvds(HWID_BROADCAST, Command::WriteConfig, 0, &[1, 2, 3, 4, 5, 6])
            .expect("packet");
        let view = pkt.view();
        assert_eq!(view.raw_payload_length(), 16);
        let cmd = view.decode_lvds(Addressing::Broadcast).expect("decode");
        assert_eq!(cmd.words, vec![0x0403_0201, 0x0000_0605]);
    }

    #[test]
    fn from_bytes_copies_exact_length() {
        let pkt = Packet::create_occ(3, Command::Start, 0, &[1, 2]).expect("packet");
        let mut bytes = pkt.as_bytes().to_vec();
        bytes.extend_from_slice(&[0xEE; 8]);
        assert_eq!(Packet::from_bytes(&bytes).expect("copy"), pkt);
        assert!(matches!(
            Packet::from_bytes(&bytes[..28]),
            Err(CodecError::Truncated { .. })
        ));
    }
}
