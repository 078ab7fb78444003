//! The 32-bit info word, decoded once into command or data form.
//!
//! Bit 31 selects the interpretation. Command info carries the command
//! code, a selector byte (module type in responses, channel in channel
//! addressed requests) and the framing/role flags. Data info carries
//! sub-packet sequencing and the payload format.

use super::command::{Command, ModuleType};
use bitflags::bitflags;

bitflags! {
    /// Flag bits of a command info word (bits 16..=31).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CommandFlags: u32 {
        /// LVDS parity bit.
        const LVDS_PARITY = 1 << 16;
        /// Set only on the last word of an LVDS frame.
        const LVDS_STOP   = 1 << 17;
        /// Set only on the first word of an LVDS frame.
        const LVDS_START  = 1 << 18;
        /// Command (1) or data (0) LVDS word.
        const LVDS_CMD    = 1 << 19;
        /// Chained command.
        const IS_CHAIN    = 1 << 28;
        /// Packet answers a previous command.
        const IS_RESPONSE = 1 << 29;
        /// Packet relayed by an aggregator on behalf of a submodule.
        const IS_PASSTHRU = 1 << 30;
        /// Packet is a command rather than data.
        const IS_COMMAND  = 1 << 31;
    }
}

bitflags! {
    /// Flag bits of a data info word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DataFlags: u32 {
        /// First packet of a sub-packet train.
        const SUBPACKET_START   = 1 << 0;
        /// Last packet of a sub-packet train.
        const SUBPACKET_END     = 1 << 1;
        /// Payload holds neutron events only.
        const ONLY_NEUTRON_DATA = 1 << 2;
        /// An RTDL header precedes the events.
        const RTDL_PRESENT      = 1 << 3;
        /// Last sub-packet.
        const LAST_SUBPACKET    = 1 << 28;
        /// Vetoed packet.
        const VETO              = 1 << 30;
        /// Always clear for data packets.
        const IS_COMMAND        = 1 << 31;
    }
}

/// Bits 8..=11 of a command selector hold the channel number.
const CHANNEL_MASK: u8 = 0x0F;
/// Bit 12 of the info word marks a channel addressed command.
const IS_CHANNEL: u8 = 0x10;
const FLAGS_MASK: u32 = 0xFFFF_0000;
const FORMAT_SHIFT: u32 = 5;
const FORMAT_MASK: u32 = 0x7;
const SUBPACKET_SHIFT: u32 = 8;
const SUBPACKET_MASK: u32 = 0xFFFF;

/// Decoded command info.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandInfo {
    /// Command code.
    pub command: Command,
    /// Byte 1 of the info word: module type or channel selector.
    pub selector: u8,
    /// Role and framing flags.
    pub flags: CommandFlags,
}

impl CommandInfo {
    /// Command info for an outgoing command.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            selector: 0,
            flags: CommandFlags::IS_COMMAND,
        }
    }

    /// Module type reported in a response.
    pub fn module_type(&self) -> ModuleType {
        ModuleType::from(self.selector)
    }

    /// Zero based channel, if the command addresses a single channel.
    pub fn channel(&self) -> Option<u8> {
        (self.selector & IS_CHANNEL != 0).then_some(self.selector & CHANNEL_MASK)
    }

    /// Address a single channel. `channel` is one based, 0 clears the selection.
    pub fn with_channel(mut self, channel: u8) -> Self {
        self.selector = if channel > 0 {
            ((channel - 1) & CHANNEL_MASK) | IS_CHANNEL
        } else {
            0
        };
        self
    }

    /// Decode a raw info word, `None` unless it is a command word.
    pub fn from_raw_command(raw: u32) -> Option<Self> {
        (raw & CommandFlags::IS_COMMAND.bits() != 0).then(|| Self {
            command: Command::from((raw & 0xFF) as u8),
            selector: ((raw >> 8) & 0xFF) as u8,
            flags: CommandFlags::from_bits_retain(raw & FLAGS_MASK),
        })
    }

    /// Pack back into the raw info word.
    pub fn to_raw(&self) -> u32 {
        u32::from(u8::from(self.command)) | (u32::from(self.selector) << 8) | self.flags.bits()
    }
}

/// Decoded data info.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataInfo {
    raw: u32,
}

impl DataInfo {
    /// Flag bits, unknown bits retained.
    pub fn flags(&self) -> DataFlags {
        DataFlags::from_bits_retain(self.raw)
    }

    /// Payload format code, 0 for event data.
    pub fn format_code(&self) -> u8 {
        ((self.raw >> FORMAT_SHIFT) & FORMAT_MASK) as u8
    }

    /// Position within a sub-packet train.
    pub fn subpacket_count(&self) -> u16 {
        ((self.raw >> SUBPACKET_SHIFT) & SUBPACKET_MASK) as u16
    }

    /// Raw info word.
    pub fn to_raw(&self) -> u32 {
        self.raw
    }
}

/// Tagged interpretation of the info word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Info {
    /// Command, response or pass-through packet.
    Command(CommandInfo),
    /// Event or metadata packet.
    Data(DataInfo),
}

impl Info {
    /// Decode a raw info word.
    pub fn from_raw(raw: u32) -> Self {
        match CommandInfo::from_raw_command(raw) {
            Some(cmd) => Self::Command(cmd),
            None => Self::Data(DataInfo { raw }),
        }
    }

    /// Encode back into the raw info word.
    pub fn to_raw(&self) -> u32 {
        match self {
            Self::Command(cmd) => cmd.to_raw(),
            Self::Data(data) => data.to_raw(),
        }
    }

    /// Command view, if this is a command info word.
    pub fn as_command(&self) -> Option<&CommandInfo> {
        match self {
            Self::Command(cmd) => Some(cmd),
            Self::Data(_) => None,
        }
    }

    /// Data view, if this is a data info word.
    pub fn as_data(&self) -> Option<&DataInfo> {
        match self {
            Self::Data(data) => Some(data),
            Self::Command(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_word_roundtrips() {
        let raw = 0xE00A_3041;
        let info = Info::from_raw(raw);
        let cmd = info.as_command().expect("command info");
        assert_eq!(cmd.command, Command::Ack);
        assert_eq!(cmd.module_type(), ModuleType::Dsp);
        assert!(cmd.flags.contains(CommandFlags::IS_RESPONSE));
        assert!(cmd.flags.contains(CommandFlags::IS_PASSTHRU));
        assert_eq!(info.to_raw(), raw);
    }

    #[test]
    fn data_word_fields() {
        let raw = (7 << 8) | 0b1101;
        let info = Info::from_raw(raw);
        let data = info.as_data().expect("data info");
        assert!(data.flags().contains(DataFlags::ONLY_NEUTRON_DATA));
        assert!(data.flags().contains(DataFlags::RTDL_PRESENT));
        assert!(!data.flags().contains(DataFlags::SUBPACKET_END));
        assert_eq!(data.format_code(), 0);
        assert_eq!(data.subpacket_count(), 7);
        assert_eq!(info.to_raw(), raw);
    }

    #[test]
    fn channel_selection() {
        let info = CommandInfo::new(Command::ReadStatus).with_channel(3);
        assert_eq!(info.channel(), Some(2));
        assert_eq!(info.with_channel(0).channel(), None);
        assert_eq!(CommandInfo::new(Command::Start).with_channel(17).channel(), Some(0));
    }
}
