//! Command codes and module type identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! byte_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
            /// Code not known to this library, preserved verbatim.
            Unknown(u8),
        }

        impl From<u8> for $name {
            fn from(raw: u8) -> Self {
                match raw {
                    $( $value => Self::$variant, )+
                    other => Self::Unknown(other),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> u8 {
                match value {
                    $( $name::$variant => $value, )+
                    $name::Unknown(other) => other,
                }
            }
        }
    };
}

byte_enum! {
    /// 8-bit command code carried in the command info word.
    pub enum Command {
        /// Read module hardware and firmware version.
        ReadVersion = 0x20,
        /// Read back the active configuration.
        ReadConfig = 0x21,
        /// Read status registers.
        ReadStatus = 0x22,
        /// Read module temperature.
        ReadTemperature = 0x23,
        /// Read status counters.
        ReadStatusCounters = 0x24,
        /// Clear status counters.
        ResetStatusCounters = 0x25,
        /// Write a full configuration block.
        WriteConfig = 0x30,
        /// Negative acknowledge of a previous command.
        Nack = 0x40,
        /// Positive acknowledge of a previous command.
        Ack = 0x41,
        /// Send data to the high voltage controller.
        HvSend = 0x50,
        /// Data received from the high voltage controller.
        HvRecv = 0x51,
        /// Enumerate modules behind a link.
        Discover = 0x80,
        /// Reset module.
        Reset = 0x81,
        /// Start acquisition.
        Start = 0x82,
        /// Stop acquisition.
        Stop = 0x83,
        /// Time synchronisation.
        Tsync = 0x84,
        /// Real-time data link information.
        Rtdl = 0x85,
        /// Packet flagged as corrupt by the link adapter.
        BadPacket = 0xFF,
    }
}

byte_enum! {
    /// Front-end module families, as reported in response packets.
    #[derive(Serialize, Deserialize)]
    #[serde(from = "u8", into = "u8")]
    pub enum ModuleType {
        /// Readout card (also LPSD).
        Roc = 0x20,
        /// Anger camera readout card.
        Aroc = 0x21,
        /// He-3 tube readout card.
        Hroc = 0x22,
        /// BNL detector readout card.
        BnlRoc = 0x25,
        /// Crossed-fiber readout card.
        Croc = 0x29,
        /// Integrating readout card.
        Iroc = 0x2A,
        /// Two-dimensional readout card.
        BiDimRoc = 0x2B,
        /// ADC readout card.
        AdcRoc = 0x2D,
        /// Detector signal processor, the link aggregator.
        Dsp = 0x30,
        /// Detector signal processor, wide variant.
        DspW = 0x31,
        /// Small-angle scattering readout card.
        SansRoc = 0x40,
        /// Anger camera position calculator.
        Acpc = 0xA0,
        /// Position calculator front-end module.
        AcpcFem = 0xA1,
        /// Flat field correction module.
        Ffc = 0xA2,
        /// Front-end module.
        Fem = 0xAA,
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "0x{code:02X}"),
            other => write!(f, "{other:?}"),
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "unknown(0x{code:02X})"),
            other => write!(f, "{}", format!("{other:?}").to_lowercase()),
        }
    }
}

impl ModuleType {
    /// True for the modules addressed with direct (non pass-through) packets.
    pub fn is_dsp(self) -> bool {
        matches!(self, Self::Dsp | Self::DspW)
    }
}
